use crate::discord::permissions::Permissions;
use crate::discord::{ChatConnector, ChatSession};
use crate::utils::ResponseExt;
use anyhow::{Context, bail};
use log::{debug, info, trace, warn};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;
use std::time::Duration;

pub(crate) const DISCORD_BASE_URL: &str = "https://discord.com/api/v10";

/// Discord rejects bots whose user agent doesn't follow this format.
const USER_AGENT: &str = concat!(
    "DiscordBot (oncall-rotation, ",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// Largest page the guild member listing endpoint accepts.
pub(crate) const MEMBERS_PAGE_SIZE: usize = 1000;

const MAX_RATE_LIMIT_RETRIES: u32 = 5;
const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(1);
const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);

macro_rules! snowflake {
    ($($(#[$meta:meta])* $name:ident;)*) => {$(
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse().map($name)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                deserialize_u64_string(deserializer).map($name)
            }
        }
    )*};
}

snowflake! {
    UserId;
    ChannelId;
    /// The id of a guild is also the id of its `@everyone` role.
    GuildId;
    RoleId;
}

impl GuildId {
    pub fn everyone_role(self) -> RoleId {
        RoleId(self.0)
    }
}

/// Discord encodes 64 bit integers (ids, permission sets) as JSON strings.
pub(crate) fn deserialize_u64_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<u64, D::Error> {
    struct U64Visitor;

    impl Visitor<'_> for U64Visitor {
        type Value = u64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an unsigned 64 bit integer, possibly encoded as a string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<u64, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<u64, E> {
            u64::try_from(v).map_err(E::custom)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<u64, E> {
            v.parse().map_err(E::custom)
        }
    }

    deserializer.deserialize_any(U64Visitor)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    #[serde(rename = "type")]
    pub kind: ChannelKind,
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    #[serde(default)]
    pub permission_overwrites: Vec<PermissionOverwrite>,
}

impl Channel {
    /// Whether the channel accepts regular messages, i.e. it is a server channel with a
    /// text chat. Threads inherit their overwrites from their parent and are not accepted.
    pub fn is_guild_text(&self) -> bool {
        self.guild_id.is_some()
            && matches!(
                self.kind,
                ChannelKind::GUILD_TEXT
                    | ChannelKind::GUILD_VOICE
                    | ChannelKind::GUILD_ANNOUNCEMENT
                    | ChannelKind::GUILD_STAGE_VOICE
            )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelKind(pub u8);

impl ChannelKind {
    pub const GUILD_TEXT: ChannelKind = ChannelKind(0);
    pub const DM: ChannelKind = ChannelKind(1);
    pub const GUILD_VOICE: ChannelKind = ChannelKind(2);
    pub const GUILD_CATEGORY: ChannelKind = ChannelKind(4);
    pub const GUILD_ANNOUNCEMENT: ChannelKind = ChannelKind(5);
    pub const GUILD_STAGE_VOICE: ChannelKind = ChannelKind(13);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionOverwrite {
    /// Either a role or a user id, depending on `kind`.
    #[serde(deserialize_with = "deserialize_u64_string")]
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: OverwriteKind,
    pub allow: Permissions,
    pub deny: Permissions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum OverwriteKind {
    Role,
    Member,
}

impl TryFrom<u8> for OverwriteKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(OverwriteKind::Role),
            1 => Ok(OverwriteKind::Member),
            other => Err(format!("unknown permission overwrite type {other}")),
        }
    }
}

impl From<OverwriteKind> for u8 {
    fn from(value: OverwriteKind) -> u8 {
        match value {
            OverwriteKind::Role => 0,
            OverwriteKind::Member => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guild {
    pub id: GuildId,
    pub name: String,
    pub owner_id: UserId,
    #[serde(default)]
    pub roles: Vec<Role>,
}

impl Guild {
    pub fn role(&self, id: RoleId) -> Option<&Role> {
        self.roles.iter().find(|r| r.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub permissions: Permissions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub user: User,
    #[serde(default)]
    pub roles: Vec<RoleId>,
}

impl Member {
    pub fn has_role(&self, role: RoleId) -> bool {
        self.roles.contains(&role)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateMessage {
    pub content: String,
    pub allowed_mentions: AllowedMentions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllowedMentions {
    pub parse: Vec<MentionKind>,
}

impl AllowedMentions {
    /// Only explicit user mentions notify anyone.
    pub fn users_only() -> Self {
        AllowedMentions {
            parse: vec![MentionKind::Users],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MentionKind {
    Users,
}

/// Opens sessions against the Discord REST API.
#[derive(Clone)]
pub struct DiscordConnector {
    base_url: String,
    dry_run: bool,
}

impl DiscordConnector {
    pub fn new(dry_run: bool) -> Self {
        let base_url = std::env::var("DISCORD_API_BASE_URL")
            .unwrap_or_else(|_| DISCORD_BASE_URL.to_string());
        Self::with_base_url(base_url, dry_run)
    }

    pub fn with_base_url(base_url: impl Into<String>, dry_run: bool) -> Self {
        Self {
            base_url: base_url.into(),
            dry_run,
        }
    }
}

impl ChatConnector for DiscordConnector {
    type Session = DiscordSession;

    fn session(&self) -> DiscordSession {
        DiscordSession {
            client: None,
            base_url: self.base_url.clone(),
            me: None,
            dry_run: self.dry_run,
            closed: false,
        }
    }
}

/// Body of a `429 Too Many Requests` response.
#[derive(Deserialize)]
struct RateLimited {
    retry_after: f64,
}

/// A Discord REST session. Requests fail until [`ChatSession::login`] succeeds.
pub struct DiscordSession {
    client: Option<Client>,
    base_url: String,
    me: Option<User>,
    dry_run: bool,
    closed: bool,
}

impl DiscordSession {
    fn req(&self, method: Method, path: &str) -> anyhow::Result<RequestBuilder> {
        let client = self
            .client
            .as_ref()
            .context("the Discord session is not logged in")?;
        let url = format!("{}{path}", self.base_url);
        trace!("http request: {method} {url}");
        Ok(client.request(method, url))
    }

    /// Send `request`, waiting out rate limits before retrying it.
    fn send(&self, request: RequestBuilder) -> anyhow::Result<Response> {
        let mut attempt = 0;
        loop {
            let response = request
                .try_clone()
                .context("the request cannot be retried")?
                .send()?;
            if response.status() != StatusCode::TOO_MANY_REQUESTS
                || attempt == MAX_RATE_LIMIT_RETRIES
            {
                return Ok(response);
            }
            attempt += 1;
            let wait = retry_after(response);
            warn!("rate limited by Discord, retrying in {wait:?} (attempt {attempt})");
            std::thread::sleep(wait);
        }
    }

    fn member_role(
        &self,
        method: Method,
        guild: GuildId,
        user: UserId,
        role: RoleId,
    ) -> anyhow::Result<()> {
        if self.dry_run {
            return Ok(());
        }
        let request = self.req(
            method,
            &format!("/guilds/{guild}/members/{user}/roles/{role}"),
        )?;
        self.send(request)?.custom_error_for_status()?;
        Ok(())
    }
}

/// How long Discord asks us to wait. The body is more precise than the header.
fn retry_after(response: Response) -> Duration {
    let header = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<f64>().ok());
    let body = response.json::<RateLimited>().ok().map(|r| r.retry_after);
    body.or(header)
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .unwrap_or(DEFAULT_RATE_LIMIT_WAIT)
        .min(MAX_RATE_LIMIT_WAIT)
}

impl ChatSession for DiscordSession {
    fn login(&mut self, token: &SecretString) -> anyhow::Result<()> {
        if self.closed || self.client.is_some() {
            bail!("the Discord session cannot be opened twice");
        }
        let mut map = HeaderMap::default();
        let mut auth = HeaderValue::from_str(&format!("Bot {}", token.expose_secret()))
            .context("the Discord bot token is not a valid header value")?;
        auth.set_sensitive(true);
        map.insert(header::AUTHORIZATION, auth);
        map.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
        self.client = Some(
            reqwest::blocking::ClientBuilder::default()
                .default_headers(map)
                .build()?,
        );

        let request = self.req(Method::GET, "/users/@me")?;
        let me: User = self
            .send(request)?
            .custom_error_for_status()
            .context("failed to authenticate with the Discord bot token")?
            .json_annotated()?;
        info!("connected to Discord as {} ({})", me.username, me.id);
        self.me = Some(me);
        Ok(())
    }

    fn current_user(&self) -> Option<&User> {
        self.me.as_ref()
    }

    fn channel(&self, id: ChannelId) -> anyhow::Result<Option<Channel>> {
        let request = self.req(Method::GET, &format!("/channels/{id}"))?;
        self.send(request)?.json_optional()
    }

    fn guild(&self, id: GuildId) -> anyhow::Result<Option<Guild>> {
        let request = self.req(Method::GET, &format!("/guilds/{id}"))?;
        self.send(request)?.json_optional()
    }

    fn member(&self, guild: GuildId, user: UserId) -> anyhow::Result<Option<Member>> {
        let request = self.req(Method::GET, &format!("/guilds/{guild}/members/{user}"))?;
        self.send(request)?.json_optional()
    }

    fn members(&self, guild: GuildId) -> anyhow::Result<Vec<Member>> {
        let mut members = Vec::new();
        let mut after = UserId(0);
        loop {
            let request = self
                .req(Method::GET, &format!("/guilds/{guild}/members"))?
                .query(&[
                    ("limit", MEMBERS_PAGE_SIZE.to_string()),
                    ("after", after.to_string()),
                ]);
            let page: Vec<Member> = self
                .send(request)?
                .custom_error_for_status()?
                .json_annotated()?;
            let full_page = page.len() == MEMBERS_PAGE_SIZE;
            if let Some(last) = page.iter().map(|m| m.user.id).max() {
                after = last;
            }
            members.extend(page);
            if !full_page {
                break;
            }
        }
        debug!("fetched {} members of guild {guild}", members.len());
        Ok(members)
    }

    fn add_member_role(&self, guild: GuildId, user: UserId, role: RoleId) -> anyhow::Result<()> {
        info!("adding role {role} to member {user}");
        self.member_role(Method::PUT, guild, user, role)
    }

    fn remove_member_role(
        &self,
        guild: GuildId,
        user: UserId,
        role: RoleId,
    ) -> anyhow::Result<()> {
        info!("removing role {role} from member {user}");
        self.member_role(Method::DELETE, guild, user, role)
    }

    fn send_message(&self, channel: ChannelId, message: &CreateMessage) -> anyhow::Result<()> {
        info!("sending message to channel {channel}");
        debug!("message content: {}", message.content);
        if self.dry_run {
            return Ok(());
        }
        let request = self
            .req(Method::POST, &format!("/channels/{channel}/messages"))?
            .json(message);
        self.send(request)?.custom_error_for_status()?;
        Ok(())
    }

    fn close(&mut self) -> anyhow::Result<()> {
        if self.closed {
            warn!("the Discord session was closed twice");
            return Ok(());
        }
        self.closed = true;
        self.me = None;
        if self.client.take().is_some() {
            debug!("closed the Discord session");
        }
        Ok(())
    }
}
