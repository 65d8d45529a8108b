pub(crate) mod api;
pub(crate) mod message;
pub(crate) mod permissions;

use self::api::{
    AllowedMentions, Channel, ChannelId, CreateMessage, Guild, GuildId, Member, Role, RoleId, User,
    UserId,
};
use self::permissions::Permissions;
use crate::errors::ChatPlatformError;
use anyhow::{Context, bail};
use log::{debug, error, info, warn};
use rayon::prelude::*;
use secrecy::SecretString;

/// Creates chat sessions.
pub trait ChatConnector {
    type Session: ChatSession;

    /// A session handle that is not logged in yet. Must not touch the network.
    fn session(&self) -> Self::Session;
}

/// The chat platform operations the rotation needs.
///
/// Lookups return `Ok(None)` when the platform reports the object as unknown.
/// Sessions are shared across threads while the role is drained.
pub trait ChatSession: Sync {
    /// Authenticate with the bot token. A session is logged in at most once.
    fn login(&mut self, token: &SecretString) -> anyhow::Result<()>;

    /// The identity the session authenticated as.
    fn current_user(&self) -> Option<&User>;

    fn channel(&self, id: ChannelId) -> anyhow::Result<Option<Channel>>;

    /// Get a guild together with its roles
    fn guild(&self, id: GuildId) -> anyhow::Result<Option<Guild>>;

    fn member(&self, guild: GuildId, user: UserId) -> anyhow::Result<Option<Member>>;

    /// Get every member of the guild
    fn members(&self, guild: GuildId) -> anyhow::Result<Vec<Member>>;

    fn add_member_role(&self, guild: GuildId, user: UserId, role: RoleId) -> anyhow::Result<()>;

    fn remove_member_role(&self, guild: GuildId, user: UserId, role: RoleId)
    -> anyhow::Result<()>;

    fn send_message(&self, channel: ChannelId, message: &CreateMessage) -> anyhow::Result<()>;

    /// Tear the session down. Called exactly once by [`with_session`].
    fn close(&mut self) -> anyhow::Result<()>;
}

/// Closes the session when dropped, so that panics in the body tear it down too.
struct SessionGuard<S: ChatSession> {
    session: S,
}

impl<S: ChatSession> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        if let Err(err) = self.session.close() {
            warn!("failed to close the chat session: {err:#}");
        }
    }
}

/// Run `body` with a fresh chat session, closing it afterwards no matter how
/// `body` exits. The session is handed over before it is logged in, so work
/// that does not need the chat platform can run first and still be covered by
/// the teardown. Teardown errors are logged and never replace the result of
/// `body`.
pub fn with_session<C, T, F>(connector: &C, body: F) -> anyhow::Result<T>
where
    C: ChatConnector,
    F: FnOnce(&mut C::Session) -> anyhow::Result<T>,
{
    let mut guard = SessionGuard {
        session: connector.session(),
    };
    let result = body(&mut guard.session);
    drop(guard);
    result
}

pub(crate) fn resolve_channel<S: ChatSession>(
    session: &S,
    id: ChannelId,
) -> anyhow::Result<Channel> {
    match session.channel(id)? {
        Some(channel) if channel.is_guild_text() => Ok(channel),
        Some(channel) => {
            debug!("channel {id} has type {:?}", channel.kind);
            Err(ChatPlatformError::InvalidChannel(id).into())
        }
        None => Err(ChatPlatformError::InvalidChannel(id).into()),
    }
}

pub(crate) fn resolve_guild<S: ChatSession>(
    session: &S,
    channel: &Channel,
) -> anyhow::Result<Guild> {
    let Some(guild_id) = channel.guild_id else {
        bail!("channel {} does not belong to a guild", channel.id);
    };
    session
        .guild(guild_id)?
        .with_context(|| format!("guild {guild_id} of channel {} not found", channel.id))
}

/// Fail unless the session's own user may post in `channel`.
pub(crate) fn check_send_permission<S: ChatSession>(
    session: &S,
    guild: &Guild,
    channel: &Channel,
) -> anyhow::Result<()> {
    let me = session
        .current_user()
        .context("the chat session has no current user")?;
    let member = session
        .member(guild.id, me.id)?
        .with_context(|| format!("the bot user {} is not a member of guild {}", me.id, guild.id))?;

    let permissions = permissions::channel_permissions(guild, &member, channel);
    debug!("bot permissions in channel {}: {permissions:?}", channel.id);
    if !permissions.contains(Permissions::SEND_MESSAGES) {
        return Err(ChatPlatformError::MissingSendPermission(channel.id).into());
    }
    Ok(())
}

pub(crate) fn announce<S: ChatSession>(
    session: &S,
    guild: &Guild,
    channel: &Channel,
    user: UserId,
    role: RoleId,
    support_issues_url: &str,
) -> anyhow::Result<()> {
    let member = session
        .member(guild.id, user)?
        .ok_or(ChatPlatformError::MemberNotFound(user))?;
    debug!("announcing {} ({user}) in channel {}", member.user.username, channel.id);

    let content = message::suppress_link_previews(&message::render_announcement(
        user,
        role,
        support_issues_url,
    ));
    session.send_message(
        channel.id,
        &CreateMessage {
            content,
            allowed_mentions: AllowedMentions::users_only(),
        },
    )
}

pub(crate) fn resolve_role(guild: &Guild, id: RoleId) -> anyhow::Result<Role> {
    guild
        .role(id)
        .cloned()
        .with_context(|| format!("support role {id} not found in guild {}", guild.id))
}

/// What [`sync_role`] changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSyncReport {
    pub removed_from: Vec<UserId>,
    pub assigned_to: UserId,
}

/// Move `role` to `new_holder`: drain it from every current holder concurrently,
/// then grant it. Nothing is rolled back if the drain partially fails, and the
/// assignment is not attempted.
pub(crate) fn sync_role<S: ChatSession>(
    session: &S,
    guild: &Guild,
    role: &Role,
    new_holder: UserId,
) -> anyhow::Result<RoleSyncReport> {
    let holders = session
        .members(guild.id)
        .context("failed to list the guild members")?
        .into_iter()
        .filter(|m| m.has_role(role.id))
        .map(|m| m.user.id)
        .collect::<Vec<_>>();
    debug!(
        "role '{}' ({}) is currently held by {holders:?}",
        role.name, role.id
    );

    let failed = holders
        .par_iter()
        .filter_map(|&user| {
            session
                .remove_member_role(guild.id, user, role.id)
                .err()
                .map(|err| (user, err))
        })
        .collect::<Vec<_>>();
    if !failed.is_empty() {
        for (user, err) in &failed {
            error!("failed to remove role {} from {user}: {err:#}", role.id);
        }
        let mut members = failed.into_iter().map(|(user, _)| user).collect::<Vec<_>>();
        members.sort_unstable();
        return Err(ChatPlatformError::RoleRemovalFailed {
            role: role.id,
            members,
        }
        .into());
    }

    if session.member(guild.id, new_holder)?.is_none() {
        return Err(ChatPlatformError::MemberNotFound(new_holder).into());
    }
    session.add_member_role(guild.id, new_holder, role.id)?;
    info!("role '{}' now belongs to {new_holder}", role.name);

    Ok(RoleSyncReport {
        removed_from: holders,
        assigned_to: new_holder,
    })
}
