mod discord;
mod errors;
mod utils;
mod victorops;

#[cfg(test)]
mod tests;

pub use crate::discord::api::{
    AllowedMentions, Channel, ChannelId, ChannelKind, CreateMessage, DiscordConnector,
    DiscordSession, Guild, GuildId, Member, MentionKind, OverwriteKind, PermissionOverwrite, Role,
    RoleId, User, UserId,
};
pub use crate::discord::message::DEFAULT_SUPPORT_ISSUES_URL;
pub use crate::discord::permissions::Permissions;
pub use crate::discord::{ChatConnector, ChatSession, RoleSyncReport, with_session};
pub use crate::errors::{ChatPlatformError, IncidentApiError};
pub use crate::victorops::{IdentityMap, Oncall, OncallRead, VictorOpsApi, resolve_oncall_user};

use anyhow::Context;
use log::{debug, info};
use secrecy::SecretString;

/// Settings of one rotation run.
pub struct RotationConfig {
    pub bot_token: SecretString,
    pub channel_id: ChannelId,
    pub support_role_id: RoleId,
    pub support_issues_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationOutcome {
    pub oncall: Oncall,
    pub roles: RoleSyncReport,
}

/// Hand the support rotation over to whoever VictorOps says is on call:
/// announce them in the configured channel, then move the support role to them.
///
/// Every step depends on the previous one; the first failure aborts the run.
/// The chat session is closed exactly once on every path, including when the
/// on-call lookup fails before it logs in.
pub fn run_rotation<C: ChatConnector>(
    config: &RotationConfig,
    incident_api: &dyn OncallRead,
    identities: &IdentityMap,
    connector: &C,
) -> anyhow::Result<RotationOutcome> {
    let outcome = with_session(connector, |session| {
        let oncall = resolve_oncall_user(incident_api, identities)
            .context("failed to resolve the on-call engineer")?;

        session
            .login(&config.bot_token)
            .context("failed to open the chat session")?;
        let session = &*session;

        let channel = discord::resolve_channel(session, config.channel_id)
            .context("failed to resolve the announcement channel")?;
        let guild = discord::resolve_guild(session, &channel)?;
        discord::check_send_permission(session, &guild, &channel)
            .context("cannot announce the rotation")?;

        discord::announce(
            session,
            &guild,
            &channel,
            oncall.user_id,
            config.support_role_id,
            &config.support_issues_url,
        )
        .context("failed to announce the rotation")?;

        let role = discord::resolve_role(&guild, config.support_role_id)?;
        let roles = discord::sync_role(session, &guild, &role, oncall.user_id)
            .context("failed to hand over the support role")?;
        Ok(RotationOutcome { oncall, roles })
    })?;

    if outcome.roles.removed_from.contains(&outcome.oncall.user_id) {
        debug!("{} already held the support role", outcome.oncall.user_id);
    }
    info!(
        "successfully handled the on-call rotation to {} ({})",
        outcome.oncall.username, outcome.oncall.user_id
    );
    Ok(outcome)
}
