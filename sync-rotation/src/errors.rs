use crate::discord::api::{ChannelId, RoleId, UserId};
use reqwest::StatusCode;

/// Failures talking to VictorOps or interpreting what it returned.
#[derive(Debug, thiserror::Error)]
pub enum IncidentApiError {
    #[error("VictorOps API error: {status} (body: {body:?})")]
    Status { status: StatusCode, body: String },
    #[error("no team is currently on call")]
    NoTeam,
    #[error("no active shift for team {team}")]
    NoActiveShift { team: String },
    #[error("no assigned user in the active shift of team {team}")]
    NoAssignedUser { team: String },
    #[error("no chat mapping for user {username}")]
    UnmappedUser { username: String },
}

impl IncidentApiError {
    /// The HTTP status of the failed call, if the failure came from one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            IncidentApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChatPlatformError {
    #[error("invalid channel: {0} is not a text channel of a server")]
    InvalidChannel(ChannelId),
    #[error("missing send permission in channel {0}")]
    MissingSendPermission(ChannelId),
    #[error("member not found: {0}")]
    MemberNotFound(UserId),
    #[error("failed to remove role {role} from {} member(s): {}", .members.len(), join(.members))]
    RoleRemovalFailed { role: RoleId, members: Vec<UserId> },
}

fn join(ids: &[UserId]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
