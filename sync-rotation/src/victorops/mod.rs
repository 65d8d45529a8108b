mod api;

pub use api::VictorOpsApi;

use crate::discord::api::UserId;
use crate::errors::IncidentApiError;
use log::{debug, info};
use rotation_data::identities::IdentityFile;
use rotation_data::v1;
use std::collections::HashMap;

/// Read access to the incident management service.
pub trait OncallRead {
    /// Get the current on-call state of every team
    fn current_oncall(&self) -> anyhow::Result<v1::OncallCurrent>;
}

/// VictorOps username to Discord user id, fixed for the lifetime of the process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityMap {
    ids: HashMap<String, UserId>,
}

impl IdentityMap {
    pub fn get(&self, victorops_username: &str) -> Option<UserId> {
        self.ids.get(victorops_username).copied()
    }
}

impl From<&IdentityFile> for IdentityMap {
    fn from(file: &IdentityFile) -> Self {
        IdentityMap {
            ids: file
                .people
                .iter()
                .map(|(username, person)| (username.clone(), UserId(person.discord_id)))
                .collect(),
        }
    }
}

impl<'a> FromIterator<(&'a str, UserId)> for IdentityMap {
    fn from_iter<I: IntoIterator<Item = (&'a str, UserId)>>(iter: I) -> Self {
        IdentityMap {
            ids: iter
                .into_iter()
                .map(|(name, id)| (name.to_string(), id))
                .collect(),
        }
    }
}

/// The person currently on call, as seen by VictorOps and mapped to Discord.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Oncall {
    pub team: String,
    pub username: String,
    pub user_id: UserId,
}

/// Pick the first user of the first active shift of the first team on call
/// and map them to their Discord id.
pub fn resolve_oncall_user(
    incident_api: &dyn OncallRead,
    identities: &IdentityMap,
) -> anyhow::Result<Oncall> {
    let current = incident_api.current_oncall()?;

    let team = current
        .teams_on_call
        .first()
        .ok_or(IncidentApiError::NoTeam)?;
    let team_name = team
        .team
        .as_ref()
        .map(|t| t.name.clone())
        .unwrap_or_else(|| "<unnamed>".to_string());

    let shift = team
        .oncall_now
        .first()
        .ok_or_else(|| IncidentApiError::NoActiveShift {
            team: team_name.clone(),
        })?;
    if let Some(policy) = &shift.escalation_policy {
        debug!("team '{team_name}' is on call through policy '{}'", policy.slug);
    }

    let user = shift
        .users
        .first()
        .and_then(|u| u.on_call_user.as_ref())
        .ok_or_else(|| IncidentApiError::NoAssignedUser {
            team: team_name.clone(),
        })?;

    let user_id = identities
        .get(&user.username)
        .ok_or_else(|| IncidentApiError::UnmappedUser {
            username: user.username.clone(),
        })?;
    info!(
        "VictorOps user '{}' of team '{team_name}' is on call (Discord id {user_id})",
        user.username
    );

    Ok(Oncall {
        team: team_name,
        username: user.username.clone(),
        user_id,
    })
}
