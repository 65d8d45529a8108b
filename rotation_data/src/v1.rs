//! Wire format of the VictorOps public API `oncall/current` endpoint.

use serde::{Deserialize, Deserializer, Serialize};

pub static BASE_URL: &str = "https://api.victorops.com";

pub static ONCALL_CURRENT_PATH: &str = "/api-public/v1/oncall/current";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OncallCurrent {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub teams_on_call: Vec<TeamOnCall>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TeamOnCall {
    pub team: Option<Team>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub oncall_now: Vec<OncallNow>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Team {
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OncallNow {
    pub escalation_policy: Option<EscalationPolicy>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub users: Vec<OncallUserEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EscalationPolicy {
    pub name: String,
    pub slug: String,
}

/// The upstream field really is spelled `onCalluser`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OncallUserEntry {
    #[serde(rename = "onCalluser")]
    pub on_call_user: Option<OncallUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OncallUser {
    pub username: String,
}

/// VictorOps sends `null` for levels with nothing on call.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
