//! Schema of the operator-maintained `identities.toml` file, mapping
//! VictorOps usernames to Discord user ids.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct IdentityFile {
    /// Keyed by VictorOps username.
    #[serde(default)]
    pub people: IndexMap<String, PersonIdentity>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PersonIdentity {
    pub discord_id: u64,
    /// Display name, only used in logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl IdentityFile {
    pub fn discord_id(&self, victorops_username: &str) -> Option<u64> {
        self.people.get(victorops_username).map(|p| p.discord_id)
    }
}
