use anyhow::bail;
use log::error;
use rotation_data::identities::IdentityFile;
use std::collections::HashMap;

/// Discord ids are snowflakes: everything above the low 22 bits is a timestamp,
/// so anything smaller than this can't be a real account.
const MIN_SNOWFLAKE: u64 = 1 << 22;

pub(crate) fn validate(file: &IdentityFile) -> anyhow::Result<()> {
    let mut errors = Vec::new();

    validate_not_empty(file, &mut errors);
    validate_usernames(file, &mut errors);
    validate_discord_ids(file, &mut errors);
    validate_unique_discord_ids(file, &mut errors);

    if !errors.is_empty() {
        for err in &errors {
            error!("validation error: {err}");
        }

        bail!("{} validation errors found", errors.len());
    }

    Ok(())
}

/// Ensure there is at least somebody to hand the rotation to
fn validate_not_empty(file: &IdentityFile, errors: &mut Vec<String>) {
    if file.people.is_empty() {
        errors.push("the identity file maps no VictorOps users".to_string());
    }
}

/// Ensure the keys look like VictorOps usernames
fn validate_usernames(file: &IdentityFile, errors: &mut Vec<String>) {
    for username in file.people.keys() {
        if username.is_empty() {
            errors.push("empty VictorOps username".to_string());
        } else if username.chars().any(char::is_whitespace) {
            errors.push(format!(
                "VictorOps username `{username}` contains whitespace"
            ));
        }
    }
}

fn validate_discord_ids(file: &IdentityFile, errors: &mut Vec<String>) {
    for (username, person) in &file.people {
        if person.discord_id < MIN_SNOWFLAKE {
            errors.push(format!(
                "`{username}` is mapped to {}, which is not a Discord user id",
                person.discord_id
            ));
        }
    }
}

/// Ensure no Discord account is claimed by two VictorOps users
fn validate_unique_discord_ids(file: &IdentityFile, errors: &mut Vec<String>) {
    let mut seen: HashMap<u64, &str> = HashMap::new();
    for (username, person) in &file.people {
        if let Some(previous) = seen.insert(person.discord_id, username) {
            errors.push(format!(
                "`{username}` and `{previous}` are both mapped to Discord user {}",
                person.discord_id
            ));
        }
    }
}
