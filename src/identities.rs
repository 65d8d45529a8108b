use anyhow::Context as _;
use log::debug;
use rotation_data::identities::IdentityFile;
use std::path::Path;
use sync_rotation::IdentityMap;

pub(crate) fn load_file(path: &Path) -> anyhow::Result<IdentityFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let file: IdentityFile =
        toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))?;
    debug!("loaded {} identities from {}", file.people.len(), path.display());
    Ok(file)
}

/// Load and validate the identity file, producing the map the rotation runs with.
pub(crate) fn load(path: &Path) -> anyhow::Result<IdentityMap> {
    let file = load_file(path)?;
    crate::validate::validate(&file)
        .with_context(|| format!("invalid identity file {}", path.display()))?;
    Ok(IdentityMap::from(&file))
}
