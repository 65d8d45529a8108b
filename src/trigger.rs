//! The ways a rotation gets started. Every trigger ends up in [`Rotation::run`].

use anyhow::Context as _;
use log::{info, warn};
use secrecy::SecretString;
use serde::Deserialize;
use std::io::Read as _;
use std::path::Path;
use sync_rotation::{
    DiscordConnector, IdentityMap, RotationConfig, RotationOutcome, VictorOpsApi, run_rotation,
};

/// Everything one rotation run needs, fixed at startup.
pub(crate) struct Rotation {
    pub(crate) config: RotationConfig,
    pub(crate) victorops_api_id: SecretString,
    pub(crate) victorops_api_key: SecretString,
    pub(crate) identities: IdentityMap,
    pub(crate) dry_run: bool,
}

impl Rotation {
    /// Run the rotation against the real services. Blocks the current thread.
    pub(crate) fn run(&self) -> anyhow::Result<RotationOutcome> {
        if self.dry_run {
            warn!("running in dry mode, no message will be sent and no role will change.");
        }
        let victorops = VictorOpsApi::new(
            self.victorops_api_id.clone(),
            self.victorops_api_key.clone(),
        )?;
        let discord = DiscordConnector::new(self.dry_run);
        run_rotation(&self.config, &victorops, &self.identities, &discord)
    }
}

/// The parts of a scheduler event (CloudEvents format) worth logging.
/// The payload itself carries nothing the rotation needs.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct SchedulerEvent {
    pub(crate) id: Option<String>,
    pub(crate) source: Option<String>,
    #[serde(rename = "type")]
    pub(crate) kind: Option<String>,
    pub(crate) time: Option<String>,
}

/// Read an event from `path`, or from stdin when `path` is `-`.
pub(crate) fn read_event(path: &Path) -> anyhow::Result<SchedulerEvent> {
    let content = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read the event from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read the event from {}", path.display()))?
    };
    serde_json::from_str(&content).context("failed to parse the trigger event")
}

/// Event-style trigger: one rotation per invocation, the event is only logged.
pub(crate) fn on_event(
    rotation: &Rotation,
    event: Option<SchedulerEvent>,
) -> anyhow::Result<RotationOutcome> {
    match event {
        Some(event) => info!(
            "triggered by {} event {} from {} at {}",
            event.kind.as_deref().unwrap_or("an unknown"),
            event.id.as_deref().unwrap_or("<no id>"),
            event.source.as_deref().unwrap_or("<unknown source>"),
            event.time.as_deref().unwrap_or("<unknown time>"),
        ),
        None => info!("triggered manually"),
    }
    rotation.run()
}
