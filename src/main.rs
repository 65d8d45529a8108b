mod identities;
mod server;
mod trigger;
mod validate;

use crate::trigger::Rotation;
use clap::Parser;
use log::{error, info};
use secrecy::SecretString;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use sync_rotation::{ChannelId, RoleId, RotationConfig, VictorOpsApi};

#[derive(clap::Parser, Debug)]
#[command(
    name = "oncall-rotation",
    about = "hand the support rotation over to the engineer on call"
)]
struct Cli {
    /// Path to the VictorOps username -> Discord id mapping
    #[arg(
        long,
        global = true,
        env = "ONCALL_IDENTITIES",
        default_value = "identities.toml"
    )]
    identities: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run one rotation, as triggered by a scheduler event
    Rotate {
        /// CloudEvents JSON payload of the trigger, `-` to read it from stdin
        #[arg(long)]
        event: Option<PathBuf>,
        #[command(flatten)]
        settings: Settings,
    },
    /// Run a rotation for every `POST /` request
    Serve {
        #[arg(long, env = "ONCALL_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
        addr: SocketAddr,
        #[command(flatten)]
        settings: Settings,
    },
    /// Check if the identity file is correct
    Check,
    /// Print who VictorOps says is on call, without touching Discord
    Whois {
        #[command(flatten)]
        victorops: VictorOpsSettings,
    },
}

#[derive(clap::Args, Debug)]
struct VictorOpsSettings {
    #[arg(long, env = "VICTOROPS_API_ID", hide_env_values = true)]
    victorops_api_id: String,
    #[arg(long, env = "VICTOROPS_API_KEY", hide_env_values = true)]
    victorops_api_key: String,
}

#[derive(clap::Args, Debug)]
struct Settings {
    #[command(flatten)]
    victorops: VictorOpsSettings,
    #[arg(long, env = "DISCORD_BOT_TOKEN", hide_env_values = true)]
    discord_bot_token: String,
    /// Channel the rotation is announced in
    #[arg(long, env = "DISCORD_CHANNEL_ID")]
    discord_channel_id: ChannelId,
    /// Role moved to the engineer on call
    #[arg(long, env = "DISCORD_SUPPORT_ROLE_ID")]
    discord_support_role_id: RoleId,
    /// Link to the support issue board in the announcement
    #[arg(
        long,
        env = "SUPPORT_ISSUES_URL",
        default_value = sync_rotation::DEFAULT_SUPPORT_ISSUES_URL
    )]
    support_issues_url: String,
    /// Only log the announcement and the role changes
    #[arg(long)]
    dry_run: bool,
}

impl Settings {
    fn into_rotation(self, identities_path: &Path) -> anyhow::Result<Rotation> {
        Ok(Rotation {
            config: RotationConfig {
                bot_token: SecretString::from(self.discord_bot_token),
                channel_id: self.discord_channel_id,
                support_role_id: self.discord_support_role_id,
                support_issues_url: self.support_issues_url,
            },
            victorops_api_id: SecretString::from(self.victorops.victorops_api_id),
            victorops_api_key: SecretString::from(self.victorops.victorops_api_key),
            identities: identities::load(identities_path)?,
            dry_run: self.dry_run,
        })
    }
}

fn main() {
    // Settings, `RUST_LOG` included, may come from a `.env` file during local runs.
    let dotenv = dotenvy::dotenv();
    init_log();
    if let Ok(path) = dotenv {
        info!("loaded settings from {}", path.display());
    }
    if let Err(err) = run() {
        log_error(&err);
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Rotate { event, settings } => {
            let rotation = settings.into_rotation(&cli.identities)?;
            let event = event.map(|path| trigger::read_event(&path)).transpose()?;
            trigger::on_event(&rotation, event)?;
        }
        Command::Serve { addr, settings } => {
            let rotation = settings.into_rotation(&cli.identities)?;
            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?
                .block_on(server::serve(addr, rotation))?;
        }
        Command::Check => {
            let file = identities::load_file(&cli.identities)?;
            validate::validate(&file)?;
            info!("{} identities are valid", file.people.len());
        }
        Command::Whois { victorops } => {
            let identities = identities::load(&cli.identities)?;
            let api = VictorOpsApi::new(
                SecretString::from(victorops.victorops_api_id),
                SecretString::from(victorops.victorops_api_key),
            )?;
            let oncall = sync_rotation::resolve_oncall_user(&api, &identities)?;
            println!("team:       {}", oncall.team);
            println!("victorops:  {}", oncall.username);
            println!("discord id: {}", oncall.user_id);
        }
    }
    Ok(())
}

pub(crate) fn log_error(err: &anyhow::Error) {
    error!("{err}");
    for cause in err.chain().skip(1) {
        error!("caused by: {cause}");
    }
}

fn init_log() {
    let mut env = env_logger::Builder::new();
    env.filter_module("oncall_rotation", log::LevelFilter::Info);
    env.filter_module("sync_rotation", log::LevelFilter::Info);
    if let Ok(content) = std::env::var("RUST_LOG") {
        env.parse_filters(&content);
    }
    env.init();
}
