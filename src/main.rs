mod bot;
mod cache;
mod command;
mod entities;
mod relay;
mod rules;
mod slack;

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::Parser;
use tracing::{error, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bot::{FatalError, Supervisor};
use crate::entities::EntityResolver;
use crate::relay::RelayDispatcher;
use crate::rules::RuleStore;
use crate::slack::rtm::RtmClient;

// Exit codes for the fatal failure causes.
const EXIT_CONNECT: i32 = 1;
const EXIT_BAD_CONFIG: i32 = 2;
const EXIT_NO_IDENTITY: i32 = 3;

/// Slack relay bot: re-publishes matching channel traffic to other
/// channels or external webhooks, driven by in-chat rules.
#[derive(Parser, Debug)]
#[command(name = "slackrelay", version, about)]
struct Args {
    /// Bot user OAuth token
    bot_user_token: String,

    /// Log level
    #[arg(short, long, default_value = "warning", value_parser = ["debug", "info", "warning", "error"])]
    log: String,

    /// Bot account name
    #[arg(short, long, default_value = "slackrelay")]
    bot: String,

    /// Run as a slave instance: relay only, ignore in-chat commands
    #[arg(short = 'z', long)]
    slave: bool,

    /// Rule configuration file
    #[arg(short = 'f', long, default_value = "slackrelay.json")]
    config_file: PathBuf,

    /// Polling interval (ms)
    #[arg(short = 's', long, default_value_t = 100)]
    sleep_ms: u64,
}

fn fatal(err: FatalError) -> ! {
    error!("{err}");
    let code = match err {
        FatalError::Connect(_) => EXIT_CONNECT,
        FatalError::Identity(_) => EXIT_NO_IDENTITY,
    };
    process::exit(code)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.log == "warning" {
        "warn"
    } else {
        args.log.as_str()
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("slackrelay={level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    warn!(
        "starting as bot {:?} (config: {}, slave: {}, poll: {}ms)",
        args.bot,
        args.config_file.display(),
        args.slave,
        args.sleep_ms
    );

    let mut store = RuleStore::new(args.config_file);
    if let Err(e) = store.load() {
        error!("failed to load rules: {e:#}");
        process::exit(EXIT_BAD_CONFIG);
    }

    let dispatcher = RelayDispatcher::new(EntityResolver::new(), store, args.slave)?;
    let transport = RtmClient::new(args.bot_user_token);

    let supervisor = match Supervisor::connect(
        transport,
        dispatcher,
        args.bot,
        Duration::from_millis(args.sleep_ms),
    )
    .await
    {
        Ok(supervisor) => supervisor,
        Err(e) => fatal(e),
    };

    match supervisor.run().await {
        Ok(()) => Ok(()),
        Err(e) => fatal(e),
    }
}
