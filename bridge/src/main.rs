use anyhow::Context;
use bridge::{IntifaceConnector, Supervisor, SupervisorConfig, init_logging};
use clap::Parser;
use motion::config::{ConfigStore, JsonFileStore};
use motion::state::{ControlState, LinkStatus};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Websocket of the game mod
    #[arg(long, env = "GAME_WS_URL", default_value = "ws://localhost:11451/ws")]
    game_url: String,

    /// Websocket of the Intiface server
    #[arg(long, env = "INTIFACE_WS_URL", default_value = "ws://127.0.0.1:12345")]
    intiface_url: String,

    /// Settings file
    #[arg(long, env = "TOY_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// Device scan window after connecting, in seconds
    #[arg(long, default_value_t = 3)]
    scan_secs: u64,

    /// Pause between background rescans, in seconds
    #[arg(long, default_value_t = 10)]
    rescan_secs: u64,

    /// Pause before reconnecting to Intiface, in seconds
    #[arg(long, default_value_t = 3)]
    retry_secs: u64,
}

/// Log every status change of one link.
async fn report(link: &'static str, mut status: watch::Receiver<LinkStatus>) {
    while status.changed().await.is_ok() {
        let current = *status.borrow_and_update();
        info!(link, status = ?current, "link status");
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging();

    let store = Arc::new(JsonFileStore::new(&cli.config));
    let state = Arc::new(ControlState::new(store.load()));

    let config = SupervisorConfig {
        game_url: cli.game_url,
        scan: Duration::from_secs(cli.scan_secs),
        rescan: Duration::from_secs(cli.rescan_secs),
        retry: Duration::from_secs(cli.retry_secs),
        ..SupervisorConfig::default()
    };
    let connector = IntifaceConnector::new(cli.intiface_url, env!("CARGO_PKG_NAME"));
    let supervisor = Supervisor::new(connector, state.clone(), store.clone(), config);
    tokio::spawn(report("intiface", supervisor.hub_status()));
    tokio::spawn(report("game", supervisor.feed_status()));

    let stop = state.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            stop.request_shutdown();
        }
    });

    supervisor
        .run()
        .await
        .with_context(|| format!("saving settings to {}", store.path().display()))?;
    info!("bye");
    Ok(())
}
