use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use remote_hub::core::HubCore;
use remote_hub::discovery;
use remote_hub::http::{self, HttpState};
use remote_hub::identity::StaticIdentity;
use remote_proto::config::Config;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(
    name = "remote-hub",
    about = "Relay hub pairing remote controllers with playback targets"
)]
struct Args {
    /// Config file (defaults to the platform config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the HTTP/WebSocket bind address
    #[arg(long)]
    bind: Option<String>,

    /// Override the HTTP/WebSocket port
    #[arg(long)]
    port: Option<u16>,

    /// Do not answer LAN discovery probes
    #[arg(long)]
    no_discovery: bool,
}

fn init_logging() -> anyhow::Result<PathBuf> {
    let data_dir = remote_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("hub.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,remote_hub=debug")),
        )
        .init();

    Ok(log_path)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let log_path = init_logging()?;
    info!("Log file: {:?}", log_path);

    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    info!(
        "Config loaded from: {:?}",
        args.config.clone().unwrap_or_else(Config::config_path)
    );

    let bind_address = args.bind.unwrap_or(config.hub.bind_address.clone());
    let port = args.port.unwrap_or(config.hub.port);

    let identity = StaticIdentity::from_config(&config.identity);
    if identity.session_count() == 0 {
        warn!("No sessions configured under [identity]; every socket will be rejected");
    }

    let (hub, hub_task) = HubCore::spawn();

    if config.discovery.enabled && !args.no_discovery {
        let reply = discovery::build_reply(&config.discovery, port);
        let _discovery_handle =
            discovery::start_responder(
                config.discovery.bind_address.clone(),
                config.discovery.port,
                reply,
            );
    }

    let state = HttpState {
        hub: hub.clone(),
        identity: Arc::new(identity),
    };
    let _http_handle = http::start_server(bind_address, port, state);

    tokio::signal::ctrl_c().await?;
    info!("Interrupted, shutting down");
    hub.shutdown().await?;
    hub_task.await?;

    Ok(())
}
