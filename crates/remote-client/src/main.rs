use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args as ClapArgs, Parser, Subcommand};
use remote_client::connection::HubEndpoint;
use remote_client::devices::DeviceApi;
use remote_client::discovery::{ProbeOptions, Prober};
use remote_client::input::{parse_line, Input, HELP};
use remote_client::mirror::Freshness;
use remote_client::player::SimulatedPlayer;
use remote_client::runtime::{self, ControllerView, TargetNotice, UiUpdate};
use remote_client::target::{Executor, QueueItem};
use remote_proto::config::Config;
use remote_proto::protocol::DeviceSummary;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "remote", about = "Pair with and control playback on another device")]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Look for hubs on the local network
    Discover {
        /// Collection window in milliseconds
        #[arg(long)]
        window_ms: Option<u64>,
    },
    /// Control another device interactively
    Control(HubArgs),
    /// Act as a playback target with a simulated player
    Target {
        #[command(flatten)]
        hub: HubArgs,
        /// Video ids for the local queue (next/prev)
        #[arg(long, value_delimiter = ',')]
        queue: Vec<String>,
    },
    /// Change this device's display name
    Rename {
        #[command(flatten)]
        hub: HubArgs,
        name: String,
    },
}

#[derive(ClapArgs, Debug)]
struct HubArgs {
    /// Hub base URL; discovered on the LAN when omitted
    #[arg(long)]
    hub: Option<String>,
    /// Session token
    #[arg(long)]
    token: Option<String>,
}

fn init_logging() -> anyhow::Result<PathBuf> {
    let data_dir = remote_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("client.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(log_file)
                .with_ansi(false),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,remote_client=debug")),
        )
        .init();

    Ok(log_path)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_path = init_logging()?;
    info!("Log file: {:?}", log_path);

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Cmd::Discover { window_ms } => {
            let mut options = ProbeOptions::from_config(&config.discovery);
            if let Some(ms) = window_ms {
                options.window = Duration::from_millis(ms);
            }
            let hosts = Prober::new(options).discover().await?;
            if hosts.is_empty() {
                println!("No hubs found.");
            }
            for host in hosts {
                println!(
                    "{}  {}  {}  (seen {})",
                    host.name,
                    host.id,
                    host.address,
                    host.last_seen.format("%H:%M:%S")
                );
            }
        }
        Cmd::Control(hub) => {
            let endpoint = resolve_endpoint(&config, &hub).await?;
            control(endpoint, config).await?;
        }
        Cmd::Target { hub, queue } => {
            let endpoint = resolve_endpoint(&config, &hub).await?;
            target(endpoint, config, queue).await?;
        }
        Cmd::Rename { hub, name } => {
            let endpoint = resolve_endpoint(&config, &hub).await?;
            let renamed = DeviceApi::new(endpoint).rename(&name).await?;
            println!("Device name is now {:?}", renamed);
        }
    }
    Ok(())
}

/// Flags win over config; an empty hub URL falls back to discovery.
async fn resolve_endpoint(config: &Config, args: &HubArgs) -> anyhow::Result<HubEndpoint> {
    let token = args
        .token
        .clone()
        .unwrap_or_else(|| config.client.token.clone());
    if token.is_empty() {
        bail!("no session token: pass --token or set [client] token in the config");
    }

    let base = match args.hub.clone().filter(|h| !h.is_empty()) {
        Some(hub) => hub,
        None if !config.client.hub_url.is_empty() => config.client.hub_url.clone(),
        None => {
            println!("Looking for a hub...");
            let hosts = Prober::new(ProbeOptions::from_config(&config.discovery))
                .discover()
                .await?;
            let host = hosts
                .into_iter()
                .next()
                .context("no hub answered on the local network")?;
            println!("Using {} at {}", host.id, host.address);
            host.address
        }
    };
    Ok(HubEndpoint::new(&base, token))
}

async fn control(endpoint: HubEndpoint, config: Config) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let (input_tx, input_rx) = mpsc::unbounded_channel();
    let (ui_tx, mut ui_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(runtime::run_controller(
        endpoint,
        config.client.clone(),
        input_rx,
        ui_tx,
        cancel.clone(),
    ));

    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut devices: Vec<DeviceSummary> = Vec::new();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_line(&line, &devices) {
                    Ok(None) => {}
                    Ok(Some(Input::Help)) => println!("{}", HELP),
                    Ok(Some(Input::Quit)) => break,
                    Ok(Some(Input::Event(event))) => {
                        if input_tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) => println!("{}", e),
                }
            }
            update = ui_rx.recv() => match update {
                Some(UiUpdate::Devices(list)) => {
                    print_devices(&list);
                    devices = list;
                }
                Some(UiUpdate::View(view)) => print_view(&view),
                Some(UiUpdate::Notice(text)) => println!("! {}", text),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    drop(input_tx);
    task.await??;
    cancel.cancel();
    Ok(())
}

async fn target(endpoint: HubEndpoint, config: Config, queue: Vec<String>) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let mut executor = Executor::new(SimulatedPlayer::new(), config.client.state_interval());
    executor.set_queue(queue.into_iter().map(QueueItem::new).collect());

    let (notice_tx, mut notice_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(runtime::run_target(
        endpoint,
        config.client.clone(),
        executor,
        notice_tx,
        cancel.clone(),
    ));

    println!("Waiting for a remote (ctrl-c to quit)");
    loop {
        tokio::select! {
            notice = notice_rx.recv() => match notice {
                Some(TargetNotice::RemoteConnected(name)) => println!("Remote connected: {}", name),
                Some(TargetNotice::RemoteDisconnected) => println!("Remote disconnected"),
                Some(TargetNotice::Published(state)) => println!(
                    "{} {} {:.1}/{:.1}s vol {:.2}",
                    if state.paused { "||" } else { "|>" },
                    state.video_id.as_deref().unwrap_or("-"),
                    state.current_time,
                    state.duration,
                    state.volume
                ),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    cancel.cancel();
    task.await??;
    Ok(())
}

fn print_devices(devices: &[DeviceSummary]) {
    if devices.is_empty() {
        println!("No other devices online.");
        return;
    }
    for (i, device) in devices.iter().enumerate() {
        println!(
            "{:>2}. {}  [{}]{}",
            i + 1,
            device.device_name,
            device.device_id,
            if device.has_state { "  (playing state known)" } else { "" }
        );
    }
}

fn print_view(view: &ControllerView) {
    let Some(state) = &view.state else {
        println!("[{}]", view.phase);
        return;
    };
    let freshness = match view.freshness {
        Some(Freshness::Live) => "",
        _ => " (last known)",
    };
    println!(
        "[{}] {} {} {} {:.1}/{:.1}s vol {:.2}{}",
        view.phase,
        view.device_name.as_deref().unwrap_or("?"),
        if state.paused { "||" } else { "|>" },
        state.title.as_deref().or(state.video_id.as_deref()).unwrap_or("-"),
        view.display_time.unwrap_or(state.current_time),
        state.duration,
        state.volume,
        freshness
    );
}
