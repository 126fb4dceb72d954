//! Runtime loops that connect the pure controller / executor to the hub.
//!
//! Both loops own their state exclusively and take every input (socket
//! events, user input, timers, REST replies) from channels, mirroring the
//! hub's own single-owner event loop.
use std::time::{Duration, Instant};

use remote_proto::config::ClientConfig;
use remote_proto::protocol::{ClientMessage, DeviceSummary, PlayState, ServerMessage};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::{spawn_link, HubEndpoint, LinkEvent};
use crate::controller::{Controller, ControllerEvent, ControllerState, Effect, RetryPolicy};
use crate::devices::DeviceApi;
use crate::mirror::Freshness;
use crate::target::{Executor, PlaybackEngine};
use crate::timer::ScheduledTask;

/// How often the target advances clock-less engines.
const TICK: Duration = Duration::from_millis(250);

/// What the controller runtime asks the UI to show.
#[derive(Debug, Clone, PartialEq)]
pub enum UiUpdate {
    Devices(Vec<DeviceSummary>),
    View(ControllerView),
    Notice(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerView {
    pub phase: &'static str,
    pub device_name: Option<String>,
    pub state: Option<PlayState>,
    pub freshness: Option<Freshness>,
    pub display_time: Option<f64>,
}

impl ControllerView {
    fn of(controller: &Controller) -> Self {
        let device_name = match controller.state() {
            ControllerState::Paired { device_name, .. } => Some(device_name.clone()),
            _ => None,
        };
        let mirror = controller.mirror();
        Self {
            phase: controller.state().label(),
            device_name,
            state: mirror.map(|m| m.state().clone()),
            freshness: mirror.map(|m| m.freshness()),
            display_time: mirror.map(|m| m.display_time()),
        }
    }
}

// ── Controller ────────────────────────────────────────────────────────────────

/// Drive a controller until `input` closes or `cancel` fires.
pub async fn run_controller(
    endpoint: HubEndpoint,
    config: ClientConfig,
    mut input: mpsc::UnboundedReceiver<ControllerEvent>,
    ui: mpsc::UnboundedSender<UiUpdate>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let link_cancel = cancel.child_token();
    let mut link = spawn_link(endpoint.clone(), config.reconnect_delay(), link_cancel.clone());
    let api = DeviceApi::new(endpoint);

    let (internal_tx, mut internal_rx) = mpsc::unbounded_channel::<ControllerEvent>();
    let mut retry = ScheduledTask::new(internal_tx.clone());
    let mut controller = Controller::new(RetryPolicy::from_config(&config.repair));
    let mut outgoing: Option<mpsc::UnboundedSender<ClientMessage>> = None;

    info!("Controller runtime started");
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            link_event = link.recv() => match link_event {
                Some(LinkEvent::Opened(tx)) => {
                    outgoing = Some(tx);
                    ControllerEvent::SocketOpened
                }
                Some(LinkEvent::Frame(message)) => ControllerEvent::Server(message),
                Some(LinkEvent::Closed) => {
                    outgoing = None;
                    ControllerEvent::SocketClosed
                }
                None => break,
            },
            user = input.recv() => match user {
                Some(event) => event,
                None => break,
            },
            Some(event) = internal_rx.recv() => event,
        };

        for effect in controller.handle(event) {
            match effect {
                Effect::Send(message) => match &outgoing {
                    Some(tx) => {
                        if tx.send(message).is_err() {
                            debug!("socket gone before frame could be sent");
                        }
                    }
                    None => debug!("dropping {:?} while disconnected", message),
                },
                Effect::FetchDevices => {
                    let api = api.clone();
                    let tx = internal_tx.clone();
                    let ui = ui.clone();
                    tokio::spawn(async move {
                        match api.list().await {
                            Ok(devices) => {
                                let _ = tx.send(ControllerEvent::DevicesLoaded(devices));
                            }
                            Err(e) => {
                                warn!("device list failed: {:#}", e);
                                let _ = ui.send(UiUpdate::Notice(format!(
                                    "Could not load devices: {}",
                                    e
                                )));
                            }
                        }
                    });
                }
                Effect::ScheduleRetry(delay) => {
                    retry.schedule(RetryPolicy::jittered(delay), ControllerEvent::RetryFired)
                }
                Effect::CancelRetry => retry.cancel(),
                Effect::ShowDevices(devices) => {
                    let _ = ui.send(UiUpdate::Devices(devices));
                }
                Effect::Notify(text) => {
                    let _ = ui.send(UiUpdate::Notice(text));
                }
                Effect::Render => {
                    let _ = ui.send(UiUpdate::View(ControllerView::of(&controller)));
                }
            }
        }
    }

    // Leave the target free for someone else.
    if matches!(controller.state(), ControllerState::Paired { .. }) {
        if let Some(tx) = &outgoing {
            let _ = tx.send(ClientMessage::Unpair);
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
    retry.cancel();
    link_cancel.cancel();
    info!("Controller runtime stopped");
    Ok(())
}

// ── Target ────────────────────────────────────────────────────────────────────

/// Notable things that happened on the target side.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetNotice {
    RemoteConnected(String),
    RemoteDisconnected,
    Published(PlayState),
}

/// Serve relayed commands with `executor` until `cancel` fires.
pub async fn run_target<E: PlaybackEngine>(
    endpoint: HubEndpoint,
    config: ClientConfig,
    mut executor: Executor<E>,
    notices: mpsc::UnboundedSender<TargetNotice>,
    cancel: CancellationToken,
) -> anyhow::Result<Executor<E>> {
    let link_cancel = cancel.child_token();
    let mut link = spawn_link(endpoint, config.reconnect_delay(), link_cancel.clone());
    let mut outgoing: Option<mpsc::UnboundedSender<ClientMessage>> = None;

    let mut ticker = tokio::time::interval(TICK);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last_tick = Instant::now();

    info!("Target runtime started");
    loop {
        // Snapshot to push regardless of what the engine reports.
        let mut announce = false;

        tokio::select! {
            _ = cancel.cancelled() => break,
            link_event = link.recv() => match link_event {
                Some(LinkEvent::Opened(tx)) => {
                    outgoing = Some(tx);
                    // Refresh the hub's cached snapshot after a reconnect.
                    announce = true;
                }
                Some(LinkEvent::Closed) => outgoing = None,
                Some(LinkEvent::Frame(message)) => match message {
                    ServerMessage::Command(command) => executor.execute(command),
                    ServerMessage::RemoteConnected { remote_name } => {
                        info!("remote connected: {}", remote_name);
                        let _ = notices.send(TargetNotice::RemoteConnected(remote_name));
                        announce = true;
                    }
                    ServerMessage::RemoteDisconnected => {
                        info!("remote disconnected");
                        let _ = notices.send(TargetNotice::RemoteDisconnected);
                    }
                    ServerMessage::Error { message } => warn!("hub error: {}", message),
                    other => debug!("target ignoring {:?}", other),
                },
                None => break,
            },
            _ = ticker.tick() => {
                let now = Instant::now();
                executor.engine_mut().tick(now - last_tick);
                last_tick = now;
            }
        }

        let snapshot = match executor.pump(Instant::now()) {
            Some(state) => Some(state),
            None if announce => Some(executor.engine().snapshot()),
            None => None,
        };
        if let (Some(state), Some(tx)) = (snapshot, &outgoing) {
            let _ = notices.send(TargetNotice::Published(state.clone()));
            if tx.send(ClientMessage::State(state)).is_err() {
                debug!("socket gone before state could be sent");
            }
        }
    }

    link_cancel.cancel();
    info!("Target runtime stopped");
    Ok(executor)
}
