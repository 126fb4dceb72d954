//! Controller — pairing lifecycle as a pure state machine.
//!
//! `Controller::handle` takes one `ControllerEvent` and returns the effects
//! the runtime must carry out (send a frame, fetch the device list, arm or
//! cancel the re-pair timer, redraw).  Nothing in here touches a socket or a
//! clock, so every transition is testable in isolation.
//!
//! ```text
//!  Disconnected ──open──▶ DeviceListing ──select──▶ Pairing ──paired──▶ Paired
//!        ▲                     ▲    ▲                  │                   │
//!        │                     │    └──────error───────┘                   │
//!        │                     └──target_disconnected / unpair─────────────┤
//!        └────────────────────────────close────────────────────────────────┘
//!  (reconnect with a remembered device) ──open──▶ Repairing ──paired──▶ Paired
//! ```
use std::time::Duration;

use rand::Rng;
use remote_proto::config::RepairConfig;
use remote_proto::protocol::{ClientMessage, Command, DeviceId, DeviceSummary, ServerMessage};
use tracing::{debug, info, warn};

use crate::mirror::PlayMirror;

/// Floor for the re-pair interval so a misconfigured 0 cannot spin.
pub const MIN_RETRY_INTERVAL: Duration = Duration::from_millis(100);

// ── RetryPolicy ───────────────────────────────────────────────────────────────

/// Re-pair cadence.  `max_attempts == 0` retries until unpaired.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub backoff_factor: f64,
    pub max_interval: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RepairConfig::default())
    }
}

impl RetryPolicy {
    /// Intervals below [`MIN_RETRY_INTERVAL`] are raised to it.
    pub fn from_config(config: &RepairConfig) -> Self {
        let interval = Duration::from_millis(config.interval_ms).max(MIN_RETRY_INTERVAL);
        Self {
            interval,
            backoff_factor: config.backoff_factor.max(1.0),
            max_interval: Duration::from_millis(config.max_interval_ms).max(interval),
            max_attempts: config.max_attempts,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.interval.as_secs_f64() * self.backoff_factor.powi(exp);
        Duration::from_secs_f64(secs.min(self.max_interval.as_secs_f64()))
    }

    /// True once `failed` attempts used up the budget.
    pub fn exhausted(&self, failed: u32) -> bool {
        self.max_attempts != 0 && failed >= self.max_attempts
    }

    /// Spread retries from many controllers by up to 10%.
    pub fn jittered(delay: Duration) -> Duration {
        let spread = delay.as_secs_f64() * 0.1;
        if spread <= 0.0 {
            return delay;
        }
        let offset = rand::thread_rng().gen_range(-spread..spread);
        Duration::from_secs_f64((delay.as_secs_f64() + offset).max(0.0))
    }
}

// ── State / events / effects ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ControllerState {
    Disconnected,
    DeviceListing,
    Pairing { device_id: DeviceId },
    Paired { device_id: DeviceId, device_name: String },
    /// Re-sending `pair` after a reconnect.  `failed` counts error replies.
    Repairing { device_id: DeviceId, failed: u32 },
}

impl ControllerState {
    pub fn label(&self) -> &'static str {
        match self {
            ControllerState::Disconnected => "disconnected",
            ControllerState::DeviceListing => "device-listing",
            ControllerState::Pairing { .. } => "pairing",
            ControllerState::Paired { .. } => "paired",
            ControllerState::Repairing { .. } => "repairing",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    SocketOpened,
    SocketClosed,
    /// User asked for the device list.
    RefreshDevices,
    DevicesLoaded(Vec<DeviceSummary>),
    SelectDevice(DeviceId),
    Unpair,
    Server(ServerMessage),
    RetryFired,
    Issue(Command),
    SeekDragStart,
    SeekDragMove(f64),
    SeekDragEnd,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    FetchDevices,
    Send(ClientMessage),
    ScheduleRetry(Duration),
    CancelRetry,
    ShowDevices(Vec<DeviceSummary>),
    /// Something the user should read (errors, link loss).
    Notify(String),
    Render,
}

// ── Controller ────────────────────────────────────────────────────────────────

pub struct Controller {
    state: ControllerState,
    policy: RetryPolicy,
    connected: bool,
    /// Device to re-pair with after a reconnect; cleared only by unpair or a
    /// rejected first pairing.
    remembered: Option<DeviceId>,
    mirror: Option<PlayMirror>,
    devices: Vec<DeviceSummary>,
    list_requested: bool,
}

impl Controller {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            state: ControllerState::Disconnected,
            policy,
            connected: false,
            remembered: None,
            mirror: None,
            devices: Vec::new(),
            list_requested: false,
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn mirror(&self) -> Option<&PlayMirror> {
        self.mirror.as_ref()
    }

    pub fn remembered_device(&self) -> Option<&DeviceId> {
        self.remembered.as_ref()
    }

    pub fn devices(&self) -> &[DeviceSummary] {
        &self.devices
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn handle(&mut self, event: ControllerEvent) -> Vec<Effect> {
        debug!("controller[{}] <- {:?}", self.state.label(), event);
        match event {
            ControllerEvent::SocketOpened => self.on_socket_opened(),
            ControllerEvent::SocketClosed => self.on_socket_closed(),
            ControllerEvent::RefreshDevices => {
                self.list_requested = true;
                vec![Effect::FetchDevices]
            }
            ControllerEvent::DevicesLoaded(devices) => {
                self.devices = devices;
                let requested = std::mem::take(&mut self.list_requested);
                if requested || self.state == ControllerState::DeviceListing {
                    vec![Effect::ShowDevices(self.devices.clone())]
                } else {
                    Vec::new()
                }
            }
            ControllerEvent::SelectDevice(device_id) => self.on_select(device_id),
            ControllerEvent::Unpair => self.on_unpair(),
            ControllerEvent::Server(message) => self.on_server(message),
            ControllerEvent::RetryFired => self.on_retry_fired(),
            ControllerEvent::Issue(command) => self.on_issue(command),
            ControllerEvent::SeekDragStart => match self.paired_mirror() {
                Some(mirror) => {
                    mirror.begin_drag();
                    vec![Effect::Render]
                }
                None => Vec::new(),
            },
            ControllerEvent::SeekDragMove(time) => match self.paired_mirror() {
                Some(mirror) => {
                    if !mirror.is_dragging() {
                        mirror.begin_drag();
                    }
                    mirror.drag_to(time);
                    vec![Effect::Render]
                }
                None => Vec::new(),
            },
            ControllerEvent::SeekDragEnd => {
                let released = self.paired_mirror().and_then(|m| m.end_drag());
                match released {
                    Some(time) => self.on_issue(Command::Seek { time }),
                    None => Vec::new(),
                }
            }
        }
    }

    fn paired_mirror(&mut self) -> Option<&mut PlayMirror> {
        match self.state {
            ControllerState::Paired { .. } => self.mirror.as_mut(),
            _ => None,
        }
    }

    fn to_device_listing(&mut self, effects: &mut Vec<Effect>) {
        self.state = ControllerState::DeviceListing;
        self.mirror = None;
        effects.push(Effect::FetchDevices);
        effects.push(Effect::Render);
    }

    fn on_socket_opened(&mut self) -> Vec<Effect> {
        self.connected = true;
        let mut effects = Vec::new();
        match self.remembered.clone() {
            Some(device_id) => {
                info!("socket up, re-pairing with {}", device_id);
                if let Some(mirror) = self.mirror.as_mut() {
                    mirror.mark_stale();
                }
                self.state = ControllerState::Repairing {
                    device_id: device_id.clone(),
                    failed: 0,
                };
                effects.push(Effect::Send(ClientMessage::Pair { device_id }));
                effects.push(Effect::Render);
            }
            None => self.to_device_listing(&mut effects),
        }
        effects
    }

    fn on_socket_closed(&mut self) -> Vec<Effect> {
        self.connected = false;
        if let Some(mirror) = self.mirror.as_mut() {
            mirror.mark_stale();
        }
        self.state = ControllerState::Disconnected;
        vec![Effect::CancelRetry, Effect::Render]
    }

    fn on_select(&mut self, device_id: DeviceId) -> Vec<Effect> {
        if !self.connected {
            return vec![Effect::Notify("Not connected to the hub".to_string())];
        }
        info!("pairing with {}", device_id);
        self.remembered = Some(device_id.clone());
        self.mirror = None;
        self.state = ControllerState::Pairing {
            device_id: device_id.clone(),
        };
        vec![
            Effect::CancelRetry,
            Effect::Send(ClientMessage::Pair { device_id }),
            Effect::Render,
        ]
    }

    fn on_unpair(&mut self) -> Vec<Effect> {
        let had_link = matches!(
            self.state,
            ControllerState::Pairing { .. }
                | ControllerState::Paired { .. }
                | ControllerState::Repairing { .. }
        );
        self.remembered = None;
        let mut effects = vec![Effect::CancelRetry];
        if !self.connected {
            self.mirror = None;
            effects.push(Effect::Render);
            return effects;
        }
        if had_link {
            effects.push(Effect::Send(ClientMessage::Unpair));
        }
        self.to_device_listing(&mut effects);
        effects
    }

    fn on_server(&mut self, message: ServerMessage) -> Vec<Effect> {
        match message {
            ServerMessage::Paired { device_name, state } => match &self.state {
                ControllerState::Pairing { device_id }
                | ControllerState::Repairing { device_id, .. } => {
                    info!("paired with {} ({})", device_name, device_id);
                    self.state = ControllerState::Paired {
                        device_id: device_id.clone(),
                        device_name,
                    };
                    self.mirror = Some(PlayMirror::new(state));
                    vec![Effect::CancelRetry, Effect::Render]
                }
                _ => {
                    debug!("unsolicited paired for {}", device_name);
                    Vec::new()
                }
            },
            ServerMessage::Error { message } => self.on_error(message),
            ServerMessage::TargetDisconnected => match self.state {
                ControllerState::Pairing { .. }
                | ControllerState::Paired { .. }
                | ControllerState::Repairing { .. } => {
                    info!("target went away");
                    let mut effects = vec![
                        Effect::CancelRetry,
                        Effect::Notify("Device disconnected".to_string()),
                    ];
                    self.to_device_listing(&mut effects);
                    effects
                }
                _ => Vec::new(),
            },
            ServerMessage::State(state) => match self.paired_mirror() {
                Some(mirror) => {
                    mirror.apply_remote(state);
                    vec![Effect::Render]
                }
                None => Vec::new(),
            },
            // Target-side notifications; a controller has no use for them.
            ServerMessage::RemoteConnected { .. }
            | ServerMessage::RemoteDisconnected
            | ServerMessage::Command(_) => Vec::new(),
        }
    }

    fn on_error(&mut self, message: String) -> Vec<Effect> {
        match self.state.clone() {
            ControllerState::Pairing { .. } => {
                warn!("pairing rejected: {}", message);
                self.remembered = None;
                let mut effects = vec![Effect::Notify(message)];
                self.to_device_listing(&mut effects);
                effects
            }
            ControllerState::Repairing { device_id, failed } => {
                let failed = failed + 1;
                if self.policy.exhausted(failed) {
                    warn!("giving up re-pairing with {} after {} attempts", device_id, failed);
                    let mut effects = vec![Effect::Notify(format!(
                        "Could not reach {} after {} attempts",
                        device_id, failed
                    ))];
                    self.to_device_listing(&mut effects);
                    return effects;
                }
                let delay = self.policy.delay(failed);
                debug!("re-pair attempt {} failed, retrying in {:?}", failed, delay);
                self.state = ControllerState::Repairing { device_id, failed };
                vec![Effect::ScheduleRetry(delay), Effect::Render]
            }
            _ => vec![Effect::Notify(message)],
        }
    }

    fn on_retry_fired(&mut self) -> Vec<Effect> {
        match &self.state {
            ControllerState::Repairing { device_id, .. } if self.connected => {
                vec![Effect::Send(ClientMessage::Pair {
                    device_id: device_id.clone(),
                })]
            }
            _ => Vec::new(),
        }
    }

    fn on_issue(&mut self, command: Command) -> Vec<Effect> {
        match self.paired_mirror() {
            Some(mirror) => {
                mirror.apply_optimistic(&command);
                vec![
                    Effect::Send(ClientMessage::Command(command)),
                    Effect::Render,
                ]
            }
            None => vec![Effect::Notify("Not paired with any device".to_string())],
        }
    }
}
