//! HubCore — single-owner event loop for all pairing state.
//!
//! Socket tasks and REST handlers never touch the registries directly; they
//! send a `HubEvent` into this loop through a [`HubHandle`].  HubCore owns one
//! `PairingRegistry` per profile plus the outbound handle of every live
//! socket, so pair/unpair/disconnect for any device are applied strictly one
//! after another and a disconnect can never race a pair into a dangling or
//! duplicate link.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use remote_proto::protocol::{DeviceId, DeviceSummary, InboundFrame, OutboundFrame, ProfileId};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::identity::SessionIdentity;
use crate::outbox::SessionHandle;
use crate::position::{MemoryPositions, PositionStore};
use crate::registry::{ConnId, Delivery, PairingRegistry};

// ── HubEvent ──────────────────────────────────────────────────────────────────

/// All inputs into the HubCore loop.
#[derive(Debug)]
pub enum HubEvent {
    /// A socket finished its upgrade and is ready to receive frames.
    Connected {
        conn: ConnId,
        identity: SessionIdentity,
        handle: SessionHandle,
    },
    /// A well-formed frame arrived on `conn`.
    Frame { conn: ConnId, message: InboundFrame },
    /// The socket `conn` closed.
    Disconnected { conn: ConnId },
    ListDevices {
        identity: SessionIdentity,
        reply: oneshot::Sender<Vec<DeviceSummary>>,
    },
    Rename {
        identity: SessionIdentity,
        device_name: String,
        reply: oneshot::Sender<bool>,
    },
    Shutdown,
}

// ── HubHandle ─────────────────────────────────────────────────────────────────

/// Cloneable sender side of the hub loop.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubEvent>,
    next_conn: Arc<AtomicU64>,
}

impl HubHandle {
    pub fn next_conn_id(&self) -> ConnId {
        self.next_conn.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub async fn send(&self, event: HubEvent) -> anyhow::Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| anyhow::anyhow!("hub loop has stopped"))
    }

    pub async fn list_devices(
        &self,
        identity: SessionIdentity,
    ) -> anyhow::Result<Vec<DeviceSummary>> {
        let (reply, rx) = oneshot::channel();
        self.send(HubEvent::ListDevices { identity, reply }).await?;
        Ok(rx.await?)
    }

    pub async fn rename(
        &self,
        identity: SessionIdentity,
        device_name: String,
    ) -> anyhow::Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(HubEvent::Rename {
            identity,
            device_name,
            reply,
        })
        .await?;
        Ok(rx.await?)
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.send(HubEvent::Shutdown).await
    }
}

// ── HubCore ───────────────────────────────────────────────────────────────────

struct Connection {
    profile_id: ProfileId,
    device_id: DeviceId,
    handle: SessionHandle,
}

pub struct HubCore {
    profiles: HashMap<ProfileId, PairingRegistry>,
    connections: HashMap<ConnId, Connection>,
    positions: Arc<dyn PositionStore>,
}

impl HubCore {
    /// A hub keeping resume positions in memory.
    pub fn new() -> Self {
        Self::with_positions(Arc::new(MemoryPositions::default()))
    }

    pub fn with_positions(positions: Arc<dyn PositionStore>) -> Self {
        Self {
            profiles: HashMap::new(),
            connections: HashMap::new(),
            positions,
        }
    }

    /// Create the loop's channel and spawn it.
    pub fn spawn() -> (HubHandle, tokio::task::JoinHandle<()>) {
        Self::new().start()
    }

    pub fn spawn_with_positions(
        positions: Arc<dyn PositionStore>,
    ) -> (HubHandle, tokio::task::JoinHandle<()>) {
        Self::with_positions(positions).start()
    }

    fn start(self) -> (HubHandle, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(1024);
        let handle = HubHandle {
            tx,
            next_conn: Arc::new(AtomicU64::new(0)),
        };
        let task = tokio::spawn(self.run(rx));
        (handle, task)
    }

    /// Run until `Shutdown` or until every `HubHandle` is gone.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<HubEvent>) {
        info!("HubCore: starting event loop");
        while let Some(event) = event_rx.recv().await {
            if matches!(event, HubEvent::Shutdown) {
                info!("HubCore: shutdown requested");
                break;
            }
            self.handle_event(event);
        }
        info!(
            "HubCore: stopped with {} live connections",
            self.connections.len()
        );
    }

    pub fn handle_event(&mut self, event: HubEvent) {
        match event {
            HubEvent::Connected {
                conn,
                identity,
                handle,
            } => self.on_connected(conn, identity, handle),
            HubEvent::Frame { conn, message } => self.on_frame(conn, message),
            HubEvent::Disconnected { conn } => self.on_disconnected(conn),
            HubEvent::ListDevices { identity, reply } => {
                let devices = self
                    .profiles
                    .get(&identity.profile_id)
                    .map(|registry| registry.devices(&identity.device_id))
                    .unwrap_or_default();
                let _ = reply.send(devices);
            }
            HubEvent::Rename {
                identity,
                device_name,
                reply,
            } => {
                let renamed = self
                    .profiles
                    .get_mut(&identity.profile_id)
                    .map(|registry| registry.rename(&identity.device_id, device_name))
                    .unwrap_or(false);
                let _ = reply.send(renamed);
            }
            HubEvent::Shutdown => {}
        }
    }

    fn on_connected(&mut self, conn: ConnId, identity: SessionIdentity, handle: SessionHandle) {
        info!(
            "WebSocket connected: device={} profile={} conn={}",
            identity.device_id, identity.profile_id, conn
        );
        let positions = &self.positions;
        let registry = self
            .profiles
            .entry(identity.profile_id)
            .or_insert_with(|| PairingRegistry::new(identity.profile_id, positions.clone()));
        let replaced = registry.register(identity.device_id.clone(), conn, identity.device_name);
        if let Some(old) = replaced {
            // Dropping the old handle closes the superseded socket's writer.
            self.connections.remove(&old);
        }
        self.connections.insert(
            conn,
            Connection {
                profile_id: identity.profile_id,
                device_id: identity.device_id,
                handle,
            },
        );
    }

    fn on_frame(&mut self, conn: ConnId, message: InboundFrame) {
        let Some(connection) = self.connections.get(&conn) else {
            debug!("frame from unknown conn {}", conn);
            return;
        };
        let device = connection.device_id.clone();
        let Some(registry) = self.profiles.get_mut(&connection.profile_id) else {
            return;
        };

        let result = match message {
            InboundFrame::Pair { device_id } => registry.pair(&device, &device_id),
            InboundFrame::Unpair => Ok(registry.unpair(&device)),
            InboundFrame::Command(command) => {
                debug!(
                    "{} -> command {}",
                    device,
                    command.get("action").and_then(|a| a.as_str()).unwrap_or("?")
                );
                registry.command(&device, command)
            }
            InboundFrame::State(state) => Ok(registry.state(&device, state, Instant::now())),
        };

        match result {
            Ok(deliveries) => self.dispatch(deliveries),
            Err(err) => {
                debug!("{} request failed: {}", device, err);
                self.dispatch(vec![Delivery {
                    conn,
                    message: OutboundFrame::error(&err),
                }]);
            }
        }
    }

    fn on_disconnected(&mut self, conn: ConnId) {
        let Some(connection) = self.connections.remove(&conn) else {
            debug!("conn {} already replaced, skipping cleanup", conn);
            return;
        };
        info!("WebSocket disconnected: device={}", connection.device_id);

        let deliveries = match self.profiles.get_mut(&connection.profile_id) {
            Some(registry) => {
                let deliveries = registry.disconnect(&connection.device_id, conn);
                if registry.is_empty() {
                    self.profiles.remove(&connection.profile_id);
                }
                deliveries
            }
            None => Vec::new(),
        };
        self.dispatch(deliveries);
    }

    fn dispatch(&self, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            match self.connections.get(&delivery.conn) {
                Some(connection) => {
                    if !connection.handle.deliver(delivery.message) {
                        warn!("conn {} writer gone, frame dropped", delivery.conn);
                    }
                }
                None => warn!("no live conn {} for outbound frame", delivery.conn),
            }
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn link_count(&self) -> usize {
        self.profiles.values().map(|r| r.link_count()).sum()
    }
}

impl Default for HubCore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::{self, SessionOutbox};
    use remote_proto::protocol::{ClientMessage, Command, PlayState, ServerMessage};
    use std::time::Duration;

    fn identity(token: &str, profile_id: ProfileId) -> SessionIdentity {
        SessionIdentity {
            profile_id,
            device_id: DeviceId::from_token(token),
            device_name: token.to_string(),
        }
    }

    fn connect(
        core: &mut HubCore,
        conn: ConnId,
        token: &str,
        profile_id: ProfileId,
    ) -> SessionOutbox {
        let (handle, outbox) = outbox::channel();
        core.handle_event(HubEvent::Connected {
            conn,
            identity: identity(token, profile_id),
            handle,
        });
        outbox
    }

    /// Send a typed client frame through the hub's wire view of it.
    fn frame(core: &mut HubCore, conn: ConnId, message: ClientMessage) {
        let message = InboundFrame::decode(&message.encode().unwrap()).unwrap();
        core.handle_event(HubEvent::Frame { conn, message });
    }

    /// Next frame written to `outbox`, as a client would decode it.
    async fn next(outbox: &mut SessionOutbox) -> Option<ServerMessage> {
        let frame = tokio::time::timeout(Duration::from_millis(50), outbox.next())
            .await
            .ok()
            .flatten()?;
        Some(ServerMessage::decode(&frame.encode().unwrap()).unwrap())
    }

    fn pair_with(token: &str) -> ClientMessage {
        ClientMessage::Pair {
            device_id: DeviceId::from_token(token),
        }
    }

    #[tokio::test]
    async fn pairing_is_scoped_to_the_profile() {
        let mut core = HubCore::new();
        let mut phone = connect(&mut core, 1, "phone", 1);
        let _tv = connect(&mut core, 2, "tv", 2);

        frame(&mut core, 1, pair_with("tv"));
        assert_eq!(
            next(&mut phone).await,
            Some(ServerMessage::Error {
                message: "Device not found or offline".into()
            })
        );
        assert_eq!(core.link_count(), 0);
    }

    #[tokio::test]
    async fn command_and_state_flow_through_the_link() {
        let mut core = HubCore::new();
        let mut phone = connect(&mut core, 1, "phone", 1);
        let mut tv = connect(&mut core, 2, "tv", 1);

        frame(&mut core, 1, pair_with("tv"));
        assert!(matches!(next(&mut phone).await, Some(ServerMessage::Paired { .. })));
        assert_eq!(
            next(&mut tv).await,
            Some(ServerMessage::RemoteConnected {
                remote_name: "phone".into()
            })
        );

        frame(&mut core, 1, ClientMessage::Command(Command::play("abc123")));
        assert_eq!(
            next(&mut tv).await,
            Some(ServerMessage::Command(Command::play("abc123")))
        );

        let state = PlayState {
            video_id: Some("abc123".into()),
            paused: false,
            ..PlayState::default()
        };
        frame(&mut core, 2, ClientMessage::State(state.clone()));
        assert_eq!(next(&mut phone).await, Some(ServerMessage::State(state)));
    }

    #[tokio::test]
    async fn stale_socket_close_after_reconnect_is_ignored() {
        let mut core = HubCore::new();
        let mut phone = connect(&mut core, 1, "phone", 1);
        let _tv_old = connect(&mut core, 2, "tv", 1);
        frame(&mut core, 1, pair_with("tv"));
        next(&mut phone).await;

        let mut tv_new = connect(&mut core, 3, "tv", 1);
        core.handle_event(HubEvent::Disconnected { conn: 2 });
        assert_eq!(next(&mut phone).await, None);
        assert_eq!(core.link_count(), 1);
        assert_eq!(core.connection_count(), 2);

        frame(&mut core, 1, ClientMessage::Command(Command::Pause));
        assert_eq!(
            next(&mut tv_new).await,
            Some(ServerMessage::Command(Command::Pause))
        );
    }

    #[tokio::test]
    async fn near_simultaneous_pairs_leave_one_link() {
        let mut core = HubCore::new();
        let _phone = connect(&mut core, 1, "phone", 1);
        let mut tv = connect(&mut core, 2, "tv", 1);
        let mut tablet = connect(&mut core, 3, "tablet", 1);

        frame(&mut core, 1, pair_with("tv"));
        frame(&mut core, 1, pair_with("tablet"));

        assert_eq!(core.link_count(), 1);
        assert!(matches!(
            next(&mut tv).await,
            Some(ServerMessage::RemoteConnected { .. })
        ));
        assert_eq!(next(&mut tv).await, Some(ServerMessage::RemoteDisconnected));
        assert!(matches!(
            next(&mut tablet).await,
            Some(ServerMessage::RemoteConnected { .. })
        ));
    }

    #[tokio::test]
    async fn empty_profiles_are_dropped() {
        let mut core = HubCore::new();
        let _phone = connect(&mut core, 1, "phone", 9);
        core.handle_event(HubEvent::Disconnected { conn: 1 });
        assert!(core.profiles.is_empty());
        assert_eq!(core.connection_count(), 0);
    }

    #[tokio::test]
    async fn list_and_rename_go_through_the_loop() {
        let (hub, _task) = HubCore::spawn();
        let (handle, _outbox) = outbox::channel();
        hub.send(HubEvent::Connected {
            conn: hub.next_conn_id(),
            identity: identity("tv", 1),
            handle,
        })
        .await
        .unwrap();

        let devices = hub.list_devices(identity("phone", 1)).await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].device_name, "tv");

        assert!(hub.rename(identity("tv", 1), "Den TV".into()).await.unwrap());
        let devices = hub.list_devices(identity("phone", 1)).await.unwrap();
        assert_eq!(devices[0].device_name, "Den TV");
        hub.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn positions_reach_the_configured_store() {
        let store = Arc::new(MemoryPositions::default());
        let mut core = HubCore::with_positions(store.clone());
        let _tv = connect(&mut core, 1, "tv", 4);

        let state = PlayState {
            video_id: Some("abc123".into()),
            current_time: 75.0,
            duration: 600.0,
            ..PlayState::default()
        };
        frame(&mut core, 1, ClientMessage::State(state));
        core.handle_event(HubEvent::Disconnected { conn: 1 });

        assert_eq!(store.get(4, "abc123").unwrap().position, 75.0);
    }
}
