//! PairingRegistry — sessions and controller→target links of one profile.
//!
//! The registry is plain data: every operation returns the frames that have
//! to go out as a list of [`Delivery`] values and never touches a socket.
//! `HubCore` owns one registry per profile and is the only caller, which is
//! what serializes pair/unpair/disconnect against each other.
//!
//! Invariants kept by every operation:
//!   * at most one link per controller (links are keyed by controller),
//!   * at most one controller per target (a new pair takes the target over),
//!   * a link only exists while both of its sessions are registered.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use remote_proto::error::RelayError;
use remote_proto::protocol::{DeviceId, DeviceSummary, OutboundFrame, Payload, ProfileId};
use tracing::{debug, info};

use crate::position::{self, PositionStore, PositionTracker};

/// Identifies one live socket.  A device that reconnects gets a new one.
pub type ConnId = u64;

/// A frame addressed to a connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub conn: ConnId,
    pub message: OutboundFrame,
}

impl Delivery {
    fn new(conn: ConnId, message: OutboundFrame) -> Self {
        Self { conn, message }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    None,
    Controller,
    Target,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PairingLink {
    pub controller: DeviceId,
    pub target: DeviceId,
    pub profile_id: ProfileId,
    pub established_at: DateTime<Utc>,
}

#[derive(Debug)]
struct SessionEntry {
    conn: ConnId,
    device_name: String,
    /// Most recent snapshot this device reported as a target, as sent.
    last_state: Option<Payload>,
    positions: PositionTracker,
    connected_at: DateTime<Utc>,
}

pub struct PairingRegistry {
    profile_id: ProfileId,
    sessions: HashMap<DeviceId, SessionEntry>,
    /// Keyed by controller.
    links: HashMap<DeviceId, PairingLink>,
    positions: Arc<dyn PositionStore>,
}

impl PairingRegistry {
    pub fn new(profile_id: ProfileId, positions: Arc<dyn PositionStore>) -> Self {
        Self {
            profile_id,
            sessions: HashMap::new(),
            links: HashMap::new(),
            positions,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn link_for(&self, controller: &DeviceId) -> Option<&PairingLink> {
        self.links.get(controller)
    }

    pub fn controller_of(&self, target: &DeviceId) -> Option<&DeviceId> {
        self.links
            .values()
            .find(|link| &link.target == target)
            .map(|link| &link.controller)
    }

    pub fn role(&self, device: &DeviceId) -> SessionRole {
        if self.links.contains_key(device) {
            SessionRole::Controller
        } else if self.controller_of(device).is_some() {
            SessionRole::Target
        } else {
            SessionRole::None
        }
    }

    pub fn conn_of(&self, device: &DeviceId) -> Option<ConnId> {
        self.sessions.get(device).map(|s| s.conn)
    }

    /// Register a freshly connected socket for `device`.  When the device was
    /// already connected the old socket is superseded and its id returned so
    /// the caller can close it; links and cached state carry over.
    pub fn register(
        &mut self,
        device: DeviceId,
        conn: ConnId,
        device_name: String,
    ) -> Option<ConnId> {
        match self.sessions.get_mut(&device) {
            Some(entry) => {
                let old = entry.conn;
                entry.conn = conn;
                entry.device_name = device_name;
                entry.connected_at = Utc::now();
                info!("device {} reconnected (conn {} -> {})", device, old, conn);
                Some(old)
            }
            None => {
                self.sessions.insert(
                    device,
                    SessionEntry {
                        conn,
                        device_name,
                        last_state: None,
                        positions: PositionTracker::default(),
                        connected_at: Utc::now(),
                    },
                );
                None
            }
        }
    }

    /// Socket `conn` of `device` closed.  A close from a socket that has
    /// already been replaced is ignored.
    pub fn disconnect(&mut self, device: &DeviceId, conn: ConnId) -> Vec<Delivery> {
        match self.sessions.get(device) {
            Some(entry) if entry.conn == conn => {}
            _ => {
                debug!("ignoring close of stale conn {} for {}", conn, device);
                return Vec::new();
            }
        }
        if let Some(mut entry) = self.sessions.remove(device) {
            if let Some(state) = &entry.last_state {
                if let Some(saved) = entry.positions.record(state, Instant::now(), true) {
                    self.positions.save_position(self.profile_id, saved);
                }
            }
            debug!(
                "device {} leaving after {}s",
                device,
                (Utc::now() - entry.connected_at).num_seconds()
            );
        }

        let mut out = Vec::new();

        // Was a controller: its target loses the remote.
        if let Some(link) = self.links.remove(device) {
            if let Some(conn) = self.conn_of(&link.target) {
                out.push(Delivery::new(conn, OutboundFrame::RemoteDisconnected));
            }
        }

        // Was a target: its controller loses the target.
        if let Some(controller) = self.controller_of(device).cloned() {
            self.links.remove(&controller);
            if let Some(conn) = self.conn_of(&controller) {
                out.push(Delivery::new(conn, OutboundFrame::TargetDisconnected));
            }
        }

        out
    }

    pub fn pair(
        &mut self,
        controller: &DeviceId,
        target: &DeviceId,
    ) -> Result<Vec<Delivery>, RelayError> {
        if controller == target {
            return Err(RelayError::SelfPairing);
        }
        let (target_conn, target_name, target_state) = match self.sessions.get(target) {
            Some(entry) => (entry.conn, entry.device_name.clone(), entry.last_state.clone()),
            None => return Err(RelayError::PairingNotFound),
        };
        let (controller_conn, controller_name) = match self.sessions.get(controller) {
            Some(entry) => (entry.conn, entry.device_name.clone()),
            None => return Err(RelayError::PairingNotFound),
        };

        let mut out = Vec::new();

        if let Some(previous) = self.links.remove(controller) {
            if &previous.target != target {
                if let Some(conn) = self.conn_of(&previous.target) {
                    out.push(Delivery::new(conn, OutboundFrame::RemoteDisconnected));
                }
            }
        }

        if let Some(displaced) = self.controller_of(target).cloned() {
            info!("{} takes over {} from {}", controller, target, displaced);
            self.links.remove(&displaced);
            if let Some(conn) = self.conn_of(&displaced) {
                out.push(Delivery::new(conn, OutboundFrame::TargetDisconnected));
            }
        }

        self.links.insert(
            controller.clone(),
            PairingLink {
                controller: controller.clone(),
                target: target.clone(),
                profile_id: self.profile_id,
                established_at: Utc::now(),
            },
        );
        info!("paired {} -> {} (profile {})", controller, target, self.profile_id);

        out.push(Delivery::new(
            controller_conn,
            OutboundFrame::Paired {
                device_name: target_name,
                state: target_state,
            },
        ));
        out.push(Delivery::new(
            target_conn,
            OutboundFrame::RemoteConnected {
                remote_name: controller_name,
            },
        ));
        Ok(out)
    }

    /// Drop the controller's link, if any.
    pub fn unpair(&mut self, controller: &DeviceId) -> Vec<Delivery> {
        let Some(link) = self.links.remove(controller) else {
            return Vec::new();
        };
        info!("unpaired {} -> {}", controller, link.target);
        self.conn_of(&link.target)
            .map(|conn| vec![Delivery::new(conn, OutboundFrame::RemoteDisconnected)])
            .unwrap_or_default()
    }

    /// Forward `command` (the frame body, as sent) to the controller's target.
    pub fn command(
        &mut self,
        controller: &DeviceId,
        command: Payload,
    ) -> Result<Vec<Delivery>, RelayError> {
        let target = match self.links.get(controller) {
            Some(link) => link.target.clone(),
            None => return Err(RelayError::NotPaired),
        };
        if let Some(conn) = self.conn_of(&target) {
            return Ok(vec![Delivery::new(conn, OutboundFrame::Command(command))]);
        }

        // Target vanished without a close being processed.
        self.links.remove(controller);
        Ok(self
            .conn_of(controller)
            .map(|conn| vec![Delivery::new(conn, OutboundFrame::TargetDisconnected)])
            .unwrap_or_default())
    }

    /// Remember the snapshot, save the resume position and relay the
    /// snapshot to the controlling device, if any.
    pub fn state(&mut self, target: &DeviceId, state: Payload, now: Instant) -> Vec<Delivery> {
        let Some(entry) = self.sessions.get_mut(target) else {
            return Vec::new();
        };

        // Switching videos: the old one's last position goes out unthrottled.
        if let Some(old) = &entry.last_state {
            let old_video = position::text(old, "videoId");
            if old_video.is_some() && old_video != position::text(&state, "videoId") {
                if let Some(saved) = entry.positions.record(old, now, true) {
                    self.positions.save_position(self.profile_id, saved);
                }
            }
        }
        if let Some(saved) = entry.positions.record(&state, now, false) {
            self.positions.save_position(self.profile_id, saved);
        }
        entry.last_state = Some(state.clone());

        self.controller_of(target)
            .and_then(|controller| self.conn_of(controller))
            .map(|conn| vec![Delivery::new(conn, OutboundFrame::State(state))])
            .unwrap_or_default()
    }

    pub fn rename(&mut self, device: &DeviceId, device_name: String) -> bool {
        match self.sessions.get_mut(device) {
            Some(entry) => {
                entry.device_name = device_name;
                true
            }
            None => false,
        }
    }

    /// Devices `requester` may pick as a target: everyone else in the profile
    /// that is not currently acting as a controller.
    pub fn devices(&self, requester: &DeviceId) -> Vec<DeviceSummary> {
        let mut devices: Vec<DeviceSummary> = self
            .sessions
            .iter()
            .filter(|(id, _)| *id != requester && !self.links.contains_key(*id))
            .map(|(id, entry)| DeviceSummary {
                device_id: id.clone(),
                device_name: entry.device_name.clone(),
                has_state: entry.last_state.is_some(),
            })
            .collect();
        devices.sort_by(|a, b| {
            a.device_name
                .cmp(&b.device_name)
                .then_with(|| a.device_id.cmp(&b.device_id))
        });
        devices
    }
}
