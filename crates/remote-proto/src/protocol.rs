use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::RelayError;

/// Cookie carrying the hosting session layer's token.
pub const SESSION_COOKIE: &str = "pytr_session";

/// WebSocket endpoint on the hub.
pub const WS_PATH: &str = "/api/ws";
pub const DEVICES_PATH: &str = "/api/remote/devices";
pub const RENAME_PATH: &str = "/api/remote/rename";

/// Close code sent when a socket arrives without a usable session.
pub const CLOSE_NO_SESSION: u16 = 4001;

pub type ProfileId = i64;

/// Stable public identifier of a device, derived from its session token so
/// the token itself never leaves the hub.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// First 12 hex chars of SHA-256(token).
    pub fn from_token(token: &str) -> Self {
        let digest = Sha256::digest(token.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        Self(hex[..12].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Snapshot of the target's player.  Unknown fields sent by a target are kept
/// in `extra` so the hub relays the frame without losing anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub current_time: f64,
    /// Players report `null` here until metadata has loaded.
    #[serde(default, deserialize_with = "null_as_zero")]
    pub duration: f64,
    #[serde(default = "default_paused")]
    pub paused: bool,
    #[serde(default = "default_volume")]
    pub volume: f64,
    #[serde(default)]
    pub ended: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn null_as_zero<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or_default())
}

fn default_paused() -> bool {
    true
}

fn default_volume() -> f64 {
    1.0
}

impl Default for PlayState {
    fn default() -> Self {
        Self {
            video_id: None,
            title: None,
            channel: None,
            thumbnail: None,
            current_time: 0.0,
            duration: 0.0,
            paused: default_paused(),
            volume: default_volume(),
            ended: false,
            extra: serde_json::Map::new(),
        }
    }
}

/// Playback command issued by a controller and executed by a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Command {
    Play {
        video_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration: Option<f64>,
        /// Resume point, used to revive a target whose player died.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_time: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        playlist_id: Option<String>,
    },
    Pause,
    Resume,
    Seek {
        time: f64,
    },
    Volume {
        level: f64,
    },
    QueueNext,
    QueuePrev,
}

impl Command {
    /// Plain `play` with only a video id.
    pub fn play(video_id: impl Into<String>) -> Self {
        Command::Play {
            video_id: video_id.into(),
            title: None,
            channel: None,
            duration: None,
            start_time: None,
            playlist_id: None,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            Command::Play { .. } => "play",
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::Seek { .. } => "seek",
            Command::Volume { .. } => "volume",
            Command::QueueNext => "queue_next",
            Command::QueuePrev => "queue_prev",
        }
    }
}

/// Frames sent by a device to the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Pair { device_id: DeviceId },
    Unpair,
    Command(Command),
    State(PlayState),
}

/// Frames sent by the hub to a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Paired {
        device_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<PlayState>,
    },
    RemoteConnected {
        remote_name: String,
    },
    RemoteDisconnected,
    TargetDisconnected,
    Command(Command),
    State(PlayState),
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn error(err: &RelayError) -> Self {
        ServerMessage::Error {
            message: err.to_string(),
        }
    }
}

impl ClientMessage {
    pub fn encode(&self) -> Result<String, RelayError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, RelayError> {
        Ok(serde_json::from_str(text)?)
    }
}

impl ServerMessage {
    pub fn encode(&self) -> Result<String, RelayError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, RelayError> {
        Ok(serde_json::from_str(text)?)
    }
}

// ── Relay frames ─────────────────────────────────────────────────────────────

/// Everything in a frame except its `type`, kept exactly as the sender wrote it.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// A device frame as the hub reads it.  Only `type` (and a command's
/// `action`) is interpreted; `command` and `state` bodies pass through as sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    Pair { device_id: DeviceId },
    Unpair,
    Command(Payload),
    State(Payload),
}

/// A frame written by the hub.  Same wire shape as [`ServerMessage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Paired {
        device_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<Payload>,
    },
    RemoteConnected {
        remote_name: String,
    },
    RemoteDisconnected,
    TargetDisconnected,
    Command(Payload),
    State(Payload),
    Error {
        message: String,
    },
}

impl InboundFrame {
    pub fn decode(text: &str) -> Result<Self, RelayError> {
        let frame: Self = serde_json::from_str(text)?;
        if let InboundFrame::Command(body) = &frame {
            if !body.get("action").is_some_and(serde_json::Value::is_string) {
                return Err(RelayError::MissingAction);
            }
        }
        Ok(frame)
    }

    pub fn encode(&self) -> Result<String, RelayError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl OutboundFrame {
    pub fn error(err: &RelayError) -> Self {
        OutboundFrame::Error {
            message: err.to_string(),
        }
    }

    pub fn encode(&self) -> Result<String, RelayError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, RelayError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// One entry of `GET /api/remote/devices`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub device_id: DeviceId,
    pub device_name: String,
    pub has_state: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameRequest {
    pub device_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameResponse {
    pub ok: bool,
    pub device_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_device_id_is_stable_and_short() {
        let a = DeviceId::from_token("token-a");
        assert_eq!(a, DeviceId::from_token("token-a"));
        assert_ne!(a, DeviceId::from_token("token-b"));
        assert_eq!(a.as_str().len(), 12);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_command_wire_shape() {
        let msg = ClientMessage::Command(Command::Play {
            video_id: "abc123".into(),
            title: Some("Title".into()),
            channel: None,
            duration: Some(120.0),
            start_time: Some(3.5),
            playlist_id: None,
        });
        let value: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "command",
                "action": "play",
                "videoId": "abc123",
                "title": "Title",
                "duration": 120.0,
                "startTime": 3.5
            })
        );
    }

    #[test]
    fn test_decode_controller_frames() {
        let pair = ClientMessage::decode(r#"{"type":"pair","device_id":"0a1b2c3d4e5f"}"#).unwrap();
        assert_eq!(
            pair,
            ClientMessage::Pair {
                device_id: DeviceId::new("0a1b2c3d4e5f")
            }
        );

        let seek =
            ClientMessage::decode(r#"{"type":"command","action":"seek","time":42.0}"#).unwrap();
        assert_eq!(seek, ClientMessage::Command(Command::Seek { time: 42.0 }));

        let next = ClientMessage::decode(r#"{"type":"command","action":"queue_next"}"#).unwrap();
        assert_eq!(next, ClientMessage::Command(Command::QueueNext));
    }

    #[test]
    fn test_state_keeps_unknown_fields() {
        let text = r#"{"type":"state","videoId":"abc123","currentTime":12.5,"duration":120.0,
            "paused":false,"volume":0.8,"ended":false,"quality":"1080p"}"#;
        let ClientMessage::State(state) = ClientMessage::decode(text).unwrap() else {
            panic!("expected state");
        };
        assert_eq!(state.video_id.as_deref(), Some("abc123"));
        assert_eq!(state.extra.get("quality"), Some(&json!("1080p")));
        assert!(!state.extra.contains_key("type"));

        let relayed: serde_json::Value =
            serde_json::from_str(&ServerMessage::State(state).encode().unwrap()).unwrap();
        assert_eq!(relayed["type"], "state");
        assert_eq!(relayed["quality"], "1080p");
        assert_eq!(relayed["currentTime"], 12.5);
    }

    #[test]
    fn test_state_tolerates_null_duration() {
        let text = r#"{"type":"state","videoId":"abc123","currentTime":null,"duration":null}"#;
        let ServerMessage::State(state) = ServerMessage::decode(text).unwrap() else {
            panic!("expected state");
        };
        assert_eq!(state.duration, 0.0);
        assert_eq!(state.current_time, 0.0);
    }

    #[test]
    fn test_inbound_frames_keep_bodies_verbatim() {
        let text = r#"{"type":"command","action":"play","videoId":"abc123","quality":"hd"}"#;
        let InboundFrame::Command(body) = InboundFrame::decode(text).unwrap() else {
            panic!("expected command");
        };
        assert_eq!(
            serde_json::Value::Object(body.clone()),
            json!({"action": "play", "videoId": "abc123", "quality": "hd"})
        );

        let relayed: serde_json::Value =
            serde_json::from_str(&OutboundFrame::Command(body).encode().unwrap()).unwrap();
        let sent: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(relayed, sent);

        let state = r#"{"type":"state","paused":false,"duration":null,"videoId":"abc123"}"#;
        let InboundFrame::State(body) = InboundFrame::decode(state).unwrap() else {
            panic!("expected state");
        };
        assert_eq!(body.get("duration"), Some(&serde_json::Value::Null));
        assert!(!body.contains_key("volume"));
    }

    #[test]
    fn test_inbound_command_needs_action() {
        assert!(matches!(
            InboundFrame::decode(r#"{"type":"command","videoId":"abc123"}"#),
            Err(RelayError::MissingAction)
        ));
        assert!(InboundFrame::decode(r#"{"type":"command","action":"rewind"}"#).is_ok());
        assert!(InboundFrame::decode(r#"{"type":"teleport"}"#).is_err());
    }

    #[test]
    fn test_outbound_frames_decode_on_the_client() {
        let frame = OutboundFrame::Paired {
            device_name: "TV".into(),
            state: None,
        };
        assert_eq!(
            ServerMessage::decode(&frame.encode().unwrap()).unwrap(),
            ServerMessage::Paired {
                device_name: "TV".into(),
                state: None
            }
        );
    }

    #[test]
    fn test_paired_omits_missing_state() {
        let msg = ServerMessage::Paired {
            device_name: "Living room".into(),
            state: None,
        };
        let value: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(value, json!({"type": "paired", "device_name": "Living room"}));
    }

    #[test]
    fn test_malformed_frames_are_errors() {
        assert!(ClientMessage::decode("not json").is_err());
        assert!(ClientMessage::decode(r#"{"type":"teleport"}"#).is_err());
        assert!(ClientMessage::decode(r#"{"type":"command","action":"seek"}"#).is_err());
    }

    #[test]
    fn test_error_message_text() {
        let msg = ServerMessage::error(&RelayError::PairingNotFound);
        assert_eq!(
            msg,
            ServerMessage::Error {
                message: "Device not found or offline".into()
            }
        );
    }
}
