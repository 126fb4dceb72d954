use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DISCOVERY_PORT: u16 = 5444;

/// Literal probe payload broadcast by clients.
pub const PROBE: &[u8] = b"who is PytrServer?";

pub const DEFAULT_SERVER_NAME: &str = "PYTR";

/// How long a prober listens for replies.
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(3000);

/// Delay before the probe is sent a second time.
pub const DEFAULT_RESEND_DELAY: Duration = Duration::from_millis(500);

/// Identity record a responder sends back to the prober.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryReply {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Address")]
    pub address: String,
}

/// True when `datagram` is the probe, ignoring surrounding whitespace.
pub fn is_probe(datagram: &[u8]) -> bool {
    datagram.trim_ascii() == PROBE
}
