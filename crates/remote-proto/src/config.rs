use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::discovery::{DEFAULT_SERVER_NAME, DISCOVERY_PORT};
use super::platform;
use super::protocol::ProfileId;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// UDP responder settings.  `id`, `name` and `address` override what the hub
/// advertises; left empty they are derived from the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_discovery_enabled")]
    pub enabled: bool,
    /// Kept on the wildcard address by default: a socket bound to a unicast
    /// address does not receive datagrams sent to 255.255.255.255.
    #[serde(default = "default_discovery_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_discovery_port")]
    pub port: u16,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default = "default_server_name")]
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    /// How long the prober collects replies.
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// Delay before the probe is resent; 0 sends it once.
    #[serde(default = "default_resend_delay_ms")]
    pub resend_delay_ms: u64,
}

/// Sessions known to the hub.  Stands in for the hosting session layer: each
/// token belongs to one profile and carries the device's display name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default)]
    pub sessions: Vec<SessionEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntry {
    pub token: String,
    pub profile_id: ProfileId,
    #[serde(default = "default_device_name")]
    pub device_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the hub, e.g. `http://192.168.1.20:8000`.  Empty means
    /// "discover on the LAN".
    #[serde(default)]
    pub hub_url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Minimum spacing of progress-driven state frames sent by a target.
    #[serde(default = "default_state_interval_ms")]
    pub state_interval_ms: u64,
    #[serde(default)]
    pub repair: RepairConfig,
}

/// Re-pair retry cadence used by a controller after a socket reconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairConfig {
    #[serde(default = "default_repair_interval_ms")]
    pub interval_ms: u64,
    /// Multiplier applied per failed attempt; 1.0 keeps a fixed cadence.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
    /// Give up after this many failed attempts; 0 retries forever.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: default_discovery_enabled(),
            bind_address: default_discovery_bind_address(),
            port: default_discovery_port(),
            id: None,
            name: default_server_name(),
            address: None,
            window_ms: default_window_ms(),
            resend_delay_ms: default_resend_delay_ms(),
        }
    }
}

impl DiscoveryConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn resend_delay(&self) -> Option<Duration> {
        (self.resend_delay_ms > 0).then(|| Duration::from_millis(self.resend_delay_ms))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            hub_url: String::new(),
            token: String::new(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            state_interval_ms: default_state_interval_ms(),
            repair: RepairConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn state_interval(&self) -> Duration {
        Duration::from_millis(self.state_interval_ms)
    }
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_repair_interval_ms(),
            backoff_factor: default_backoff_factor(),
            max_interval_ms: default_max_interval_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_discovery_enabled() -> bool {
    true
}

fn default_discovery_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_discovery_port() -> u16 {
    DISCOVERY_PORT
}

fn default_server_name() -> String {
    DEFAULT_SERVER_NAME.to_string()
}

fn default_window_ms() -> u64 {
    3000
}

fn default_resend_delay_ms() -> u64 {
    500
}

fn default_device_name() -> String {
    "Unknown Device".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    2000
}

fn default_state_interval_ms() -> u64 {
    1000
}

fn default_repair_interval_ms() -> u64 {
    5000
}

fn default_backoff_factor() -> f64 {
    1.0
}

fn default_max_interval_ms() -> u64 {
    60_000
}

fn default_max_attempts() -> u32 {
    12
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load `path`, writing a default file first if it does not exist.
    pub fn load_from(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &std::path::Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
