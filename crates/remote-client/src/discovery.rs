//! LAN discovery prober.
//!
//! Broadcasts the probe datagram, optionally repeats it once, and collects
//! hub replies for a fixed window.  Hosts are deduplicated by their
//! advertised address and returned in arrival order.  A scan with no replies
//! is an empty list, not an error.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Local};
use remote_proto::config::DiscoveryConfig;
use remote_proto::discovery::{
    DiscoveryReply, DEFAULT_RESEND_DELAY, DEFAULT_WINDOW, DISCOVERY_PORT, PROBE,
};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to open discovery socket: {0}")]
    Bind(#[source] std::io::Error),
    #[error("failed to send probe to {addr}: {source}")]
    Send {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredHost {
    pub id: String,
    pub name: String,
    pub address: String,
    pub last_seen: DateTime<Local>,
}

#[derive(Debug, Clone)]
pub struct ProbeOptions {
    pub destination: SocketAddr,
    pub window: Duration,
    pub resend_delay: Option<Duration>,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            destination: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, DISCOVERY_PORT)),
            window: DEFAULT_WINDOW,
            resend_delay: Some(DEFAULT_RESEND_DELAY),
        }
    }
}

impl ProbeOptions {
    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self {
            destination: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, config.port)),
            window: config.window(),
            resend_delay: config.resend_delay(),
        }
    }
}

#[derive(Debug, Default)]
struct ScanSlot {
    generation: u64,
    token: Option<CancellationToken>,
}

/// Runs scans.  At most one scan is live per prober; starting a new one stops
/// the previous.
#[derive(Debug, Default)]
pub struct Prober {
    options: ProbeOptions,
    in_flight: Mutex<ScanSlot>,
}

impl Prober {
    pub fn new(options: ProbeOptions) -> Self {
        Self {
            options,
            in_flight: Mutex::new(ScanSlot::default()),
        }
    }

    pub fn options(&self) -> &ProbeOptions {
        &self.options
    }

    /// Abort the in-flight scan, if any.  The scan returns what it has
    /// collected so far.
    pub fn stop_discovery(&self) {
        if let Ok(mut slot) = self.in_flight.lock() {
            if let Some(token) = slot.token.take() {
                debug!("stopping in-flight discovery");
                token.cancel();
            }
        }
    }

    pub async fn discover(&self) -> Result<Vec<DiscoveredHost>, DiscoveryError> {
        let token = CancellationToken::new();
        let generation = match self.in_flight.lock() {
            Ok(mut slot) => {
                if let Some(previous) = slot.token.replace(token.clone()) {
                    previous.cancel();
                }
                slot.generation += 1;
                slot.generation
            }
            Err(_) => 0,
        };

        let result = scan(&self.options, &token).await;

        if let Ok(mut slot) = self.in_flight.lock() {
            // A newer scan may already own the slot.
            if slot.generation == generation {
                slot.token = None;
            }
        }
        result
    }
}

async fn scan(
    options: &ProbeOptions,
    cancel: &CancellationToken,
) -> Result<Vec<DiscoveredHost>, DiscoveryError> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .await
        .map_err(DiscoveryError::Bind)?;
    socket.set_broadcast(true).map_err(DiscoveryError::Bind)?;

    send_probe(&socket, options.destination).await?;
    info!("Discovery probe sent to {}", options.destination);

    let started = Instant::now();
    let deadline = started + options.window;
    let mut resend_at = options.resend_delay.map(|d| started + d);
    let mut hosts: Vec<DiscoveredHost> = Vec::new();
    let mut buf = [0u8; 1024];

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("discovery cancelled with {} host(s)", hosts.len());
                break;
            }
            _ = sleep_until(deadline) => break,
            _ = sleep_until(resend_at.unwrap_or(deadline)), if resend_at.is_some() => {
                resend_at = None;
                if let Err(e) = send_probe(&socket, options.destination).await {
                    warn!("{}", e);
                }
            }
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, peer)) => match serde_json::from_slice::<DiscoveryReply>(&buf[..len]) {
                    Ok(reply) => merge(&mut hosts, reply),
                    Err(e) => debug!("ignoring non-reply datagram from {}: {}", peer, e),
                },
                Err(e) => debug!("discovery recv error: {}", e),
            },
        }
    }

    info!("Discovery found {} host(s)", hosts.len());
    Ok(hosts)
}

async fn send_probe(socket: &UdpSocket, addr: SocketAddr) -> Result<(), DiscoveryError> {
    socket
        .send_to(PROBE, addr)
        .await
        .map(|_| ())
        .map_err(|source| DiscoveryError::Send { addr, source })
}

fn merge(hosts: &mut Vec<DiscoveredHost>, reply: DiscoveryReply) {
    let now = Local::now();
    match hosts.iter_mut().find(|h| h.address == reply.address) {
        Some(existing) => existing.last_seen = now,
        None => {
            debug!("discovered {} at {}", reply.id, reply.address);
            hosts.push(DiscoveredHost {
                id: reply.id,
                name: reply.name,
                address: reply.address,
                last_seen: now,
            });
        }
    }
}
