//! LAN discovery responder.
//!
//! Answers the broadcast probe on UDP 5444 with a JSON identity record so a
//! client can find the hub without configuration.  Any host on the broadcast
//! domain gets an answer.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use remote_proto::config::DiscoveryConfig;
use remote_proto::discovery::{is_probe, DiscoveryReply};
use remote_proto::platform;
use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};

/// Build the record this hub advertises.  Config overrides win over values
/// derived from the host.
pub fn build_reply(config: &DiscoveryConfig, http_port: u16) -> DiscoveryReply {
    DiscoveryReply {
        id: config.id.clone().unwrap_or_else(platform::host_name),
        name: config.name.clone(),
        address: config
            .address
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", local_ip(), http_port)),
    }
}

/// LAN address of this machine: the local side of a UDP socket "connected"
/// towards a public address.  No packet is sent.
pub fn local_ip() -> IpAddr {
    let probe = || -> std::io::Result<IpAddr> {
        let socket = std::net::UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("8.8.8.8:80")?;
        Ok(socket.local_addr()?.ip())
    };
    probe().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

pub async fn bind(bind_address: &str, port: u16) -> std::io::Result<UdpSocket> {
    let socket = UdpSocket::bind((bind_address, port)).await?;
    socket.set_broadcast(true)?;
    Ok(socket)
}

/// Answer probes on `socket` forever.
pub async fn serve(socket: UdpSocket, reply: DiscoveryReply) -> anyhow::Result<()> {
    let payload = serde_json::to_vec(&reply)?;
    let mut buf = [0u8; 256];
    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                // ICMP port-unreachable from a vanished prober shows up here
                // on some platforms; keep serving.
                debug!("discovery recv error: {}", e);
                continue;
            }
        };
        if !is_probe(&buf[..len]) {
            debug!("ignoring {} byte datagram from {}", len, peer);
            continue;
        }
        info!("Discovery query from {}", peer.ip());
        if let Err(e) = socket.send_to(&payload, peer).await {
            warn!("discovery reply to {} failed: {}", peer, e);
        }
    }
}

/// Spawn the responder.  A bind failure ends this task only; the rest of the
/// hub keeps running.
pub fn start_responder(
    bind_address: String,
    port: u16,
    reply: DiscoveryReply,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let socket = match bind(&bind_address, port).await {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to bind discovery socket {}:{}: {}", bind_address, port, e);
                return;
            }
        };
        let local: Option<SocketAddr> = socket.local_addr().ok();
        info!(
            "Discovery listening on UDP {:?} (address: {})",
            local, reply.address
        );
        if let Err(e) = serve(socket, reply).await {
            error!("discovery responder stopped: {}", e);
        }
    })
}
