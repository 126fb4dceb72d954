//! WebSocket link to the hub with automatic reconnect.
//!
//! `spawn_link` keeps one socket open for as long as the caller wants it.
//! Each successful connect is announced with `LinkEvent::Opened`, carrying
//! the sender for that socket's outgoing frames; each loss with
//! `LinkEvent::Closed`.  Reconnects wait `reconnect_delay` between attempts.

use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use remote_proto::protocol::{ClientMessage, ServerMessage, SESSION_COOKIE, WS_PATH};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Where the hub lives and which session token to present.
#[derive(Debug, Clone, PartialEq)]
pub struct HubEndpoint {
    base: String,
    token: String,
}

impl HubEndpoint {
    /// `base` is the hub's HTTP address as advertised by discovery, e.g.
    /// `http://192.168.1.20:8000`.  A bare `host:port` is taken as http.
    pub fn new(base: &str, token: impl Into<String>) -> Self {
        let base = base.trim().trim_end_matches('/');
        let base = if base.starts_with("http://") || base.starts_with("https://") {
            base.to_string()
        } else {
            format!("http://{}", base)
        };
        Self {
            base,
            token: token.into(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn ws_url(&self) -> String {
        let rest = self
            .base
            .strip_prefix("https://")
            .map(|r| format!("wss://{}", r))
            .or_else(|| self.base.strip_prefix("http://").map(|r| format!("ws://{}", r)))
            .unwrap_or_else(|| self.base.clone());
        format!("{}{}", rest, WS_PATH)
    }

    pub fn cookie(&self) -> String {
        format!("{}={}", SESSION_COOKIE, self.token)
    }
}

#[derive(Debug)]
pub enum LinkEvent {
    Opened(mpsc::UnboundedSender<ClientMessage>),
    Frame(ServerMessage),
    Closed,
}

/// Open one socket, presenting the session cookie.
pub async fn connect(endpoint: &HubEndpoint) -> anyhow::Result<WsStream> {
    let mut request = endpoint
        .ws_url()
        .into_client_request()
        .context("invalid hub URL")?;
    request.headers_mut().insert(
        "Cookie",
        HeaderValue::from_str(&endpoint.cookie()).context("invalid session token")?,
    );
    let (stream, _) = connect_async(request)
        .await
        .with_context(|| format!("failed to connect to {}", endpoint.ws_url()))?;
    Ok(stream)
}

/// Keep a socket to the hub open until `cancel` fires.
pub fn spawn_link(
    endpoint: HubEndpoint,
    reconnect_delay: Duration,
    cancel: CancellationToken,
) -> mpsc::Receiver<LinkEvent> {
    let (events_tx, events_rx) = mpsc::channel(256);
    tokio::spawn(async move {
        loop {
            match connect(&endpoint).await {
                Ok(stream) => {
                    info!("Connected to hub at {}", endpoint.base());
                    if !run_socket(stream, &events_tx, &cancel).await {
                        break;
                    }
                    if events_tx.send(LinkEvent::Closed).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("{:#}", e),
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(reconnect_delay) => {}
            }
            debug!("reconnecting to {}", endpoint.base());
        }
        debug!("link task for {} ended", endpoint.base());
    });
    events_rx
}

/// Pump one socket.  Returns false when the link as a whole should stop.
async fn run_socket(
    stream: WsStream,
    events_tx: &mpsc::Sender<LinkEvent>,
    cancel: &CancellationToken,
) -> bool {
    let (mut sink, mut source) = stream.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientMessage>();
    if events_tx.send(LinkEvent::Opened(out_tx)).await.is_err() {
        return false;
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return false;
            }
            outgoing = out_rx.recv() => {
                // Every sender dropped: the consumer is gone.
                let Some(message) = outgoing else { return false };
                let text = match message.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("failed to encode {:?}: {}", message, e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::text(text)).await {
                    warn!("hub send failed: {}", e);
                    return true;
                }
            }
            incoming = source.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text.as_str().to_string(),
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => text,
                        Err(_) => continue,
                    },
                    Some(Ok(Message::Close(frame))) => {
                        info!("hub closed the socket: {:?}", frame);
                        return true;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!("hub socket error: {}", e);
                        return true;
                    }
                    None => return true,
                };
                match ServerMessage::decode(&text) {
                    Ok(message) => {
                        if events_tx.send(LinkEvent::Frame(message)).await.is_err() {
                            return false;
                        }
                    }
                    Err(e) => warn!("malformed frame from hub: {} ({})", e, text),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_from_discovered_address() {
        let endpoint = HubEndpoint::new("http://192.168.1.20:8000/", "tok");
        assert_eq!(endpoint.ws_url(), "ws://192.168.1.20:8000/api/ws");
        assert_eq!(
            endpoint.http_url("/api/remote/devices"),
            "http://192.168.1.20:8000/api/remote/devices"
        );
        assert_eq!(endpoint.cookie(), "pytr_session=tok");

        let secure = HubEndpoint::new("https://hub.example", "tok");
        assert_eq!(secure.ws_url(), "wss://hub.example/api/ws");

        let bare = HubEndpoint::new("10.0.0.5:8000", "tok");
        assert_eq!(bare.base(), "http://10.0.0.5:8000");
    }
}
