use std::borrow::Cow;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use remote_proto::protocol::{InboundFrame, CLOSE_NO_SESSION};
use tracing::{debug, error, info, warn};

use crate::core::{HubEvent, HubHandle};
use crate::identity::SessionIdentity;
use crate::outbox;

/// Serve one upgraded socket until it closes.
pub async fn handle_socket(socket: WebSocket, identity: SessionIdentity, hub: HubHandle) {
    let conn = hub.next_conn_id();
    let device = identity.device_id.clone();
    let (mut sender, mut receiver) = socket.split();
    let (handle, mut outbox) = outbox::channel();

    if hub
        .send(HubEvent::Connected {
            conn,
            identity,
            handle,
        })
        .await
        .is_err()
    {
        error!("hub loop gone, refusing conn {}", conn);
        return;
    }

    // Writer: drains the outbox until the hub drops this socket's handle.
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbox.next().await {
            let text = match msg.encode() {
                Ok(text) => text,
                Err(e) => {
                    error!("failed to encode frame for conn {}: {}", conn, e);
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
        debug!("writer for conn {} ended", conn);
    });

    while let Some(frame) = receiver.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!("WebSocket error from {}: {}", device, e);
                break;
            }
        };

        let text = match frame {
            Message::Text(text) => text,
            Message::Binary(data) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(_) => {
                    debug!("dropping non-UTF8 binary frame from {}", device);
                    continue;
                }
            },
            Message::Close(_) => break,
            _ => continue,
        };

        match InboundFrame::decode(&text) {
            Ok(message) => {
                if hub.send(HubEvent::Frame { conn, message }).await.is_err() {
                    break;
                }
            }
            // A bad frame never ends the session.
            Err(e) => warn!("malformed frame from {}: {} ({})", device, e, text),
        }
    }

    let _ = hub.send(HubEvent::Disconnected { conn }).await;
    writer.abort();
    info!("socket for {} closed (conn {})", device, conn);
}

/// Accept-then-close for sockets that carry no usable session.
pub async fn reject_socket(mut socket: WebSocket, reason: &'static str) {
    info!("rejecting WebSocket: {}", reason);
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_NO_SESSION,
            reason: Cow::Borrowed(reason),
        })))
        .await;
}
