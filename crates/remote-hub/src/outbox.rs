//! Per-socket outbound queue.
//!
//! Control frames (`paired`, `error`, `command`, ...) go through an ordered
//! unbounded channel.  `state` frames go through a `watch` slot instead, so a
//! controller that reads slowly only ever sees the newest snapshot: a new
//! snapshot overwrites one that has not been written yet.

use remote_proto::protocol::{OutboundFrame, Payload};
use tokio::sync::{mpsc, watch};

/// Hub side of a socket's queue.  Dropping it ends the writer task.
#[derive(Debug)]
pub struct SessionHandle {
    control: mpsc::UnboundedSender<OutboundFrame>,
    state: watch::Sender<Option<Payload>>,
}

/// Writer side of a socket's queue.
#[derive(Debug)]
pub struct SessionOutbox {
    control: mpsc::UnboundedReceiver<OutboundFrame>,
    state: watch::Receiver<Option<Payload>>,
}

pub fn channel() -> (SessionHandle, SessionOutbox) {
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(None);
    (
        SessionHandle {
            control: control_tx,
            state: state_tx,
        },
        SessionOutbox {
            control: control_rx,
            state: state_rx,
        },
    )
}

impl SessionHandle {
    /// Queue `message`.  Returns false when the writer has gone away.
    pub fn deliver(&self, message: OutboundFrame) -> bool {
        match message {
            OutboundFrame::State(state) => {
                self.state.send_replace(Some(state));
                !self.control.is_closed()
            }
            other => {
                // A snapshot still pending from a link that just ended (or was
                // replaced) must not be written after this frame.
                if matches!(
                    other,
                    OutboundFrame::TargetDisconnected | OutboundFrame::Paired { .. }
                ) {
                    self.state.send_replace(None);
                }
                self.control.send(other).is_ok()
            }
        }
    }
}

impl SessionOutbox {
    /// Next frame to write.  Pending control frames always go first.
    /// Returns `None` once the hub dropped the handle.
    pub async fn next(&mut self) -> Option<OutboundFrame> {
        loop {
            tokio::select! {
                biased;
                msg = self.control.recv() => return msg,
                changed = self.state.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                    let snapshot = self.state.borrow_and_update().clone();
                    if let Some(state) = snapshot {
                        return Some(OutboundFrame::State(state));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn at(t: f64) -> Payload {
        let mut state = Payload::new();
        state.insert("videoId".into(), "abc123".into());
        state.insert("currentTime".into(), t.into());
        state
    }

    async fn next_now(outbox: &mut SessionOutbox) -> Option<OutboundFrame> {
        tokio::time::timeout(Duration::from_millis(50), outbox.next())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn unread_states_coalesce_to_latest() {
        let (handle, mut outbox) = channel();
        for t in 1..=5 {
            assert!(handle.deliver(OutboundFrame::State(at(t as f64))));
        }
        assert_eq!(next_now(&mut outbox).await, Some(OutboundFrame::State(at(5.0))));
        assert_eq!(next_now(&mut outbox).await, None);
    }

    #[tokio::test]
    async fn control_frames_keep_order_and_go_first() {
        let (handle, mut outbox) = channel();
        handle.deliver(OutboundFrame::State(at(1.0)));
        handle.deliver(OutboundFrame::RemoteConnected {
            remote_name: "Phone".into(),
        });
        handle.deliver(OutboundFrame::Error {
            message: "boom".into(),
        });

        assert!(matches!(
            next_now(&mut outbox).await,
            Some(OutboundFrame::RemoteConnected { .. })
        ));
        assert!(matches!(
            next_now(&mut outbox).await,
            Some(OutboundFrame::Error { .. })
        ));
        assert_eq!(next_now(&mut outbox).await, Some(OutboundFrame::State(at(1.0))));
    }

    #[tokio::test]
    async fn link_end_discards_pending_state() {
        let (handle, mut outbox) = channel();
        handle.deliver(OutboundFrame::State(at(3.0)));
        handle.deliver(OutboundFrame::TargetDisconnected);

        assert_eq!(
            next_now(&mut outbox).await,
            Some(OutboundFrame::TargetDisconnected)
        );
        assert_eq!(next_now(&mut outbox).await, None);
    }

    #[tokio::test]
    async fn dropping_handle_ends_outbox() {
        let (handle, mut outbox) = channel();
        drop(handle);
        assert_eq!(outbox.next().await, None);
    }
}
