use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One-shot timer that delivers `T` into a channel.  Re-arming replaces the
/// pending shot; dropping the timer cancels it.
pub struct ScheduledTask<T: Send + 'static> {
    tx: mpsc::UnboundedSender<T>,
    pending: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> ScheduledTask<T> {
    pub fn new(tx: mpsc::UnboundedSender<T>) -> Self {
        Self { tx, pending: None }
    }

    pub fn schedule(&mut self, delay: Duration, value: T) {
        self.cancel();
        let tx = self.tx.clone();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(value);
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(h) = self.pending.take() {
            h.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.pending.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl<T: Send + 'static> Drop for ScheduledTask<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}
