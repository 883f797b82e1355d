//! Channel-backed observer used by WebSocket connections.
//!
//! The hub pushes into a bounded mpsc channel; the connection's own task
//! drains it onto the socket. A full buffer counts as a failed delivery so a
//! stalled client is pruned instead of holding up everyone else.

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};

use super::{Observer, ObserverError};

/// Per-connection buffer of outbound messages
pub const OBSERVER_BUFFER: usize = 256;

/// Observer that forwards payloads into an mpsc channel
pub struct ChannelObserver {
    tx: mpsc::Sender<String>,
}

impl ChannelObserver {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }

    /// Create an observer together with the receiving end of its channel
    pub fn channel() -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(OBSERVER_BUFFER);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl Observer for ChannelObserver {
    fn name(&self) -> &str {
        "channel"
    }

    async fn send(&self, payload: &str) -> Result<(), ObserverError> {
        self.tx
            .try_send(payload.to_string())
            .map_err(|e| match e {
                TrySendError::Full(_) => ObserverError::Lagging,
                TrySendError::Closed(_) => ObserverError::Closed,
            })
    }
}
