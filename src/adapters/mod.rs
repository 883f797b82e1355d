//! Observer adapters.
//!
//! An observer is anything that receives broadcast messages from the
//! [`EventHub`](crate::core::EventHub): a WebSocket connection, the log, a
//! test recorder. Payloads arrive already serialized as JSON text.

pub mod channel;
pub mod log;

use async_trait::async_trait;
use thiserror::Error;

pub use channel::ChannelObserver;
pub use log::LogObserver;

/// Why a delivery to an observer failed
#[derive(Debug, Error)]
pub enum ObserverError {
    #[error("observer connection is closed")]
    Closed,

    #[error("observer is not keeping up (send buffer full)")]
    Lagging,

    #[error("observer send failed: {0}")]
    Other(String),
}

/// Trait for broadcast sinks
#[async_trait]
pub trait Observer: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    /// Deliver one serialized message.
    ///
    /// Must not wait on the remote end; the hub awaits every observer in turn.
    async fn send(&self, payload: &str) -> Result<(), ObserverError>;
}
