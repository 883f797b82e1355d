//! Observer that writes every broadcast to the tracing log.
//!
//! Used by the headless `run` command, where there is no WebSocket client.

use async_trait::async_trait;
use tracing::info;

use super::{Observer, ObserverError};

#[derive(Debug, Default)]
pub struct LogObserver;

impl LogObserver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Observer for LogObserver {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, payload: &str) -> Result<(), ObserverError> {
        info!(target: "auditrun::events", "{}", payload);
        Ok(())
    }
}
