//! Broadcast hub for live observers.
//!
//! Keeps the registry of connected observers and fans every published
//! message out to all of them. Registry mutation (connect, disconnect, prune)
//! is serialized by one lock that is never held across an observer send:
//! delivery runs against a snapshot, and a connect reserves its slot, sends
//! the ack unlocked, then inserts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapters::{Observer, ObserverError};
use crate::domain::{BroadcastMessage, InboundMessage};

/// Opaque identifier handed to each observer on connect
pub type ObserverId = Uuid;

/// Default ceiling on simultaneously connected observers
pub const DEFAULT_MAX_CONNECTIONS: usize = 100;

/// Errors surfaced by the hub
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Max connections reached ({limit})")]
    CapacityReached { limit: usize },

    #[error("Failed to deliver connect acknowledgment: {0}")]
    Handshake(#[from] ObserverError),

    #[error("Failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Registry of observers plus fan-out delivery
pub struct EventHub {
    observers: Mutex<HashMap<ObserverId, Arc<dyn Observer>>>,

    /// Slots held by connects still delivering their ack; only incremented
    /// under the `observers` lock
    pending: AtomicUsize,

    max_connections: usize,
}

/// Releases a reserved slot, including when the connect future is dropped
struct Reservation<'a>(&'a AtomicUsize);

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONNECTIONS)
    }
}

impl EventHub {
    pub fn new(max_connections: usize) -> Self {
        Self {
            observers: Mutex::new(HashMap::new()),
            pending: AtomicUsize::new(0),
            max_connections,
        }
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Register an observer and return its id.
    ///
    /// The observer receives a `connected` acknowledgment carrying its id
    /// before it becomes visible to `publish`. The ack is sent without the
    /// registry lock; its slot is reserved meanwhile. Once the registry is
    /// full the newcomer is refused; existing observers are never evicted.
    pub async fn connect(&self, observer: Arc<dyn Observer>) -> Result<ObserverId, HubError> {
        let reservation = {
            let observers = self.observers.lock().await;
            if observers.len() + self.pending.load(Ordering::Acquire) >= self.max_connections {
                warn!(limit = self.max_connections, "Refusing observer, registry full");
                return Err(HubError::CapacityReached {
                    limit: self.max_connections,
                });
            }
            self.pending.fetch_add(1, Ordering::AcqRel);
            Reservation(&self.pending)
        };

        let client_id = Uuid::new_v4();
        self.send_ack(client_id, observer.as_ref()).await?;

        let mut observers = self.observers.lock().await;
        observers.insert(client_id, observer);
        drop(reservation);

        info!(%client_id, connections = observers.len(), "Observer connected");
        Ok(client_id)
    }

    async fn send_ack(&self, client_id: ObserverId, observer: &dyn Observer) -> Result<(), HubError> {
        let ack = serde_json::to_string(&BroadcastMessage::Connected { client_id })?;
        observer.send(&ack).await?;
        Ok(())
    }

    /// Remove an observer. Unknown ids are ignored.
    pub async fn disconnect(&self, id: ObserverId) {
        if self.observers.lock().await.remove(&id).is_some() {
            info!(client_id = %id, "Observer disconnected");
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.observers.lock().await.len()
    }

    /// Deliver a message to every registered observer.
    ///
    /// Each delivery is independent: observers that fail are pruned after the
    /// pass and the rest still receive the message. Returns the number of
    /// successful deliveries.
    pub async fn publish(&self, message: &BroadcastMessage) -> usize {
        let payload = match serde_json::to_string(message) {
            Ok(json) => json,
            Err(e) => {
                warn!(kind = message.kind(), error = %e, "Failed to serialize broadcast");
                return 0;
            }
        };

        let snapshot: Vec<(ObserverId, Arc<dyn Observer>)> = {
            let observers = self.observers.lock().await;
            observers
                .iter()
                .map(|(id, observer)| (*id, Arc::clone(observer)))
                .collect()
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, observer) in snapshot {
            match observer.send(&payload).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(client_id = %id, adapter = observer.name(), error = %e, "Failed to send to observer");
                    dead.push(id);
                }
            }
        }

        if !dead.is_empty() {
            let mut observers = self.observers.lock().await;
            for id in dead {
                observers.remove(&id);
            }
        }

        debug!(kind = message.kind(), step = ?message.step(), delivered, "Broadcast published");
        delivered
    }

    /// Handle a text frame received from an observer.
    ///
    /// `ping` is answered with `pong` to the sender only. Unknown message
    /// types are ignored; unparseable text is logged and dropped.
    pub async fn handle_inbound(&self, text: &str, from: ObserverId) {
        let message: InboundMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(_) => {
                let preview: String = text.chars().take(100).collect();
                warn!(client_id = %from, message = %preview, "Malformed observer message");
                return;
            }
        };

        match message {
            InboundMessage::Ping => self.send_to(from, &BroadcastMessage::Pong).await,
            InboundMessage::Unknown => {
                debug!(client_id = %from, "Ignoring unrecognized observer message");
            }
        }
    }

    /// Send a message to one observer, pruning it on failure
    async fn send_to(&self, id: ObserverId, message: &BroadcastMessage) {
        let observer = match self.observers.lock().await.get(&id) {
            Some(observer) => Arc::clone(observer),
            None => return,
        };

        let payload = match serde_json::to_string(message) {
            Ok(json) => json,
            Err(e) => {
                warn!(kind = message.kind(), error = %e, "Failed to serialize reply");
                return;
            }
        };

        if let Err(e) = observer.send(&payload).await {
            warn!(client_id = %id, error = %e, "Failed to reply to observer");
            self.observers.lock().await.remove(&id);
        }
    }
}
