//! Typed broadcast bus between sibling editor components.
//!
//! Components that edit the same annotation set (the map, the radius slider,
//! the location list) announce their changes here instead of through
//! string-named events. Each participant joins with [`SyncBus::join`] and gets
//! a [`BusEndpoint`] carrying its own [`ComponentId`]; an endpoint never
//! receives the messages it published itself.
//!
//! Payload annotations are raw JSON: whatever a sibling sends is only trusted
//! after the gateway has parsed and sanitized it.

#[cfg(test)]
#[path = "bus_test.rs"]
mod bus_test;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::Timestamp;

/// Identity of one bus participant.
pub type ComponentId = Uuid;

/// A message between sibling components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMessage {
    /// A sibling replaced the whole annotation set.
    AnnotationsReplaced {
        annotations: serde_json::Value,
        #[serde(default)]
        timestamp: Option<Timestamp>,
        source: String,
    },
    /// Authoritative state pushed without a producer timestamp.
    ForceSync { annotations: serde_json::Value },
    /// A sibling changed one annotation's radius.
    RadiusChanged {
        index: usize,
        radius: f64,
        #[serde(default)]
        timestamp: Option<Timestamp>,
    },
}

/// A message plus the component that published it.
#[derive(Debug, Clone, PartialEq)]
pub struct BusFrame {
    pub origin: ComponentId,
    pub message: BusMessage,
}

/// Broadcast channel shared by every sibling component.
#[derive(Debug, Clone)]
pub struct SyncBus {
    tx: broadcast::Sender<BusFrame>,
}

impl SyncBus {
    /// Create a bus buffering up to `capacity` messages per slow receiver.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Join the bus as a new component.
    #[must_use]
    pub fn join(&self) -> BusEndpoint {
        BusEndpoint { id: Uuid::new_v4(), tx: self.tx.clone(), rx: self.tx.subscribe() }
    }

    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// One component's view of the bus.
#[derive(Debug)]
pub struct BusEndpoint {
    id: ComponentId,
    tx: broadcast::Sender<BusFrame>,
    rx: broadcast::Receiver<BusFrame>,
}

impl BusEndpoint {
    #[must_use]
    pub fn id(&self) -> ComponentId {
        self.id
    }

    /// Publish to every other participant. Returns how many receivers were reached.
    pub fn publish(&self, message: BusMessage) -> usize {
        let frame = BusFrame { origin: self.id, message };
        match self.tx.send(frame) {
            // Count includes this endpoint's own receiver.
            Ok(count) => count.saturating_sub(1),
            Err(_) => 0,
        }
    }

    /// Next message from another participant, or `None` once the bus is gone.
    ///
    /// Messages lost to lag are skipped with a warning; the next envelope that
    /// arrives carries full state anyway.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.rx.recv().await {
                Ok(frame) if frame.origin == self.id => {}
                Ok(frame) => {
                    debug!(origin = %frame.origin, component = %self.id, "bus message received");
                    return Some(frame.message);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(component = %self.id, skipped, "bus receiver lagged; messages dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
