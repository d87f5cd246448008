use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use crate::error::SessionError;
use super::protocol::{CapabilitySnapshot, InvokeRequest, InvokeResponse};

/// Application side of a session. Held weakly by the coordinator.
///
/// Every callback runs on its own task; a panic only loses that call.
#[async_trait]
pub trait SessionHandler: Send + Sync {
    /// Handshake accepted. `events` stays usable until the connection ends.
    async fn on_connected(&self, events: EventSender);

    async fn on_disconnected(&self, reason: &str);

    async fn on_invoke(&self, request: InvokeRequest) -> InvokeResponse;
}

/// Read fresh before every handshake.
#[async_trait]
pub trait CapabilitySource: Send + Sync {
    async fn snapshot(&self) -> CapabilitySnapshot;
}

#[async_trait]
impl CapabilitySource for CapabilitySnapshot {
    async fn snapshot(&self) -> CapabilitySnapshot {
        self.clone()
    }
}

/// Sends `event` frames on the current connection.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<(String, Value)>,
}

impl EventSender {
    pub(crate) fn new(tx: mpsc::Sender<(String, Value)>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, event: impl Into<String>, payload: Value) -> Result<(), SessionError> {
        self.tx
            .send((event.into(), payload))
            .await
            .map_err(|_| SessionError::TransportDropped("session closed".to_string()))
    }

    /// True once the connection this sender belonged to has ended
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
