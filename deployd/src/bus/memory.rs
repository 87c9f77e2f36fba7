//! In-process event bus

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::trace;

use crate::bus::{BuildEvent, BusMessage, EventBus, Subscription};
use crate::errors::DeployError;

/// Event bus backed by a tokio broadcast channel.
///
/// Shares the delivery contract of the networked bus: no backlog, no
/// acknowledgment, publishes with no subscriber are dropped.
pub struct MemoryEventBus {
    tx: broadcast::Sender<BusMessage>,
}

impl MemoryEventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an arbitrary payload, bypassing event encoding
    pub fn publish_raw(&self, channel: &str, payload: impl Into<Bytes>) {
        let msg = BusMessage {
            channel: channel.to_string(),
            payload: payload.into(),
        };
        if self.tx.send(msg).is_err() {
            trace!("No subscribers on {}, event dropped", channel);
        }
    }
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, channel: &str, event: &BuildEvent) -> Result<(), DeployError> {
        self.publish_raw(channel, event.to_payload()?);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, DeployError> {
        Ok(Subscription::new(channel, self.tx.subscribe()))
    }
}
