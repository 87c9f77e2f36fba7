//! Ephemeral publish/subscribe transport for build progress
//!
//! Delivery is at-most-once with no backlog: a [`Subscription`] only sees
//! events published after it was created, and a publish with no attached
//! subscriber is simply lost. Per-channel ordering is whatever the backend
//! delivers.

pub mod memory;
pub mod mqtt;
pub mod topics;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::errors::DeployError;

pub use memory::MemoryEventBus;
pub use mqtt::{BusAddress, MqttEventBus};
pub use topics::Channels;

/// A single build log message, `{ "log": "<string>" }` on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildEvent {
    pub log: String,
}

impl BuildEvent {
    pub fn new(log: impl Into<String>) -> Self {
        Self { log: log.into() }
    }

    pub fn to_payload(&self) -> Result<Bytes, DeployError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

/// Raw message as delivered by a backend, before payload decoding
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub channel: String,
    pub payload: Bytes,
}

impl BusMessage {
    /// Parse payload as a build event
    pub fn parse_event(&self) -> Result<BuildEvent, DeployError> {
        serde_json::from_slice(&self.payload).map_err(|e| DeployError::EventBusError(e.to_string()))
    }
}

/// Publish/subscribe client
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Fire-and-forget publish. Never waits for delivery.
    async fn publish(&self, channel: &str, event: &BuildEvent) -> Result<(), DeployError>;

    /// Attach a live subscriber to `channel`
    async fn subscribe(&self, channel: &str) -> Result<Subscription, DeployError>;

    /// Flush pending publishes and release the connection
    async fn close(&self) -> Result<(), DeployError> {
        Ok(())
    }
}

/// Live sequence of events for one channel
pub struct Subscription {
    channel: String,
    rx: broadcast::Receiver<BusMessage>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(channel: impl Into<String>, rx: broadcast::Receiver<BusMessage>) -> Self {
        Self {
            channel: channel.into(),
            rx,
            release: None,
        }
    }

    /// Run `release` once when this subscription is dropped
    pub fn on_release(mut self, release: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(release));
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the next well-formed event on this channel.
    ///
    /// Malformed payloads and messages for other channels are skipped.
    /// Returns `None` once the backend has shut down.
    pub async fn next(&mut self) -> Option<BuildEvent> {
        loop {
            match self.rx.recv().await {
                Ok(msg) => {
                    if msg.channel != self.channel {
                        continue;
                    }
                    match msg.parse_event() {
                        Ok(event) => return Some(event),
                        Err(e) => {
                            warn!("Dropping malformed event on {}: {}", self.channel, e);
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Subscriber on {} lagged, {} events lost", self.channel, skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}
