//! Collects build events from a live subscription

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::bus::Subscription;

/// Background task accumulating the log lines of one deployment
pub struct LogCollector {
    stop_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Vec<String>>,
}

impl LogCollector {
    /// Start collecting from `subscription`.
    ///
    /// After [`LogCollector::finish`] is called, collection continues until
    /// no event arrives for `grace`.
    pub fn start(subscription: Subscription, grace: Duration) -> Self {
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(collect(subscription, stop_rx, grace));
        Self {
            stop_tx: Some(stop_tx),
            handle,
        }
    }

    /// Stop collecting and return every line received, in arrival order
    pub async fn finish(mut self) -> Vec<String> {
        if let Some(stop_tx) = self.stop_tx.take() {
            // Err means the task already ended with a closed subscription
            let _ = stop_tx.send(());
        }
        match self.handle.await {
            Ok(lines) => lines,
            Err(e) => {
                warn!("Log collector failed: {}", e);
                Vec::new()
            }
        }
    }
}

async fn collect(
    mut subscription: Subscription,
    mut stop_rx: oneshot::Receiver<()>,
    grace: Duration,
) -> Vec<String> {
    let mut lines = Vec::new();

    loop {
        tokio::select! {
            biased;
            event = subscription.next() => match event {
                Some(event) => lines.push(event.log),
                None => return lines,
            },
            _ = &mut stop_rx => break,
        }
    }

    while let Ok(Some(event)) = tokio::time::timeout(grace, subscription.next()).await {
        lines.push(event.log);
    }

    debug!(
        "Collected {} log lines from {}",
        lines.len(),
        subscription.channel()
    );
    lines
}
