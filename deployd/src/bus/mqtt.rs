//! MQTT-backed event bus

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::bus::{BuildEvent, BusMessage, EventBus, Subscription};
use crate::errors::DeployError;

/// MQTT broker address
#[derive(Debug, Clone)]
pub struct BusAddress {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Optional path to a PEM-encoded CA certificate for broker verification.
    /// When `None` and `use_tls` is `true`, the system certificate store is used.
    pub ca_cert_path: Option<String>,
}

impl Default for BusAddress {
    fn default() -> Self {
        Self {
            host: "".to_string(),
            port: 1883,
            use_tls: false,
            username: None,
            password: None,
            ca_cert_path: None,
        }
    }
}

impl BusAddress {
    /// Parse an `mqtt://`, `mqtts://`, `tcp://` or `ssl://` URL
    pub fn parse(raw: &str) -> Result<Self, DeployError> {
        let url = Url::parse(raw)
            .map_err(|e| DeployError::ConfigError(format!("Invalid event bus URL {raw}: {e}")))?;

        let use_tls = match url.scheme() {
            "mqtt" | "tcp" => false,
            "mqtts" | "ssl" => true,
            other => {
                return Err(DeployError::ConfigError(format!(
                    "Unsupported event bus scheme: {other}"
                )))
            }
        };

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| DeployError::ConfigError(format!("Event bus URL has no host: {raw}")))?
            .to_string();

        let port = url.port().unwrap_or(if use_tls { 8883 } else { 1883 });
        let username = Some(url.username().to_string()).filter(|u| !u.is_empty());
        let password = url.password().map(str::to_string);

        Ok(Self {
            host,
            port,
            use_tls,
            username,
            password,
            ca_cert_path: None,
        })
    }
}

/// Live subscription count per channel. The broker subscription exists
/// while the count is non-zero.
#[derive(Debug, Default)]
struct ChannelRefs {
    counts: std::sync::Mutex<HashMap<String, usize>>,
}

impl ChannelRefs {
    /// Returns `true` for the first holder of `channel`
    fn acquire(&self, channel: &str) -> bool {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        let count = counts.entry(channel.to_string()).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Returns `true` when the last holder of `channel` let go
    fn release(&self, channel: &str) -> bool {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        match counts.get_mut(channel) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                counts.remove(channel);
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    fn held(&self) -> usize {
        let counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        counts.len()
    }
}

/// Event bus client over an MQTT broker.
///
/// Publishes use QoS 0 and are queued without waiting; a background task
/// drives the connection and fans incoming publishes out to subscriptions.
/// A broker subscription is dropped once its last [`Subscription`] is.
pub struct MqttEventBus {
    client: AsyncClient,
    incoming: broadcast::Sender<BusMessage>,
    channels: Arc<ChannelRefs>,
    closing: Arc<AtomicBool>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl MqttEventBus {
    /// Connect to the broker
    pub fn connect(
        address: &BusAddress,
        client_id: &str,
        capacity: usize,
    ) -> Result<Self, DeployError> {
        if address.host.is_empty() {
            return Err(DeployError::EventBusError(
                "Event bus host is not configured".to_string(),
            ));
        }

        let mut options = MqttOptions::new(client_id, &address.host, address.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let Some(ref username) = address.username {
            options.set_credentials(username, address.password.clone().unwrap_or_default());
        }

        if address.use_tls {
            use rumqttc::{TlsConfiguration, Transport};
            use rustls::ClientConfig;

            let mut root_cert_store = rustls::RootCertStore::empty();

            if let Some(ref ca_path) = address.ca_cert_path {
                let ca_pem = std::fs::read(ca_path).map_err(|e| {
                    DeployError::EventBusError(format!("Failed to read CA cert {ca_path}: {e}"))
                })?;
                let mut cursor = std::io::Cursor::new(ca_pem);
                for cert in rustls_pemfile::certs(&mut cursor).flatten() {
                    let _ = root_cert_store.add(cert);
                }
            } else {
                for cert in rustls_native_certs::load_native_certs().unwrap_or_default() {
                    let _ = root_cert_store.add(cert);
                }
            }

            let client_config = ClientConfig::builder()
                .with_root_certificates(root_cert_store)
                .with_no_client_auth();

            options.set_transport(Transport::tls_with_config(TlsConfiguration::Rustls(
                Arc::new(client_config),
            )));
        }

        let (client, eventloop) = AsyncClient::new(options, capacity.max(10));
        let (incoming, _) = broadcast::channel(capacity.max(1));
        let closing = Arc::new(AtomicBool::new(false));

        let poller = tokio::spawn(drive_eventloop(eventloop, incoming.clone(), closing.clone()));

        info!("Event bus client {} connecting to {}:{}", client_id, address.host, address.port);

        Ok(Self {
            client,
            incoming,
            channels: Arc::new(ChannelRefs::default()),
            closing,
            poller: Mutex::new(Some(poller)),
        })
    }
}

async fn drive_eventloop(
    mut eventloop: EventLoop,
    incoming: broadcast::Sender<BusMessage>,
    closing: Arc<AtomicBool>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!("Received message on channel: {}", publish.topic);
                let _ = incoming.send(BusMessage {
                    channel: publish.topic.clone(),
                    payload: publish.payload.clone(),
                });
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("Event bus connected");
            }
            Ok(Event::Incoming(Packet::SubAck(_))) => {
                debug!("Subscription acknowledged");
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("Event bus disconnected");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                if closing.load(Ordering::SeqCst) {
                    return;
                }
                warn!("Event bus poll error: {}, reconnecting...", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

#[async_trait]
impl EventBus for MqttEventBus {
    async fn publish(&self, channel: &str, event: &BuildEvent) -> Result<(), DeployError> {
        let payload = event.to_payload()?;
        self.client
            .try_publish(channel, QoS::AtMostOnce, false, payload.to_vec())
            .map_err(|e| DeployError::EventBusError(e.to_string()))
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, DeployError> {
        let rx = self.incoming.subscribe();
        if self.channels.acquire(channel) {
            if let Err(e) = self.client.subscribe(channel, QoS::AtMostOnce).await {
                self.channels.release(channel);
                return Err(DeployError::EventBusError(e.to_string()));
            }
            info!("Subscribed to: {}", channel);
        }

        let client = self.client.clone();
        let channels = self.channels.clone();
        let owned = channel.to_string();
        Ok(Subscription::new(channel, rx).on_release(move || {
            if !channels.release(&owned) {
                return;
            }
            match client.try_unsubscribe(owned.as_str()) {
                Ok(()) => debug!("Unsubscribed from: {}", owned),
                Err(e) => debug!("Unsubscribe from {} not sent: {}", owned, e),
            }
        }))
    }

    async fn close(&self) -> Result<(), DeployError> {
        self.closing.store(true, Ordering::SeqCst);
        self.client
            .disconnect()
            .await
            .map_err(|e| DeployError::EventBusError(e.to_string()))?;

        if let Some(handle) = self.poller.lock().await.take() {
            if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
                error!("Event bus did not flush within 5s");
            }
        }
        Ok(())
    }
}
