//! MQTT bus adapter.
//!
//! Wraps a `rumqttc` async client plus its event-loop task. Two instances
//! exist at runtime: the gateway's subscriber (owns the ingress channel) and
//! a process-wide publisher used by the API and scene engine, created lazily
//! on first use. Both carry stable client-id prefixes so broker-side
//! sessions are tellable apart.

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Packet, QoS, TlsConfiguration, Transport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, OnceCell};
use tracing::{debug, error, info, warn};

use crate::config::MqttConfig;
use crate::types::StateMap;

/// Channel depth for ingress messages; the gateway drains this serially.
const INGRESS_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("tls configuration error: {0}")]
    Tls(String),
    #[error("payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A raw message delivered from the broker.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Anything that can push a command at a device. The scene engine and the
/// control endpoints depend on this seam; tests inject a recorder.
#[async_trait]
pub trait CommandPublisher: Send + Sync {
    /// Publish a JSON command to `<prefix>/<device_id>/cmd`.
    async fn publish_command(&self, device_id: u64, payload: &StateMap) -> Result<(), BusError>;

    /// Whether the underlying session is currently up.
    fn is_connected(&self) -> bool;
}

/// Handle to a connected MQTT session.
#[derive(Clone)]
pub struct MqttBus {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    topic_prefix: String,
}

impl MqttBus {
    /// Connect a named client and spawn its event-loop task.
    ///
    /// `patterns` are (re-)subscribed on every ConnAck, so subscriptions
    /// survive the transparent reconnects the event loop performs. Incoming
    /// publishes are forwarded on the returned channel.
    pub fn connect(
        config: &MqttConfig,
        role: &str,
        patterns: &[String],
    ) -> Result<(Self, mpsc::Receiver<BusMessage>), BusError> {
        let client_id = client_id(config, role);
        let mut options = MqttOptions::new(&client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keepalive_secs));

        if !config.username.is_empty() {
            options.set_credentials(&config.username, &config.password);
        }

        if config.use_tls {
            options.set_transport(tls_transport(config)?);
        }

        // Broker-side observability: the broker flips this topic if our
        // session dies without a clean disconnect.
        options.set_last_will(LastWill {
            topic: format!("{}/server/{}/lwt", config.topic_prefix, role),
            message: "offline".into(),
            qos: QoS::AtLeastOnce,
            retain: true,
        });

        let (client, mut eventloop) = AsyncClient::new(options, INGRESS_CHANNEL_CAPACITY);
        let (message_tx, message_rx) = mpsc::channel(INGRESS_CHANNEL_CAPACITY);

        let connected = Arc::new(AtomicBool::new(false));
        let bus = Self {
            client: client.clone(),
            connected: connected.clone(),
            topic_prefix: config.topic_prefix.clone(),
        };

        let patterns = patterns.to_vec();
        let host = config.host.clone();
        let port = config.port;
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        connected.store(true, Ordering::SeqCst);
                        info!(client_id = %client_id, host = %host, port, code = ?ack.code, "mqtt connected");
                        for pattern in &patterns {
                            if let Err(e) = client.subscribe(pattern.as_str(), QoS::AtLeastOnce).await {
                                error!(pattern = %pattern, error = %e, "subscribe failed");
                            } else {
                                info!(pattern = %pattern, "subscribed");
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let msg = BusMessage {
                            topic: publish.topic,
                            payload: publish.payload.to_vec(),
                        };
                        if message_tx.send(msg).await.is_err() {
                            debug!("ingress channel closed — dropping message");
                        }
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        connected.store(false, Ordering::SeqCst);
                        warn!(client_id = %client_id, "broker sent disconnect");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        connected.store(false, Ordering::SeqCst);
                        error!(client_id = %client_id, error = %e, "mqtt connection error — retrying");
                        // The event loop reconnects on the next poll; pace it.
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Ok((bus, message_rx))
    }

    /// Publish raw bytes at QoS 1.
    pub async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await?;
        Ok(())
    }

    pub fn topic_prefix(&self) -> &str {
        &self.topic_prefix
    }
}

#[async_trait]
impl CommandPublisher for MqttBus {
    async fn publish_command(&self, device_id: u64, payload: &StateMap) -> Result<(), BusError> {
        let topic = format!("{}/{}/cmd", self.topic_prefix, device_id);
        let body = serde_json::to_vec(payload)?;
        debug!(topic = %topic, "publishing device command");
        self.publish(&topic, body).await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// The lazily-created process-wide publisher client used by the API path.
static PUBLISHER: OnceCell<MqttBus> = OnceCell::const_new();

/// Get (or create) the shared publisher client.
///
/// The publisher subscribes to nothing; it exists so request handlers and
/// the scene engine can publish without owning the gateway's session.
pub async fn publisher() -> Result<&'static MqttBus, BusError> {
    PUBLISHER
        .get_or_try_init(|| async {
            let config = &crate::config::get().mqtt;
            let (bus, _rx) = MqttBus::connect(config, "publisher", &[])?;
            Ok(bus)
        })
        .await
}

/// Stable-prefix client id with a random suffix, e.g. `hearthd-gateway-a1b2c3d4`.
fn client_id(config: &MqttConfig, role: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(config.client_id_suffix_len)
        .map(char::from)
        .collect();
    format!("{}-{}-{}", config.client_id_prefix, role, suffix)
}

fn tls_transport(config: &MqttConfig) -> Result<Transport, BusError> {
    let ca_path = config
        .ca_certs
        .as_ref()
        .ok_or_else(|| BusError::Tls("use_tls requires ca_certs".to_string()))?;
    let ca = std::fs::read(ca_path)
        .map_err(|e| BusError::Tls(format!("cannot read ca_certs {ca_path}: {e}")))?;

    let client_auth = match (&config.certfile, &config.keyfile) {
        (Some(cert), Some(key)) => {
            let cert = std::fs::read(cert)
                .map_err(|e| BusError::Tls(format!("cannot read certfile {cert}: {e}")))?;
            let key = std::fs::read(key)
                .map_err(|e| BusError::Tls(format!("cannot read keyfile {key}: {e}")))?;
            Some((cert, key))
        }
        _ => None,
    };

    if config.tls_insecure {
        warn!("tls_insecure is set but certificate verification cannot be disabled — ignoring");
    }

    Ok(Transport::Tls(TlsConfiguration::Simple {
        ca,
        alpn: None,
        client_auth,
    }))
}
