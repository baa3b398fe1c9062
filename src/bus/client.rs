use super::{stream_name_for, subject_for, Delivery, Envelope, Transport, TransportError, KEY_HEADER};
use anyhow::{Context, Result};
use async_nats::jetstream::{self, consumer, stream};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

/// Bus connection configuration
#[derive(Clone, Debug, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_url")]
    pub url: String,
    /// How long the broker keeps messages
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u64,
    /// Replicas that must hold a message before the publish is acked
    #[serde(default = "default_num_replicas")]
    pub num_replicas: usize,
    /// Window in which a repeated message id is dropped by the broker
    #[serde(default = "default_duplicate_window_secs")]
    pub duplicate_window_secs: u64,
    /// Time the broker waits for an ack before redelivering
    #[serde(default = "default_ack_wait_secs")]
    pub ack_wait_secs: u64,
}

fn default_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_max_age_days() -> u64 {
    7
}

fn default_num_replicas() -> usize {
    1
}

fn default_duplicate_window_secs() -> u64 {
    120
}

fn default_ack_wait_secs() -> u64 {
    30
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            max_age_days: default_max_age_days(),
            num_replicas: default_num_replicas(),
            duplicate_window_secs: default_duplicate_window_secs(),
            ack_wait_secs: default_ack_wait_secs(),
        }
    }
}

/// NATS client with JetStream
pub struct BusClient {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    config: BusConfig,
}

impl BusClient {
    /// Connect to NATS and initialize JetStream
    pub async fn connect(config: BusConfig) -> Result<Self> {
        info!("Connecting to NATS at {}", config.url);

        let client = async_nats::ConnectOptions::new()
            .name("hostwatch")
            .connect(config.url.as_str())
            .await
            .context("Failed to connect to NATS")?;

        let jetstream = jetstream::new(client.clone());

        Ok(Self {
            client,
            jetstream,
            config,
        })
    }

    /// Ensure the JetStream stream backing `topic` exists
    pub async fn ensure_stream(&self, topic: &str) -> Result<()> {
        let name = stream_name_for(topic);

        if self.jetstream.get_stream(&name).await.is_ok() {
            info!(stream = %name, topic = %topic, "Stream already exists");
            return Ok(());
        }

        info!(stream = %name, topic = %topic, "Stream does not exist, creating...");

        let stream_config = stream::Config {
            name: name.clone(),
            subjects: vec![format!("{}.>", topic)],
            max_age: Duration::from_secs(self.config.max_age_days * 86400),
            num_replicas: self.config.num_replicas,
            duplicate_window: Duration::from_secs(self.config.duplicate_window_secs),
            storage: stream::StorageType::File,
            retention: stream::RetentionPolicy::Limits,
            ..Default::default()
        };

        self.jetstream
            .create_stream(stream_config)
            .await
            .context(format!("Failed to create JetStream stream '{}'", name))?;

        info!(stream = %name, "Created JetStream stream");
        Ok(())
    }

    /// Outbound transport sharing this connection
    pub fn transport(&self) -> NatsTransport {
        NatsTransport {
            client: self.client.clone(),
            jetstream: self.jetstream.clone(),
        }
    }

    /// Open a durable pull consumer on `topic` starting at new messages.
    ///
    /// Consumers sharing a durable name split the traffic between them, so
    /// broadcast-style receivers must pass a per-host name.
    pub async fn subscribe(&self, topic: &str, durable: &str) -> Result<consumer::pull::Stream> {
        let name = stream_name_for(topic);
        let stream = self
            .jetstream
            .get_stream(&name)
            .await
            .context(format!("Failed to get stream '{}'", name))?;

        let consumer = stream
            .get_or_create_consumer(
                durable,
                consumer::pull::Config {
                    durable_name: Some(durable.to_string()),
                    filter_subject: format!("{}.>", topic),
                    deliver_policy: consumer::DeliverPolicy::New,
                    ack_policy: consumer::AckPolicy::Explicit,
                    ack_wait: Duration::from_secs(self.config.ack_wait_secs),
                    ..Default::default()
                },
            )
            .await
            .context(format!("Failed to get or create consumer '{}'", durable))?;

        info!(topic = %topic, durable = %durable, "Subscribed");

        consumer
            .messages()
            .await
            .context("Failed to open consumer message stream")
    }

    /// Flush pending writes and release the connection.
    pub async fn close(self) {
        if let Err(e) = self.client.flush().await {
            warn!(error = %e, "Failed to flush NATS connection on close");
        }
        info!("Bus connection closed");
    }
}

/// JetStream-backed `Transport`.
///
/// Sends carry `Nats-Msg-Id` so the stream's duplicate window drops retried
/// copies of the same logical publish.
#[derive(Clone)]
pub struct NatsTransport {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

fn classify_publish_error(err: jetstream::context::PublishError) -> TransportError {
    match err.kind() {
        jetstream::context::PublishErrorKind::StreamNotFound => TransportError::Fatal(err.to_string()),
        _ => TransportError::Transient(err.to_string()),
    }
}

#[async_trait]
impl Transport for NatsTransport {
    async fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let subject = subject_for(&envelope.topic, &envelope.key);

        let mut headers = async_nats::HeaderMap::new();
        headers.insert(async_nats::header::NATS_MESSAGE_ID, envelope.message_id.as_str());
        headers.insert(KEY_HEADER, envelope.key.as_str());

        self.jetstream
            .publish_with_headers(subject, headers, envelope.payload.clone().into())
            .await
            .map_err(classify_publish_error)?
            .await
            .map_err(classify_publish_error)?;

        Ok(())
    }

    async fn flush(&self) -> Result<(), TransportError> {
        self.client
            .flush()
            .await
            .map_err(|e| TransportError::Transient(e.to_string()))
    }
}

#[async_trait]
impl Delivery for jetstream::Message {
    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    fn key(&self) -> Option<&str> {
        self.message
            .headers
            .as_ref()
            .and_then(|headers| headers.get(KEY_HEADER))
            .map(|value| value.as_str())
    }

    async fn ack(&self) -> Result<(), TransportError> {
        jetstream::Message::ack(self)
            .await
            .map_err(|e| TransportError::Transient(e.to_string()))
    }

    async fn nak(&self) -> Result<(), TransportError> {
        self.ack_with(jetstream::AckKind::Nak(None))
            .await
            .map_err(|e| TransportError::Transient(e.to_string()))
    }
}
