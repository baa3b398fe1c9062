// Message bus adapters: publish and subscribe over NATS JetStream

mod client;
pub mod memory;
mod publisher;
mod subscriber;

pub use client::{BusClient, BusConfig, NatsTransport};
pub use publisher::{PublishError, Publisher, RetryPolicy};
pub use subscriber::{Received, Subscription, SubscriptionConfig};

use async_trait::async_trait;
use std::fmt;
use uuid::Uuid;

/// Header carrying the unmangled routing key.
pub const KEY_HEADER: &str = "Bus-Key";

/// Failure reported by the underlying bus client.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Worth retrying (broker unreachable, ack timeout)
    Transient(String),
    /// Retrying will not help (no such stream, rejected payload)
    Fatal(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Transient(_))
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Transient(msg) => write!(f, "transient bus error: {}", msg),
            TransportError::Fatal(msg) => write!(f, "bus error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

/// One serialized message on its way to the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub topic: String,
    pub key: String,
    /// Stable across retries of the same logical publish
    pub message_id: String,
    pub payload: Vec<u8>,
}

/// Outbound half of a bus client.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one envelope and wait for the broker to accept it.
    async fn send(&self, envelope: &Envelope) -> Result<(), TransportError>;

    /// Drain anything buffered client-side.
    async fn flush(&self) -> Result<(), TransportError>;
}

/// A received message that still has to be acknowledged.
#[async_trait]
pub trait Delivery: Send + Sync {
    fn payload(&self) -> &[u8];

    /// Routing key the publisher used, when the bus carried it.
    fn key(&self) -> Option<&str>;

    /// Bus-level end-of-stream/partition marker; carries no message.
    fn is_end_of_stream(&self) -> bool {
        false
    }

    /// Commit progress past this message.
    async fn ack(&self) -> Result<(), TransportError>;

    /// Ask the bus to redeliver this message.
    async fn nak(&self) -> Result<(), TransportError>;
}

/// Single subject token for `key`.
///
/// Anything outside `[A-Za-z0-9_-]` is replaced with `_`.
pub fn key_token(key: &str) -> String {
    let token: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if token.is_empty() {
        "_".to_string()
    } else {
        token
    }
}

/// Subject for `key` under `topic`.
pub fn subject_for(topic: &str, key: &str) -> String {
    format!("{}.{}", topic, key_token(key))
}

/// Durable consumer name for one member of `group`.
///
/// The readable part is `key_token(member)`, which can collide for distinct
/// members, so a stable hash of the raw member id is appended.
pub fn durable_name(group: &str, member: &str) -> String {
    let digest = Uuid::new_v5(&Uuid::NAMESPACE_OID, member.as_bytes()).simple().to_string();
    format!("{}-{}-{}", group, key_token(member), &digest[..8])
}

/// JetStream stream name backing `topic` (e.g. "pc.activity.media" -> "PC_ACTIVITY_MEDIA").
pub fn stream_name_for(topic: &str) -> String {
    topic
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_for_sanitizes_key() {
        assert_eq!(subject_for("pc.activity.media", "desk-01"), "pc.activity.media.desk-01");
        assert_eq!(subject_for("control", "my.host name"), "control.my_host_name");
        assert_eq!(subject_for("control", "a*b>c"), "control.a_b_c");
        assert_eq!(subject_for("control", ""), "control._");
    }

    #[test]
    fn test_durable_name_separates_colliding_tokens() {
        let dotted = durable_name("pc-lock-consumer", "a.b");
        let underscored = durable_name("pc-lock-consumer", "a_b");
        assert!(dotted.starts_with("pc-lock-consumer-a_b-"));
        assert_ne!(dotted, underscored);
        assert_ne!(durable_name("g", "équipo"), durable_name("g", "èquipo"));

        // Stable across restarts so the durable consumer is reused
        assert_eq!(durable_name("g", "desk-01"), durable_name("g", "desk-01"));
        assert!(durable_name("g", "my host.lan")
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
    }

    #[test]
    fn test_stream_name_for_topic() {
        assert_eq!(stream_name_for("pc.activity.media"), "PC_ACTIVITY_MEDIA");
        assert_eq!(stream_name_for("pc.activity.control"), "PC_ACTIVITY_CONTROL");
    }

    #[test]
    fn test_transport_error_classification() {
        assert!(TransportError::Transient("timeout".into()).is_transient());
        assert!(!TransportError::Fatal("no stream".into()).is_transient());
    }
}
