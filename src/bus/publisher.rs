use super::{Envelope, Transport, TransportError};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Bounded retry for transient send failures
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before retry `n` is `backoff * n`
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(200),
        }
    }
}

/// Publish errors
#[derive(Debug, Clone, PartialEq)]
pub enum PublishError {
    Serialize(String),
    /// Non-retryable refusal from the bus
    Rejected(TransportError),
    /// Every attempt failed with a transient error
    Exhausted { attempts: u32, last: TransportError },
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishError::Serialize(msg) => write!(f, "failed to serialize payload: {}", msg),
            PublishError::Rejected(e) => write!(f, "publish rejected: {}", e),
            PublishError::Exhausted { attempts, last } => {
                write!(f, "publish failed after {} attempts: {}", attempts, last)
            }
        }
    }
}

impl std::error::Error for PublishError {}

/// Serializes payloads to JSON and hands them to a `Transport`.
///
/// One message id is generated per `publish` call and reused for every
/// retry, so a retried send is deduplicated by the bus instead of showing up
/// as a second message.
pub struct Publisher<T> {
    transport: T,
    retry: RetryPolicy,
}

impl<T: Transport> Publisher<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Publish `payload` on `topic`, routed by `key`.
    pub async fn publish<P: Serialize + ?Sized>(
        &self,
        topic: &str,
        key: &str,
        payload: &P,
    ) -> Result<(), PublishError> {
        let payload =
            serde_json::to_vec(payload).map_err(|e| PublishError::Serialize(e.to_string()))?;

        let envelope = Envelope {
            topic: topic.to_string(),
            key: key.to_string(),
            message_id: Uuid::now_v7().to_string(),
            payload,
        };

        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.transport.send(&envelope).await {
                Ok(()) => {
                    debug!(
                        topic = %topic,
                        key = %key,
                        message_id = %envelope.message_id,
                        attempt = attempt,
                        "Published"
                    );
                    return Ok(());
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    warn!(
                        topic = %topic,
                        attempt = attempt,
                        error = %e,
                        "Publish failed, retrying"
                    );
                    tokio::time::sleep(self.retry.backoff * attempt).await;
                }
                Err(e) if e.is_transient() => {
                    return Err(PublishError::Exhausted {
                        attempts: attempt,
                        last: e,
                    });
                }
                Err(e) => return Err(PublishError::Rejected(e)),
            }
        }
    }

    /// Drain buffered output, giving up after `timeout`.
    ///
    /// Best-effort: returns false when the drain failed or timed out.
    pub async fn flush(&self, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, self.transport.flush()).await {
            Ok(Ok(())) => {
                info!("Publisher flushed");
                true
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Publisher flush failed");
                false
            }
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Publisher flush timed out");
                false
            }
        }
    }
}
