use super::{Delivery, TransportError};
use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Subscriber loop tuning
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Upper bound on one blocking read; also the stop-signal granularity
    pub poll_timeout: Duration,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
        }
    }
}

/// A decoded message whose delivery has not been settled yet.
pub struct Received<D, T> {
    message: T,
    delivery: D,
}

impl<D: Delivery, T> Received<D, T> {
    pub fn message(&self) -> &T {
        &self.message
    }

    /// Routing key the publisher used
    pub fn key(&self) -> Option<&str> {
        self.delivery.key()
    }

    /// Commit progress. Call only after the message was fully handled.
    pub async fn ack(self) -> Result<T, TransportError> {
        self.delivery.ack().await?;
        Ok(self.message)
    }

    /// Hand the message back for redelivery.
    pub async fn nak(self) -> Result<T, TransportError> {
        self.delivery.nak().await?;
        Ok(self.message)
    }
}

/// Pull loop over one topic, decoding JSON messages of type `T`.
///
/// `next()` yields decoded messages one at a time and leaves acknowledgement
/// to the caller. Undecodable payloads are logged, acked so they are not
/// redelivered forever, and skipped. End-of-stream markers are skipped
/// silently. Delivery is at-least-once: a message that was never acked
/// comes back.
pub struct Subscription<S, T> {
    topic: String,
    messages: S,
    stop: watch::Receiver<bool>,
    config: SubscriptionConfig,
    _decoded: PhantomData<fn() -> T>,
}

impl<S, D, E, T> Subscription<S, T>
where
    S: Stream<Item = Result<D, E>> + Unpin + Send,
    D: Delivery,
    E: fmt::Display,
    T: DeserializeOwned,
{
    pub fn new(
        topic: impl Into<String>,
        messages: S,
        stop: watch::Receiver<bool>,
        config: SubscriptionConfig,
    ) -> Self {
        Self {
            topic: topic.into(),
            messages,
            stop,
            config,
            _decoded: PhantomData,
        }
    }

    /// Next decoded message, or `None` once stopped or the stream ends.
    pub async fn next(&mut self) -> Option<Received<D, T>> {
        loop {
            if *self.stop.borrow() {
                info!(topic = %self.topic, "Stop requested, leaving subscription");
                return None;
            }

            let item = match tokio::time::timeout(self.config.poll_timeout, self.messages.next()).await {
                // Idle; loop around to re-check the stop signal
                Err(_) => continue,
                Ok(None) => {
                    info!(topic = %self.topic, "Message stream ended");
                    return None;
                }
                Ok(Some(item)) => item,
            };

            let delivery = match item {
                Ok(delivery) => delivery,
                Err(e) => {
                    warn!(topic = %self.topic, error = %e, "Error receiving message");
                    continue;
                }
            };

            if delivery.is_end_of_stream() {
                continue;
            }

            match serde_json::from_slice::<T>(delivery.payload()) {
                Ok(message) => return Some(Received { message, delivery }),
                Err(e) => {
                    warn!(
                        topic = %self.topic,
                        key = ?delivery.key(),
                        error = %e,
                        "Malformed message, skipping"
                    );
                    if let Err(e) = delivery.ack().await {
                        warn!(topic = %self.topic, error = %e, "Failed to ack malformed message");
                    }
                }
            }
        }
    }

    /// Run `handler` on every message: process, then acknowledge.
    ///
    /// `Ok` acks the message. `Err` is logged and the message is nak'ed for
    /// redelivery; the loop keeps going either way. Returns the number of
    /// messages handled successfully once the subscription stops.
    pub async fn for_each<F, Fut, HE>(mut self, mut handler: F) -> usize
    where
        F: FnMut(T, Option<String>) -> Fut,
        Fut: Future<Output = Result<(), HE>>,
        HE: fmt::Display,
    {
        let mut handled = 0;

        while let Some(received) = self.next().await {
            let Received { message, delivery } = received;
            let key = delivery.key().map(str::to_string);

            match handler(message, key).await {
                Ok(()) => {
                    handled += 1;
                    if let Err(e) = delivery.ack().await {
                        warn!(topic = %self.topic, error = %e, "Failed to acknowledge message");
                    }
                }
                Err(e) => {
                    warn!(topic = %self.topic, error = %e, "Handler failed, requesting redelivery");
                    if let Err(e) = delivery.nak().await {
                        warn!(topic = %self.topic, error = %e, "Failed to nak message");
                    }
                }
            }
        }

        self.close();
        handled
    }

    /// Drop the message stream, releasing its consumer.
    pub fn close(self) {
        debug!(topic = %self.topic, "Subscription closed");
    }
}
