use crate::bus::{Publisher, Transport};
use crate::control::HostIdentity;
use crate::host::StateReader;
use crate::presence::ChangeFilter;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Presence poll loop: read, filter, publish.
///
/// Owns its `ChangeFilter`; nothing else touches it.
pub struct PresenceAgent<R, T> {
    reader: R,
    publisher: Publisher<T>,
    filter: ChangeFilter,
    topic: String,
    identity: HostIdentity,
    interval: Duration,
    flush_timeout: Duration,
}

impl<R: StateReader, T: Transport> PresenceAgent<R, T> {
    pub fn new(
        reader: R,
        publisher: Publisher<T>,
        topic: impl Into<String>,
        identity: HostIdentity,
    ) -> Self {
        Self {
            reader,
            publisher,
            filter: ChangeFilter::new(),
            topic: topic.into(),
            identity,
            interval: Duration::from_secs(2),
            flush_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_flush_timeout(mut self, flush_timeout: Duration) -> Self {
        self.flush_timeout = flush_timeout;
        self
    }

    /// One tick. Returns true when a change was published.
    ///
    /// Read and publish failures are logged and swallowed. A failed publish
    /// resets the filter so the same state is retried on the next tick.
    pub async fn poll_once(&mut self) -> bool {
        let read = match self.reader.read().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Failed to read media state");
                None
            }
        };

        let snapshot = match self.filter.observe(read) {
            Some(snapshot) => snapshot,
            None => return false,
        };

        match self
            .publisher
            .publish(&self.topic, self.identity.as_str(), &snapshot)
            .await
        {
            Ok(()) => {
                info!(
                    host = %self.identity,
                    title = ?snapshot.title,
                    artist = ?snapshot.artist,
                    status = ?snapshot.playback_status,
                    "Presence change published"
                );
                true
            }
            Err(e) => {
                warn!(host = %self.identity, error = %e, "Failed to publish presence change");
                self.filter = ChangeFilter::new();
                false
            }
        }
    }

    /// Poll until `stop` flips to true, then flush. Returns publish count.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) -> usize {
        info!(
            host = %self.identity,
            topic = %self.topic,
            interval_ms = self.interval.as_millis() as u64,
            "Starting presence agent"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut published = 0;

        while !*stop.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    // A publish may sit in retry backoff; stop must still win
                    tokio::select! {
                        sent = self.poll_once() => {
                            if sent {
                                published += 1;
                            }
                        }
                        _ = stop.changed() => {
                            info!(host = %self.identity, "Stop requested mid-poll, abandoning publish");
                            break;
                        }
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(published = published, "Presence agent stopping");
        self.publisher.flush(self.flush_timeout).await;
        published
    }
}
