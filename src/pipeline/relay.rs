use crate::bus::{Delivery, Subscription};
use crate::event::PresenceSnapshot;
use crate::notify::Notifier;
use crate::presence::ChangeFilter;
use futures::Stream;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, warn};

/// Presence consumer: forwards genuine changes to the operator.
///
/// Keeps one `ChangeFilter` per host key, so redelivered or repeated
/// snapshots from a host never notify twice in a row.
pub struct PresenceRelay<N> {
    notifier: N,
    filters: HashMap<String, ChangeFilter>,
}

impl<N: Notifier> PresenceRelay<N> {
    pub fn new(notifier: N) -> Self {
        Self {
            notifier,
            filters: HashMap::new(),
        }
    }

    /// Handle one snapshot from `host`. Returns true when the operator was notified.
    ///
    /// Notifier failures are logged and swallowed.
    pub async fn handle(&mut self, host: Option<&str>, snapshot: PresenceSnapshot) -> bool {
        let filter = self
            .filters
            .entry(host.unwrap_or_default().to_string())
            .or_default();

        let snapshot = match filter.observe(Some(snapshot)) {
            Some(snapshot) => snapshot,
            None => {
                debug!(host = ?host, "Duplicate presence, not notifying");
                return false;
            }
        };

        match self.notifier.notify(host, &snapshot).await {
            Ok(()) => {
                info!(host = ?host, title = ?snapshot.title, "Operator notified");
                true
            }
            Err(e) => {
                warn!(host = ?host, error = %e, "Failed to notify operator");
                false
            }
        }
    }

    /// Consume until the subscription stops. Returns notification count.
    pub async fn run<S, D, E>(mut self, mut subscription: Subscription<S, PresenceSnapshot>) -> usize
    where
        S: Stream<Item = Result<D, E>> + Unpin + Send,
        D: Delivery,
        E: fmt::Display,
    {
        info!("Starting presence relay");
        let mut notified = 0;

        while let Some(received) = subscription.next().await {
            let host = received.key().map(str::to_string);
            if self.handle(host.as_deref(), received.message().clone()).await {
                notified += 1;
            }
            if let Err(e) = received.ack().await {
                warn!(error = %e, "Failed to acknowledge presence message");
            }
        }

        subscription.close();
        info!(notified = notified, "Presence relay stopped");
        notified
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ActionOutcome;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingNotifier {
        seen: Arc<Mutex<Vec<(Option<String>, Option<String>)>>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, host: Option<&str>, snapshot: &PresenceSnapshot) -> Result<()> {
            if self.fail {
                bail!("chat API down");
            }
            self.seen
                .lock()
                .unwrap()
                .push((host.map(str::to_string), snapshot.title.clone()));
            Ok(())
        }

        async fn notify_action(&self, _outcome: &ActionOutcome) -> Result<()> {
            Ok(())
        }
    }

    fn titled(title: &str) -> PresenceSnapshot {
        PresenceSnapshot {
            title: Some(title.to_string()),
            ..PresenceSnapshot::now()
        }
    }

    #[tokio::test]
    async fn test_duplicates_are_filtered_per_host() {
        let notifier = RecordingNotifier::default();
        let mut relay = PresenceRelay::new(notifier.clone());

        assert!(relay.handle(Some("desk-01"), titled("A")).await);
        assert!(!relay.handle(Some("desk-01"), titled("A")).await);
        // Another host playing the same thing is its own change
        assert!(relay.handle(Some("kitchen"), titled("A")).await);
        assert!(relay.handle(Some("desk-01"), titled("B")).await);

        assert_eq!(notifier.seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_notifier_failure_is_contained() {
        let notifier = RecordingNotifier {
            fail: true,
            ..Default::default()
        };
        let mut relay = PresenceRelay::new(notifier);
        assert!(!relay.handle(None, titled("A")).await);
    }
}
