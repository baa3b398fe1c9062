use crate::bus::{Delivery, Subscription};
use crate::control::{route, Action, ActionOutcome, HostIdentity};
use crate::event::ControlCommand;
use crate::host::SessionController;
use crate::notify::Notifier;
use futures::Stream;
use std::convert::Infallible;
use std::fmt;
use tracing::{info, warn};

/// Control consumer: executes commands addressed to this host.
///
/// Every accepted command is executed, including repeats; locking an
/// already locked session is harmless.
pub struct ControlReceiver<C, N> {
    identity: HostIdentity,
    controller: C,
    notifier: N,
}

impl<C: SessionController, N: Notifier> ControlReceiver<C, N> {
    pub fn new(identity: HostIdentity, controller: C, notifier: N) -> Self {
        Self {
            identity,
            controller,
            notifier,
        }
    }

    /// Route and execute one command. `None` when it was not for this host.
    pub async fn handle(&self, command: ControlCommand) -> Option<ActionOutcome> {
        info!(
            action = %command.action,
            target = ?command.target,
            by = ?command.issued_by,
            "Received control command"
        );

        let action = route(&command, &self.identity)?;

        let succeeded = match action {
            Action::Lock => self.controller.lock().await,
            Action::Wake => {
                self.controller.wake().await;
                true
            }
        };

        let outcome = ActionOutcome {
            host: self.identity.to_string(),
            action,
            issued_by: command.issued_by,
            succeeded,
        };

        if succeeded {
            info!(action = %action, "{}", outcome.summary());
        } else {
            warn!(action = %action, "{}", outcome.summary());
        }

        if let Err(e) = self.notifier.notify_action(&outcome).await {
            warn!(error = %e, "Failed to notify operator of control action");
        }

        Some(outcome)
    }

    /// Consume until the subscription stops. Returns handled message count.
    pub async fn run<S, D, E>(&self, subscription: Subscription<S, ControlCommand>) -> usize
    where
        S: Stream<Item = Result<D, E>> + Unpin + Send,
        D: Delivery,
        E: fmt::Display,
    {
        info!(host = %self.identity, "Starting control receiver");

        let handled = subscription
            .for_each(move |command, _key| async move {
                self.handle(command).await;
                Ok::<(), Infallible>(())
            })
            .await;

        info!(handled = handled, "Control receiver stopped");
        handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ControlAction, PresenceSnapshot};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct CountingController {
        locks: Arc<AtomicUsize>,
        wakes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SessionController for CountingController {
        async fn lock(&self) -> bool {
            self.locks.fetch_add(1, Ordering::SeqCst);
            true
        }

        async fn wake(&self) {
            self.wakes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Clone, Default)]
    struct OutcomeLog(Arc<Mutex<Vec<ActionOutcome>>>);

    #[async_trait]
    impl Notifier for OutcomeLog {
        async fn notify(&self, _host: Option<&str>, _snapshot: &PresenceSnapshot) -> Result<()> {
            Ok(())
        }

        async fn notify_action(&self, outcome: &ActionOutcome) -> Result<()> {
            self.0.lock().unwrap().push(outcome.clone());
            Ok(())
        }
    }

    fn receiver(
        id: &str,
    ) -> (
        ControlReceiver<CountingController, OutcomeLog>,
        CountingController,
        OutcomeLog,
    ) {
        let controller = CountingController::default();
        let log = OutcomeLog::default();
        let receiver = ControlReceiver::new(
            HostIdentity::new(id).unwrap(),
            controller.clone(),
            log.clone(),
        );
        (receiver, controller, log)
    }

    #[tokio::test]
    async fn test_repeated_lock_executes_every_time() {
        let (receiver, controller, log) = receiver("desk-01");
        let command = ControlCommand::new(ControlAction::Lock, "desk-01", "telegram:1");

        assert!(receiver.handle(command.clone()).await.is_some());
        assert!(receiver.handle(command).await.is_some());

        assert_eq!(controller.locks.load(Ordering::SeqCst), 2);
        assert_eq!(log.0.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unlock_wakes_and_reports_it() {
        let (receiver, controller, log) = receiver("desk-01");
        let command = ControlCommand::new(ControlAction::Unlock, "all", "telegram:1");

        let outcome = receiver.handle(command).await.unwrap();

        assert_eq!(outcome.action, Action::Wake);
        assert_eq!(controller.wakes.load(Ordering::SeqCst), 1);
        assert_eq!(controller.locks.load(Ordering::SeqCst), 0);
        assert!(log.0.lock().unwrap()[0].summary().contains("NOT unlocked"));
    }

    #[tokio::test]
    async fn test_commands_for_other_hosts_are_ignored_silently() {
        let (receiver, controller, log) = receiver("desk-01");
        let command = ControlCommand::new(ControlAction::Lock, "kitchen", "telegram:1");

        assert!(receiver.handle(command).await.is_none());
        assert_eq!(controller.locks.load(Ordering::SeqCst), 0);
        // Routing misses are not reported to the operator
        assert!(log.0.lock().unwrap().is_empty());
    }
}
