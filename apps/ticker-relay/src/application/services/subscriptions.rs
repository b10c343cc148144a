//! Client subscription handling.

use std::sync::Arc;

use crate::application::ports::UpstreamControl;
use crate::domain::streaming::{ClientRequest, SubscriptionEvent};
use crate::domain::subscription::{ConnectionId, SubscriptionChanges, SubscriptionRegistry};

/// Applies client requests to the registry and keeps the feed's channel set
/// in step with the instruments somebody is watching.
pub struct SubscriptionService {
    registry: Arc<SubscriptionRegistry>,
    upstream: Arc<dyn UpstreamControl>,
}

impl SubscriptionService {
    /// Create the service.
    #[must_use]
    pub fn new(registry: Arc<SubscriptionRegistry>, upstream: Arc<dyn UpstreamControl>) -> Self {
        Self { registry, upstream }
    }

    /// Apply one client request.
    ///
    /// Upstream changes are forwarded while the registry is still locked, so
    /// the feed sees subscribe and unsubscribe commands for an instrument in
    /// the order the registry applied them.
    pub fn handle(&self, connection: ConnectionId, request: &ClientRequest) -> SubscriptionChanges {
        let forward = |changes: &SubscriptionChanges| self.forward(changes);
        let changes = match request.event {
            SubscriptionEvent::Subscribe => {
                self.registry
                    .subscribe_then(connection, &request.currency_pairs, forward)
            }
            SubscriptionEvent::Unsubscribe => {
                self.registry
                    .unsubscribe_then(connection, &request.currency_pairs, forward)
            }
        };

        tracing::debug!(
            connection_id = connection,
            event = ?request.event,
            pairs = request.currency_pairs.len(),
            "Applied client request"
        );

        changes
    }

    /// Drop everything a closed connection held.
    pub fn connection_closed(&self, connection: ConnectionId) -> SubscriptionChanges {
        self.registry
            .connection_closed_then(connection, |changes| self.forward(changes))
    }

    /// Runs under the registry write lock; `apply` must not block.
    fn forward(&self, changes: &SubscriptionChanges) {
        if changes.is_empty() {
            return;
        }
        tracing::info!(
            subscribe = changes.subscribe.len(),
            unsubscribe = changes.unsubscribe.len(),
            "Updating upstream channels"
        );
        self.upstream.apply(changes);
    }
}

impl std::fmt::Debug for SubscriptionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionService")
            .field("registry", &self.registry.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::{Barrier, mpsc};
    use std::thread;
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;
    use crate::application::ports::MockUpstreamControl;

    /// Records every forwarded change. An unsubscribe of `stall_on` meets
    /// `entered` and then stalls before recording.
    struct RecordingUpstream {
        commands: Mutex<Vec<String>>,
        stall_on: &'static str,
        entered: Barrier,
    }

    impl UpstreamControl for RecordingUpstream {
        fn apply(&self, changes: &SubscriptionChanges) {
            if changes.unsubscribe.contains(self.stall_on) {
                self.entered.wait();
                thread::sleep(Duration::from_millis(100));
            }
            let mut commands = self.commands.lock();
            commands.extend(changes.unsubscribe.iter().map(|p| format!("unsub {p}")));
            commands.extend(changes.subscribe.iter().map(|p| format!("sub {p}")));
        }
    }

    fn request(event: SubscriptionEvent, pairs: &[&str]) -> ClientRequest {
        ClientRequest {
            event,
            currency_pairs: pairs.iter().map(ToString::to_string).collect(),
        }
    }

    #[test]
    fn first_subscriber_opens_channel() {
        let mut upstream = MockUpstreamControl::new();
        upstream
            .expect_apply()
            .withf(|changes| {
                changes.subscribe.len() == 2
                    && changes.subscribe.contains("btcusd")
                    && changes.unsubscribe.is_empty()
            })
            .times(1)
            .return_const(());
        let registry = Arc::new(SubscriptionRegistry::new());
        let service = SubscriptionService::new(Arc::clone(&registry), Arc::new(upstream));

        service.handle(1, &request(SubscriptionEvent::Subscribe, &["btcusd", "btceur"]));

        assert!(registry.subscribers_of("btcusd").contains(&1));
    }

    #[test]
    fn second_subscriber_does_not_touch_upstream() {
        let mut upstream = MockUpstreamControl::new();
        upstream.expect_apply().times(1).return_const(());
        let registry = Arc::new(SubscriptionRegistry::new());
        let service = SubscriptionService::new(registry, Arc::new(upstream));

        service.handle(1, &request(SubscriptionEvent::Subscribe, &["btcusd"]));
        let changes = service.handle(2, &request(SubscriptionEvent::Subscribe, &["btcusd"]));

        assert!(changes.is_empty());
    }

    #[test]
    fn unsubscribe_without_subscribe_is_noop() {
        let mut upstream = MockUpstreamControl::new();
        upstream.expect_apply().never();
        let registry = Arc::new(SubscriptionRegistry::new());
        let service = SubscriptionService::new(Arc::clone(&registry), Arc::new(upstream));

        let changes = service.handle(1, &request(SubscriptionEvent::Unsubscribe, &["btcusd"]));

        assert!(changes.is_empty());
        assert!(registry.subscribers_of("btcusd").is_empty());
    }

    #[test]
    fn closing_last_subscriber_closes_channels() {
        let mut upstream = MockUpstreamControl::new();
        upstream
            .expect_apply()
            .withf(|changes| !changes.subscribe.is_empty())
            .times(1)
            .return_const(());
        upstream
            .expect_apply()
            .withf(|changes| changes.unsubscribe.contains("ethusd") && changes.subscribe.is_empty())
            .times(1)
            .return_const(());
        let registry = Arc::new(SubscriptionRegistry::new());
        let service = SubscriptionService::new(Arc::clone(&registry), Arc::new(upstream));

        service.handle(9, &request(SubscriptionEvent::Subscribe, &["ethusd"]));
        let changes = service.connection_closed(9);

        assert!(changes.unsubscribe.contains("ethusd"));
        assert!(registry.instruments_of(9).is_empty());
    }

    #[test]
    fn upstream_order_follows_registry_order_under_contention() {
        let upstream = Arc::new(RecordingUpstream {
            commands: Mutex::new(Vec::new()),
            stall_on: "btcusd",
            entered: Barrier::new(2),
        });
        let registry = Arc::new(SubscriptionRegistry::new());
        let service = Arc::new(SubscriptionService::new(
            Arc::clone(&registry),
            Arc::clone(&upstream) as Arc<dyn UpstreamControl>,
        ));

        service.handle(1, &request(SubscriptionEvent::Subscribe, &["btcusd"]));

        // Connection 1 closes and stalls inside the upstream call.
        let closer = {
            let service = Arc::clone(&service);
            thread::spawn(move || service.connection_closed(1))
        };

        // Connection 2 subscribes while the close is still forwarding.
        upstream.entered.wait();
        let (done_tx, done_rx) = mpsc::channel();
        let subscriber = {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                let changes =
                    service.handle(2, &request(SubscriptionEvent::Subscribe, &["btcusd"]));
                done_tx.send(()).unwrap();
                changes
            })
        };

        // The subscribe cannot finish while the close holds the registry.
        assert!(done_rx.recv_timeout(Duration::from_millis(20)).is_err());

        assert!(closer.join().unwrap().unsubscribe.contains("btcusd"));
        assert!(subscriber.join().unwrap().subscribe.contains("btcusd"));

        let commands = upstream.commands.lock().clone();
        assert_eq!(commands, vec!["sub btcusd", "unsub btcusd", "sub btcusd"]);
        assert_eq!(registry.subscribers_of("btcusd"), HashSet::from([2]));
    }
}
