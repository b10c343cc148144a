//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `TickIngestor`: records feed ticks and passes prices through to subscribers
//! - `AggregationEmitter`: periodic OHLC fan-out to subscribers
//! - `SubscriptionService`: applies client requests to the registry and the feed

mod emitter;
mod ingest;
mod subscriptions;

pub use emitter::{AggregationEmitter, EmitReport};
pub use ingest::TickIngestor;
pub use subscriptions::SubscriptionService;

use std::collections::HashSet;

use crate::application::ports::{Delivery, DeliveryError};
use crate::domain::streaming::OutboundMessage;
use crate::domain::subscription::ConnectionId;

/// A message that did not reach its connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    /// Target connection.
    pub connection: ConnectionId,
    /// Why delivery failed.
    pub error: DeliveryError,
}

/// Outcome of delivering one message to a set of connections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Messages queued successfully.
    pub delivered: usize,
    /// Messages that failed.
    pub failures: Vec<DeliveryFailure>,
}

impl DeliveryReport {
    /// Fold another report into this one.
    pub fn merge(&mut self, other: Self) {
        self.delivered += other.delivered;
        self.failures.extend(other.failures);
    }
}

/// Deliver `message` to each connection, isolating failures per connection.
fn fan_out(
    delivery: &dyn Delivery,
    connections: &HashSet<ConnectionId>,
    message: &OutboundMessage,
) -> DeliveryReport {
    let mut report = DeliveryReport::default();

    for &connection in connections {
        match delivery.deliver(connection, message) {
            Ok(()) => report.delivered += 1,
            Err(error) => {
                tracing::debug!(
                    connection_id = connection,
                    kind = message.kind(),
                    reason = error.reason(),
                    "Delivery failed"
                );
                report.failures.push(DeliveryFailure { connection, error });
            }
        }
    }

    report
}
