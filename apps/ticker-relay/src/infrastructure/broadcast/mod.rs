//! Outbound Fan-out Hub
//!
//! Each client connection owns a bounded mpsc queue drained by its WebSocket
//! writer task. The hub maps connection ids to queue senders and implements
//! [`Delivery`] on top of `try_send`, so a full or closed queue fails that one
//! delivery immediately.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::application::ports::{Delivery, DeliveryError};
use crate::domain::streaming::OutboundMessage;
use crate::domain::subscription::ConnectionId;

// =============================================================================
// Outbound Hub
// =============================================================================

/// Registry of per-connection outbound queues.
#[derive(Debug)]
pub struct OutboundHub {
    capacity: usize,
    senders: DashMap<ConnectionId, mpsc::Sender<String>>,
}

impl OutboundHub {
    /// Create a hub whose queues hold up to `capacity` frames.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            senders: DashMap::new(),
        }
    }

    /// Create a shared hub.
    #[must_use]
    pub fn new_shared(capacity: usize) -> Arc<Self> {
        Arc::new(Self::new(capacity))
    }

    /// Open a queue for a connection and return its receiving end.
    ///
    /// Registering an id twice replaces the earlier queue.
    pub fn register(&self, connection: ConnectionId) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(self.capacity);
        if self.senders.insert(connection, tx).is_some() {
            tracing::warn!(connection_id = connection, "Replaced existing outbound queue");
        }
        rx
    }

    /// Drop a connection's queue.
    pub fn unregister(&self, connection: ConnectionId) {
        self.senders.remove(&connection);
    }

    /// Number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.senders.len()
    }

    /// Queue capacity per connection.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Delivery for OutboundHub {
    fn deliver(
        &self,
        connection: ConnectionId,
        message: &OutboundMessage,
    ) -> Result<(), DeliveryError> {
        // Clone the sender so no map shard lock is held while encoding.
        let sender = self
            .senders
            .get(&connection)
            .map(|entry| entry.value().clone())
            .ok_or(DeliveryError::UnknownConnection)?;

        let frame = message
            .to_json()
            .map_err(|e| DeliveryError::Encode(e.to_string()))?;

        sender.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Backpressured,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::domain::streaming::PriceUpdate;

    fn price() -> OutboundMessage {
        OutboundMessage::Price(PriceUpdate {
            currency_pair: "btcusd".to_string(),
            price: dec!(100.25),
        })
    }

    #[tokio::test]
    async fn delivers_json_frame() {
        let hub = OutboundHub::new(4);
        let mut rx = hub.register(1);

        hub.deliver(1, &price()).unwrap();

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame, r#"{"currency_pair":"btcusd","price":100.25}"#);
    }

    #[test]
    fn unknown_connection() {
        let hub = OutboundHub::new(4);
        assert_eq!(
            hub.deliver(42, &price()),
            Err(DeliveryError::UnknownConnection)
        );
    }

    #[test]
    fn full_queue_is_backpressured() {
        let hub = OutboundHub::new(1);
        let _rx = hub.register(1);

        hub.deliver(1, &price()).unwrap();
        assert_eq!(hub.deliver(1, &price()), Err(DeliveryError::Backpressured));
    }

    #[test]
    fn dropped_receiver_is_closed() {
        let hub = OutboundHub::new(4);
        drop(hub.register(1));

        assert_eq!(hub.deliver(1, &price()), Err(DeliveryError::Closed));
    }

    #[test]
    fn unregister_removes_queue() {
        let hub = OutboundHub::new(4);
        let _a = hub.register(1);
        let _b = hub.register(2);
        assert_eq!(hub.connection_count(), 2);

        hub.unregister(1);
        assert_eq!(hub.connection_count(), 1);
        assert_eq!(
            hub.deliver(1, &price()),
            Err(DeliveryError::UnknownConnection)
        );
    }

    #[test]
    fn zero_capacity_is_clamped() {
        assert_eq!(OutboundHub::new(0).capacity(), 1);
    }
}
