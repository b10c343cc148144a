//! Tick ingestion and per-tick price pass-through.

use std::sync::Arc;

use super::{DeliveryReport, fan_out};
use crate::application::ports::Delivery;
use crate::domain::streaming::{OutboundMessage, PriceUpdate};
use crate::domain::subscription::SubscriptionRegistry;
use crate::domain::window::{Tick, WindowStore};

/// Records normalized feed ticks and pushes the raw price to subscribers.
pub struct TickIngestor {
    store: Arc<WindowStore>,
    registry: Arc<SubscriptionRegistry>,
    delivery: Arc<dyn Delivery>,
}

impl TickIngestor {
    /// Create an ingestor.
    #[must_use]
    pub fn new(
        store: Arc<WindowStore>,
        registry: Arc<SubscriptionRegistry>,
        delivery: Arc<dyn Delivery>,
    ) -> Self {
        Self {
            store,
            registry,
            delivery,
        }
    }

    /// Record a tick, then send its price to every subscriber of the instrument.
    ///
    /// A tick older than the newest one recorded for its instrument is
    /// dropped without being relayed.
    pub fn ingest(&self, tick: &Tick) -> DeliveryReport {
        if !self.store.record_tick(tick) {
            tracing::warn!(
                instrument = %tick.instrument,
                timestamp = tick.timestamp,
                "Dropping out-of-order tick"
            );
            return DeliveryReport::default();
        }

        let subscribers = self.registry.subscribers_of(&tick.instrument);
        if subscribers.is_empty() {
            return DeliveryReport::default();
        }

        let message = OutboundMessage::Price(PriceUpdate {
            currency_pair: tick.instrument.clone(),
            price: tick.price,
        });

        fan_out(self.delivery.as_ref(), &subscribers, &message)
    }
}

impl std::fmt::Debug for TickIngestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickIngestor")
            .field("instruments", &self.store.instrument_count())
            .finish_non_exhaustive()
    }
}
