//! Periodic OHLC emission.
//!
//! Once per period the emitter walks every instrument with at least one
//! subscriber, refreshes its window, and pushes the summary to each subscriber.
//! Instruments nobody watches are never evaluated. An empty window is still
//! reported, with the no-data sentinel in every field.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{DeliveryReport, fan_out};
use crate::application::ports::{Clock, Delivery};
use crate::domain::streaming::{OhlcUpdate, OutboundMessage};
use crate::domain::subscription::SubscriptionRegistry;
use crate::domain::window::{Instrument, WindowStore};

/// Result of one emitter cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmitReport {
    /// Instruments evaluated this cycle.
    pub instruments: Vec<Instrument>,
    /// Combined delivery outcome across instruments.
    pub delivery: DeliveryReport,
    /// Wall time spent on the cycle.
    pub elapsed: Duration,
}

/// Drives the per-period OHLC fan-out.
pub struct AggregationEmitter {
    store: Arc<WindowStore>,
    registry: Arc<SubscriptionRegistry>,
    delivery: Arc<dyn Delivery>,
    clock: Arc<dyn Clock>,
    period: Duration,
}

impl AggregationEmitter {
    /// Create an emitter firing every `period`.
    #[must_use]
    pub fn new(
        store: Arc<WindowStore>,
        registry: Arc<SubscriptionRegistry>,
        delivery: Arc<dyn Delivery>,
        clock: Arc<dyn Clock>,
        period: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            delivery,
            clock,
            period,
        }
    }

    /// Emission period.
    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Run a single emission cycle.
    pub fn emit_once(&self) -> EmitReport {
        let started = Instant::now();
        let now = self.clock.now().timestamp();

        let mut instruments: Vec<Instrument> =
            self.registry.instruments_with_subscribers().into_iter().collect();
        instruments.sort_unstable();

        let mut delivery = DeliveryReport::default();
        for instrument in &instruments {
            let summary = self.store.get_ohlc(instrument, now);
            // Re-read subscribers: a connection may have left since the set was taken.
            let subscribers = self.registry.subscribers_of(instrument);
            let message = OutboundMessage::Ohlc(OhlcUpdate::new(instrument.clone(), &summary));
            delivery.merge(fan_out(self.delivery.as_ref(), &subscribers, &message));
        }

        EmitReport {
            instruments,
            delivery,
            elapsed: started.elapsed(),
        }
    }

    /// Emit every period until `cancel` fires.
    ///
    /// The first cycle runs one full period after the call. `on_cycle` sees
    /// each report as it completes.
    pub async fn run<F>(self: Arc<Self>, cancel: CancellationToken, mut on_cycle: F)
    where
        F: FnMut(&EmitReport) + Send,
    {
        let start = tokio::time::Instant::now() + self.period;
        let mut interval = tokio::time::interval_at(start, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(period_secs = self.period.as_secs(), "Aggregation emitter started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("Aggregation emitter stopped");
                    break;
                }
                _ = interval.tick() => {
                    let report = self.emit_once();
                    tracing::debug!(
                        instruments = report.instruments.len(),
                        delivered = report.delivery.delivered,
                        failed = report.delivery.failures.len(),
                        "Emitted OHLC cycle"
                    );
                    on_cycle(&report);
                }
            }
        }
    }
}

impl std::fmt::Debug for AggregationEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregationEmitter")
            .field("period", &self.period)
            .finish_non_exhaustive()
    }
}
