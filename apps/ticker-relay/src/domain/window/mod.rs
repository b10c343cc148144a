//! Rolling Price Windows
//!
//! Per-instrument queues of timestamped prices with expiry-based eviction
//! and an OHLC summary that always matches the queue contents.
//!
//! # Design
//!
//! - Ticks are appended in feed order; nothing is evicted on write.
//! - Eviction happens on read: every entry whose age relative to `now`
//!   strictly exceeds the window is dropped from the front.
//! - Appends fold into the cached extrema directly. Any eviction triggers a
//!   full rescan, since the evicted entry may have been the high or low.
//!
//! Each instrument queue sits behind its own mutex so eviction and
//! recomputation happen as one unit while other instruments stay writable.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;

// =============================================================================
// Types
// =============================================================================

/// A traded pair identifier as used by the feed (e.g. `btcusd`).
pub type Instrument = String;

/// Placeholder reported for every OHLC field when a window holds no ticks.
pub const NO_DATA_SENTINEL: &str = "no transactions in the past 1 minute";

/// One observed price for an instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    /// Instrument the price belongs to.
    pub instrument: Instrument,
    /// Trade price.
    pub price: Decimal,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
}

impl Tick {
    /// Create a new tick.
    #[must_use]
    pub fn new(instrument: impl Into<Instrument>, price: Decimal, timestamp: i64) -> Self {
        Self {
            instrument: instrument.into(),
            price,
            timestamp,
        }
    }
}

/// Open/high/low/close prices of a non-empty window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ohlc {
    /// Price of the oldest tick in the window.
    pub open: Decimal,
    /// Highest price in the window.
    pub high: Decimal,
    /// Lowest price in the window.
    pub low: Decimal,
    /// Price of the newest tick in the window.
    pub close: Decimal,
}

impl Ohlc {
    /// Summary of a window holding a single price.
    #[must_use]
    pub const fn flat(price: Decimal) -> Self {
        Self {
            open: price,
            high: price,
            low: price,
            close: price,
        }
    }
}

/// OHLC summary of an instrument window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OhlcSummary {
    /// The window contains no ticks.
    NoData,
    /// The window contains at least one tick.
    Prices(Ohlc),
}

impl OhlcSummary {
    /// Whether the window was empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::NoData)
    }

    /// The prices, if any.
    #[must_use]
    pub const fn prices(&self) -> Option<Ohlc> {
        match self {
            Self::NoData => None,
            Self::Prices(ohlc) => Some(*ohlc),
        }
    }
}

// =============================================================================
// Window Queue (per instrument)
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Entry {
    price: Decimal,
    timestamp: i64,
}

#[derive(Debug)]
struct WindowQueue {
    entries: VecDeque<Entry>,
    summary: OhlcSummary,
}

impl WindowQueue {
    fn seeded(price: Decimal, timestamp: i64) -> Self {
        let mut entries = VecDeque::new();
        entries.push_back(Entry { price, timestamp });
        Self {
            entries,
            summary: OhlcSummary::Prices(Ohlc::flat(price)),
        }
    }

    /// Append at the back. A tick older than the newest entry is refused so
    /// entries stay in timestamp order for front-only eviction.
    fn push(&mut self, price: Decimal, timestamp: i64) -> bool {
        if self.entries.back().is_some_and(|e| e.timestamp > timestamp) {
            return false;
        }
        self.entries.push_back(Entry { price, timestamp });

        match &mut self.summary {
            OhlcSummary::Prices(ohlc) => {
                ohlc.high = ohlc.high.max(price);
                ohlc.low = ohlc.low.min(price);
                ohlc.close = price;
            }
            OhlcSummary::NoData => self.summary = OhlcSummary::Prices(Ohlc::flat(price)),
        }
        true
    }

    /// Drop entries older than `cutoff` from the front.
    ///
    /// Returns the number of evicted entries.
    fn evict_older_than(&mut self, cutoff: i64) -> usize {
        let mut evicted = 0;
        while self.entries.front().is_some_and(|e| e.timestamp < cutoff) {
            self.entries.pop_front();
            evicted += 1;
        }
        evicted
    }

    fn recompute(&mut self) {
        let mut iter = self.entries.iter();
        let Some(first) = iter.next() else {
            self.summary = OhlcSummary::NoData;
            return;
        };

        let mut ohlc = Ohlc::flat(first.price);
        for entry in iter {
            ohlc.high = ohlc.high.max(entry.price);
            ohlc.low = ohlc.low.min(entry.price);
            ohlc.close = entry.price;
        }
        self.summary = OhlcSummary::Prices(ohlc);
    }
}

// =============================================================================
// Window Store
// =============================================================================

/// Thread-safe store of rolling price windows keyed by instrument.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use rust_decimal::Decimal;
/// use ticker_relay::domain::window::{OhlcSummary, Tick, WindowStore};
///
/// let store = WindowStore::new(Duration::from_secs(60));
/// store.record_tick(&Tick::new("btcusd", Decimal::from(100), 0));
/// store.record_tick(&Tick::new("btcusd", Decimal::from(105), 10));
/// store.record_tick(&Tick::new("btcusd", Decimal::from(102), 70));
///
/// // The tick at t=0 is 70s old at t=70 and drops out.
/// let ohlc = store.get_ohlc("btcusd", 70).prices().unwrap();
/// assert_eq!(ohlc.open, Decimal::from(105));
/// assert_eq!(ohlc.low, Decimal::from(102));
///
/// assert_eq!(store.get_ohlc("ethusd", 70), OhlcSummary::NoData);
/// ```
#[derive(Debug)]
pub struct WindowStore {
    window_secs: i64,
    queues: RwLock<HashMap<Instrument, Arc<Mutex<WindowQueue>>>>,
}

impl WindowStore {
    /// Create a store whose windows span `window`.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window_secs: i64::try_from(window.as_secs()).unwrap_or(i64::MAX),
            queues: RwLock::new(HashMap::new()),
        }
    }

    /// Window length.
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs.unsigned_abs())
    }

    /// Append a tick to its instrument window, creating the window on first use.
    ///
    /// Returns `false`, leaving the window untouched, when the tick is older
    /// than the newest one already held for the instrument.
    pub fn record_tick(&self, tick: &Tick) -> bool {
        if let Some(queue) = self.queue(&tick.instrument) {
            return queue.lock().push(tick.price, tick.timestamp);
        }

        let mut queues = self.queues.write();
        match queues.get(&tick.instrument) {
            // Lost the race to another writer between the read and write lock.
            Some(queue) => queue.lock().push(tick.price, tick.timestamp),
            None => {
                tracing::debug!(instrument = %tick.instrument, "Opening price window");
                queues.insert(
                    tick.instrument.clone(),
                    Arc::new(Mutex::new(WindowQueue::seeded(tick.price, tick.timestamp))),
                );
                true
            }
        }
    }

    /// Evict expired ticks and return the OHLC of what remains.
    ///
    /// Unknown instruments yield [`OhlcSummary::NoData`].
    #[must_use]
    pub fn get_ohlc(&self, instrument: &str, now: i64) -> OhlcSummary {
        let Some(queue) = self.queue(instrument) else {
            return OhlcSummary::NoData;
        };

        let mut queue = queue.lock();
        let evicted = queue.evict_older_than(now.saturating_sub(self.window_secs));
        if evicted > 0 {
            tracing::trace!(instrument, evicted, "Evicted expired ticks");
            queue.recompute();
        }
        queue.summary
    }

    /// Number of ticks currently held for an instrument (no eviction).
    #[must_use]
    pub fn window_len(&self, instrument: &str) -> usize {
        self.queue(instrument).map_or(0, |q| q.lock().entries.len())
    }

    /// Number of instruments that have received at least one tick.
    #[must_use]
    pub fn instrument_count(&self) -> usize {
        self.queues.read().len()
    }

    fn queue(&self, instrument: &str) -> Option<Arc<Mutex<WindowQueue>>> {
        self.queues.read().get(instrument).cloned()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn store() -> WindowStore {
        WindowStore::new(Duration::from_secs(60))
    }

    #[test]
    fn first_tick_is_flat() {
        let store = store();
        store.record_tick(&Tick::new("btcusd", dec!(100.5), 1_000));

        assert_eq!(
            store.get_ohlc("btcusd", 1_000),
            OhlcSummary::Prices(Ohlc::flat(dec!(100.5)))
        );
    }

    #[test]
    fn unknown_instrument_has_no_data() {
        let store = store();
        assert_eq!(store.get_ohlc("btcusd", 0), OhlcSummary::NoData);
        assert_eq!(store.window_len("btcusd"), 0);
    }

    #[test]
    fn evicts_ticks_older_than_window() {
        let store = store();
        store.record_tick(&Tick::new("btcusd", dec!(100), 0));
        store.record_tick(&Tick::new("btcusd", dec!(105), 10));
        store.record_tick(&Tick::new("btcusd", dec!(102), 70));

        let ohlc = store.get_ohlc("btcusd", 70).prices().unwrap();

        assert_eq!(ohlc.open, dec!(105));
        assert_eq!(ohlc.high, dec!(105));
        assert_eq!(ohlc.low, dec!(102));
        assert_eq!(ohlc.close, dec!(102));
        assert_eq!(store.window_len("btcusd"), 2);
    }

    #[test]
    fn out_of_order_tick_is_refused() {
        let store = store();
        assert!(store.record_tick(&Tick::new("btcusd", dec!(100), 100)));
        assert!(store.record_tick(&Tick::new("btcusd", dec!(101), 100)));

        assert!(!store.record_tick(&Tick::new("btcusd", dec!(50), 20)));

        assert_eq!(store.window_len("btcusd"), 2);
        let ohlc = store.get_ohlc("btcusd", 150).prices().unwrap();
        assert_eq!(ohlc.low, dec!(100));
        assert_eq!(ohlc.close, dec!(101));
    }

    #[test]
    fn tick_exactly_at_boundary_still_counts() {
        let store = store();
        store.record_tick(&Tick::new("btcusd", dec!(90), 10));
        store.record_tick(&Tick::new("btcusd", dec!(95), 30));

        // 70 - 10 == 60, not strictly greater than the window.
        let ohlc = store.get_ohlc("btcusd", 70).prices().unwrap();
        assert_eq!(ohlc.open, dec!(90));
        assert_eq!(ohlc.low, dec!(90));

        let ohlc = store.get_ohlc("btcusd", 71).prices().unwrap();
        assert_eq!(ohlc.open, dec!(95));
        assert_eq!(ohlc.low, dec!(95));
    }

    #[test]
    fn fully_expired_window_reports_no_data() {
        let store = store();
        store.record_tick(&Tick::new("btcusd", dec!(100), 0));

        assert_eq!(store.get_ohlc("btcusd", 61), OhlcSummary::NoData);
        assert_eq!(store.window_len("btcusd"), 0);
        assert_eq!(store.instrument_count(), 1);
    }

    #[test]
    fn window_refills_after_emptying() {
        let store = store();
        store.record_tick(&Tick::new("btcusd", dec!(100), 0));
        assert!(store.get_ohlc("btcusd", 100).is_empty());

        store.record_tick(&Tick::new("btcusd", dec!(110), 101));
        assert_eq!(
            store.get_ohlc("btcusd", 101),
            OhlcSummary::Prices(Ohlc::flat(dec!(110)))
        );
    }

    #[test]
    fn repeated_query_is_idempotent() {
        let store = store();
        store.record_tick(&Tick::new("btcusd", dec!(100), 0));
        store.record_tick(&Tick::new("btcusd", dec!(101), 50));

        let first = store.get_ohlc("btcusd", 90);
        let len = store.window_len("btcusd");
        let second = store.get_ohlc("btcusd", 90);

        assert_eq!(first, second);
        assert_eq!(store.window_len("btcusd"), len);
    }

    #[test]
    fn extrema_compare_numerically() {
        let store = store();
        // Lexically "9" > "10" > "100.5"; numerically the reverse.
        store.record_tick(&Tick::new("btcusd", dec!(9), 0));
        store.record_tick(&Tick::new("btcusd", dec!(100.5), 1));
        store.record_tick(&Tick::new("btcusd", dec!(10), 2));

        let ohlc = store.get_ohlc("btcusd", 2).prices().unwrap();
        assert_eq!(ohlc.high, dec!(100.5));
        assert_eq!(ohlc.low, dec!(9));
        assert_eq!(ohlc.open, dec!(9));
        assert_eq!(ohlc.close, dec!(10));
    }

    #[test]
    fn evicting_the_extremum_rescans() {
        let store = store();
        store.record_tick(&Tick::new("btcusd", dec!(200), 0));
        store.record_tick(&Tick::new("btcusd", dec!(150), 30));
        store.record_tick(&Tick::new("btcusd", dec!(160), 40));

        let before = store.get_ohlc("btcusd", 40).prices().unwrap();
        assert_eq!(before.high, dec!(200));

        let after = store.get_ohlc("btcusd", 61).prices().unwrap();
        assert_eq!(after.high, dec!(160));
        assert_eq!(after.low, dec!(150));
    }

    #[test]
    fn instruments_are_independent() {
        let store = store();
        store.record_tick(&Tick::new("btcusd", dec!(100), 0));
        store.record_tick(&Tick::new("etheur", dec!(2), 50));

        assert!(store.get_ohlc("btcusd", 100).is_empty());
        assert!(!store.get_ohlc("etheur", 100).is_empty());
        assert_eq!(store.instrument_count(), 2);
    }

    #[test]
    fn concurrent_writers_land_in_one_queue() {
        use std::thread;

        let store = Arc::new(store());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let s = Arc::clone(&store);
                thread::spawn(move || {
                    for j in 0..100 {
                        s.record_tick(&Tick::new("btcusd", Decimal::from(i * 100 + j), 5));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.window_len("btcusd"), 800);
        let ohlc = store.get_ohlc("btcusd", 5).prices().unwrap();
        assert_eq!(ohlc.high, dec!(799));
        assert_eq!(ohlc.low, dec!(0));
    }
}
