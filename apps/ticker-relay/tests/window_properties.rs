//! Window Property Tests
//!
//! OHLC over arbitrary in-order tick streams matches a direct computation
//! over the ticks still inside the window.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use proptest::prelude::*;
use rust_decimal::Decimal;

use ticker_relay::{Ohlc, OhlcSummary, Tick, WindowStore};

const WINDOW_SECS: i64 = 60;

/// Ticks as (timestamp, price) pairs with non-decreasing timestamps.
fn tick_stream() -> impl Strategy<Value = Vec<(i64, i64)>> {
    prop::collection::vec((0_i64..20, 1_i64..100_000), 0..64).prop_map(|steps| {
        let mut ts = 0;
        steps
            .into_iter()
            .map(|(gap, price)| {
                ts += gap;
                (ts, price)
            })
            .collect()
    })
}

fn expected(ticks: &[(i64, i64)], now: i64) -> OhlcSummary {
    let retained: Vec<Decimal> = ticks
        .iter()
        .filter(|(ts, _)| *ts >= now - WINDOW_SECS)
        .map(|(_, price)| Decimal::from(*price))
        .collect();

    let Some((&first, rest)) = retained.split_first() else {
        return OhlcSummary::NoData;
    };
    let mut ohlc = Ohlc::flat(first);
    for &price in rest {
        ohlc.high = ohlc.high.max(price);
        ohlc.low = ohlc.low.min(price);
        ohlc.close = price;
    }
    OhlcSummary::Prices(ohlc)
}

proptest! {
    #[test]
    fn ohlc_matches_retained_ticks(ticks in tick_stream(), lag in 0_i64..120) {
        let store = WindowStore::new(Duration::from_secs(WINDOW_SECS.unsigned_abs()));
        for (ts, price) in &ticks {
            store.record_tick(&Tick::new("btcusd", Decimal::from(*price), *ts));
        }

        let now = ticks.last().map_or(0, |(ts, _)| *ts) + lag;
        let summary = store.get_ohlc("btcusd", now);

        if ticks.is_empty() {
            prop_assert_eq!(summary, OhlcSummary::NoData);
        } else {
            prop_assert_eq!(summary, expected(&ticks, now));
        }
    }

    #[test]
    fn high_and_low_bound_open_and_close(ticks in tick_stream()) {
        let store = WindowStore::new(Duration::from_secs(WINDOW_SECS.unsigned_abs()));
        for (ts, price) in &ticks {
            store.record_tick(&Tick::new("ethusd", Decimal::from(*price), *ts));
        }

        let now = ticks.last().map_or(0, |(ts, _)| *ts);
        if let Some(ohlc) = store.get_ohlc("ethusd", now).prices() {
            prop_assert!(ohlc.low <= ohlc.open && ohlc.open <= ohlc.high);
            prop_assert!(ohlc.low <= ohlc.close && ohlc.close <= ohlc.high);
        }
    }

    #[test]
    fn queries_are_repeatable(ticks in tick_stream(), lag in 0_i64..120) {
        let store = WindowStore::new(Duration::from_secs(WINDOW_SECS.unsigned_abs()));
        for (ts, price) in &ticks {
            store.record_tick(&Tick::new("xrpusd", Decimal::from(*price), *ts));
        }

        let now = ticks.last().map_or(0, |(ts, _)| *ts) + lag;
        let first = store.get_ohlc("xrpusd", now);
        prop_assert_eq!(store.get_ohlc("xrpusd", now), first);
    }

    #[test]
    fn stale_ticks_leave_summary_unchanged(
        ticks in tick_stream(),
        back in 1_i64..200,
        price in 1_i64..100_000,
    ) {
        prop_assume!(!ticks.is_empty());
        let store = WindowStore::new(Duration::from_secs(WINDOW_SECS.unsigned_abs()));
        for (ts, price) in &ticks {
            store.record_tick(&Tick::new("solusd", Decimal::from(*price), *ts));
        }

        let newest = ticks.last().map_or(0, |(ts, _)| *ts);
        let stale = Tick::new("solusd", Decimal::from(price), newest - back);
        prop_assert!(!store.record_tick(&stale));
        prop_assert_eq!(store.get_ohlc("solusd", newest), expected(&ticks, newest));
    }
}
