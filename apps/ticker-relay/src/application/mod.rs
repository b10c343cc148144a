//! Application Layer - Use cases and port definitions.
//!
//! This layer wires the domain state to the outside world through ports,
//! without knowing which transport sits behind them.

/// Port interfaces for clocks, client delivery and the upstream feed.
pub mod ports;

/// Tick ingestion, OHLC emission and subscription handling.
pub mod services;
