//! Client Streaming Messages
//!
//! Codec-agnostic shapes of what clients send to the relay and what the
//! relay pushes back.
//!
//! # Inbound
//!
//! ```json
//! {"event": "subscribe", "currency_pairs": ["btcusd", "btceur"]}
//! ```
//!
//! # Outbound
//!
//! ```json
//! {"currency_pair": "btcusd", "price": 37000.5}
//! {"currency_pair": "btcusd", "o": "36990", "h": "37010", "l": "36980", "c": "37000.5"}
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::window::{Instrument, NO_DATA_SENTINEL, OhlcSummary};

// =============================================================================
// Inbound
// =============================================================================

/// Subscription action requested by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionEvent {
    /// Start receiving the listed instruments.
    Subscribe,
    /// Stop receiving the listed instruments.
    Unsubscribe,
}

/// A subscribe/unsubscribe request for a batch of instruments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRequest {
    /// Requested action.
    pub event: SubscriptionEvent,
    /// Instruments the action applies to.
    pub currency_pairs: Vec<Instrument>,
}

/// Longest pair name accepted from a client.
pub const MAX_PAIR_LEN: usize = 16;

/// Why a client frame was refused.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// Not JSON, or a field is missing or unknown.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A pair name is too long or not ASCII alphanumeric.
    #[error("invalid currency pair {0:?}")]
    InvalidPair(String),
}

impl ClientRequest {
    /// Parse a client text frame.
    ///
    /// Pair names are trimmed and lowercased; blank names are dropped.
    ///
    /// # Errors
    ///
    /// Returns `RequestError::Malformed` if the frame is not valid JSON or
    /// misses a field, and `RequestError::InvalidPair` if a pair name is
    /// longer than [`MAX_PAIR_LEN`] or holds anything but ASCII letters and
    /// digits. Nothing is applied from a refused frame.
    pub fn parse(text: &str) -> Result<Self, RequestError> {
        let request: Self = serde_json::from_str(text)?;
        let mut currency_pairs = Vec::with_capacity(request.currency_pairs.len());
        for pair in request.currency_pairs {
            let pair = pair.trim().to_ascii_lowercase();
            if pair.is_empty() {
                continue;
            }
            if pair.len() > MAX_PAIR_LEN || !pair.bytes().all(|b| b.is_ascii_alphanumeric()) {
                return Err(RequestError::InvalidPair(pair));
            }
            currency_pairs.push(pair);
        }
        Ok(Self {
            event: request.event,
            currency_pairs,
        })
    }
}

// =============================================================================
// Outbound
// =============================================================================

/// Per-tick price pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceUpdate {
    /// Instrument the price belongs to.
    pub currency_pair: Instrument,
    /// Trade price as a JSON number.
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
}

/// Periodic OHLC summary pushed to subscribers.
///
/// Each field is a decimal string, or [`NO_DATA_SENTINEL`] for an empty window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OhlcUpdate {
    /// Instrument the summary belongs to.
    pub currency_pair: Instrument,
    /// Open.
    pub o: String,
    /// High.
    pub h: String,
    /// Low.
    pub l: String,
    /// Close.
    pub c: String,
}

impl OhlcUpdate {
    /// Build the wire message for a summary.
    #[must_use]
    pub fn new(currency_pair: Instrument, summary: &OhlcSummary) -> Self {
        match summary.prices() {
            Some(ohlc) => Self {
                currency_pair,
                o: ohlc.open.to_string(),
                h: ohlc.high.to_string(),
                l: ohlc.low.to_string(),
                c: ohlc.close.to_string(),
            },
            None => Self {
                currency_pair,
                o: NO_DATA_SENTINEL.to_string(),
                h: NO_DATA_SENTINEL.to_string(),
                l: NO_DATA_SENTINEL.to_string(),
                c: NO_DATA_SENTINEL.to_string(),
            },
        }
    }
}

/// Notice sent back for a frame the relay could not act on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    /// Human-readable reason.
    pub error: String,
}

/// Any message the relay sends to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    /// Per-tick price.
    Price(PriceUpdate),
    /// Periodic OHLC summary.
    Ohlc(OhlcUpdate),
    /// Rejected client frame.
    Error(ErrorNotice),
}

impl OutboundMessage {
    /// Encode as a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Message kind label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Price(_) => "price",
            Self::Ohlc(_) => "ohlc",
            Self::Error(_) => "error",
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
