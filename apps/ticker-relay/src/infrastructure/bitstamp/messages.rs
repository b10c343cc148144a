//! Bitstamp WebSocket Message Types
//!
//! Wire shapes for the Bitstamp v2 WebSocket API, limited to the live trades
//! channel family.
//!
//! # Outbound
//!
//! ```json
//! {"event": "bts:subscribe", "data": {"channel": "live_trades_btcusd"}}
//! ```
//!
//! # Inbound
//!
//! ```json
//! {"event": "trade", "channel": "live_trades_btcusd",
//!  "data": {"id": 1, "price": 37000.5, "price_str": "37000.5", "timestamp": "1700000000"}}
//! {"event": "bts:subscription_succeeded", "channel": "live_trades_btcusd", "data": {}}
//! {"event": "bts:request_reconnect", "channel": "", "data": ""}
//! {"event": "bts:error", "channel": "", "data": {"code": null, "message": "Bad subscription string."}}
//! ```

use serde::{Deserialize, Serialize};

use crate::domain::window::{Instrument, Tick};

/// Channel name prefix for per-pair trade streams.
pub const LIVE_TRADES_PREFIX: &str = "live_trades_";

/// Build the trade channel name for a pair.
#[must_use]
pub fn trade_channel(pair: &str) -> String {
    format!("{LIVE_TRADES_PREFIX}{pair}")
}

/// Extract the pair from a trade channel name.
#[must_use]
pub fn pair_of_channel(channel: &str) -> Option<&str> {
    channel
        .strip_prefix(LIVE_TRADES_PREFIX)
        .filter(|pair| !pair.is_empty())
}

// =============================================================================
// Outbound
// =============================================================================

/// Channel subscription action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelAction {
    /// Open a channel.
    #[serde(rename = "bts:subscribe")]
    Subscribe,
    /// Close a channel.
    #[serde(rename = "bts:unsubscribe")]
    Unsubscribe,
}

/// Channel reference inside a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelData {
    /// Channel name.
    pub channel: String,
}

/// Subscribe or unsubscribe request for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRequest {
    /// Action to take.
    pub event: ChannelAction,
    /// Target channel.
    pub data: ChannelData,
}

impl ChannelRequest {
    /// Subscribe to a pair's trade channel.
    #[must_use]
    pub fn subscribe(pair: &str) -> Self {
        Self {
            event: ChannelAction::Subscribe,
            data: ChannelData {
                channel: trade_channel(pair),
            },
        }
    }

    /// Unsubscribe from a pair's trade channel.
    #[must_use]
    pub fn unsubscribe(pair: &str) -> Self {
        Self {
            event: ChannelAction::Unsubscribe,
            data: ChannelData {
                channel: trade_channel(pair),
            },
        }
    }
}

// =============================================================================
// Inbound
// =============================================================================

/// Outer envelope shared by every inbound frame.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    /// Event name.
    pub event: String,
    /// Channel the event belongs to (empty for connection-level events).
    #[serde(default)]
    pub channel: String,
    /// Event payload.
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Integer that may arrive as a JSON number or a numeric string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum LooseInt {
    /// Plain number.
    Number(i64),
    /// Numeric string.
    Text(String),
}

impl LooseInt {
    /// Numeric value, if any.
    #[must_use]
    pub fn value(&self) -> Option<i64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Payload of a `trade` event.
#[derive(Debug, Clone, Deserialize)]
pub struct TradeData {
    /// Trade id.
    #[serde(default)]
    pub id: Option<i64>,
    /// Price as a float.
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub price: Option<rust_decimal::Decimal>,
    /// Price as an exact decimal string.
    #[serde(default)]
    pub price_str: Option<String>,
    /// Trade time in unix seconds.
    pub timestamp: LooseInt,
}

/// Payload of a `bts:error` event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorData {
    /// Error code, when Bitstamp provides one.
    #[serde(default)]
    pub code: Option<serde_json::Value>,
    /// Error message.
    #[serde(default)]
    pub message: String,
}

/// A decoded feed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedMessage {
    /// A trade, normalized to a tick.
    Trade(Tick),
    /// A channel subscription was confirmed.
    SubscriptionSucceeded {
        /// Pair whose channel opened.
        pair: Instrument,
    },
    /// A channel unsubscription was confirmed.
    UnsubscriptionSucceeded {
        /// Pair whose channel closed.
        pair: Instrument,
    },
    /// The server asks the client to reconnect.
    ReconnectRequested,
    /// The server reported an error.
    Error {
        /// Error message.
        message: String,
    },
    /// Any other event, ignored by the relay.
    Other {
        /// Event name.
        event: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names() {
        assert_eq!(trade_channel("btcusd"), "live_trades_btcusd");
        assert_eq!(pair_of_channel("live_trades_btcusd"), Some("btcusd"));
        assert_eq!(pair_of_channel("live_trades_"), None);
        assert_eq!(pair_of_channel("order_book_btcusd"), None);
    }

    #[test]
    fn subscribe_request_shape() {
        let json = serde_json::to_string(&ChannelRequest::subscribe("btceur")).unwrap();
        assert_eq!(
            json,
            r#"{"event":"bts:subscribe","data":{"channel":"live_trades_btceur"}}"#
        );
    }

    #[test]
    fn unsubscribe_request_shape() {
        let json = serde_json::to_string(&ChannelRequest::unsubscribe("btcusd")).unwrap();
        assert!(json.contains(r#""event":"bts:unsubscribe""#));
    }

    #[test]
    fn loose_int_accepts_both_forms() {
        assert_eq!(LooseInt::Number(5).value(), Some(5));
        assert_eq!(LooseInt::Text("1700000000".into()).value(), Some(1_700_000_000));
        assert_eq!(LooseInt::Text("soon".into()).value(), None);
    }
}
