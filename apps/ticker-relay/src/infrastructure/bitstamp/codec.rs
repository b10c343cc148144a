//! Bitstamp Frame Codec
//!
//! Turns raw text frames into [`FeedMessage`]s and channel requests into text
//! frames. Trades are normalized into domain [`Tick`]s here: the pair comes
//! from the channel name, the price prefers `price_str` over the float
//! `price`, and the timestamp is unix seconds.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Deserialize;

use super::messages::{ChannelRequest, Envelope, ErrorData, FeedMessage, TradeData, pair_of_channel};
use crate::domain::window::Tick;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// The channel name does not identify a trade pair.
    #[error("unrecognized channel: {0:?}")]
    UnknownChannel(String),

    /// The trade carries no usable price.
    #[error("invalid price: {0}")]
    InvalidPrice(String),

    /// The trade carries no usable timestamp.
    #[error("invalid timestamp")]
    InvalidTimestamp,
}

/// JSON codec for the Bitstamp WebSocket API.
#[derive(Debug, Default, Clone, Copy)]
pub struct BitstampCodec;

impl BitstampCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not valid JSON, or if a trade frame
    /// lacks a usable pair, price or timestamp.
    pub fn decode(&self, text: &str) -> Result<FeedMessage, CodecError> {
        let envelope: Envelope = serde_json::from_str(text)?;

        match envelope.event.as_str() {
            "trade" => decode_trade(&envelope).map(FeedMessage::Trade),
            "bts:subscription_succeeded" => Ok(FeedMessage::SubscriptionSucceeded {
                pair: channel_pair(&envelope.channel)?,
            }),
            "bts:unsubscription_succeeded" => Ok(FeedMessage::UnsubscriptionSucceeded {
                pair: channel_pair(&envelope.channel)?,
            }),
            "bts:request_reconnect" => Ok(FeedMessage::ReconnectRequested),
            "bts:error" => {
                let data: ErrorData = serde_json::from_value(envelope.data).unwrap_or_default();
                Ok(FeedMessage::Error {
                    message: data.message,
                })
            }
            other => Ok(FeedMessage::Other {
                event: other.to_owned(),
            }),
        }
    }

    /// Encode a channel request as a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self, request: &ChannelRequest) -> Result<String, CodecError> {
        Ok(serde_json::to_string(request)?)
    }
}

fn channel_pair(channel: &str) -> Result<String, CodecError> {
    pair_of_channel(channel)
        .map(str::to_owned)
        .ok_or_else(|| CodecError::UnknownChannel(channel.to_owned()))
}

fn decode_trade(envelope: &Envelope) -> Result<Tick, CodecError> {
    let pair = channel_pair(&envelope.channel)?;
    let data = TradeData::deserialize(&envelope.data)?;

    let price = match (&data.price_str, data.price) {
        (Some(text), _) => {
            Decimal::from_str(text.trim()).map_err(|_| CodecError::InvalidPrice(text.clone()))?
        }
        (None, Some(price)) => price,
        (None, None) => return Err(CodecError::InvalidPrice("missing".to_string())),
    };

    let timestamp = data.timestamp.value().ok_or(CodecError::InvalidTimestamp)?;

    Ok(Tick::new(pair, price, timestamp))
}

// =============================================================================
// Tests
// =============================================================================
