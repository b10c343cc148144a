//! Bitstamp Feed Adapter
//!
//! Upstream side of the relay: a single WebSocket connection to Bitstamp's
//! live trades channels, normalized into ticks.
//!
//! - `messages`: wire types
//! - `codec`: frame decoding and request encoding
//! - `client`: connection lifecycle, channel tracking, reconnects
//! - `reconnect`: backoff policy
//! - `state`: connection status for health reporting

pub mod client;
pub mod codec;
pub mod messages;
pub mod reconnect;
pub mod state;

pub use client::{
    FeedClient, FeedClientConfig, FeedClientError, FeedCommand, FeedEvent, FeedHandle,
    command_channel,
};
pub use codec::{BitstampCodec, CodecError};
pub use messages::{ChannelAction, ChannelRequest, FeedMessage};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use state::{ConnectionState, FeedSnapshot, FeedState};
