//! Bitstamp WebSocket Client
//!
//! Holds the single upstream connection to the Bitstamp live trades feed.
//!
//! # Stream URL
//!
//! - Production: `wss://ws.bitstamp.net`
//!
//! # Lifecycle
//!
//! The client tracks the set of channels that should be open. Commands from
//! [`FeedHandle`] update that set and are forwarded while connected; after
//! every (re)connect the whole set is subscribed again. Trades are decoded
//! into ticks and emitted as [`FeedEvent::Tick`]. Undecodable frames are
//! logged and skipped.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::codec::{BitstampCodec, CodecError};
use super::messages::{ChannelRequest, FeedMessage};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::UpstreamControl;
use crate::domain::subscription::SubscriptionChanges;
use crate::domain::window::{Instrument, Tick};
use crate::infrastructure::config::FeedSettings;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that can end a feed connection.
#[derive(Debug, thiserror::Error)]
pub enum FeedClientError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Codec error while encoding a request.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The server closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// The server asked for a reconnect.
    #[error("server requested reconnect")]
    ReconnectRequested,

    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts exceeded")]
    MaxReconnectAttemptsExceeded,
}

// =============================================================================
// Events and Commands
// =============================================================================

/// Events emitted by the feed client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// Connected and tracked channels requested.
    Connected,
    /// Connection lost.
    Disconnected,
    /// Waiting before another connection attempt.
    Reconnecting {
        /// Reconnection attempt number.
        attempt: u32,
    },
    /// A trade normalized into a tick.
    Tick(Tick),
    /// A channel opened.
    Subscribed(Instrument),
    /// A channel closed.
    Unsubscribed(Instrument),
    /// The feed reported an error.
    Error(String),
}

/// Channel changes requested of the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedCommand {
    /// Open trade channels for these pairs.
    Subscribe(Vec<Instrument>),
    /// Close trade channels for these pairs.
    Unsubscribe(Vec<Instrument>),
}

/// Sending side of the client's command channel.
#[derive(Debug, Clone)]
pub struct FeedHandle {
    tx: mpsc::UnboundedSender<FeedCommand>,
}

impl FeedHandle {
    /// Queue a command for the client.
    ///
    /// Returns `false` if the client has stopped.
    pub fn send(&self, command: FeedCommand) -> bool {
        self.tx.send(command).is_ok()
    }
}

impl UpstreamControl for FeedHandle {
    fn apply(&self, changes: &SubscriptionChanges) {
        let mut subscribe: Vec<Instrument> = changes.subscribe.iter().cloned().collect();
        let mut unsubscribe: Vec<Instrument> = changes.unsubscribe.iter().cloned().collect();
        subscribe.sort_unstable();
        unsubscribe.sort_unstable();

        let delivered = (unsubscribe.is_empty() || self.send(FeedCommand::Unsubscribe(unsubscribe)))
            && (subscribe.is_empty() || self.send(FeedCommand::Subscribe(subscribe)));

        if !delivered {
            tracing::warn!("Feed client stopped; channel change dropped");
        }
    }
}

/// Create the command channel between handles and the client.
#[must_use]
pub fn command_channel() -> (FeedHandle, mpsc::UnboundedReceiver<FeedCommand>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (FeedHandle { tx }, rx)
}

// =============================================================================
// Client Configuration
// =============================================================================

/// Configuration for the feed client.
#[derive(Debug, Clone)]
pub struct FeedClientConfig {
    /// WebSocket URL.
    pub url: String,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
}

impl From<&FeedSettings> for FeedClientConfig {
    fn from(settings: &FeedSettings) -> Self {
        Self {
            url: settings.url.clone(),
            reconnect: ReconnectConfig::from(settings),
        }
    }
}

// =============================================================================
// Feed Client
// =============================================================================

/// Bitstamp live trades client.
pub struct FeedClient {
    config: FeedClientConfig,
    codec: BitstampCodec,
    event_tx: mpsc::Sender<FeedEvent>,
    cancel: CancellationToken,
    channels: RwLock<BTreeSet<Instrument>>,
}

impl FeedClient {
    /// Create a new client.
    #[must_use]
    pub fn new(
        config: FeedClientConfig,
        event_tx: mpsc::Sender<FeedEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            codec: BitstampCodec::new(),
            event_tx,
            cancel,
            channels: RwLock::new(BTreeSet::new()),
        }
    }

    /// Pairs whose channels should be open.
    #[must_use]
    pub fn tracked_channels(&self) -> Vec<Instrument> {
        self.channels.read().iter().cloned().collect()
    }

    /// Run the connection loop until cancelled or out of reconnect attempts.
    ///
    /// # Errors
    ///
    /// Returns [`FeedClientError::MaxReconnectAttemptsExceeded`] when the
    /// reconnect policy gives up.
    pub async fn run(
        self: Arc<Self>,
        mut commands: mpsc::UnboundedReceiver<FeedCommand>,
    ) -> Result<(), FeedClientError> {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Feed client cancelled");
                return Ok(());
            }

            match self.connect_and_run(&mut commands, &mut policy).await {
                Ok(()) => {
                    tracing::info!("Feed connection closed gracefully");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Feed connection error");
                    let _ = self.event_tx.send(FeedEvent::Disconnected).await;

                    let Some(delay) = policy.next_delay() else {
                        return Err(FeedClientError::MaxReconnectAttemptsExceeded);
                    };
                    let attempt = policy.attempt_count();
                    tracing::info!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        "Reconnecting to feed"
                    );
                    let _ = self.event_tx.send(FeedEvent::Reconnecting { attempt }).await;

                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            tracing::info!("Feed client cancelled during reconnect delay");
                            return Ok(());
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn connect_and_run(
        &self,
        commands: &mut mpsc::UnboundedReceiver<FeedCommand>,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), FeedClientError> {
        tracing::info!(url = %self.config.url, "Connecting to feed");

        let (ws_stream, _response) = tokio_tungstenite::connect_async(&self.config.url).await?;
        let (mut write, mut read) = ws_stream.split();

        // Fold in changes queued while disconnected, then restore everything.
        while let Ok(command) = commands.try_recv() {
            self.track(&command);
        }
        for pair in self.tracked_channels() {
            self.send_request(&mut write, &ChannelRequest::subscribe(&pair))
                .await?;
        }

        policy.reset();
        tracing::info!(channels = self.channels.read().len(), "Feed connected");
        let _ = self.event_tx.send(FeedEvent::Connected).await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                Some(command) = commands.recv() => {
                    self.track(&command);
                    for request in requests_for(&command) {
                        self.send_request(&mut write, &request).await?;
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_text(&text).await?,
                        Some(Ok(Message::Ping(data))) => write.send(Message::Pong(data)).await?,
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!("Feed sent close frame");
                            return Err(FeedClientError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!("Feed stream ended");
                            return Err(FeedClientError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    async fn handle_text(&self, text: &str) -> Result<(), FeedClientError> {
        let message = match self.codec.decode(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping undecodable feed frame");
                return Ok(());
            }
        };

        let event = match message {
            FeedMessage::Trade(tick) => FeedEvent::Tick(tick),
            FeedMessage::SubscriptionSucceeded { pair } => {
                tracing::debug!(pair = %pair, "Channel subscribed");
                FeedEvent::Subscribed(pair)
            }
            FeedMessage::UnsubscriptionSucceeded { pair } => {
                tracing::debug!(pair = %pair, "Channel unsubscribed");
                FeedEvent::Unsubscribed(pair)
            }
            FeedMessage::ReconnectRequested => {
                tracing::info!("Feed requested reconnect");
                return Err(FeedClientError::ReconnectRequested);
            }
            FeedMessage::Error { message } => {
                tracing::error!(msg = %message, "Feed error");
                FeedEvent::Error(message)
            }
            FeedMessage::Other { event } => {
                tracing::trace!(event = %event, "Ignoring feed event");
                return Ok(());
            }
        };

        let _ = self.event_tx.send(event).await;
        Ok(())
    }

    fn track(&self, command: &FeedCommand) {
        let mut channels = self.channels.write();
        match command {
            FeedCommand::Subscribe(pairs) => channels.extend(pairs.iter().cloned()),
            FeedCommand::Unsubscribe(pairs) => {
                for pair in pairs {
                    channels.remove(pair);
                }
            }
        }
    }

    async fn send_request<W>(
        &self,
        write: &mut W,
        request: &ChannelRequest,
    ) -> Result<(), FeedClientError>
    where
        W: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    {
        let json = self.codec.encode(request)?;
        tracing::debug!(event = ?request.event, channel = %request.data.channel, "Sending channel request");
        write.send(Message::Text(json.into())).await?;
        Ok(())
    }
}

impl std::fmt::Debug for FeedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedClient")
            .field("url", &self.config.url)
            .field("channels", &self.channels.read().len())
            .finish_non_exhaustive()
    }
}

fn requests_for(command: &FeedCommand) -> Vec<ChannelRequest> {
    match command {
        FeedCommand::Subscribe(pairs) => pairs.iter().map(|p| ChannelRequest::subscribe(p)).collect(),
        FeedCommand::Unsubscribe(pairs) => {
            pairs.iter().map(|p| ChannelRequest::unsubscribe(p)).collect()
        }
    }
}
