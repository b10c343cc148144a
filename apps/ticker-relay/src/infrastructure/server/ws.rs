//! WebSocket streaming endpoint.
//!
//! Each connection gets an outbound queue in the [`OutboundHub`] and a
//! forward task draining it into the socket. Inbound text frames are
//! subscription requests.
//!
//! [`OutboundHub`]: crate::infrastructure::broadcast::OutboundHub

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tracing::Instrument as _;

use super::AppState;
use crate::application::ports::Delivery;
use crate::domain::streaming::{ClientRequest, ErrorNotice, OutboundMessage};
use crate::domain::subscription::ConnectionId;
use crate::infrastructure::metrics;

/// `GET /streaming`: upgrade to a WebSocket.
pub(super) async fn streaming_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        let connection = new_connection_id();
        let span = tracing::info_span!("client", connection_id = connection);
        handle_socket(socket, state, connection).instrument(span)
    })
}

fn new_connection_id() -> ConnectionId {
    uuid::Uuid::new_v4().as_u64_pair().0
}

async fn handle_socket(socket: WebSocket, state: AppState, connection: ConnectionId) {
    let mut outbound = state.hub.register(connection);
    metrics::set_client_connections(state.hub.connection_count());
    tracing::info!("Client connected");

    let (mut sender, mut receiver) = socket.split();

    let mut forward_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            frame = receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        handle_text(&state, connection, text.as_str());
                    }
                    Some(Ok(Message::Binary(_))) => {
                        reject(&state, connection, "binary frames are not supported");
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "Client socket error");
                        break;
                    }
                }
            }
            _ = &mut forward_task => break,
        }
    }

    let released = state.subscriptions.connection_closed(connection);
    state.hub.unregister(connection);
    forward_task.abort();

    metrics::set_client_connections(state.hub.connection_count());
    metrics::set_watched_instruments(state.registry.stats().instrument_count);
    tracing::info!(
        released = released.unsubscribe.len(),
        "Client disconnected"
    );
}

fn handle_text(state: &AppState, connection: ConnectionId, text: &str) {
    match ClientRequest::parse(text) {
        Ok(request) => {
            let changes = state.subscriptions.handle(connection, &request);
            tracing::debug!(
                event = ?request.event,
                pairs = ?request.currency_pairs,
                opened = changes.subscribe.len(),
                closed = changes.unsubscribe.len(),
                "Subscription request handled"
            );
            metrics::set_watched_instruments(state.registry.stats().instrument_count);
        }
        Err(e) => {
            tracing::warn!(error = %e, "Malformed client frame");
            reject(state, connection, &format!("invalid request: {e}"));
        }
    }
}

fn reject(state: &AppState, connection: ConnectionId, reason: &str) {
    let notice = OutboundMessage::Error(ErrorNotice {
        error: reason.to_string(),
    });
    if let Err(e) = state.hub.deliver(connection, &notice) {
        tracing::debug!(error = %e, "Could not deliver error notice");
    }
}
