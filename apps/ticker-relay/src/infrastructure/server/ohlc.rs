//! OHLC snapshot endpoint.

use axum::Json;
use axum::extract::{Path, State};

use super::AppState;
use crate::domain::streaming::OhlcUpdate;

/// `GET /ohlc/{currency_pair}`: current window summary for one pair.
///
/// Unknown or empty pairs report the no-data sentinel.
pub(super) async fn ohlc_handler(
    State(state): State<AppState>,
    Path(currency_pair): Path<String>,
) -> Json<OhlcUpdate> {
    let pair = currency_pair.trim().to_lowercase();
    let summary = state.store.get_ohlc(&pair, state.clock.now().timestamp());
    Json(OhlcUpdate::new(pair, &summary))
}
