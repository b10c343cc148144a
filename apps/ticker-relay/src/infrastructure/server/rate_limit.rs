//! Rate limiting middleware for the HTTP API.

use std::net::SocketAddr;

use axum::Json;
use axum::extract::{ConnectInfo, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::domain::rate_limit::RateDecision;
use crate::infrastructure::metrics;

/// User key for requests without a `user` query parameter.
pub const ANONYMOUS_USER: &str = "anonymous";

/// Key used when the peer address is unknown.
const UNKNOWN_IP: &str = "unknown";

/// Body of a 429 response: current log lengths for the caller's IP and user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRejection {
    /// Requests held for the IP.
    pub ip: usize,
    /// Requests held for the user.
    pub id: usize,
}

impl IntoResponse for RateLimitRejection {
    fn into_response(self) -> Response {
        (StatusCode::TOO_MANY_REQUESTS, Json(self)).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct UserQuery {
    user: Option<String>,
}

pub(super) async fn enforce(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| UNKNOWN_IP.to_string(), |info| info.0.ip().to_string());

    let user = Query::<UserQuery>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(query)| query.user)
        .filter(|user| !user.is_empty())
        .unwrap_or_else(|| ANONYMOUS_USER.to_string());

    match state.limiter.check(&ip, &user, state.clock.now()) {
        RateDecision::Accepted => next.run(request).await,
        RateDecision::Rejected {
            tripped,
            ip_count,
            user_count,
        } => {
            tracing::info!(
                ip = %ip,
                user = %user,
                tripped = tripped.as_str(),
                ip_count,
                user_count,
                "Request rate limited"
            );
            metrics::record_rate_limited(tripped);
            RateLimitRejection {
                ip: ip_count,
                id: user_count,
            }
            .into_response()
        }
    }
}
