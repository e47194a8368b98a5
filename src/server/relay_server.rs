//! Pass-through relay.
//!
//! Forwards each inbound POST body and its `Authorization` header to one fixed
//! downstream URL and mirrors the downstream status and body back verbatim.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub const DEFAULT_RELAY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub target: String,
    pub timeout: Duration,
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("downstream request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = match &self {
            RelayError::Client(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::Transport(e) => transport_status(e),
        };
        (status, self.to_string()).into_response()
    }
}

/// Closest 5xx for a failed downstream exchange.
///
/// Errors from `send` and `bytes` never carry a status, so only the failure
/// kind is available.
fn transport_status(error: &reqwest::Error) -> StatusCode {
    if error.is_timeout() {
        StatusCode::GATEWAY_TIMEOUT
    } else {
        StatusCode::BAD_GATEWAY
    }
}

#[derive(Clone)]
pub struct RelayState {
    inner: Arc<RelayStateInner>,
}

struct RelayStateInner {
    client: reqwest::Client,
    target: String,
}

impl RelayState {
    pub fn new(config: &RelayConfig) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(RelayError::Client)?;
        Ok(RelayState {
            inner: Arc::new(RelayStateInner {
                client,
                target: config.target.clone(),
            }),
        })
    }

    pub fn target(&self) -> &str {
        &self.inner.target
    }
}

/// Relay handler.
///
/// The path is ignored; everything goes to the configured target. A missing
/// `Authorization` header is forwarded as an empty one.
pub async fn relay_handler(
    State(relay): State<RelayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, RelayError> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .map(|v| v.as_bytes().to_vec())
        .unwrap_or_default();

    let downstream = relay
        .inner
        .client
        .post(relay.target())
        .header("Content-Type", "application/json")
        .header("Authorization", authorization)
        .body(body)
        .send()
        .await
        .map_err(|e| {
            warn!(target_url = %relay.target(), error = %e, "Relay request failed");
            RelayError::Transport(e)
        })?;

    let status =
        StatusCode::from_u16(downstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let payload = downstream.bytes().await.map_err(|e| {
        warn!(target_url = %relay.target(), error = %e, "Reading relay response failed");
        RelayError::Transport(e)
    })?;

    info!(target_url = %relay.target(), status = status.as_u16(), len = payload.len(), "Relayed request");
    Ok((status, [(header::CONTENT_TYPE, "application/json")], payload).into_response())
}

pub fn build_relay_router(relay: RelayState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/", post(relay_handler))
        .route("/{*path}", post(relay_handler))
        .route("/health", get(super::health_handler).post(relay_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(relay)
}
