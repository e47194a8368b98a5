//! Webhook endpoint for the mail-to-webhook bridge.
//!
//! Every delivery is acknowledged with 200, whatever happens inside; store
//! and log failures are only reported through tracing.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

use super::payload::{InboundPayload, WebhookRequest};
use super::AppState;
use crate::storage::code_store::{CodeStore, StoreError};
use crate::storage::overflow_log::{OverflowEntry, OverflowLog, DEFAULT_FROM, DEFAULT_SUBJECT};
use crate::utils::extractor::extract;
use crate::utils::utils::{decode_header_value, local_now};

pub const PROCESSED: &str = "Processed";
pub const NO_DATA: &str = "No data received";

/// What happened to one decoded delivery.
#[derive(Debug)]
pub enum Outcome {
    Stored { email: String },
    StoreFailed { email: String, error: StoreError },
    Overflowed,
    OverflowFailed(std::io::Error),
}

/// Routes a decoded delivery to the code store or the overflow log.
///
/// Blocking: waits on the store's file lock.
pub fn process_delivery(
    store: &CodeStore,
    overflow: &OverflowLog,
    request: WebhookRequest,
    now: DateTime<Local>,
) -> Outcome {
    let plain = request.plain.unwrap_or_default();
    let html = request.html.unwrap_or_default();

    if let Some(found) = extract(&plain, &html) {
        return match store.upsert(&found.email, &found.code, now) {
            Ok(()) => Outcome::Stored { email: found.email },
            Err(error) => Outcome::StoreFailed {
                email: found.email,
                error,
            },
        };
    }

    let entry = OverflowEntry {
        from: request
            .from
            .map(|v| decode_header_value("From", &v))
            .unwrap_or_else(|| DEFAULT_FROM.to_string()),
        subject: request
            .subject
            .map(|v| decode_header_value("Subject", &v))
            .unwrap_or_else(|| DEFAULT_SUBJECT.to_string()),
        received_at: now.naive_local(),
        plain,
        html,
    };
    match overflow.append(&entry.render()) {
        Ok(()) => Outcome::Overflowed,
        Err(e) => Outcome::OverflowFailed(e),
    }
}

/// Webhook handler.
///
/// # Response
///
/// - 200 `Processed`: body decoded (stored, logged, or failed internally)
/// - 200 `No data received`: body was neither a JSON object nor a form
pub async fn webhook_handler(
    State(app_state): State<AppState>,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let request = match InboundPayload::decode(&body) {
        Ok(payload) => payload.into_request(),
        Err(e) => {
            debug!(error = %e, len = body.len(), "Ignoring delivery without data");
            return (StatusCode::OK, NO_DATA);
        }
    };

    let now = local_now();
    let outcome = tokio::task::spawn_blocking(move || {
        process_delivery(app_state.store(), app_state.overflow(), request, now)
    })
    .await;

    match outcome {
        Ok(Outcome::Stored { email }) => {
            info!(email = %email, "Stored verification code");
        }
        Ok(Outcome::StoreFailed { email, error }) => {
            warn!(email = %email, error = %error, "Failed to store verification code");
        }
        Ok(Outcome::Overflowed) => {
            info!("No code found, delivery written to overflow log");
        }
        Ok(Outcome::OverflowFailed(error)) => {
            warn!(error = %error, "Failed to append to overflow log");
        }
        Err(e) => {
            warn!(error = %e, "Delivery processing task failed");
        }
    }

    (StatusCode::OK, PROCESSED)
}

/// Returns the live code for one address.
///
/// - 200 with `{"code", "received_at"}`
/// - 404 when no unexpired code exists
/// - 503 when the store cannot be read
pub async fn code_handler(State(app_state): State<AppState>, Path(address): Path<String>) -> Response {
    let now = local_now();
    let store = app_state.store().clone();
    let result = tokio::task::spawn_blocking(move || store.lookup(&address, now)).await;

    match result {
        Ok(Ok(Some(record))) => Json(record).into_response(),
        Ok(Ok(None)) => (StatusCode::NOT_FOUND, "Not Found").into_response(),
        Ok(Err(e)) => {
            warn!(error = %e, "Code lookup failed");
            (StatusCode::SERVICE_UNAVAILABLE, "Store unavailable").into_response()
        }
        Err(e) => {
            warn!(error = %e, "Code lookup task failed");
            (StatusCode::SERVICE_UNAVAILABLE, "Store unavailable").into_response()
        }
    }
}

/// Returns the whole persisted document, stale entries included.
pub async fn codes_handler(State(app_state): State<AppState>) -> Response {
    let store = app_state.store().clone();
    match tokio::task::spawn_blocking(move || store.snapshot()).await {
        Ok(Ok(records)) => Json(records).into_response(),
        Ok(Err(e)) => {
            warn!(error = %e, "Reading code document failed");
            (StatusCode::SERVICE_UNAVAILABLE, "Store unavailable").into_response()
        }
        Err(e) => {
            warn!(error = %e, "Code document task failed");
            (StatusCode::SERVICE_UNAVAILABLE, "Store unavailable").into_response()
        }
    }
}

pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}
