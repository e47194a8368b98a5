//! HTTP surfaces.
//!
//! # Endpoints (webhook service)
//!
//! - `POST /webhook` (and `POST /`) - mail-to-webhook deliveries, always 200
//! - `GET /codes/{address}` - latest unexpired code for an address
//! - `GET /codes` - the whole code document
//! - `GET /health` - liveness
//!
//! The relay runs as a separate router, see [`relay_server`].

use std::sync::Arc;

use tower_http::trace::TraceLayer;

use crate::storage::code_store::CodeStore;
use crate::storage::overflow_log::OverflowLog;

pub mod payload;
pub mod relay_server;
pub mod webhook_server;

pub use relay_server::{build_relay_router, RelayState};
pub use webhook_server::{code_handler, codes_handler, health_handler, webhook_handler};

/// Shared state handed to the webhook handlers.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    store: CodeStore,
    overflow: OverflowLog,
}

impl AppState {
    pub fn new(store: CodeStore, overflow: OverflowLog) -> Self {
        AppState {
            inner: Arc::new(AppStateInner { store, overflow }),
        }
    }

    pub fn store(&self) -> &CodeStore {
        &self.inner.store
    }

    pub fn overflow(&self) -> &OverflowLog {
        &self.inner.overflow
    }
}

/// Builds the webhook service router.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/", post(webhook_handler))
        .route("/webhook", post(webhook_handler))
        .route("/codes", get(codes_handler))
        .route("/codes/{address}", get(code_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
