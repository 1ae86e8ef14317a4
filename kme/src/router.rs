//! Route table and middleware stack. Grounded on the corpus's consistent
//! `tower-http` layering (`trace`, `timeout`) across every teacher service.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{etsi, peer};
use crate::state::AppState;

/// Per-request deadline (spec.md §5, default 30s via `REQUEST_TIMEOUT_SEC`).
/// `tower_http::timeout::TimeoutLayer` is infallible — it answers with its
/// own 408 response directly rather than producing an error for a
/// `HandleErrorLayer` to convert, so no error-conversion layer is needed
/// here (unlike `tower::timeout`, whose `Elapsed` does need one).
pub fn build_router(state: Arc<AppState>, request_timeout: Duration) -> Router {
    Router::new()
        .route("/api/v1/keys/enc_keys", post(etsi::enc_keys))
        .route("/api/v1/keys/dec_keys", post(etsi::dec_keys))
        .route("/api/v1/keys/{master_sae_id}/status", get(etsi::status))
        .route("/api/v1/kme/sync", post(peer::sync))
        .route("/api/v1/kme/verify", post(peer::verify))
        .route("/api/v1/kme/pool/status", post(peer::pool_status))
        .route("/api/v1/kme/pool/replenish", post(peer::pool_replenish))
        .route("/api/v1/kme/stats", get(peer::stats))
        .route("/api/v1/kme/status", get(peer::kme_status))
        .route("/health", get(peer::health))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
