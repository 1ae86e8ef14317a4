//! `sync` / `verify` / `pool/*` / `stats` / `health` — the inter-KME peer
//! protocol (spec.md §4.7).

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use uuid::Uuid;

use crate::errors::{KmeError, Result};
use crate::handlers::required_header;
use crate::models::{
    HealthResponse, KeyRecord, KmeStatusResponse, PoolPairRequest, ReplenishRequest,
    ReplenishResponse, SaePair, StatsResponse, SyncRequest, SyncResponse, SyncStatus,
    VerifyRequest, VerifyResponse,
};
use crate::state::AppState;

/// `POST /api/v1/kme/sync` — insert a batch pushed from the peer. Already-
/// present `key_ID`s are silently idempotent (spec.md §4.7).
pub async fn sync(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SyncRequest>,
) -> Result<Json<SyncResponse>> {
    let caller_kms_id = required_header(&headers, "X-KMS-ID")?;
    if caller_kms_id != req.source_kms_id {
        return Err(KmeError::KmsIdMismatch {
            expected: req.source_kms_id,
            actual: caller_kms_id,
        });
    }

    let total = req.keys.len();
    let mut synced_count = 0usize;

    for wire in req.keys {
        let key_id = wire.key_id;
        match KeyRecord::try_from(wire) {
            Ok(record) => {
                state.store.sync_insert(record);
                if state.store.get(&key_id).is_ok() {
                    synced_count += 1;
                }
            }
            Err(e) => {
                tracing::warn!(kms_id = %state.config.kms_id, %key_id, error = %e, "rejected malformed key in sync batch");
            }
        }
    }

    let status = if synced_count >= total {
        SyncStatus::Success
    } else {
        SyncStatus::Partial
    };

    Ok(Json(SyncResponse {
        synced_count,
        status,
        timestamp: chrono::Utc::now(),
    }))
}

/// `POST /api/v1/kme/verify` — presence+pair check, consumption state is
/// irrelevant (spec.md §4.7).
pub async fn verify(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>> {
    let _caller_kms_id = required_header(&headers, "X-KMS-ID")?;
    let pair = SaePair::new(req.master_sae_id, req.slave_sae_id);

    let mut missing = Vec::new();
    for raw in &req.key_ids {
        let present = Uuid::parse_str(raw)
            .ok()
            .is_some_and(|id| state.store.verify_present(&id, &pair));
        if !present {
            missing.push(raw.clone());
        }
    }

    let verified_count = req.key_ids.len() - missing.len();
    Ok(Json(VerifyResponse {
        all_verified: missing.is_empty(),
        verified_count,
        missing_keys: missing,
    }))
}

/// `POST /api/v1/kme/pool/status`.
pub async fn pool_status(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PoolPairRequest>,
) -> Json<crate::models::PoolStatus> {
    let pair = SaePair::new(req.master_sae_id, req.slave_sae_id);
    Json(state.pool.status(&pair))
}

/// `POST /api/v1/kme/pool/replenish`.
pub async fn pool_replenish(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReplenishRequest>,
) -> Result<Json<ReplenishResponse>> {
    let pair = SaePair::new(req.master_sae_id, req.slave_sae_id);
    let target = req.target_count.unwrap_or(state.config.pool_min);

    let added = state.pool.replenish(&pair, target).await?;
    state.stats.record_generated(added as u64);

    Ok(Json(ReplenishResponse {
        added,
        pool: state.pool.status(&pair),
    }))
}

/// `GET /api/v1/kme/stats`.
pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let (generated, consumed, sync_failures) = state.stats.snapshot();
    Json(StatsResponse {
        kms_id: state.config.kms_id.clone(),
        sae_id: state.config.sae_id.clone(),
        total_keys_generated: generated,
        total_keys_consumed: consumed,
        total_sync_failures: sync_failures,
        active_pairs: state.store.known_pairs().len(),
    })
}

/// `GET /api/v1/kme/status`.
pub async fn kme_status(State(state): State<Arc<AppState>>) -> Json<KmeStatusResponse> {
    let (generated, consumed, sync_failures) = state.stats.snapshot();
    Json(KmeStatusResponse {
        kms_id: state.config.kms_id.clone(),
        sae_id: state.config.sae_id.clone(),
        peer_url: state.config.peer_url.clone(),
        known_pairs: state.store.known_pairs().len(),
        total_keys_generated: generated,
        total_keys_consumed: consumed,
        total_sync_failures: sync_failures,
    })
}

/// `GET /health`.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        kms_id: state.config.kms_id.clone(),
    })
}
