//! `enc_keys` / `dec_keys` / `status` — the ETSI GS QKD-014-style,
//! SAE-facing endpoints (spec.md §4.6).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use uuid::Uuid;

use crate::errors::{KmeError, Result};
use crate::handlers::required_header;
use crate::models::{
    DecKeysRequest, DecKeysResponse, EncKeysRequest, EncKeysResponse, KeyEntry, SaePair,
    StatusResponse,
};
use crate::state::AppState;

/// `POST /api/v1/keys/enc_keys` — generate keys for `(X-SAE-ID,
/// X-Slave-SAE-ID)`, sync them to the peer, and return only the ones the
/// peer confirmed (spec.md §4.6 step 5).
pub async fn enc_keys(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<EncKeysRequest>,
) -> Result<Json<EncKeysResponse>> {
    let master_sae_id = required_header(&headers, "X-SAE-ID")?;
    let slave_sae_id = required_header(&headers, "X-Slave-SAE-ID")?;

    if req.number == 0 || req.number > state.config.max_keys_per_request {
        return Err(KmeError::InvalidRequest {
            field: "number".to_string(),
            message: format!(
                "number must be in [1, {}], got {}",
                state.config.max_keys_per_request, req.number
            ),
        });
    }

    let key_size = req.size.unwrap_or(state.config.default_key_size_bytes);
    if key_size == 0 || key_size > state.config.max_key_size_bytes {
        return Err(KmeError::InvalidRequest {
            field: "size".to_string(),
            message: format!(
                "size must be in [1, {}], got {}",
                state.config.max_key_size_bytes, key_size
            ),
        });
    }

    let pair = SaePair::new(master_sae_id, slave_sae_id);

    let synced = state
        .synchronizer
        .generate_and_sync(&pair, req.number, key_size)
        .await
        .inspect_err(|e| {
            if matches!(e, KmeError::PeerUnavailable { .. }) {
                state.stats.record_sync_failure();
            }
        })?;

    state.stats.record_generated(synced.len() as u64);

    let keys = synced
        .iter()
        .map(|rec| KeyEntry {
            key_id: rec.key_id.to_string(),
            key: encode_key(rec),
        })
        .collect();

    Ok(Json(EncKeysResponse { keys }))
}

/// `POST /api/v1/keys/dec_keys` — consume keys for `(X-Slave-SAE-ID,
/// X-SAE-ID)` and return their bytes; all-or-nothing across the batch
/// (spec.md §4.6 step 3).
pub async fn dec_keys(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<DecKeysRequest>,
) -> Result<Json<DecKeysResponse>> {
    let slave_sae_id = required_header(&headers, "X-SAE-ID")?;
    let master_sae_id = required_header(&headers, "X-Slave-SAE-ID")?;

    if req.key_ids.is_empty() || req.key_ids.len() > state.config.max_keys_per_request {
        return Err(KmeError::InvalidRequest {
            field: "key_IDs".to_string(),
            message: format!(
                "key_IDs must contain [1, {}] entries, got {}",
                state.config.max_keys_per_request,
                req.key_ids.len()
            ),
        });
    }

    let pair = SaePair::new(master_sae_id, slave_sae_id);

    let mut ids = Vec::with_capacity(req.key_ids.len());
    let mut unparsable = Vec::new();
    for raw in &req.key_ids {
        match Uuid::parse_str(raw) {
            Ok(id) => ids.push(id),
            Err(_) => unparsable.push(raw.clone()),
        }
    }
    if !unparsable.is_empty() {
        return Err(KmeError::KeyNotAvailable {
            offending_key_ids: unparsable,
            reason: "not a valid key_ID".to_string(),
        });
    }

    let consumed = state.store.consume_batch(&ids, &pair).map_err(|offending| {
        let reason = summarize_offending_reasons(&offending);
        KmeError::KeyNotAvailable {
            offending_key_ids: offending.into_iter().map(|(id, _)| id.to_string()).collect(),
            reason,
        }
    })?;

    state.stats.record_consumed(consumed.len() as u64);

    // Preserve request order (spec.md §4.6 step 4), not store iteration order.
    let by_id: std::collections::HashMap<Uuid, _> =
        consumed.into_iter().map(|rec| (rec.key_id, rec)).collect();
    let keys = ids
        .iter()
        .map(|id| {
            let rec = &by_id[id];
            KeyEntry {
                key_id: rec.key_id.to_string(),
                key: encode_key(rec),
            }
        })
        .collect();

    Ok(Json(DecKeysResponse { keys }))
}

/// `GET /api/v1/keys/{master_sae_id}/status`.
pub async fn status(
    State(state): State<Arc<AppState>>,
    Path(master_sae_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<StatusResponse>> {
    let slave_sae_id = required_header(&headers, "X-Slave-SAE-ID")?;
    let pair = SaePair::new(master_sae_id, slave_sae_id);

    Ok(Json(StatusResponse {
        source_kme_id: state.config.kms_id.clone(),
        target_kme_id: derive_peer_kms_id(&state),
        stored_key_count: state.store.count_available(&pair),
        max_key_count: state.config.max_keys_per_request,
        max_key_size: state.config.max_key_size_bytes,
        min_key_size: 1,
        max_sae_id_count: 1,
    }))
}

fn derive_peer_kms_id(state: &AppState) -> String {
    // No peer identity handshake exists in this simulated deployment; the
    // peer's own `KMS_ID` is only known to itself. The peer URL is the best
    // available stand-in, matching the "target" half of the pair.
    state.config.peer_url.clone()
}

fn encode_key(record: &crate::models::KeyRecord) -> String {
    use base64::{engine::general_purpose, Engine as _};
    general_purpose::STANDARD.encode(record.key.as_slice())
}

fn summarize_offending_reasons(offending: &[(Uuid, crate::key_store::StoreError)]) -> String {
    let reasons: std::collections::BTreeSet<String> =
        offending.iter().map(|(_, e)| e.to_string()).collect();
    reasons.into_iter().collect::<Vec<_>>().join(", ")
}
