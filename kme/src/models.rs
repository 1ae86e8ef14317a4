//! The KME data model: `KeyRecord`, `SAEPair`, `Pool`, and the wire DTOs
//! for the ETSI-style and peer-to-peer endpoints (spec.md §3, §6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

/// Immutable except for `consumed`/`consumed_at`. Field order and meaning
/// match spec.md §3 exactly.
#[derive(Debug, Clone)]
pub struct KeyRecord {
    pub key_id: Uuid,
    pub key: Zeroizing<Vec<u8>>,
    pub key_size: usize,
    pub master_sae_id: String,
    pub slave_sae_id: String,
    pub created_at: DateTime<Utc>,
    pub origin_kms_id: String,
    pub entropy: f64,
    pub quantum_source: String,
    pub consumed: bool,
    pub consumed_at: Option<DateTime<Utc>>,
}

impl KeyRecord {
    pub fn pair(&self) -> SaePair {
        SaePair {
            master_sae_id: self.master_sae_id.clone(),
            slave_sae_id: self.slave_sae_id.clone(),
        }
    }
}

/// The ordered `(master_sae_id, slave_sae_id)` tuple every key belongs to.
/// Direction matters — the same physical SAE can be master in one pair and
/// slave in another.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SaePair {
    pub master_sae_id: String,
    pub slave_sae_id: String,
}

impl SaePair {
    pub fn new(master_sae_id: impl Into<String>, slave_sae_id: impl Into<String>) -> Self {
        Self {
            master_sae_id: master_sae_id.into(),
            slave_sae_id: slave_sae_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolHealth {
    Healthy,
    Low,
    Empty,
}

/// Per-SAE-pair bookkeeping (spec.md §3). `needs_replenishment` and
/// `health` are derived, never stored independently of `current_count`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStatus {
    pub current_count: usize,
    pub min_pool_size: usize,
    pub max_pool_size: usize,
    pub replenish_threshold: usize,
    pub needs_replenishment: bool,
    pub health: PoolHealth,
}

impl PoolStatus {
    pub fn derive(
        current_count: usize,
        min_pool_size: usize,
        max_pool_size: usize,
        replenish_threshold: usize,
    ) -> Self {
        let health = if current_count == 0 {
            PoolHealth::Empty
        } else if current_count < replenish_threshold {
            PoolHealth::Low
        } else {
            PoolHealth::Healthy
        };

        Self {
            current_count,
            min_pool_size,
            max_pool_size,
            replenish_threshold,
            needs_replenishment: current_count < replenish_threshold,
            health,
        }
    }
}

// ---------------------------------------------------------------------
// Wire DTOs — ETSI-style endpoints (spec.md §4.6)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct EncKeysRequest {
    pub number: usize,
    pub size: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyEntry {
    #[serde(rename = "key_ID")]
    pub key_id: String,
    pub key: String, // base64
}

#[derive(Debug, Clone, Serialize)]
pub struct EncKeysResponse {
    pub keys: Vec<KeyEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DecKeysRequest {
    #[serde(rename = "key_IDs")]
    pub key_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecKeysResponse {
    pub keys: Vec<KeyEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    #[serde(rename = "source_KME_ID")]
    pub source_kme_id: String,
    #[serde(rename = "target_KME_ID")]
    pub target_kme_id: String,
    pub stored_key_count: usize,
    pub max_key_count: usize,
    pub max_key_size: usize,
    pub min_key_size: usize,
    #[serde(rename = "max_SAE_ID_count")]
    pub max_sae_id_count: usize,
}

// ---------------------------------------------------------------------
// Wire DTOs — peer endpoints (spec.md §4.7)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRecordWire {
    #[serde(rename = "key_ID")]
    pub key_id: Uuid,
    pub key: String, // base64
    pub key_size: usize,
    pub master_sae_id: String,
    pub slave_sae_id: String,
    pub created_at: DateTime<Utc>,
    pub origin_kms_id: String,
    pub entropy: f64,
    pub quantum_source: String,
}

impl From<&KeyRecord> for KeyRecordWire {
    fn from(record: &KeyRecord) -> Self {
        use base64::{engine::general_purpose, Engine as _};
        Self {
            key_id: record.key_id,
            key: general_purpose::STANDARD.encode(record.key.as_slice()),
            key_size: record.key_size,
            master_sae_id: record.master_sae_id.clone(),
            slave_sae_id: record.slave_sae_id.clone(),
            created_at: record.created_at,
            origin_kms_id: record.origin_kms_id.clone(),
            entropy: record.entropy,
            quantum_source: record.quantum_source.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid base64 key material: {0}")]
pub struct InvalidKeyWire(#[from] base64::DecodeError);

impl TryFrom<KeyRecordWire> for KeyRecord {
    type Error = InvalidKeyWire;

    fn try_from(wire: KeyRecordWire) -> Result<Self, Self::Error> {
        use base64::{engine::general_purpose, Engine as _};
        let key = general_purpose::STANDARD.decode(wire.key)?;
        Ok(Self {
            key_id: wire.key_id,
            key: Zeroizing::new(key),
            key_size: wire.key_size,
            master_sae_id: wire.master_sae_id,
            slave_sae_id: wire.slave_sae_id,
            created_at: wire.created_at,
            origin_kms_id: wire.origin_kms_id,
            entropy: wire.entropy,
            quantum_source: wire.quantum_source,
            consumed: false,
            consumed_at: None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub keys: Vec<KeyRecordWire>,
    pub source_kms_id: String,
    pub target_sae_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Success,
    Partial,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    pub synced_count: usize,
    pub status: SyncStatus,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub key_ids: Vec<String>,
    pub master_sae_id: String,
    pub slave_sae_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub all_verified: bool,
    pub verified_count: usize,
    pub missing_keys: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolPairRequest {
    pub master_sae_id: String,
    pub slave_sae_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplenishRequest {
    pub master_sae_id: String,
    pub slave_sae_id: String,
    pub target_count: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplenishResponse {
    pub added: usize,
    pub pool: PoolStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub kms_id: String,
    pub sae_id: String,
    pub total_keys_generated: u64,
    pub total_keys_consumed: u64,
    pub total_sync_failures: u64,
    pub active_pairs: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub kms_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct KmeStatusResponse {
    pub kms_id: String,
    pub sae_id: String,
    pub peer_url: String,
    pub known_pairs: usize,
    pub total_keys_generated: u64,
    pub total_keys_consumed: u64,
    pub total_sync_failures: u64,
}
