//! Produces `KeyRecord`s from a simulated quantum source (spec.md §4.1).
//!
//! Real QKD hardware is out of scope (spec.md §1 Non-goals); the source is
//! a cryptographically strong RNG tagged as if it came from one, matching
//! the corpus's `MlKemCrypto::generate_keypair()` shape: a pure function
//! from parameters to a typed result, no I/O, no shared state.

use chrono::Utc;
use rand::rngs::OsRng;
use rand::RngCore;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::errors::{KmeError, Result};
use crate::models::KeyRecord;

/// Informational entropy estimate reported on generated keys. The source is
/// simulated (not a physical QRNG), so this is a fixed high value rather
/// than a measured one — same convention as `CryptoStatus`'s fixed
/// `encryption_strength: 1024`.
const SIMULATED_ENTROPY_BITS_PER_BYTE: f64 = 7.997;
const QUANTUM_SOURCE_TAG: &str = "simulated-qrng-v1";

#[derive(Debug, Clone)]
pub struct KeyGenerator {
    origin_kms_id: String,
}

impl KeyGenerator {
    pub fn new(origin_kms_id: impl Into<String>) -> Self {
        Self {
            origin_kms_id: origin_kms_id.into(),
        }
    }

    /// Generate one `KeyRecord` for the given pair. Fails if `key_size` is
    /// outside `[1, 4096]` (spec.md §4.1); callers additionally clamp
    /// against the deployment's `MAX_KEY_SIZE_BYTES`.
    pub fn generate(
        &self,
        master_sae_id: &str,
        slave_sae_id: &str,
        key_size: usize,
    ) -> Result<KeyRecord> {
        if key_size == 0 || key_size > 4096 {
            return Err(KmeError::InvalidRequest {
                field: "size".to_string(),
                message: format!("key_size must be in [1, 4096], got {key_size}"),
            });
        }

        let mut bytes = vec![0u8; key_size];
        OsRng.fill_bytes(&mut bytes);

        Ok(KeyRecord {
            key_id: Uuid::new_v4(),
            key: Zeroizing::new(bytes),
            key_size,
            master_sae_id: master_sae_id.to_string(),
            slave_sae_id: slave_sae_id.to_string(),
            created_at: Utc::now(),
            origin_kms_id: self.origin_kms_id.clone(),
            entropy: SIMULATED_ENTROPY_BITS_PER_BYTE,
            quantum_source: QUANTUM_SOURCE_TAG.to_string(),
            consumed: false,
            consumed_at: None,
        })
    }
}
