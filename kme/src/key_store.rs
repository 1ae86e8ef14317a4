//! In-memory `(key_ID) -> KeyRecord` store with a `(master, slave) -> set<key_ID>`
//! secondary index (spec.md §4.2). Generalized from the teacher's single
//! `HashMap<Uuid, MlKemKeyPair>` (`QuantumKeyManager`) into the dual-index
//! shape spec.md §9 calls for.
//!
//! Guarded by one `std::sync::Mutex`: every critical section here is a
//! synchronous `HashMap` operation with no `.await` inside it, so a
//! synchronous mutex is the right tool (spec.md §5 forbids holding any lock
//! across peer I/O, and there is none to hold it across).

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{Duration, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::errors::KmeError;
use crate::models::{KeyRecord, SaePair};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    #[error("key already exists")]
    AlreadyExists,
    #[error("key not found")]
    NotFound,
    #[error("key already consumed")]
    AlreadyConsumed,
    #[error("key does not belong to the stated SAE pair")]
    PairMismatch,
}

#[derive(Default)]
struct Inner {
    by_id: HashMap<Uuid, KeyRecord>,
    by_pair: HashMap<SaePair, HashSet<Uuid>>,
}

impl Inner {
    fn index_insert(&mut self, record: &KeyRecord) {
        self.by_pair.entry(record.pair()).or_default().insert(record.key_id);
    }
}

pub struct KeyStore {
    inner: Mutex<Inner>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Insert a freshly generated or peer-synced record. Fails with
    /// `AlreadyExists` if `key_ID` is already present — callers generating
    /// fresh keys retry with a new UUID (spec.md §7); callers syncing from
    /// a peer treat it as benign idempotency (spec.md §4.7) and should use
    /// [`KeyStore::sync_insert`] instead.
    pub fn insert(&self, record: KeyRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("key store mutex poisoned");
        if inner.by_id.contains_key(&record.key_id) {
            return Err(StoreError::AlreadyExists);
        }
        inner.index_insert(&record);
        inner.by_id.insert(record.key_id, record);
        Ok(())
    }

    /// Idempotent insert used by `/kme/sync` (spec.md §4.7): re-syncing the
    /// same `key_ID` is not an error and never clobbers `consumed` state.
    /// Returns `true` if a new record was actually inserted.
    pub fn sync_insert(&self, record: KeyRecord) -> bool {
        let mut inner = self.inner.lock().expect("key store mutex poisoned");
        if inner.by_id.contains_key(&record.key_id) {
            return false;
        }
        inner.index_insert(&record);
        inner.by_id.insert(record.key_id, record);
        true
    }

    pub fn get(&self, key_id: &Uuid) -> Result<KeyRecord, StoreError> {
        let inner = self.inner.lock().expect("key store mutex poisoned");
        inner.by_id.get(key_id).cloned().ok_or(StoreError::NotFound)
    }

    /// Present in the store and matching the stated pair, irrespective of
    /// consumption state — the semantics `/kme/verify` needs (spec.md §4.7:
    /// "consumption state is irrelevant").
    pub fn verify_present(&self, key_id: &Uuid, pair: &SaePair) -> bool {
        let inner = self.inner.lock().expect("key store mutex poisoned");
        matches!(inner.by_id.get(key_id), Some(rec) if rec.pair() == *pair)
    }

    /// Atomic, all-or-nothing batch consume (spec.md §4.2, §5): a two-phase
    /// check-then-commit under the single store-wide lock. On any failure,
    /// returns every offending `(key_ID, reason)` and consumes nothing.
    pub fn consume_batch(
        &self,
        key_ids: &[Uuid],
        pair: &SaePair,
    ) -> Result<Vec<KeyRecord>, Vec<(Uuid, StoreError)>> {
        let mut inner = self.inner.lock().expect("key store mutex poisoned");

        let mut offending = Vec::new();
        for id in key_ids {
            match inner.by_id.get(id) {
                None => offending.push((*id, StoreError::NotFound)),
                Some(rec) if rec.consumed => offending.push((*id, StoreError::AlreadyConsumed)),
                Some(rec) if rec.pair() != *pair => offending.push((*id, StoreError::PairMismatch)),
                Some(_) => {}
            }
        }
        if !offending.is_empty() {
            return Err(offending);
        }

        let now = Utc::now();
        let mut consumed = Vec::with_capacity(key_ids.len());
        for id in key_ids {
            let rec = inner
                .by_id
                .get_mut(id)
                .expect("validated present in phase one");
            rec.consumed = true;
            rec.consumed_at = Some(now);
            consumed.push(rec.clone());
        }
        Ok(consumed)
    }

    pub fn count_available(&self, pair: &SaePair) -> usize {
        let inner = self.inner.lock().expect("key store mutex poisoned");
        inner
            .by_pair
            .get(pair)
            .map(|ids| ids.iter().filter(|id| !inner.by_id[*id].consumed).count())
            .unwrap_or(0)
    }

    pub fn list_available(&self, pair: &SaePair) -> Vec<KeyRecord> {
        let inner = self.inner.lock().expect("key store mutex poisoned");
        inner
            .by_pair
            .get(pair)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.by_id.get(id))
            .filter(|rec| !rec.consumed)
            .cloned()
            .collect()
    }

    /// Every pair this store has ever seen a key for — used by the pool
    /// manager's background loop to enumerate candidates for replenishment
    /// without a separate registration step.
    pub fn known_pairs(&self) -> Vec<SaePair> {
        let inner = self.inner.lock().expect("key store mutex poisoned");
        inner.by_pair.keys().cloned().collect()
    }

    /// Remove unconsumed keys older than `ttl` (optional `KEY_TTL_SEC`
    /// sweeper, spec.md §6). Consumed keys are left alone — they're
    /// already terminal and harmless to retain for the process lifetime.
    pub fn purge_expired(&self, ttl: Duration) -> usize {
        let cutoff = Utc::now() - ttl;
        let mut inner = self.inner.lock().expect("key store mutex poisoned");
        let expired: Vec<Uuid> = inner
            .by_id
            .values()
            .filter(|rec| !rec.consumed && rec.created_at < cutoff)
            .map(|rec| rec.key_id)
            .collect();

        for id in &expired {
            if let Some(rec) = inner.by_id.remove(id) {
                if let Some(set) = inner.by_pair.get_mut(&rec.pair()) {
                    set.remove(id);
                }
            }
        }
        expired.len()
    }
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl From<StoreError> for KmeError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::AlreadyExists => KmeError::Internal("key_ID collision".to_string()),
            StoreError::NotFound => KmeError::KeyNotAvailable {
                offending_key_ids: vec![],
                reason: "not found".to_string(),
            },
            StoreError::AlreadyConsumed => KmeError::KeyNotAvailable {
                offending_key_ids: vec![],
                reason: "already consumed".to_string(),
            },
            StoreError::PairMismatch => KmeError::KeyNotAvailable {
                offending_key_ids: vec![],
                reason: "pair mismatch".to_string(),
            },
        }
    }
}
