//! Constructed once at process start and threaded through every handler —
//! no module-level singletons (spec.md §9: "module-level singletons...
//! become values constructed once... threaded through handlers via
//! dependency injection").

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::KmeConfig;
use crate::key_store::KeyStore;
use crate::pool::PoolManager;
use crate::synchronizer::Synchronizer;

/// Running counters surfaced by `/api/v1/kme/stats`. Cheap, lock-free
/// bookkeeping — nothing here participates in the store's linearization.
#[derive(Default)]
pub struct Stats {
    pub total_keys_generated: AtomicU64,
    pub total_keys_consumed: AtomicU64,
    pub total_sync_failures: AtomicU64,
}

impl Stats {
    pub fn record_generated(&self, n: u64) {
        self.total_keys_generated.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_consumed(&self, n: u64) {
        self.total_keys_consumed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_sync_failure(&self) {
        self.total_sync_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.total_keys_generated.load(Ordering::Relaxed),
            self.total_keys_consumed.load(Ordering::Relaxed),
            self.total_sync_failures.load(Ordering::Relaxed),
        )
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<KmeConfig>,
    pub store: Arc<KeyStore>,
    pub pool: Arc<PoolManager>,
    pub synchronizer: Arc<Synchronizer>,
    pub stats: Arc<Stats>,
}
