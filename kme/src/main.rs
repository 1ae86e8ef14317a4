//! Entry point: one binary, run twice with different environments to form
//! a master/slave KME pair (spec.md §2). Grounded on
//! `kembridge-crypto-service`'s `main.rs` (`tracing_subscriber::fmt`, build
//! router, `TcpListener::bind`, `axum::serve`), generalized to also wire up
//! the background pool-replenishment task and optional TTL sweeper.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use kme::config::KmeConfig;
use kme::key_generator::KeyGenerator;
use kme::key_store::KeyStore;
use kme::peer_client::PeerClient;
use kme::pool::{PoolConfig, PoolManager};
use kme::router::build_router;
use kme::state::{AppState, Stats};
use kme::synchronizer::Synchronizer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Arc::new(KmeConfig::from_env()?);
    info!(kms_id = %config.kms_id, sae_id = %config.sae_id, port = config.port, peer_url = %config.peer_url, "starting KME");

    let store = Arc::new(KeyStore::new());
    let generator = Arc::new(KeyGenerator::new(config.kms_id.clone()));
    let peer = Arc::new(PeerClient::new(
        config.peer_url.clone(),
        config.kms_id.clone(),
        config.peer_timeout,
    ));
    let synchronizer = Arc::new(Synchronizer::new(
        store.clone(),
        peer,
        generator,
        config.default_key_size_bytes,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pool = Arc::new(PoolManager::new(
        store.clone(),
        synchronizer.clone(),
        PoolConfig {
            min_pool_size: config.pool_min,
            max_pool_size: config.pool_max,
            replenish_threshold: config.pool_replenish_threshold,
        },
        shutdown_rx.clone(),
    ));

    let pool_task = {
        let pool = pool.clone();
        let interval = config.pool_replenish_interval;
        tokio::spawn(async move { pool.run(interval).await })
    };

    let ttl_task = config.key_ttl.map(|ttl| {
        let store = store.clone();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move { run_ttl_sweeper(store, ttl, &mut shutdown).await })
    });

    let state = Arc::new(AppState {
        config: config.clone(),
        store,
        pool,
        synchronizer,
        stats: Arc::new(Stats::default()),
    });

    let app = build_router(state, config.request_timeout);
    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(port = config.port, "KME listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    pool_task.abort();
    if let Some(task) = ttl_task {
        task.abort();
    }

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

/// Optional `KEY_TTL_SEC` sweeper (spec.md §6): unconsumed keys older than
/// the TTL are purged. Runs at a fixed cadence independent of the pool
/// replenish interval, and exits promptly on the same shutdown signal the
/// pool task watches (spec.md §5: "monitors a process-wide shutdown
/// signal and exits promptly").
async fn run_ttl_sweeper(
    store: Arc<KeyStore>,
    ttl: std::time::Duration,
    shutdown: &mut watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(30));
    let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(0));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let purged = store.purge_expired(ttl);
                if purged > 0 {
                    info!(purged, "TTL sweeper purged expired unconsumed keys");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("TTL sweeper shutting down");
                    return;
                }
            }
        }
    }
}
