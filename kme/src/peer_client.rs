//! Outbound HTTP to the peer KME (spec.md §4.4).
//!
//! Grounded on `kembridge_common::client::ServiceClient`'s `reqwest`-based
//! retry wrapper, scoped down to exactly what spec.md §4.4 asks for: no
//! generic `get`/`put`/`delete`, just `sync` and `verify`, one bounded
//! retry policy, and explicit connection hygiene. The teacher's circuit
//! breaker (`kembridge_gateway_service::circuit_breaker`) has no
//! counterpart here — spec.md's Peer Client is a thin retrying client, not
//! a stateful breaker — and is not carried over.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::models::{KeyRecordWire, SyncRequest, SyncResponse, VerifyRequest, VerifyResponse};

const RETRY_BASE_DELAY_MS: u64 = 100;
const RETRY_MAX_DELAY_MS: u64 = 2_000;
const RETRY_MAX_ATTEMPTS: u32 = 2; // plus the first attempt == 3 total, per spec.md §4.4
const MAX_OUTBOUND_CONCURRENCY: usize = 8;

#[derive(Debug, Error, Clone)]
pub enum PeerError {
    #[error("peer request timed out")]
    Timeout,
    #[error("peer connection failed: {0}")]
    Connection(String),
    #[error("peer returned {status}: {body}")]
    Http { status: u16, body: String },
    #[error("peer response could not be decoded: {0}")]
    Decode(String),
}

impl PeerError {
    /// Transient failures are the only ones the retry loop should retry
    /// (spec.md §4.4: "on transient failure (timeout, 5xx, connection
    /// reset)"). A 403/404/etc is a definitive answer, not worth retrying.
    fn is_transient(&self) -> bool {
        match self {
            PeerError::Timeout | PeerError::Connection(_) => true,
            PeerError::Http { status, .. } => *status >= 500,
            PeerError::Decode(_) => false,
        }
    }
}

/// HTTP client targeting the peer KME's base URL.
pub struct PeerClient {
    client: Client,
    base_url: String,
    kms_id: String,
    outbound_permits: Arc<Semaphore>,
}

impl PeerClient {
    pub fn new(base_url: impl Into<String>, kms_id: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            // No idle-connection pool: each request gets a fresh socket and
            // the underlying connection is torn down afterwards, matching
            // the `Connection: close` NFR in spec.md §4.4/§5.
            .pool_max_idle_per_host(0)
            .build()
            .expect("failed to build peer HTTP client");

        Self {
            client,
            base_url: base_url.into(),
            kms_id: kms_id.into(),
            outbound_permits: Arc::new(Semaphore::new(MAX_OUTBOUND_CONCURRENCY)),
        }
    }

    /// `POST /kme/sync`, retried on transient failure with bounded
    /// exponential backoff (base 100ms, cap 2s, 3 attempts total).
    pub async fn sync(
        &self,
        keys: Vec<KeyRecordWire>,
        target_sae_id: &str,
    ) -> Result<SyncResponse, PeerError> {
        let body = SyncRequest {
            keys,
            source_kms_id: self.kms_id.clone(),
            target_sae_id: target_sae_id.to_string(),
            timestamp: chrono::Utc::now(),
        };

        let mut delay = RETRY_BASE_DELAY_MS;
        let mut last_err = None;

        for attempt in 0..=RETRY_MAX_ATTEMPTS {
            match self.post_sync(&body).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt < RETRY_MAX_ATTEMPTS => {
                    warn!(attempt = attempt + 1, error = %e, "sync attempt failed, retrying");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    delay = (delay * 2).min(RETRY_MAX_DELAY_MS);
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.expect("loop always records an error before exhausting attempts"))
    }

    async fn post_sync(&self, body: &SyncRequest) -> Result<SyncResponse, PeerError> {
        let _permit = self.outbound_permits.acquire().await;
        let url = format!("{}/api/v1/kme/sync", self.base_url);

        let result = self
            .client
            .post(&url)
            .header("Connection", "close")
            .header("X-KMS-ID", &self.kms_id)
            .json(body)
            .send()
            .await;

        match result {
            Ok(response) => self.decode::<SyncResponse>(response).await,
            Err(e) => Err(classify_reqwest_error(&e)),
        }
    }

    /// `POST /kme/verify` — an informational probe, never retried
    /// (spec.md §4.4).
    pub async fn verify(
        &self,
        key_ids: Vec<String>,
        master_sae_id: &str,
        slave_sae_id: &str,
    ) -> Result<VerifyResponse, PeerError> {
        let _permit = self.outbound_permits.acquire().await;
        let url = format!("{}/api/v1/kme/verify", self.base_url);
        let body = VerifyRequest {
            key_ids,
            master_sae_id: master_sae_id.to_string(),
            slave_sae_id: slave_sae_id.to_string(),
        };

        debug!(%url, "probing peer verify");

        let result = self
            .client
            .post(&url)
            .header("Connection", "close")
            .header("X-KMS-ID", &self.kms_id)
            .json(&body)
            .send()
            .await;

        match result {
            Ok(response) => self.decode::<VerifyResponse>(response).await,
            Err(e) => Err(classify_reqwest_error(&e)),
        }
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, PeerError> {
        let status = response.status();
        if status.is_success() {
            response
                .json::<T>()
                .await
                .map_err(|e| PeerError::Decode(e.to_string()))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(PeerError::Http {
                status: status.as_u16(),
                body,
            })
        }
    }
}

fn classify_reqwest_error(e: &reqwest::Error) -> PeerError {
    if e.is_timeout() {
        PeerError::Timeout
    } else {
        PeerError::Connection(e.to_string())
    }
}
