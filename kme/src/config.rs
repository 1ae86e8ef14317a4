use std::time::Duration;

use kme_common::config::{env_or, load_dotenv, required_env};
use kme_common::errors::ServiceResult;

/// Identity and tuning parameters for one KME instance, loaded entirely
/// from the environment per spec.md §6. There is no config file format —
/// two instances of the same `kme` binary become a master/slave pair
/// purely by the `KMS_ID`/`SAE_ID`/`KMS_PORT`/`PEER_URL` they're launched
/// with (spec.md §2: "Binary... run twice with different environment").
#[derive(Debug, Clone)]
pub struct KmeConfig {
    pub kms_id: String,
    pub sae_id: String,
    pub port: u16,
    pub peer_url: String,

    pub pool_min: usize,
    pub pool_max: usize,
    pub pool_replenish_threshold: usize,
    pub pool_replenish_interval: Duration,

    pub request_timeout: Duration,
    pub peer_timeout: Duration,

    pub default_key_size_bytes: usize,
    pub max_key_size_bytes: usize,
    pub max_keys_per_request: usize,

    pub key_ttl: Option<Duration>,
}

impl KmeConfig {
    pub fn from_env() -> ServiceResult<Self> {
        load_dotenv();

        Ok(Self {
            kms_id: required_env("KMS_ID")?,
            sae_id: required_env("SAE_ID")?,
            port: required_env("KMS_PORT")?,
            peer_url: required_env("PEER_URL")?,

            pool_min: env_or("POOL_MIN", 10),
            pool_max: env_or("POOL_MAX", 100),
            pool_replenish_threshold: env_or("POOL_REPLENISH_THRESHOLD", 5),
            pool_replenish_interval: Duration::from_secs(env_or("POOL_REPLENISH_INTERVAL_SEC", 5)),

            request_timeout: Duration::from_secs(env_or("REQUEST_TIMEOUT_SEC", 30)),
            peer_timeout: Duration::from_secs(env_or("PEER_TIMEOUT_SEC", 5)),

            default_key_size_bytes: env_or("DEFAULT_KEY_SIZE_BYTES", 32),
            max_key_size_bytes: env_or("MAX_KEY_SIZE_BYTES", 4096),
            max_keys_per_request: env_or("MAX_KEYS_PER_REQUEST", 100),

            key_ttl: std::env::var("KEY_TTL_SEC")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        })
    }
}
