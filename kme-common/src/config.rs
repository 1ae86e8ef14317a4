use std::env;
use std::fmt::Display;
use std::str::FromStr;

use crate::errors::{ServiceError, ServiceResult};

/// Load `.env` if present, then defer to real environment variables.
/// Matches `ServiceConfig::new()`'s `dotenvy::dotenv().ok()` convention.
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// A required environment variable, parsed to `T`. Fails with
/// `ServiceError::InvalidRequest` naming the offending variable, mirroring
/// the precise-field-name requirement in spec.md §7.
pub fn required_env<T>(key: &str) -> ServiceResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = env::var(key).map_err(|_| ServiceError::InvalidRequest {
        message: format!("missing required environment variable {key}"),
    })?;
    raw.parse::<T>().map_err(|e| ServiceError::InvalidRequest {
        message: format!("invalid value for {key}: {e}"),
    })
}

/// An optional environment variable with a default, parsed to `T`.
pub fn env_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
