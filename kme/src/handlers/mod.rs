//! HTTP handlers, split along spec.md's two API surfaces: the ETSI-style
//! SAE-facing endpoints (§4.6) and the inter-KME peer endpoints (§4.7).
//! Grounded on `handlers.rs`'s `State<Arc<_>>` extractor style.

pub mod etsi;
pub mod peer;

use axum::http::HeaderMap;

use crate::errors::{KmeError, Result};

/// A required header, case-insensitively looked up, non-empty after
/// trimming. Every ETSI/peer endpoint needs at least one of these (spec.md
/// §6: "their absence yields 400").
pub(crate) fn required_header(headers: &HeaderMap, name: &str) -> Result<String> {
    let value = headers
        .get(name)
        .ok_or_else(|| KmeError::InvalidRequest {
            field: name.to_string(),
            message: format!("missing required header {name}"),
        })?
        .to_str()
        .map_err(|_| KmeError::InvalidRequest {
            field: name.to_string(),
            message: format!("header {name} is not valid UTF-8"),
        })?
        .trim()
        .to_string();

    if value.is_empty() {
        return Err(KmeError::InvalidRequest {
            field: name.to_string(),
            message: format!("header {name} must not be empty"),
        });
    }

    Ok(value)
}
