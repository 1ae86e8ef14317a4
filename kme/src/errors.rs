use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Error taxonomy per spec.md §7. Each variant carries exactly the detail
/// the relevant handler needs to build a precise error body; handlers never
/// construct the HTTP response by hand, they return `Result<_, KmeError>`
/// and let `IntoResponse` do it, matching `CryptoServiceError`.
#[derive(Error, Debug)]
pub enum KmeError {
    #[error("invalid request: {field}: {message}")]
    InvalidRequest { field: String, message: String },

    #[error("KMS ID mismatch: expected {expected}, got {actual}")]
    KmsIdMismatch { expected: String, actual: String },

    #[error("one or more keys unavailable")]
    KeyNotAvailable {
        offending_key_ids: Vec<String>,
        reason: String,
    },

    #[error("peer unavailable: {detail}")]
    PeerUnavailable { detail: String },

    #[error("pool exhausted: {detail}")]
    PoolExhausted { detail: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl KmeError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            KmeError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            KmeError::KmsIdMismatch { .. } => StatusCode::FORBIDDEN,
            KmeError::KeyNotAvailable { .. } => StatusCode::NOT_FOUND,
            KmeError::PeerUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            KmeError::PoolExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            KmeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            KmeError::InvalidRequest { .. } => "INVALID_REQUEST",
            KmeError::KmsIdMismatch { .. } => "KMS_ID_MISMATCH",
            KmeError::KeyNotAvailable { .. } => "KEY_NOT_AVAILABLE",
            KmeError::PeerUnavailable { .. } => "PEER_UNAVAILABLE",
            KmeError::PoolExhausted { .. } => "POOL_EXHAUSTED",
            KmeError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    offending_key_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

impl IntoResponse for KmeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        tracing::warn!(error_code = code, error = %self, "request rejected");

        let body = match &self {
            KmeError::KeyNotAvailable {
                offending_key_ids,
                reason,
            } => ErrorBody {
                error: code.to_string(),
                detail: Some(self.to_string()),
                offending_key_ids: Some(offending_key_ids.clone()),
                reason: Some(reason.clone()),
            },
            _ => ErrorBody {
                error: code.to_string(),
                detail: Some(self.to_string()),
                offending_key_ids: None,
                reason: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, KmeError>;
