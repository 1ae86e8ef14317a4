use thiserror::Error;

/// Errors surfaced by the shared HTTP plumbing (peer client, config loading).
/// The `kme` crate's own `KmeError` wraps these where they cross into a
/// handler response.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("peer service unavailable: {service}")]
    ServiceUnavailable { service: String },

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("resource not found: {resource}")]
    NotFound { resource: String },

    #[error("internal error: {message}")]
    Internal { message: String },

    #[error("peer error: {service} - {message}")]
    ExternalService { service: String, message: String },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("serialization error: {message}")]
    Serialization { message: String },

    #[error("timeout: {operation}")]
    Timeout { operation: String },
}

impl ServiceError {
    pub fn to_status_code(&self) -> u16 {
        match self {
            ServiceError::InvalidRequest { .. } => 400,
            ServiceError::NotFound { .. } => 404,
            ServiceError::ServiceUnavailable { .. } => 503,
            ServiceError::Timeout { .. } => 504,
            _ => 500,
        }
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;
