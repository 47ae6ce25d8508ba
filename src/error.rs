// src/error.rs
use thiserror::Error;

/// Failures of the durable store behind the persistence gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

// Outcome taxonomy for inbound socket events. Pairing an already-paired peer
// is not represented here: the matcher just skips that candidate.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Persistence failed: {0}")]
    Persistence(#[from] GatewayError),
}

impl ServiceError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ServiceError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ServiceError::NotFound(msg.into())
    }

    /// Text sent back to the client in a `*_error` event. Storage details stay
    /// in the server log.
    pub fn client_reason(&self) -> String {
        match self {
            ServiceError::Validation(msg) => format!("invalid request: {}", msg),
            ServiceError::NotFound(msg) => format!("not found: {}", msg),
            ServiceError::Persistence(_) => "storage unavailable, please retry".to_string(),
        }
    }
}
