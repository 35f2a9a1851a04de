//! Error taxonomy for the relayer
//!
//! Every failure a caller can observe is a [`RelayerError`]. Lower layers
//! (store, chain) have their own error types that are classified into it at
//! the lifecycle boundary.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Caller-visible error, one variant per failure class
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayerError {
    /// Malformed input: bad key, bad params, infeasible route, stale timestamp
    #[error("{0}")]
    Client(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Rate limit exceeded for {class}, retry after {retry_after_secs}s")]
    RateLimited {
        class: &'static str,
        retry_after_secs: u64,
    },

    /// Wrong state for the requested transition
    #[error("{0}")]
    Conflict(String),

    #[error("Operation expired")]
    Expired,

    /// Target chain rejected the transaction
    #[error("Execution failed: {0}")]
    Execution(String),

    /// Chain RPC, quote service or store unreachable
    #[error("Service unavailable: {0}")]
    Infrastructure(String),
}

impl RelayerError {
    pub fn client(msg: impl Into<String>) -> Self {
        RelayerError::Client(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        RelayerError::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        RelayerError::Conflict(msg.into())
    }

    pub fn infrastructure(msg: impl Into<String>) -> Self {
        RelayerError::Infrastructure(msg.into())
    }

    /// Stable machine-readable code returned in the error body
    pub fn code(&self) -> &'static str {
        match self {
            RelayerError::Client(_) => "invalid_request",
            RelayerError::NotFound(_) => "not_found",
            RelayerError::RateLimited { .. } => "rate_limited",
            RelayerError::Conflict(_) => "conflict",
            RelayerError::Expired => "expired",
            RelayerError::Execution(_) => "execution_failed",
            RelayerError::Infrastructure(_) => "unavailable",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayerError::Client(_) => StatusCode::BAD_REQUEST,
            RelayerError::NotFound(_) => StatusCode::NOT_FOUND,
            RelayerError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            RelayerError::Conflict(_) => StatusCode::CONFLICT,
            RelayerError::Expired => StatusCode::GONE,
            RelayerError::Execution(_) => StatusCode::BAD_GATEWAY,
            RelayerError::Infrastructure(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl IntoResponse for RelayerError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
            code: self.code(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

/// Failure of the shared store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt stored value in {table}: {reason}")]
    Corrupt { table: &'static str, reason: String },
}

impl From<StoreError> for RelayerError {
    fn from(err: StoreError) -> Self {
        RelayerError::Infrastructure(err.to_string())
    }
}

/// Failure reported by the target chain adapter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// RPC unreachable or timed out before the transaction was sent
    #[error("chain unavailable: {0}")]
    Unavailable(String),

    /// Transaction was rejected by the chain or program
    #[error("transaction rejected: {0}")]
    Rejected(String),

    /// Transaction was sent but confirmation did not arrive in time
    #[error("confirmation unknown for {signature}")]
    ConfirmationUnknown { signature: String },

    #[error("smart account already exists")]
    AlreadyExists,

    /// Stored account data did not decode
    #[error("invalid account data: {0}")]
    InvalidAccountData(String),
}

impl From<ChainError> for RelayerError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::Unavailable(msg) => RelayerError::Infrastructure(msg),
            ChainError::InvalidAccountData(msg) => {
                RelayerError::Infrastructure(format!("invalid account data: {}", msg))
            }
            ChainError::AlreadyExists => RelayerError::conflict("Smart account already exists"),
            other => RelayerError::Execution(other.to_string()),
        }
    }
}
