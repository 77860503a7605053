//! The error taxonomy shared by every `memcortex-*` crate.
//!
//! Every error kind distinguished in the architecture (transport,
//! protocol, authorization, rate-limit, validation, not-found, conflict,
//! backend, timeout, cancelled, internal) maps onto one variant here, so
//! downstream crates convert into a single JSON-RPC error shape instead
//! of inventing their own.

use crate::jsonrpc::{JsonRpcError, JsonRpcErrorCode};

/// Result alias used throughout the memcortex crates.
pub type MemoryResult<T> = Result<T, MemoryError>;

/// The full error taxonomy.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum MemoryError {
    /// The underlying connection closed or a frame exceeded the configured
    /// size limit.
    #[error("transport error: {0}")]
    Transport(String),

    /// The payload did not parse, was missing required fields, or arrived
    /// in the wrong connection state.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No credential was accepted, or the caller lacks permission for the
    /// requested operation.
    #[error("authorization error: {message}")]
    Authorization {
        /// Human-readable detail.
        message: String,
    },

    /// The caller exceeded its rate-limit bucket.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimit {
        /// Seconds until the bucket is expected to admit another request.
        retry_after_secs: u64,
    },

    /// The request parameters failed validation.
    #[error("validation error: {field}: {message}")]
    Validation {
        /// The offending parameter name.
        field: String,
        /// Human-readable detail.
        message: String,
    },

    /// The requested chunk, tool, resource, or prompt does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation conflicts with existing state (e.g. double-init).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A storage or LLM provider collaborator failed.
    #[error("backend error: {0}")]
    Backend(String),

    /// The operation did not complete within its deadline.
    #[error("timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// The operation's context was cancelled before completion.
    #[error("cancelled")]
    Cancelled,

    /// An unexpected internal failure, including caught handler panics.
    #[error("internal error: {0}")]
    Internal(String),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MemoryError {
    /// Build an [`MemoryError::Authorization`] error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Authorization {
            message: message.into(),
        }
    }

    /// Build a [`MemoryError::Validation`] error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// The stable error code string used in the HTTP management error
    /// envelope (`§6`).
    pub fn code_str(&self) -> &'static str {
        match self {
            Self::Transport(_) => "SERVICE_UNAVAILABLE",
            Self::Protocol(_) => "BAD_REQUEST",
            Self::Authorization { .. } => "UNAUTHORIZED",
            Self::RateLimit { .. } => "RATE_LIMITED",
            Self::Validation { .. } => "VALIDATION_FAILED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "VERSION_MISMATCH",
            Self::Backend(_) => "INTERNAL_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Cancelled => "TIMEOUT",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Serialization(_) => "BAD_REQUEST",
        }
    }

    /// Whether retrying this error is sound for an idempotent operation
    /// (storage read, LLM call): only transient backend/timeout failures
    /// qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::Timeout(_))
    }
}

impl From<&MemoryError> for JsonRpcError {
    fn from(error: &MemoryError) -> Self {
        let code = match error {
            MemoryError::Protocol(_) | MemoryError::Serialization(_) => {
                JsonRpcErrorCode::InvalidRequest
            }
            MemoryError::Validation { .. } => JsonRpcErrorCode::InvalidParams,
            MemoryError::NotFound(_) => JsonRpcErrorCode::ApplicationError(-32001),
            MemoryError::Authorization { .. } => JsonRpcErrorCode::ApplicationError(-32003),
            MemoryError::RateLimit { .. } => JsonRpcErrorCode::RateLimited,
            MemoryError::Conflict(_) => JsonRpcErrorCode::InvalidRequest,
            MemoryError::Transport(_) => JsonRpcErrorCode::ApplicationError(-32005),
            MemoryError::Cancelled => JsonRpcErrorCode::ApplicationError(-32006),
            MemoryError::Backend(_) | MemoryError::Internal(_) => JsonRpcErrorCode::InternalError,
            MemoryError::Timeout(_) => JsonRpcErrorCode::ApplicationError(-32007),
        };

        let data = match error {
            MemoryError::Validation { field, .. } => {
                Some(serde_json::json!({ "field": field }))
            }
            MemoryError::RateLimit { retry_after_secs } => {
                Some(serde_json::json!({ "retry_after_seconds": retry_after_secs }))
            }
            _ => None,
        };

        Self {
            code: code.code(),
            message: error.to_string(),
            data,
        }
    }
}

impl From<MemoryError> for JsonRpcError {
    fn from(error: MemoryError) -> Self {
        Self::from(&error)
    }
}
