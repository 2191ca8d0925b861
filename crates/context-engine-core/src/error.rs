//! Error taxonomy shared by every Context Engine component.
//!
//! The variants map one-to-one onto the failure kinds callers need to
//! tell apart: validation problems are rejected before any mutation,
//! locked layers always fail loudly, and storage failures are never
//! downgraded to log lines.

use std::time::Duration;

use thiserror::Error;

/// Boxed backend error carried by [`Error::Storage`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for Context Engine operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A bitmap member lies outside the bitmap's `[min, max]` range.
    #[error("value {value} outside range [{min}, {max}] of bitmap '{key}'")]
    Range {
        key: String,
        value: u32,
        min: u32,
        max: u32,
    },

    /// Malformed input: document shape, layer options, url or path syntax.
    #[error("invalid {what}: {message}")]
    Validation { what: &'static str, message: String },

    /// The target of an operation that expects it to exist is missing.
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    /// Mutation attempted on a locked layer.
    #[error("layer is locked: {name}")]
    Locked { name: String },

    /// A uniqueness rule would be violated.
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// Declared in the interface but deliberately not implemented.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    /// Stored bytes could not be decoded.
    #[error("corrupt {what}: {message}")]
    Corrupt { what: &'static str, message: String },

    /// A backend call exceeded its time bound.
    #[error("storage call timed out after {0:?}")]
    Timeout(Duration),

    /// The storage backend failed to read or write.
    #[error("storage backend failure: {0}")]
    Storage(#[source] BoxError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn validation(what: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            what,
            message: message.into(),
        }
    }

    pub fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            key: key.into(),
        }
    }

    pub fn locked(name: impl Into<String>) -> Self {
        Self::Locked { name: name.into() }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn corrupt(what: &'static str, message: impl Into<String>) -> Self {
        Self::Corrupt {
            what,
            message: message.into(),
        }
    }

    pub fn storage(err: impl Into<BoxError>) -> Self {
        Self::Storage(err.into())
    }

    /// Whether retrying the same call may succeed.
    ///
    /// Ticks are idempotent per member, so retrying a bitmap mutation
    /// after a storage failure or timeout is always safe.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Storage(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result type alias for Context Engine operations.
pub type Result<T> = std::result::Result<T, Error>;
