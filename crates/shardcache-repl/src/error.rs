//! Error types for the replication subsystem.

use crate::object::ResourceIdentity;
use thiserror::Error;

/// Errors that can occur in the replication subsystem.
#[derive(Debug, Error)]
pub enum ReplError {
    /// The addressed object does not exist in the store.
    #[error("not found: {identity}")]
    NotFound {
        /// Identity that was looked up.
        identity: ResourceIdentity,
    },

    /// An object with the same identity already exists.
    #[error("already exists: {identity}")]
    AlreadyExists {
        /// Identity of the existing object.
        identity: ResourceIdentity,
    },

    /// Optimistic concurrency precondition failed.
    #[error("conflict on {identity}: expected resource version {expected}, found {actual}")]
    Conflict {
        /// Identity of the contended object.
        identity: ResourceIdentity,
        /// Resource version supplied by the caller.
        expected: String,
        /// Resource version currently held by the store.
        actual: String,
    },

    /// Connectivity or throttling failure; the call may succeed later.
    #[error("transient store error: {msg}")]
    Transient {
        /// Error message describing the failure.
        msg: String,
    },

    /// The store rejected the object (malformed, schema violation, bad routing).
    #[error("invalid object: {msg}")]
    Invalid {
        /// Error message describing the rejection.
        msg: String,
    },

    /// Configuration could not be loaded or failed validation.
    #[error("config error: {msg}")]
    Config {
        /// Error message describing the problem.
        msg: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    /// The controller was shut down while the operation was in flight.
    #[error("replication controller shut down")]
    Shutdown,
}

impl ReplError {
    /// Returns true if the scheduler should retry the identity with backoff.
    ///
    /// Permanent rejections are retried too (they may be fixed upstream),
    /// so only shutdown stops a retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Shutdown)
    }

    /// Returns true for failures that cannot succeed until the object itself changes.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Invalid { .. } | Self::Json(_) | Self::Config { .. })
    }

    /// Returns true for the optimistic concurrency failure.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns true if the object is missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Short, stable label used in logs and metrics.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::AlreadyExists { .. } => "already_exists",
            Self::Conflict { .. } => "conflict",
            Self::Transient { .. } => "transient",
            Self::Invalid { .. } => "invalid",
            Self::Config { .. } => "config",
            Self::Json(_) => "json",
            Self::Io(_) => "io",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, ReplError>;
