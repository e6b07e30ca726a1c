//! Error types for the table engine
//!
//! One `Error` enum covers the caller-visible taxonomy. Two conditions that
//! look like errors deliberately are not:
//!
//! - optimistic version-check failures never surface; the commit loop
//!   re-stages and retries, escalating to an exclusive transaction
//! - a put whose update-time is older than the stored record's is silently
//!   dropped (`PutOutcome::StaleDropped` in the engine), by design, for
//!   convergent multi-writer replication

use std::io;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the table engine
#[derive(Debug, Error)]
pub enum Error {
    /// Caller-visible, non-retryable: malformed search condition, unknown
    /// or unindexed attribute, or an attribute whose index is still
    /// backfilling. Raised before any write is staged.
    #[error("validation error: {0}")]
    Validation(String),

    /// Failure from a backing source during cache-miss resolution;
    /// propagated to the caller of `get`.
    #[error("source fetch failed: {0}")]
    SourceFetch(String),

    /// Failure from the underlying store; propagated unmodified. The
    /// optimistic commit loop retries version conflicts only, never these.
    #[error("storage error: {0}")]
    Storage(String),

    /// I/O error (file operations, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid operation or state
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl Error {
    /// Build a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    /// Whether this is a caller-facing validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}
