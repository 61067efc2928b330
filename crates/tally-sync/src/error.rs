//! Error types for tally-sync

use thiserror::Error;

/// Result type alias using tally-sync's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during a sync run
#[derive(Error, Debug)]
pub enum Error {
    /// Network or timeout failure; surfaced to the caller, never retried internally
    #[error("Transport error: {0}")]
    Transport(String),

    /// Expired or invalid credential, after the single post-refresh retry
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Malformed server payload; aborts only the affected page
    #[error("Decoding error: {0}")]
    Decoding(String),

    /// Duplicate server id, orphaned child, or similar consistency fault
    #[error("Sync invariant violation: {0}")]
    Invariant(String),

    /// Local write failure; aborts the run without advancing the cursor
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error aborts the whole family run. Anything else is
    /// isolated per record and accumulated into the partial-failure report.
    pub const fn aborts_run(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::Auth(_))
    }
}
