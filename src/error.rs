//! Error types for the playback-dl library.

use thiserror::Error;

use crate::types::{ChannelId, PageNumber};

/// Errors that can occur while reconciling playback downloads.
#[derive(Error, Debug)]
pub enum Error {
    /// The remote device dropped the authenticated session.
    #[error("session expired on channel {channel} page {page}")]
    SessionExpired {
        /// Channel being processed when the loss was detected.
        channel: ChannelId,
        /// Page being processed when the loss was detected.
        page: PageNumber,
    },

    /// A batch did not reach completion within its budget.
    #[error("transfer timed out after {elapsed_secs}s on channel {channel} page {page}")]
    TransferTimeout {
        /// Channel of the batch.
        channel: ChannelId,
        /// Page of the batch.
        page: PageNumber,
        /// Seconds spent before giving up.
        elapsed_secs: u64,
    },

    /// Some items of a batch failed to transfer.
    #[error("partial failure: {success} succeeded, {failure} failed after {attempts} attempt(s)")]
    PartialFailure {
        /// Items the device reported as transferred.
        success: u32,
        /// Items the device reported as failed.
        failure: u32,
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// A landed item's name matches no known grammar.
    #[error("unparsable filename: {0}")]
    Unparsable(String),

    /// A landed item was empty.
    #[error("zero-byte transfer: {0}")]
    ZeroByteTransfer(String),

    /// The ledger could not be persisted.
    #[error("ledger I/O error: {0}")]
    LedgerIo(#[source] std::io::Error),

    /// A remote navigation step failed.
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// Login was rejected or could not be attempted.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// The run was interrupted.
    #[error("operation cancelled")]
    Cancelled,

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns true for failures that are contained at page or file scope.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::Authentication(_) | Self::Config(_) | Self::Cancelled
        )
    }
}

/// A specialized `Result` type for playback-dl operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abandonment_messages_carry_context() {
        let err = Error::TransferTimeout {
            channel: 3,
            page: 2,
            elapsed_secs: 600,
        };
        assert_eq!(
            err.to_string(),
            "transfer timed out after 600s on channel 3 page 2"
        );

        let err = Error::PartialFailure {
            success: 8,
            failure: 2,
            attempts: 3,
        };
        assert!(err.to_string().contains("2 failed after 3 attempt(s)"));
    }

    #[test]
    fn only_initialization_failures_are_fatal() {
        assert!(Error::Navigation("query".into()).is_recoverable());
        assert!(Error::SessionExpired { channel: 1, page: 1 }.is_recoverable());
        assert!(!Error::Authentication("denied".into()).is_recoverable());
        assert!(!Error::Cancelled.is_recoverable());
    }
}
