//! Custom error types for staging-queue operations.

use thiserror::Error;

/// Result type alias for staging operations
pub type Result<T> = std::result::Result<T, StageError>;

/// Error type for staging operations
#[derive(Error, Debug)]
pub enum StageError {
    /// Invalid parameter value provided
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// The parameter name
        parameter: String,
        /// Explanation of why it's invalid
        reason: String,
    },

    /// A queue block chain failed an integrity check
    #[error("Corrupt queue bucket {radix} at offset {offset}: {reason}")]
    QueueCorrupt {
        /// The radix of the bucket whose chain is damaged
        radix: usize,
        /// Store offset of the offending word
        offset: usize,
        /// Explanation of the inconsistency
        reason: String,
    },

    /// The target index failed while records were being drained into it
    #[error("Drain pass failed: {source}")]
    Drain {
        /// The underlying index error
        source: anyhow::Error,
    },
}

impl StageError {
    /// Shorthand for an [`StageError::InvalidParameter`] with owned strings.
    pub(crate) fn invalid(parameter: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter { parameter: parameter.to_string(), reason: reason.into() }
    }
}
