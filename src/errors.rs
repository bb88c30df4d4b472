//! Error types for the transfer engine.

use thiserror::Error;

/// Main error type for orchestrator and configuration operations.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Source path does not exist: {0}")]
    SourceNotFound(String),

    #[error("Destination path does not exist: {0}")]
    DestinationNotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("Transfer in progress: {0}")]
    Busy(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Outcome of a failed byte copy.
///
/// `Cancelled` is the only variant the orchestrator treats as batch-level;
/// everything else is isolated to the file being copied.
#[derive(Error, Debug)]
pub enum CopyError {
    #[error("Transfer cancelled: {0}")]
    Cancelled(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Hash verification failed for file: {0}")]
    HashMismatch(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CopyError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CopyError::Cancelled(_))
    }
}

/// Errors raised while reading or flushing a manifest journal.
#[derive(Error, Debug)]
pub enum JournalError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Journal writer stopped before the write completed")]
    WriterClosed,
}

macro_rules! serialize_as_display {
    ($($ty:ty),*) => {
        $(
            impl serde::Serialize for $ty {
                fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
                where
                    S: serde::Serializer,
                {
                    serializer.serialize_str(&self.to_string())
                }
            }
        )*
    };
}

serialize_as_display!(TransferError, CopyError, JournalError);

/// Result type alias for orchestrator operations.
pub type TransferResult<T> = Result<T, TransferError>;

/// Result type alias for journal operations.
pub type JournalResult<T> = Result<T, JournalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_is_distinguished() {
        assert!(CopyError::Cancelled("user".into()).is_cancelled());
        assert!(!CopyError::HashMismatch("a.mp4".into()).is_cancelled());
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert!(!CopyError::from(io).is_cancelled());
    }

    #[test]
    fn test_errors_serialize_as_message() {
        let err = TransferError::SourceNotFound("/Volumes/CARD".into());
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, "\"Source path does not exist: /Volumes/CARD\"");

        let err = TransferError::from(JournalError::WriterClosed);
        assert!(err.to_string().starts_with("Journal error:"));
    }
}
