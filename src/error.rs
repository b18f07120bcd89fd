/*!
 * Error types for orbit-bucket
 */

use std::error::Error as StdError;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::provider::ProviderError;

pub type Result<T> = std::result::Result<T, StorageError>;

/// Boxed cause carried by [`StorageError::TransferFailure`]
pub type BoxedCause = Box<dyn StdError + Send + Sync + 'static>;

/// Coarse classification callers can branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Local file or directory missing, or of the wrong type
    LocalNotFound,

    /// Object key absent on the provider
    RemoteNotFound,

    /// Reachability probe failed while building a connection
    ConnectionFailure,

    /// A single transfer or provider call failed
    TransferFailure,

    /// A batch-delete chunk failed after earlier chunks were deleted
    PartialBatchFailure,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Local path not found: {} ({reason})", path.display())]
    LocalNotFound { path: PathBuf, reason: String },

    #[error("Remote object not found: {bucket}/{key}")]
    RemoteNotFound { bucket: String, key: String },

    #[error("Connection to {provider} bucket '{bucket}' failed: {source}")]
    ConnectionFailure {
        provider: String,
        bucket: String,
        #[source]
        source: ProviderError,
    },

    #[error("Transfer failed for {path}: {source}")]
    TransferFailure {
        path: String,
        #[source]
        source: BoxedCause,
    },

    #[error("Batch delete under '{prefix}' failed after {deleted} objects were deleted: {source}")]
    PartialBatchFailure {
        prefix: String,
        deleted: usize,
        #[source]
        source: ProviderError,
    },
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::LocalNotFound { .. } => ErrorKind::LocalNotFound,
            StorageError::RemoteNotFound { .. } => ErrorKind::RemoteNotFound,
            StorageError::ConnectionFailure { .. } => ErrorKind::ConnectionFailure,
            StorageError::TransferFailure { .. } => ErrorKind::TransferFailure,
            StorageError::PartialBatchFailure { .. } => ErrorKind::PartialBatchFailure,
        }
    }

    pub(crate) fn local_not_found(path: &Path, reason: impl Into<String>) -> Self {
        StorageError::LocalNotFound {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Wrap any cause as a failure attributed to `path` (a local path or a key)
    pub(crate) fn transfer<E>(path: impl Into<String>, source: E) -> Self
    where
        E: Into<BoxedCause>,
    {
        StorageError::TransferFailure {
            path: path.into(),
            source: source.into(),
        }
    }

    pub(crate) fn invalid_data(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::transfer(
            path,
            io::Error::new(io::ErrorKind::InvalidData, message.into()),
        )
    }

    /// The local path or object key the error is attributed to, if any
    pub fn path(&self) -> Option<String> {
        match self {
            StorageError::LocalNotFound { path, .. } => Some(path.display().to_string()),
            StorageError::RemoteNotFound { key, .. } => Some(key.clone()),
            StorageError::TransferFailure { path, .. } => Some(path.clone()),
            StorageError::PartialBatchFailure { prefix, .. } => Some(prefix.clone()),
            StorageError::ConnectionFailure { .. } => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::LocalNotFound | ErrorKind::RemoteNotFound
        )
    }

    /// Connection failures are never retried
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::ConnectionFailure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let err = StorageError::local_not_found(Path::new("/missing"), "no such file");
        assert_eq!(err.kind(), ErrorKind::LocalNotFound);
        assert!(err.is_not_found());

        let err = StorageError::RemoteNotFound {
            bucket: "b".to_string(),
            key: "k".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::RemoteNotFound);
        assert_eq!(err.path().as_deref(), Some("k"));

        let err = StorageError::ConnectionFailure {
            provider: "memory".to_string(),
            bucket: "b".to_string(),
            source: ProviderError::BucketNotFound("b".to_string()),
        };
        assert_eq!(err.kind(), ErrorKind::ConnectionFailure);
        assert!(err.is_fatal());
        assert!(err.path().is_none());
    }

    #[test]
    fn test_transfer_failure_keeps_cause() {
        let err = StorageError::transfer(
            "data/a.txt",
            ProviderError::Network("connection reset".to_string()),
        );
        assert_eq!(err.kind(), ErrorKind::TransferFailure);
        assert!(!err.is_fatal());

        let cause = err.source().map(|s| s.to_string()).unwrap_or_default();
        assert_eq!(cause, "Network error: connection reset");
        assert_eq!(
            err.to_string(),
            "Transfer failed for data/a.txt: Network error: connection reset"
        );
    }

    #[test]
    fn test_partial_batch_display() {
        let err = StorageError::PartialBatchFailure {
            prefix: "logs".to_string(),
            deleted: 1000,
            source: ProviderError::Service {
                code: "InternalError".to_string(),
                message: "try again".to_string(),
            },
        };
        assert_eq!(err.kind(), ErrorKind::PartialBatchFailure);
        assert_eq!(
            err.to_string(),
            "Batch delete under 'logs' failed after 1000 objects were deleted: \
             Provider service error (InternalError): try again"
        );
    }

    #[test]
    fn test_invalid_data_is_transfer_failure() {
        let err = StorageError::invalid_data("notes.txt", "not valid utf-8");
        assert_eq!(err.kind(), ErrorKind::TransferFailure);
        assert!(err.to_string().contains("not valid utf-8"));
    }
}
