//! Chunked bulk delete

use tracing::{debug, info};

use crate::error::{Result, StorageError};
use crate::provider::RemoteProvider;

/// Deletes key lists in chunks of at most `batch_size` keys per provider call
#[derive(Debug, Clone, Copy)]
pub struct BatchDeleter {
    batch_size: usize,
}

impl BatchDeleter {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    /// Delete `keys` in list order, returning how many were deleted
    ///
    /// A failing chunk stops the run. Chunks before it stay deleted: the
    /// error is a `PartialBatchFailure` carrying that count, or a
    /// `TransferFailure` when nothing had been deleted yet.
    pub fn delete<P>(&self, provider: &P, prefix: &str, keys: &[String]) -> Result<usize>
    where
        P: RemoteProvider + ?Sized,
    {
        if keys.is_empty() {
            return Ok(0);
        }

        let chunk_size = self.batch_size.min(provider.max_delete_batch().max(1));
        let mut deleted = 0usize;

        for (index, chunk) in keys.chunks(chunk_size).enumerate() {
            if let Err(source) = provider.delete_objects(chunk) {
                return Err(if deleted == 0 {
                    StorageError::transfer(prefix, source)
                } else {
                    StorageError::PartialBatchFailure {
                        prefix: prefix.to_string(),
                        deleted,
                        source,
                    }
                });
            }
            deleted += chunk.len();
            debug!(prefix, batch = index, keys = chunk.len(), "Deleted batch");
        }

        info!(prefix, deleted, "Batch delete complete");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::provider::MemoryProvider;

    fn seeded(count: usize) -> (MemoryProvider, Vec<String>) {
        let provider = MemoryProvider::new("b");
        for i in 0..count {
            provider.insert(format!("tmp/{:05}", i), vec![1u8]);
        }
        let keys = provider.keys();
        (provider, keys)
    }

    #[test]
    fn test_chunks_follow_provider_cap() {
        let (provider, keys) = seeded(2500);
        let deleted = BatchDeleter::new(5000).delete(&provider, "tmp", &keys).unwrap();
        assert_eq!(deleted, 2500);
        assert_eq!(provider.stats().batch_delete_sizes, vec![1000, 1000, 500]);
        assert!(provider.is_empty());
    }

    #[test]
    fn test_configured_size_below_cap() {
        let (provider, keys) = seeded(7);
        BatchDeleter::new(3).delete(&provider, "tmp", &keys).unwrap();
        assert_eq!(provider.stats().batch_delete_sizes, vec![3, 3, 1]);
    }

    #[test]
    fn test_empty_makes_no_call() {
        let provider = MemoryProvider::new("b");
        assert_eq!(BatchDeleter::new(10).delete(&provider, "x", &[]).unwrap(), 0);
        assert!(provider.stats().batch_delete_sizes.is_empty());
    }

    #[test]
    fn test_later_chunk_failure_is_partial() {
        let (provider, keys) = seeded(25);
        provider.fail_batch_delete(2);

        let err = BatchDeleter::new(10).delete(&provider, "tmp", &keys).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PartialBatchFailure);
        match err {
            StorageError::PartialBatchFailure { deleted, .. } => assert_eq!(deleted, 20),
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(provider.len(), 5);
    }

    #[test]
    fn test_first_chunk_failure_is_transfer_failure() {
        let (provider, keys) = seeded(5);
        provider.fail_batch_delete(0);

        let err = BatchDeleter::new(10).delete(&provider, "tmp", &keys).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransferFailure);
        assert_eq!(provider.len(), 5);
    }
}
