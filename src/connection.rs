/*!
 * Provider connection: one bucket binding implementing the storage capability
 */

use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn, Dispatch};

use crate::batch::BatchDeleter;
use crate::capability::StorageCapability;
use crate::config::TransferConfig;
use crate::encoding::TextEncoding;
use crate::error::{Result, StorageError};
use crate::listing::list_keys;
use crate::manifest::ManifestBuilder;
use crate::progress::{ByteProgressFn, CountingReader, CountingWriter, ProgressFn};
use crate::provider::{ProviderError, RemoteProvider};
use crate::scheduler::TransferScheduler;

const STAGING_PREFIX: &str = ".orbit-bucket-";

struct Inner<P> {
    provider: P,
    config: TransferConfig,
    logger: Dispatch,
}

/// A reachable bucket
///
/// Construction probes the bucket and fails atomically, so holding a
/// connection means the probe passed. Clones share the provider and can be
/// moved to other threads.
pub struct ProviderConnection<P: RemoteProvider + 'static> {
    inner: Arc<Inner<P>>,
}

impl<P: RemoteProvider + 'static> Clone for ProviderConnection<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: RemoteProvider + 'static> fmt::Debug for ProviderConnection<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConnection")
            .field("provider", &self.inner.provider.name())
            .field("bucket", &self.inner.provider.bucket())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl<P: RemoteProvider + 'static> ProviderConnection<P> {
    /// Connect, logging to the dispatcher current on the calling thread
    pub fn connect(provider: P, config: TransferConfig) -> Result<Self> {
        let logger = tracing::dispatcher::get_default(|current| current.clone());
        Self::connect_with_logger(provider, config, logger)
    }

    /// Connect, running every operation of this connection under `logger`
    pub fn connect_with_logger(
        provider: P,
        config: TransferConfig,
        logger: Dispatch,
    ) -> Result<Self> {
        tracing::dispatcher::with_default(&logger, || {
            if let Err(source) = provider.head_bucket() {
                warn!(
                    provider = provider.name(),
                    bucket = provider.bucket(),
                    error = %source,
                    "Bucket probe failed"
                );
                return Err(StorageError::ConnectionFailure {
                    provider: provider.name().to_string(),
                    bucket: provider.bucket().to_string(),
                    source,
                });
            }
            info!(
                provider = provider.name(),
                bucket = provider.bucket(),
                "Connected"
            );
            Ok(())
        })?;

        Ok(Self {
            inner: Arc::new(Inner {
                provider,
                config,
                logger,
            }),
        })
    }

    pub fn provider(&self) -> &P {
        &self.inner.provider
    }

    pub fn bucket(&self) -> &str {
        self.inner.provider.bucket()
    }

    pub fn config(&self) -> &TransferConfig {
        &self.inner.config
    }

    fn in_context<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.inner.logger, f)
    }

    fn scheduler(&self) -> TransferScheduler {
        TransferScheduler::new(self.inner.config.effective_workers())
            .with_abort_pending(self.inner.config.abort_pending_on_failure)
            .with_logger(self.inner.logger.clone())
    }

    /// Wrap a provider error for `key`, keeping "absent" distinguishable
    fn remote_error(&self, key: &str, err: ProviderError) -> StorageError {
        if err.is_not_found() {
            StorageError::RemoteNotFound {
                bucket: self.bucket().to_string(),
                key: key.to_string(),
            }
        } else {
            StorageError::transfer(key, err)
        }
    }

    fn fetch(&self, key: &str) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        self.inner
            .provider
            .get_object(key, &mut data)
            .map_err(|e| self.remote_error(key, e))?;
        Ok(data)
    }
}

fn local_display(path: &Path) -> String {
    path.display().to_string()
}

impl<P: RemoteProvider + 'static> StorageCapability for ProviderConnection<P> {
    fn upload_with_progress(
        &self,
        local_path: &Path,
        key: &str,
        on_bytes: Option<&ByteProgressFn>,
    ) -> Result<()> {
        self.in_context(|| {
            let metadata = match fs::metadata(local_path) {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => {
                    return Err(StorageError::local_not_found(
                        local_path,
                        "not a regular file",
                    ))
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(StorageError::local_not_found(local_path, e.to_string()))
                }
                Err(e) => return Err(StorageError::transfer(local_display(local_path), e)),
            };

            let file = File::open(local_path)
                .map_err(|e| StorageError::transfer(local_display(local_path), e))?;
            let mut reader = CountingReader::new(file, on_bytes);
            self.inner
                .provider
                .put_object(key, &mut reader, metadata.len())
                .map_err(|e| StorageError::transfer(local_display(local_path), e))?;

            debug!(local = %local_path.display(), key, bytes = reader.count(), "Uploaded");
            Ok(())
        })
    }

    fn download_with_progress(
        &self,
        key: &str,
        local_path: &Path,
        on_bytes: Option<&ByteProgressFn>,
    ) -> Result<()> {
        self.in_context(|| {
            if local_path.is_dir() {
                return Err(StorageError::local_not_found(
                    local_path,
                    "target is a directory",
                ));
            }
            let parent = local_path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            fs::create_dir_all(parent)
                .map_err(|e| StorageError::local_not_found(parent, e.to_string()))?;

            // Stage next to the target so the final rename stays on one filesystem
            let mut staged = tempfile::Builder::new()
                .prefix(STAGING_PREFIX)
                .tempfile_in(parent)
                .map_err(|e| StorageError::transfer(local_display(local_path), e))?;

            let mut writer = CountingWriter::new(&mut staged, on_bytes);
            let bytes = self
                .inner
                .provider
                .get_object(key, &mut writer)
                .map_err(|e| self.remote_error(key, e))?;

            staged
                .persist(local_path)
                .map_err(|e| StorageError::transfer(local_display(local_path), e.error))?;

            debug!(key, local = %local_path.display(), bytes, "Downloaded");
            Ok(())
        })
    }

    fn read_text(&self, key: &str, encoding: Option<TextEncoding>) -> Result<String> {
        self.in_context(|| {
            let encoding = encoding.unwrap_or(self.inner.config.default_encoding);
            let data = self.fetch(key)?;
            encoding
                .decode(&data)
                .map_err(|message| StorageError::invalid_data(key, message))
        })
    }

    fn write_text(&self, key: &str, text: &str, encoding: Option<TextEncoding>) -> Result<()> {
        self.in_context(|| {
            let encoding = encoding.unwrap_or(self.inner.config.default_encoding);
            let data = encoding
                .encode(text)
                .map_err(|message| StorageError::invalid_data(key, message))?;
            self.inner
                .provider
                .put_object(key, &mut data.as_slice(), data.len() as u64)
                .map_err(|e| StorageError::transfer(key, e))?;
            debug!(key, %encoding, bytes = data.len(), "Wrote text object");
            Ok(())
        })
    }

    fn list(&self, prefix: &str, max_keys: Option<usize>) -> Result<Vec<String>> {
        self.in_context(|| {
            list_keys(
                &self.inner.provider,
                prefix,
                max_keys,
                self.inner.config.page_size,
            )
            .map_err(|e| StorageError::transfer(prefix, e))
        })
    }

    fn delete(&self, key: &str, ignore_missing: bool) -> Result<()> {
        self.in_context(|| match self.inner.provider.delete_object(key) {
            Ok(()) => {
                debug!(key, "Deleted");
                Ok(())
            }
            Err(e) if e.is_not_found() && ignore_missing => {
                debug!(key, "Delete of missing key ignored");
                Ok(())
            }
            Err(e) => Err(self.remote_error(key, e)),
        })
    }

    fn exists(&self, key: &str) -> Result<bool> {
        self.in_context(|| match self.inner.provider.head_object(key) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(StorageError::transfer(key, e)),
        })
    }

    fn get_size(&self, key: &str) -> Result<u64> {
        self.in_context(|| {
            self.inner
                .provider
                .head_object(key)
                .map(|head| head.size)
                .map_err(|e| self.remote_error(key, e))
        })
    }

    fn upload_folder(
        &self,
        local_dir: &Path,
        prefix: &str,
        parallel: bool,
        on_progress: Option<&ProgressFn>,
    ) -> Result<()> {
        self.in_context(|| {
            let manifest = ManifestBuilder::for_upload(local_dir, prefix)?;
            info!(
                local = %local_dir.display(),
                prefix,
                files = manifest.len(),
                parallel,
                "Uploading folder"
            );

            let connection = self.clone();
            let uploaded = self.scheduler().run(manifest, parallel, on_progress, move |item| {
                connection.upload(item.local_path(), item.key())
            })?;

            info!(prefix, uploaded, "Folder upload complete");
            Ok(())
        })
    }

    fn download_folder(
        &self,
        prefix: &str,
        local_dir: &Path,
        parallel: bool,
        on_progress: Option<&ProgressFn>,
    ) -> Result<()> {
        self.in_context(|| {
            fs::create_dir_all(local_dir)
                .map_err(|e| StorageError::local_not_found(local_dir, e.to_string()))?;
            let keys = self.list(prefix, None)?;

            let manifest = ManifestBuilder::for_download(&keys, prefix, local_dir);
            info!(
                prefix,
                local = %local_dir.display(),
                objects = manifest.len(),
                parallel,
                "Downloading folder"
            );

            let connection = self.clone();
            let downloaded = self.scheduler().run(manifest, parallel, on_progress, move |item| {
                connection.download(item.key(), item.local_path())
            })?;

            info!(prefix, downloaded, "Folder download complete");
            Ok(())
        })
    }

    fn delete_folder(&self, prefix: &str) -> Result<usize> {
        self.in_context(|| {
            let keys = self.list(prefix, None)?;
            if keys.is_empty() {
                debug!(prefix, "Nothing to delete");
                return Ok(0);
            }
            BatchDeleter::new(self.inner.config.delete_batch_size).delete(
                &self.inner.provider,
                prefix,
                &keys,
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LogLevel, LoggingConfig};
    use crate::error::ErrorKind;
    use crate::logging::build_dispatch;
    use crate::provider::MemoryProvider;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn connect(provider: &MemoryProvider) -> ProviderConnection<MemoryProvider> {
        ProviderConnection::connect(provider.clone(), TransferConfig::default()).unwrap()
    }

    #[test]
    fn test_probe_failure_is_connection_failure() {
        let provider = MemoryProvider::new("gone");
        provider.set_bucket_missing(true);
        let err = ProviderConnection::connect(provider, TransferConfig::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionFailure);
        assert!(err.is_fatal());
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn test_upload_missing_file_makes_no_provider_call() {
        let provider = MemoryProvider::new("b");
        let connection = connect(&provider);
        let err = connection
            .upload(Path::new("/no/such/file.txt"), "k")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LocalNotFound);
        assert_eq!(provider.stats().put_calls, 0);
    }

    #[test]
    fn test_upload_directory_is_local_not_found() {
        let temp = TempDir::new().unwrap();
        let connection = connect(&MemoryProvider::new("b"));
        let err = connection.upload(temp.path(), "k").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LocalNotFound);
    }

    #[test]
    fn test_download_missing_key_leaves_no_file() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("out/file.bin");
        let connection = connect(&MemoryProvider::new("b"));

        let err = connection.download("absent", &target).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RemoteNotFound);
        assert!(!target.exists());
        assert_eq!(fs::read_dir(temp.path().join("out")).unwrap().count(), 0);
    }

    #[test]
    fn test_byte_progress_reports_full_size() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("big.bin");
        fs::write(&source, vec![9u8; 100_000]).unwrap();
        let provider = MemoryProvider::new("b");
        let connection = connect(&provider);

        let last = Arc::new(Mutex::new(0u64));
        let sink = Arc::clone(&last);
        let on_bytes = move |bytes: u64| *sink.lock().unwrap() = bytes;

        connection
            .upload_with_progress(&source, "big.bin", Some(&on_bytes))
            .unwrap();
        assert_eq!(*last.lock().unwrap(), 100_000);

        *last.lock().unwrap() = 0;
        connection
            .download_with_progress("big.bin", &temp.path().join("copy.bin"), Some(&on_bytes))
            .unwrap();
        assert_eq!(*last.lock().unwrap(), 100_000);
    }

    #[test]
    fn test_default_encoding_from_config() {
        let provider = MemoryProvider::new("b");
        let config = TransferConfig {
            default_encoding: TextEncoding::Utf16Le,
            ..Default::default()
        };
        let connection = ProviderConnection::connect(provider.clone(), config).unwrap();

        connection.write_text("note.txt", "hi", None).unwrap();
        assert_eq!(provider.get("note.txt").unwrap(), vec![b'h', 0, b'i', 0]);
        assert_eq!(connection.read_text("note.txt", None).unwrap(), "hi");
    }

    #[test]
    fn test_injected_logger_reaches_workers() {
        let temp = TempDir::new().unwrap();
        let log_path = temp.path().join("engine.log");
        let logger = build_dispatch(&LoggingConfig {
            level: LogLevel::Debug,
            log_file: Some(log_path.clone()),
            json: true,
        })
        .unwrap();

        let source = temp.path().join("src");
        fs::create_dir(&source).unwrap();
        for name in ["a.txt", "b.txt", "c.txt"] {
            fs::write(source.join(name), name).unwrap();
        }

        let connection = ProviderConnection::connect_with_logger(
            MemoryProvider::new("b"),
            TransferConfig::default(),
            logger,
        )
        .unwrap();
        connection.upload_folder(&source, "logs", true, None).unwrap();

        let contents = fs::read_to_string(&log_path).unwrap();
        assert!(contents.contains("Connected"));
        assert!(contents.contains("Folder upload complete"));
        assert!(contents.contains("orbit-bucket-worker-"));
    }
}
