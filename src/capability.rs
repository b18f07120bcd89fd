//! The storage capability every provider connection supplies

use std::path::Path;

use crate::encoding::TextEncoding;
use crate::error::Result;
use crate::progress::{ByteProgressFn, ProgressFn};

/// Per-key and per-prefix operations on one remote bucket
///
/// Callers depend on this trait only; [`ProviderConnection`] implements it
/// for any [`RemoteProvider`].
///
/// [`ProviderConnection`]: crate::ProviderConnection
/// [`RemoteProvider`]: crate::provider::RemoteProvider
pub trait StorageCapability: Send + Sync {
    /// Upload one local file to `key`
    ///
    /// Fails with `LocalNotFound` when `local_path` is missing or not a
    /// regular file.
    fn upload(&self, local_path: &Path, key: &str) -> Result<()> {
        self.upload_with_progress(local_path, key, None)
    }

    /// Download `key` to `local_path`, creating parent directories
    ///
    /// Fails with `RemoteNotFound` when the key is absent and with
    /// `LocalNotFound` when the parent directory cannot be created.
    fn download(&self, key: &str, local_path: &Path) -> Result<()> {
        self.download_with_progress(key, local_path, None)
    }

    /// [`upload`](Self::upload), reporting bytes sent so far
    fn upload_with_progress(
        &self,
        local_path: &Path,
        key: &str,
        on_bytes: Option<&ByteProgressFn>,
    ) -> Result<()>;

    /// [`download`](Self::download), reporting bytes received so far
    fn download_with_progress(
        &self,
        key: &str,
        local_path: &Path,
        on_bytes: Option<&ByteProgressFn>,
    ) -> Result<()>;

    /// Read `key` as text; `None` uses the configured default encoding
    fn read_text(&self, key: &str, encoding: Option<TextEncoding>) -> Result<String>;

    /// Store `text` under `key`; `None` uses the configured default encoding
    fn write_text(&self, key: &str, text: &str, encoding: Option<TextEncoding>) -> Result<()>;

    /// Keys starting with `prefix`, at most `max_keys` when given
    fn list(&self, prefix: &str, max_keys: Option<usize>) -> Result<Vec<String>>;

    /// Delete `key`; with `ignore_missing`, an absent key is not an error
    fn delete(&self, key: &str, ignore_missing: bool) -> Result<()>;

    /// Whether `key` exists; absence is `Ok(false)`, never an error
    fn exists(&self, key: &str) -> Result<bool>;

    /// Size of `key` in bytes
    fn get_size(&self, key: &str) -> Result<u64>;

    /// Upload every file under `local_dir` to `prefix/<relative path>`
    fn upload_folder(
        &self,
        local_dir: &Path,
        prefix: &str,
        parallel: bool,
        on_progress: Option<&ProgressFn>,
    ) -> Result<()>;

    /// Download every key under `prefix` into `local_dir`
    fn download_folder(
        &self,
        prefix: &str,
        local_dir: &Path,
        parallel: bool,
        on_progress: Option<&ProgressFn>,
    ) -> Result<()>;

    /// Delete every key under `prefix`, returning how many were deleted
    fn delete_folder(&self, prefix: &str) -> Result<usize>;
}
