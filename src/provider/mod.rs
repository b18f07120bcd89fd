//! Remote provider capability
//!
//! A [`RemoteProvider`] is the thin, single-object call surface of one vendor
//! bucket: put/get/head, one page of a prefix listing, single and batch
//! delete, and a bucket reachability probe. Everything bulk (pagination
//! loops, folder mapping, worker pools, chunked deletes) lives above this
//! trait in the engine, so a new vendor only has to supply these calls.
//!
//! # Bindings
//!
//! - [`MemoryProvider`]: in-process bucket with instrumentation and fault
//!   injection
//! - [`LocalDirProvider`]: a directory on disk acting as a bucket
//! - `S3Provider` (feature `s3-native`): AWS S3 and S3-compatible services

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use std::fmt;
use std::io::{self, Read, Write};
use thiserror::Error;

mod local;
mod memory;

#[cfg(feature = "s3-native")]
mod s3;

pub use local::LocalDirProvider;
pub use memory::{MemoryProvider, ProviderStats};

#[cfg(feature = "s3-native")]
pub use s3::{S3Config, S3Provider};

/// Hard per-call cap on listed keys and batch-deleted keys used by S3
pub const DEFAULT_PROVIDER_CAP: usize = 1000;

/// Result type alias for provider calls
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Errors reported by a provider binding
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Object key absent
    #[error("Object not found: {key}")]
    NotFound { key: String },

    /// Bucket missing or not reachable
    #[error("Bucket not found or not accessible: {0}")]
    BucketNotFound(String),

    /// Credentials rejected or insufficient permissions
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Key the provider cannot address
    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    /// Transport-level failure
    #[error("Network error: {0}")]
    Network(String),

    /// Provider service error with vendor error code
    #[error("Provider service error ({code}): {message}")]
    Service { code: String, message: String },

    /// Local I/O while streaming a body
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProviderError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound { .. })
    }

    pub fn not_found(key: &str) -> Self {
        ProviderError::NotFound {
            key: key.to_string(),
        }
    }
}

/// Opaque continuation token returned by a provider for a truncated listing
///
/// Only the provider that issued a cursor knows how to read it; the listing
/// loop only checks whether one came back.
#[derive(Clone, PartialEq, Eq)]
pub struct PaginationCursor(String);

impl PaginationCursor {
    pub fn new(token: impl Into<String>) -> Self {
        PaginationCursor(token.into())
    }

    /// Raw token, for the issuing provider
    pub fn token(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PaginationCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PaginationCursor(..)")
    }
}

/// One page of a prefix listing
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Keys in provider order
    pub keys: Vec<String>,

    /// Present when more keys remain
    pub next: Option<PaginationCursor>,
}

/// Object metadata from a head call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHead {
    pub key: String,
    pub size: u64,
}

/// Single-object call surface of one remote bucket
///
/// Implementors must be `Send + Sync`: one provider is shared by every worker
/// of a bulk transfer and receives concurrent calls.
pub trait RemoteProvider: Send + Sync {
    /// Short binding name for logs and errors (e.g. "memory", "s3")
    fn name(&self) -> &str;

    /// Bucket (or container) this provider is bound to
    fn bucket(&self) -> &str;

    /// Probe that the bucket exists and the credentials can reach it
    fn head_bucket(&self) -> ProviderResult<()>;

    /// Store `body` (of `content_length` bytes) under `key`, replacing any existing object
    fn put_object(&self, key: &str, body: &mut dyn Read, content_length: u64)
        -> ProviderResult<()>;

    /// Stream the object at `key` into `sink`, returning the bytes written
    fn get_object(&self, key: &str, sink: &mut dyn Write) -> ProviderResult<u64>;

    /// Metadata for `key`; `ProviderError::NotFound` when absent
    fn head_object(&self, key: &str) -> ProviderResult<ObjectHead>;

    /// One listing page of at most `max_keys` keys starting with `prefix`
    fn list_page(
        &self,
        prefix: &str,
        cursor: Option<&PaginationCursor>,
        max_keys: usize,
    ) -> ProviderResult<ListPage>;

    /// Delete a single object
    ///
    /// Providers that can tell a missing key apart return
    /// `ProviderError::NotFound`; the others succeed.
    fn delete_object(&self, key: &str) -> ProviderResult<()>;

    /// Delete up to [`max_delete_batch`](Self::max_delete_batch) keys in one call
    fn delete_objects(&self, keys: &[String]) -> ProviderResult<()>;

    /// Per-call cap on listed keys
    fn max_page_size(&self) -> usize {
        DEFAULT_PROVIDER_CAP
    }

    /// Per-call cap on batch-deleted keys
    fn max_delete_batch(&self) -> usize {
        DEFAULT_PROVIDER_CAP
    }
}

/// Split a `/`-separated key into path segments, rejecting traversal
pub(crate) fn key_segments(key: &str) -> ProviderResult<Vec<&str>> {
    let segments: Vec<&str> = key.split('/').collect();
    if key.is_empty()
        || segments
            .iter()
            .any(|s| s.is_empty() || *s == "." || *s == "..")
    {
        return Err(ProviderError::InvalidKey(key.to_string()));
    }
    Ok(segments)
}

/// Cursor for providers that resume a sorted listing after the last key served
pub(crate) fn encode_start_after(last_key: &str) -> PaginationCursor {
    PaginationCursor::new(URL_SAFE_NO_PAD.encode(last_key.as_bytes()))
}

pub(crate) fn decode_start_after(cursor: &PaginationCursor) -> ProviderResult<String> {
    URL_SAFE_NO_PAD
        .decode(cursor.token())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| ProviderError::Service {
            code: "InvalidArgument".to_string(),
            message: "The continuation token provided is incorrect".to_string(),
        })
}
