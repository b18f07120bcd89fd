/*!
 * orbit-bucket - bulk object-storage transfer engine
 *
 * Moves directory trees to and from object-storage buckets:
 * - Concurrent folder upload/download over a bounded worker pool
 * - Paginated prefix listing with an optional key cap
 * - Chunked batch deletion of whole prefixes
 * - Pluggable providers (in-memory, local directory, S3 behind `s3-native`)
 * - Injected `tracing` dispatcher, TOML configuration
 *
 * ```no_run
 * use orbit_bucket::{
 *     EngineConfig, LocalDirProvider, ProviderConnection, StorageCapability,
 * };
 * use std::path::Path;
 *
 * # fn main() -> Result<(), Box<dyn std::error::Error>> {
 * let config = EngineConfig::default();
 * let bucket = LocalDirProvider::new("/srv/buckets/backups");
 * let connection = ProviderConnection::connect(bucket, config.transfer)?;
 *
 * connection.upload_folder(Path::new("./reports"), "2024/reports", true, None)?;
 * let keys = connection.list("2024/", Some(100))?;
 * println!("{} objects", keys.len());
 * # Ok(())
 * # }
 * ```
 */

pub mod batch;
pub mod capability;
pub mod config;
pub mod connection;
pub mod encoding;
pub mod error;
pub mod listing;
pub mod logging;
pub mod manifest;
pub mod progress;
pub mod provider;
pub mod scheduler;

mod pool;

// Re-export commonly used types
pub use capability::StorageCapability;
pub use config::{ConfigError, EngineConfig, LogLevel, LoggingConfig, TransferConfig};
pub use connection::ProviderConnection;
pub use encoding::TextEncoding;
pub use error::{ErrorKind, Result, StorageError};
pub use manifest::{Direction, ManifestBuilder, TransferItem, TransferManifest};
pub use progress::{progress_bar_callback, ByteProgressFn, ProgressFn};
pub use provider::{
    LocalDirProvider, MemoryProvider, PaginationCursor, ProviderError, RemoteProvider,
};
pub use scheduler::TransferScheduler;

#[cfg(feature = "s3-native")]
pub use provider::{S3Config, S3Provider};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
