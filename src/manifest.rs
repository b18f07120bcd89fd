/*!
 * Transfer manifests: mapping between a local directory tree and a key prefix
 */

use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

use crate::error::{Result, StorageError};

/// Which way an item moves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

/// One planned object transfer
///
/// Fields are fixed at construction; the scheduler only reads them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferItem {
    local_path: PathBuf,
    key: String,
    direction: Direction,
}

impl TransferItem {
    pub fn upload(local_path: impl Into<PathBuf>, key: impl Into<String>) -> Self {
        Self {
            local_path: local_path.into(),
            key: key.into(),
            direction: Direction::Upload,
        }
    }

    pub fn download(key: impl Into<String>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            local_path: local_path.into(),
            key: key.into(),
            direction: Direction::Download,
        }
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Where the bytes come from: the local path for uploads, the key for downloads
    pub fn source(&self) -> String {
        match self.direction {
            Direction::Upload => self.local_path.display().to_string(),
            Direction::Download => self.key.clone(),
        }
    }

    pub fn destination(&self) -> String {
        match self.direction {
            Direction::Upload => self.key.clone(),
            Direction::Download => self.local_path.display().to_string(),
        }
    }
}

/// Ordered plan for one bulk call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferManifest {
    items: Vec<TransferItem>,
}

impl TransferManifest {
    pub fn new(items: Vec<TransferItem>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TransferItem> {
        self.items.iter()
    }
}

impl IntoIterator for TransferManifest {
    type Item = TransferItem;
    type IntoIter = std::vec::IntoIter<TransferItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a TransferManifest {
    type Item = &'a TransferItem;
    type IntoIter = std::slice::Iter<'a, TransferItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Builds manifests for folder uploads and downloads
pub struct ManifestBuilder;

impl ManifestBuilder {
    /// Plan an upload of every regular file under `local_dir`
    ///
    /// The walk is sorted by file name, so the same tree always yields the
    /// same order. Symlinks are included when they resolve to a file.
    pub fn for_upload(local_dir: &Path, prefix: &str) -> Result<TransferManifest> {
        match fs::metadata(local_dir) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(StorageError::local_not_found(
                    local_dir,
                    "not a directory",
                ))
            }
            Err(e) => return Err(StorageError::local_not_found(local_dir, e.to_string())),
        }

        let mut items = Vec::new();
        for entry in WalkDir::new(local_dir).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e
                    .path()
                    .unwrap_or(local_dir)
                    .display()
                    .to_string();
                StorageError::transfer(path, e)
            })?;

            let is_file = entry.file_type().is_file()
                || (entry.path_is_symlink() && entry.path().is_file());
            if !is_file {
                continue;
            }

            let Ok(relative) = entry.path().strip_prefix(local_dir) else {
                continue;
            };
            let relative_key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            items.push(TransferItem::upload(
                entry.path(),
                join_key(prefix, &relative_key),
            ));
        }

        Ok(TransferManifest::new(items))
    }

    /// Plan a download of `keys` (listed under `prefix`) into `local_dir`
    ///
    /// Folder markers (keys ending in `/`), the prefix object itself and keys
    /// whose remainder would escape `local_dir` are skipped with a warning.
    pub fn for_download(keys: &[String], prefix: &str, local_dir: &Path) -> TransferManifest {
        let items = keys
            .iter()
            .filter_map(|key| match local_target(key, prefix, local_dir) {
                Some(path) => Some(TransferItem::download(key.as_str(), path)),
                None => {
                    warn!(key = %key, "Skipping key with no local file mapping");
                    None
                }
            })
            .collect();
        TransferManifest::new(items)
    }
}

/// `prefix` + `/` + `relative`, without doubled or leading separators
pub fn join_key(prefix: &str, relative: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        relative.to_string()
    } else {
        format!("{}/{}", prefix, relative)
    }
}

fn local_target(key: &str, prefix: &str, local_dir: &Path) -> Option<PathBuf> {
    if key.ends_with('/') {
        return None;
    }
    let relative = key
        .strip_prefix(prefix)
        .unwrap_or(key)
        .trim_start_matches('/');
    if relative.is_empty() {
        return None;
    }

    let mut path = local_dir.to_path_buf();
    for segment in relative.split('/') {
        let mut components = Path::new(segment).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(part)), None) => path.push(part),
            _ => return None,
        }
    }
    Some(path)
}
