//! Local directory provider
//!
//! Treats one directory on disk as a bucket: the key `a/b/c.txt` is the file
//! `<root>/a/b/c.txt`. Writes are staged in `<root>/.orbit-bucket-staging`
//! and renamed into place, so readers never observe a partial object. The
//! staging directory is reserved: listings skip it and no key can address it.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use super::{
    decode_start_after, encode_start_after, key_segments, ListPage, ObjectHead,
    PaginationCursor, ProviderError, ProviderResult, RemoteProvider, DEFAULT_PROVIDER_CAP,
};

/// A directory acting as a bucket
#[derive(Debug, Clone)]
pub struct LocalDirProvider {
    root: PathBuf,
    bucket: String,
}

impl LocalDirProvider {
    /// Bind to `root`; the bucket name is the directory's final component
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let bucket = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.display().to_string());
        Self { root, bucket }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> ProviderResult<PathBuf> {
        let segments = key_segments(key)?;
        if segments.first() == Some(&STAGING_DIR) {
            return Err(ProviderError::InvalidKey(key.to_string()));
        }
        let mut path = self.root.clone();
        for segment in segments {
            path.push(segment);
        }
        Ok(path)
    }

    /// Every stored key, sorted as strings (S3 listing order)
    fn all_keys(&self) -> ProviderResult<Vec<String>> {
        let mut keys = Vec::new();
        let staging = self.staging_dir();
        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.path() != staging.as_path());
        for entry in walker {
            let entry = entry.map_err(|e| {
                ProviderError::Io(
                    e.into_io_error()
                        .unwrap_or_else(|| io::Error::other("filesystem loop while listing")),
                )
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let key: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            keys.push(key.join("/"));
        }
        keys.sort();
        Ok(keys)
    }

    fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    /// Remove now-empty directories between a deleted object and the root
    fn prune_empty_parents(&self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.root || fs::remove_dir(dir).is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

const STAGING_DIR: &str = ".orbit-bucket-staging";

fn map_io(key: &str, err: io::Error) -> ProviderError {
    if err.kind() == io::ErrorKind::NotFound {
        ProviderError::not_found(key)
    } else {
        ProviderError::Io(err)
    }
}

impl RemoteProvider for LocalDirProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn head_bucket(&self) -> ProviderResult<()> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(ProviderError::BucketNotFound(self.root.display().to_string()))
        }
    }

    fn put_object(
        &self,
        key: &str,
        body: &mut dyn Read,
        content_length: u64,
    ) -> ProviderResult<()> {
        let path = self.object_path(key)?;
        let parent = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent)?;

        let staging = self.staging_dir();
        fs::create_dir_all(&staging)?;
        let mut staged = tempfile::Builder::new().tempfile_in(&staging)?;
        let written = io::copy(body, &mut staged)?;
        if written != content_length {
            return Err(ProviderError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "body for {} was {} bytes, expected {}",
                    key, written, content_length
                ),
            )));
        }
        staged.as_file().sync_all()?;
        persist(staged, &path)
    }

    fn get_object(&self, key: &str, sink: &mut dyn Write) -> ProviderResult<u64> {
        let path = self.object_path(key)?;
        let mut file = File::open(&path).map_err(|e| map_io(key, e))?;
        if !file.metadata()?.is_file() {
            return Err(ProviderError::not_found(key));
        }
        Ok(io::copy(&mut file, sink)?)
    }

    fn head_object(&self, key: &str) -> ProviderResult<ObjectHead> {
        let path = self.object_path(key)?;
        let metadata = fs::metadata(&path).map_err(|e| map_io(key, e))?;
        if !metadata.is_file() {
            return Err(ProviderError::not_found(key));
        }
        Ok(ObjectHead {
            key: key.to_string(),
            size: metadata.len(),
        })
    }

    fn list_page(
        &self,
        prefix: &str,
        cursor: Option<&PaginationCursor>,
        max_keys: usize,
    ) -> ProviderResult<ListPage> {
        let limit = max_keys.clamp(1, DEFAULT_PROVIDER_CAP);
        let start_after = cursor.map(decode_start_after).transpose()?;

        let keys = self.all_keys()?;
        let mut matching = keys
            .iter()
            .filter(|key| {
                start_after
                    .as_deref()
                    .map_or(true, |last| key.as_str() > last)
            })
            .filter(|key| key.starts_with(prefix));

        let page: Vec<String> = matching.by_ref().take(limit).cloned().collect();
        let next = match (matching.next(), page.last()) {
            (Some(_), Some(last)) => Some(encode_start_after(last)),
            _ => None,
        };
        Ok(ListPage { keys: page, next })
    }

    fn delete_object(&self, key: &str) -> ProviderResult<()> {
        let path = self.object_path(key)?;
        fs::remove_file(&path).map_err(|e| map_io(key, e))?;
        self.prune_empty_parents(&path);
        Ok(())
    }

    fn delete_objects(&self, keys: &[String]) -> ProviderResult<()> {
        for key in keys {
            match self.delete_object(key) {
                Ok(()) | Err(ProviderError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

fn persist(staged: NamedTempFile, path: &Path) -> ProviderResult<()> {
    staged
        .persist(path)
        .map(|_| ())
        .map_err(|e| ProviderError::Io(e.error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn provider() -> (TempDir, LocalDirProvider) {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("bucket");
        fs::create_dir(&root).unwrap();
        (temp, LocalDirProvider::new(root))
    }

    fn put(provider: &LocalDirProvider, key: &str, data: &[u8]) {
        let mut body = Cursor::new(data.to_vec());
        provider
            .put_object(key, &mut body, data.len() as u64)
            .unwrap();
    }

    #[test]
    fn test_bucket_probe() {
        let (temp, provider) = provider();
        assert!(provider.head_bucket().is_ok());
        assert_eq!(provider.bucket(), "bucket");

        let missing = LocalDirProvider::new(temp.path().join("absent"));
        assert!(matches!(
            missing.head_bucket(),
            Err(ProviderError::BucketNotFound(_))
        ));
    }

    #[test]
    fn test_put_get_roundtrip_creates_dirs() {
        let (_temp, provider) = provider();
        put(&provider, "nested/dir/file.txt", b"payload");

        assert!(provider.root().join("nested/dir/file.txt").is_file());
        let mut out = Vec::new();
        assert_eq!(provider.get_object("nested/dir/file.txt", &mut out).unwrap(), 7);
        assert_eq!(out, b"payload");
        assert_eq!(provider.head_object("nested/dir/file.txt").unwrap().size, 7);
    }

    #[test]
    fn test_missing_objects_report_not_found() {
        let (_temp, provider) = provider();
        let mut out = Vec::new();
        assert!(provider.get_object("nope", &mut out).unwrap_err().is_not_found());
        assert!(provider.head_object("nope").unwrap_err().is_not_found());
        assert!(provider.delete_object("nope").unwrap_err().is_not_found());
    }

    #[test]
    fn test_directories_are_not_objects() {
        let (_temp, provider) = provider();
        put(&provider, "dir/file.txt", b"x");
        assert!(provider.head_object("dir").unwrap_err().is_not_found());
    }

    #[test]
    fn test_traversal_keys_rejected() {
        let (_temp, provider) = provider();
        let mut body = Cursor::new(b"x".to_vec());
        let err = provider.put_object("../escape", &mut body, 1).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidKey(_)));
    }

    #[test]
    fn test_listing_is_sorted_and_paginated() {
        let (_temp, provider) = provider();
        for key in ["b/2.txt", "a/1.txt", "a/10.txt", "b/1.txt", "c.txt"] {
            put(&provider, key, b"x");
        }

        let first = provider.list_page("", None, 2).unwrap();
        assert_eq!(first.keys, vec!["a/1.txt", "a/10.txt"]);
        let second = provider.list_page("", first.next.as_ref(), 2).unwrap();
        assert_eq!(second.keys, vec!["b/1.txt", "b/2.txt"]);
        let third = provider.list_page("", second.next.as_ref(), 2).unwrap();
        assert_eq!(third.keys, vec!["c.txt"]);
        assert!(third.next.is_none());

        let scoped = provider.list_page("b/", None, 10).unwrap();
        assert_eq!(scoped.keys, vec!["b/1.txt", "b/2.txt"]);
    }

    #[test]
    fn test_delete_prunes_empty_directories() {
        let (_temp, provider) = provider();
        put(&provider, "deep/er/file.txt", b"x");
        provider.delete_object("deep/er/file.txt").unwrap();
        assert!(!provider.root().join("deep").exists());
        assert!(provider.root().is_dir());
    }

    #[test]
    fn test_dot_prefixed_names_are_listed() {
        let (_temp, provider) = provider();
        put(&provider, "p/.orbit-bucket-notes.txt", b"hidden?");
        put(&provider, "p/plain.txt", b"plain");

        let page = provider.list_page("p/", None, 10).unwrap();
        assert_eq!(page.keys, vec!["p/.orbit-bucket-notes.txt", "p/plain.txt"]);
    }

    #[test]
    fn test_staging_directory_is_reserved() {
        let (_temp, provider) = provider();
        put(&provider, "a.txt", b"x");

        assert!(provider.root().join(STAGING_DIR).is_dir());
        assert_eq!(provider.list_page("", None, 10).unwrap().keys, vec!["a.txt"]);

        let mut body = Cursor::new(b"x".to_vec());
        let err = provider
            .put_object(".orbit-bucket-staging/evil", &mut body, 1)
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidKey(_)));
    }

    #[test]
    fn test_batch_delete_ignores_missing() {
        let (_temp, provider) = provider();
        put(&provider, "a.txt", b"x");
        provider
            .delete_objects(&["a.txt".to_string(), "ghost.txt".to_string()])
            .unwrap();
        assert!(provider.list_page("", None, 10).unwrap().keys.is_empty());
    }
}
