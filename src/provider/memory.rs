//! In-memory provider
//!
//! Stores objects in a sorted map so listings come back in lexicographic key
//! order, the way S3 returns them. Clones share the same bucket, which lets a
//! test keep a handle for inspection after handing one to a connection.
//!
//! Besides storage it records call statistics (list calls, batch-delete
//! sizes, peak concurrent transfers) and can inject failures per key or per
//! batch-delete call.

use std::collections::{BTreeMap, HashSet};
use std::io::{self, Read, Write};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;
use std::time::Duration;

use super::{
    decode_start_after, encode_start_after, ListPage, ObjectHead, PaginationCursor,
    ProviderError, ProviderResult, RemoteProvider, DEFAULT_PROVIDER_CAP,
};

/// Snapshot of recorded provider calls
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderStats {
    pub put_calls: usize,
    pub get_calls: usize,
    pub list_calls: usize,
    /// Sizes of every successful batch-delete call, in call order
    pub batch_delete_sizes: Vec<usize>,
    /// Highest number of put/get calls observed running at once
    pub peak_concurrent_transfers: usize,
}

#[derive(Debug, Default)]
struct Faults {
    bucket_missing: bool,
    failing_keys: HashSet<String>,
    /// Zero-based index of the batch-delete call that fails
    failing_batch: Option<usize>,
    transfer_delay: Option<Duration>,
}

#[derive(Debug)]
struct Shared {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
    faults: RwLock<Faults>,
    stats: Mutex<ProviderStats>,
    batch_calls: AtomicUsize,
    in_flight: AtomicUsize,
}

/// In-process bucket
#[derive(Debug, Clone)]
pub struct MemoryProvider {
    bucket: String,
    page_cap: usize,
    delete_cap: usize,
    shared: Arc<Shared>,
}

impl MemoryProvider {
    /// Create an empty bucket with S3-sized caps (1000 keys per list/delete call)
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            page_cap: DEFAULT_PROVIDER_CAP,
            delete_cap: DEFAULT_PROVIDER_CAP,
            shared: Arc::new(Shared {
                objects: RwLock::new(BTreeMap::new()),
                faults: RwLock::new(Faults::default()),
                stats: Mutex::new(ProviderStats::default()),
                batch_calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
            }),
        }
    }

    /// Override the per-call listing cap
    pub fn with_page_cap(mut self, cap: usize) -> Self {
        self.page_cap = cap.max(1);
        self
    }

    /// Override the per-call batch-delete cap
    pub fn with_delete_cap(mut self, cap: usize) -> Self {
        self.delete_cap = cap.max(1);
        self
    }

    /// Add or replace an object directly, bypassing call accounting
    pub fn insert(&self, key: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.objects_mut().insert(key.into(), data.into());
    }

    /// Object bytes, for assertions
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects().contains_key(key)
    }

    /// All stored keys in order
    pub fn keys(&self) -> Vec<String> {
        self.objects().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.objects().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects().is_empty()
    }

    /// Make the reachability probe fail
    pub fn set_bucket_missing(&self, missing: bool) {
        self.faults_mut().bucket_missing = missing;
    }

    /// Make put/get of `key` fail with a network error
    pub fn fail_key(&self, key: impl Into<String>) {
        self.faults_mut().failing_keys.insert(key.into());
    }

    /// Make the `index`-th (zero-based) batch-delete call fail
    pub fn fail_batch_delete(&self, index: usize) {
        self.faults_mut().failing_batch = Some(index);
    }

    /// Sleep this long inside every put/get, to keep transfers overlapping
    pub fn set_transfer_delay(&self, delay: Duration) {
        self.faults_mut().transfer_delay = Some(delay);
    }

    pub fn stats(&self) -> ProviderStats {
        lock(&self.shared.stats).clone()
    }

    fn objects(&self) -> RwLockReadGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.shared
            .objects
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn objects_mut(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.shared
            .objects
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn faults(&self) -> RwLockReadGuard<'_, Faults> {
        self.shared
            .faults
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn faults_mut(&self) -> RwLockWriteGuard<'_, Faults> {
        self.shared
            .faults
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_transfer_fault(&self, key: &str) -> ProviderResult<()> {
        if self.faults().failing_keys.contains(key) {
            return Err(ProviderError::Network(format!(
                "injected failure for {}",
                key
            )));
        }
        Ok(())
    }

    /// Track overlap between transfers and apply the configured delay
    fn enter_transfer(&self) -> TransferGuard<'_> {
        let current = self.shared.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut stats = lock(&self.shared.stats);
            stats.peak_concurrent_transfers = stats.peak_concurrent_transfers.max(current);
        }
        let delay = self.faults().transfer_delay;
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        TransferGuard {
            in_flight: &self.shared.in_flight,
        }
    }
}

struct TransferGuard<'a> {
    in_flight: &'a AtomicUsize,
}

impl Drop for TransferGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RemoteProvider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn head_bucket(&self) -> ProviderResult<()> {
        if self.faults().bucket_missing {
            return Err(ProviderError::BucketNotFound(self.bucket.clone()));
        }
        Ok(())
    }

    fn put_object(
        &self,
        key: &str,
        body: &mut dyn Read,
        content_length: u64,
    ) -> ProviderResult<()> {
        lock(&self.shared.stats).put_calls += 1;
        let _guard = self.enter_transfer();
        self.check_transfer_fault(key)?;

        let mut data = Vec::with_capacity(content_length as usize);
        body.read_to_end(&mut data)?;
        if data.len() as u64 != content_length {
            return Err(ProviderError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "body for {} was {} bytes, expected {}",
                    key,
                    data.len(),
                    content_length
                ),
            )));
        }

        self.objects_mut().insert(key.to_string(), data);
        Ok(())
    }

    fn get_object(&self, key: &str, sink: &mut dyn Write) -> ProviderResult<u64> {
        lock(&self.shared.stats).get_calls += 1;
        let _guard = self.enter_transfer();
        self.check_transfer_fault(key)?;

        let data = self.get(key).ok_or_else(|| ProviderError::not_found(key))?;
        sink.write_all(&data)?;
        Ok(data.len() as u64)
    }

    fn head_object(&self, key: &str) -> ProviderResult<ObjectHead> {
        self.objects()
            .get(key)
            .map(|data| ObjectHead {
                key: key.to_string(),
                size: data.len() as u64,
            })
            .ok_or_else(|| ProviderError::not_found(key))
    }

    fn list_page(
        &self,
        prefix: &str,
        cursor: Option<&PaginationCursor>,
        max_keys: usize,
    ) -> ProviderResult<ListPage> {
        lock(&self.shared.stats).list_calls += 1;

        let limit = max_keys.clamp(1, self.page_cap);
        let start = match cursor {
            Some(cursor) => Bound::Excluded(decode_start_after(cursor)?),
            None => Bound::Included(prefix.to_string()),
        };

        let objects = self.objects();
        let mut matching = objects
            .range::<String, _>((start, Bound::Unbounded))
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(prefix));

        let keys: Vec<String> = matching.by_ref().take(limit).cloned().collect();
        let next = match (matching.next(), keys.last()) {
            (Some(_), Some(last)) => Some(encode_start_after(last)),
            _ => None,
        };

        Ok(ListPage { keys, next })
    }

    fn delete_object(&self, key: &str) -> ProviderResult<()> {
        match self.objects_mut().remove(key) {
            Some(_) => Ok(()),
            None => Err(ProviderError::not_found(key)),
        }
    }

    fn delete_objects(&self, keys: &[String]) -> ProviderResult<()> {
        if keys.len() > self.delete_cap {
            return Err(ProviderError::Service {
                code: "MalformedXML".to_string(),
                message: format!(
                    "{} keys exceeds the batch limit of {}",
                    keys.len(),
                    self.delete_cap
                ),
            });
        }

        let index = self.shared.batch_calls.fetch_add(1, Ordering::SeqCst);
        if self.faults().failing_batch == Some(index) {
            return Err(ProviderError::Service {
                code: "InternalError".to_string(),
                message: format!("injected failure for batch {}", index),
            });
        }

        {
            let mut objects = self.objects_mut();
            for key in keys {
                objects.remove(key);
            }
        }
        lock(&self.shared.stats).batch_delete_sizes.push(keys.len());
        Ok(())
    }

    fn max_page_size(&self) -> usize {
        self.page_cap
    }

    fn max_delete_batch(&self) -> usize {
        self.delete_cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn seeded(count: usize) -> MemoryProvider {
        let provider = MemoryProvider::new("test-bucket");
        for i in 0..count {
            provider.insert(format!("data/{:03}.bin", i), vec![i as u8]);
        }
        provider.insert("other/x.bin", b"x".to_vec());
        provider
    }

    #[test]
    fn test_put_get_head() {
        let provider = MemoryProvider::new("b");
        let mut body = Cursor::new(b"hello".to_vec());
        provider.put_object("greeting.txt", &mut body, 5).unwrap();

        let mut out = Vec::new();
        assert_eq!(provider.get_object("greeting.txt", &mut out).unwrap(), 5);
        assert_eq!(out, b"hello");
        assert_eq!(provider.head_object("greeting.txt").unwrap().size, 5);
        assert!(provider.head_object("nope").unwrap_err().is_not_found());
    }

    #[test]
    fn test_put_rejects_short_body() {
        let provider = MemoryProvider::new("b");
        let mut body = Cursor::new(b"abc".to_vec());
        let err = provider.put_object("k", &mut body, 10).unwrap_err();
        assert!(matches!(err, ProviderError::Io(_)));
        assert!(!provider.contains("k"));
    }

    #[test]
    fn test_list_page_respects_prefix_and_cursor() {
        let provider = seeded(5);

        let first = provider.list_page("data/", None, 2).unwrap();
        assert_eq!(first.keys, vec!["data/000.bin", "data/001.bin"]);
        let cursor = first.next.expect("more pages");

        let second = provider.list_page("data/", Some(&cursor), 2).unwrap();
        assert_eq!(second.keys, vec!["data/002.bin", "data/003.bin"]);

        let third = provider
            .list_page("data/", second.next.as_ref(), 2)
            .unwrap();
        assert_eq!(third.keys, vec!["data/004.bin"]);
        assert!(third.next.is_none());
        assert_eq!(provider.stats().list_calls, 3);
    }

    #[test]
    fn test_list_page_clamps_to_cap() {
        let provider = seeded(10).with_page_cap(3);
        let page = provider.list_page("data/", None, 1000).unwrap();
        assert_eq!(page.keys.len(), 3);
        assert!(page.next.is_some());
    }

    #[test]
    fn test_garbage_cursor_rejected() {
        let provider = seeded(2);
        let bogus = PaginationCursor::new("***");
        assert!(provider.list_page("data/", Some(&bogus), 10).is_err());
    }

    #[test]
    fn test_delete_object_reports_missing() {
        let provider = seeded(1);
        provider.delete_object("data/000.bin").unwrap();
        assert!(provider.delete_object("data/000.bin").unwrap_err().is_not_found());
    }

    #[test]
    fn test_batch_delete_cap_and_fault() {
        let provider = seeded(4).with_delete_cap(2);
        let keys: Vec<String> = provider.keys().into_iter().take(3).collect();
        assert!(provider.delete_objects(&keys).is_err());

        provider.fail_batch_delete(1);
        provider.delete_objects(&keys[..2]).unwrap();
        assert!(provider.delete_objects(&keys[2..]).is_err());
        assert_eq!(provider.stats().batch_delete_sizes, vec![2]);
    }

    #[test]
    fn test_clones_share_bucket() {
        let provider = MemoryProvider::new("b");
        let handle = provider.clone();
        provider.insert("k", b"v".to_vec());
        assert_eq!(handle.get("k"), Some(b"v".to_vec()));
        assert_eq!(handle.len(), 1);
    }

    #[test]
    fn test_injected_key_failure() {
        let provider = MemoryProvider::new("b");
        provider.fail_key("bad");
        let mut body = Cursor::new(Vec::new());
        let err = provider.put_object("bad", &mut body, 0).unwrap_err();
        assert!(matches!(err, ProviderError::Network(_)));
    }
}
