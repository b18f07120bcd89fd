//! Fan-out/fan-in of a transfer manifest
//!
//! Sequential runs go through the manifest in order on the calling thread and
//! stop at the first failure. Parallel runs hand the whole manifest to a
//! [`WorkerPool`](crate::pool) and consume outcomes in completion order; the
//! first failure is returned while the remaining items keep running in the
//! background.

use std::sync::Arc;
use tracing::{debug, info, warn, Dispatch};

use crate::error::{Result, StorageError};
use crate::manifest::{TransferItem, TransferManifest};
use crate::pool::WorkerPool;
use crate::progress::{ProgressCounter, ProgressFn};

/// Runs manifests with a bounded number of workers
#[derive(Clone)]
pub struct TransferScheduler {
    workers: usize,
    abort_pending_on_failure: bool,
    logger: Dispatch,
}

impl TransferScheduler {
    /// Scheduler with `workers` threads per parallel run, logging to the
    /// dispatcher that is current on the calling thread
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            abort_pending_on_failure: false,
            logger: tracing::dispatcher::get_default(|current| current.clone()),
        }
    }

    /// Stop starting queued items once one has failed
    pub fn with_abort_pending(mut self, abort: bool) -> Self {
        self.abort_pending_on_failure = abort;
        self
    }

    /// Run workers under `logger` instead of the caller's dispatcher
    pub fn with_logger(mut self, logger: Dispatch) -> Self {
        self.logger = logger;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Execute every item of `manifest`, returning the number completed
    ///
    /// `on_progress` receives `(completed, total)` after each success, one
    /// call at a time.
    pub fn run<F>(
        &self,
        manifest: TransferManifest,
        parallel: bool,
        on_progress: Option<&ProgressFn>,
        execute: F,
    ) -> Result<usize>
    where
        F: Fn(&TransferItem) -> Result<()> + Send + Sync + 'static,
    {
        let total = manifest.len();
        if total == 0 {
            debug!("Empty manifest; nothing to transfer");
            return Ok(0);
        }

        let counter = ProgressCounter::new(total);
        if parallel && total > 1 {
            self.run_parallel(manifest, &counter, on_progress, execute)
        } else {
            for item in &manifest {
                execute(item)?;
                counter.record(on_progress);
            }
            Ok(counter.completed())
        }
    }

    fn run_parallel<F>(
        &self,
        manifest: TransferManifest,
        counter: &ProgressCounter,
        on_progress: Option<&ProgressFn>,
        execute: F,
    ) -> Result<usize>
    where
        F: Fn(&TransferItem) -> Result<()> + Send + Sync + 'static,
    {
        let total = counter.total();
        let size = self.workers.min(total);
        info!(items = total, workers = size, "Starting parallel transfer");

        let pool = WorkerPool::start(
            size,
            manifest,
            &self.logger,
            self.abort_pending_on_failure,
            Arc::new(execute),
        )?;

        while let Some((item, outcome)) = pool.next_outcome() {
            match outcome {
                Ok(()) => {
                    counter.record(on_progress);
                }
                Err(e) => {
                    if self.abort_pending_on_failure {
                        pool.halt();
                    }
                    warn!(
                        item = %item.source(),
                        completed = counter.completed(),
                        total,
                        error = %e,
                        "Transfer failed; remaining items are not cancelled"
                    );
                    return Err(attribute(&item, e));
                }
            }
        }

        let completed = counter.completed();
        if completed < total {
            return Err(StorageError::invalid_data(
                "worker pool",
                format!("workers exited after {} of {} items", completed, total),
            ));
        }
        Ok(completed)
    }
}

/// Report a failure as a transfer failure of `item`'s source
fn attribute(item: &TransferItem, err: StorageError) -> StorageError {
    let source = item.source();
    if matches!(&err, StorageError::TransferFailure { path, .. } if *path == source) {
        return err;
    }
    StorageError::transfer(source, err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn manifest(count: usize) -> TransferManifest {
        TransferManifest::new(
            (0..count)
                .map(|i| TransferItem::upload(format!("/data/{}.bin", i), format!("p/{}.bin", i)))
                .collect(),
        )
    }

    fn recorder() -> (Arc<Mutex<Vec<(usize, usize)>>>, impl Fn(usize, usize) + Send + Sync) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        (calls, move |done: usize, total: usize| sink.lock().unwrap().push((done, total)))
    }

    #[test]
    fn test_empty_manifest_returns_immediately() {
        let scheduler = TransferScheduler::new(4);
        let (calls, on_progress) = recorder();
        let done = scheduler
            .run(TransferManifest::default(), true, Some(&on_progress), |_| {
                panic!("nothing to execute")
            })
            .unwrap();
        assert_eq!(done, 0);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_sequential_runs_in_order_with_progress() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&order);
        let (calls, on_progress) = recorder();

        let done = TransferScheduler::new(4)
            .run(manifest(3), false, Some(&on_progress), move |item| {
                seen.lock().unwrap().push(item.key().to_string());
                Ok(())
            })
            .unwrap();

        assert_eq!(done, 3);
        assert_eq!(*order.lock().unwrap(), vec!["p/0.bin", "p/1.bin", "p/2.bin"]);
        assert_eq!(*calls.lock().unwrap(), vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[test]
    fn test_sequential_failure_stops_and_surfaces_as_is() {
        let executed = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&executed);

        let err = TransferScheduler::new(2)
            .run(manifest(5), false, None, move |item| {
                count.fetch_add(1, Ordering::SeqCst);
                if item.key() == "p/1.bin" {
                    Err(StorageError::RemoteNotFound {
                        bucket: "b".to_string(),
                        key: item.key().to_string(),
                    })
                } else {
                    Ok(())
                }
            })
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::RemoteNotFound);
        assert_eq!(executed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_parallel_progress_is_monotonic() {
        let (calls, on_progress) = recorder();
        let done = TransferScheduler::new(3)
            .run(manifest(12), true, Some(&on_progress), |_| {
                std::thread::sleep(Duration::from_millis(2));
                Ok(())
            })
            .unwrap();

        assert_eq!(done, 12);
        let expected: Vec<(usize, usize)> = (1..=12).map(|i| (i, 12)).collect();
        assert_eq!(*calls.lock().unwrap(), expected);
    }

    #[test]
    fn test_parallel_failure_names_item_and_others_finish() {
        let executed = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&executed);

        let err = TransferScheduler::new(2)
            .run(manifest(6), true, None, move |item| {
                std::thread::sleep(Duration::from_millis(5));
                count.fetch_add(1, Ordering::SeqCst);
                if item.key() == "p/0.bin" {
                    Err(StorageError::invalid_data(item.key(), "corrupt"))
                } else {
                    Ok(())
                }
            })
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TransferFailure);
        assert_eq!(err.path().as_deref(), Some("/data/0.bin"));

        // Remaining items keep running after the call has returned
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while executed.load(Ordering::SeqCst) < 6 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(executed.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_single_item_runs_on_calling_thread() {
        let caller = std::thread::current().id();
        let ran_on = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&ran_on);

        TransferScheduler::new(4)
            .run(manifest(1), true, None, move |_| {
                *slot.lock().unwrap() = Some(std::thread::current().id());
                Ok(())
            })
            .unwrap();

        assert_eq!(*ran_on.lock().unwrap(), Some(caller));
    }

    #[test]
    fn test_attribute_keeps_matching_transfer_failure() {
        let item = TransferItem::download("k/a", "/restore/a");
        let err = attribute(&item, StorageError::invalid_data("k/a", "bad"));
        assert_eq!(err.path().as_deref(), Some("k/a"));
        assert!(err.to_string().starts_with("Transfer failed for k/a: bad"));
    }
}
