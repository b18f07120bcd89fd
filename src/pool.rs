/*!
 * Fixed-size worker pool for one bulk transfer
 *
 * All items are queued up front on a crossbeam channel; `size` named threads
 * drain it and publish `(item, outcome)` on a result channel in completion
 * order. Workers are detached: dropping the pool stops nothing that is
 * already running, and queued items keep being processed unless the pool was
 * halted.
 */

use crossbeam_channel::{unbounded, Receiver};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, Dispatch};

use crate::error::{Result, StorageError};
use crate::manifest::TransferItem;

pub(crate) type Outcome = (TransferItem, Result<()>);

pub(crate) struct WorkerPool {
    results: Receiver<Outcome>,
    halted: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Queue `items` and start `size` workers running `execute` under `logger`
    ///
    /// With `halt_on_failure`, the first failed item halts the pool so queued
    /// items are dropped instead of started.
    pub(crate) fn start<I, F>(
        size: usize,
        items: I,
        logger: &Dispatch,
        halt_on_failure: bool,
        execute: Arc<F>,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = TransferItem>,
        F: Fn(&TransferItem) -> Result<()> + Send + Sync + 'static,
    {
        let (job_tx, job_rx) = unbounded::<TransferItem>();
        let (result_tx, result_rx) = unbounded::<Outcome>();
        for item in items {
            // Receiver is alive until the workers below exit
            let _ = job_tx.send(item);
        }
        drop(job_tx);

        let halted = Arc::new(AtomicBool::new(false));

        for index in 0..size.max(1) {
            let jobs = job_rx.clone();
            let results = result_tx.clone();
            let halted_flag = Arc::clone(&halted);
            let execute = Arc::clone(&execute);
            let logger = logger.clone();

            let spawned = thread::Builder::new()
                .name(format!("orbit-bucket-worker-{}", index))
                .spawn(move || {
                    tracing::dispatcher::with_default(&logger, || {
                        for item in jobs.iter() {
                            if halted_flag.load(Ordering::SeqCst) {
                                debug!(item = %item.source(), "Pool halted; dropping queued item");
                                continue;
                            }
                            let outcome = execute(&item);
                            if outcome.is_err() && halt_on_failure {
                                halted_flag.store(true, Ordering::SeqCst);
                            }
                            // A closed result channel means the caller has
                            // already returned; keep draining the queue
                            let _ = results.send((item, outcome));
                        }
                    })
                });

            if let Err(e) = spawned {
                halted.store(true, Ordering::SeqCst);
                return Err(StorageError::transfer("worker pool", e));
            }
        }
        // Only workers hold senders now, so the result channel closes when
        // the last one exits
        drop(result_tx);

        Ok(Self {
            results: result_rx,
            halted,
        })
    }

    /// Next finished item, or `None` once every worker has exited
    pub(crate) fn next_outcome(&self) -> Option<Outcome> {
        self.results.recv().ok()
    }

    /// Stop workers from starting queued items; running items are untouched
    pub(crate) fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }
}
