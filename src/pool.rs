//! Bounded-concurrency runner shared by every scanning phase.
//!
//! Workers pull from one shared queue until it is empty, so a slow item only
//! delays the worker holding it. Each item runs exactly once; a panic inside
//! one item is caught and counted without stopping the worker.
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use log::{debug, warn};
use tokio::task::JoinSet;

/// Phase 2 of host discovery connects to several ports per item.
pub const LIVENESS_FALLBACK_CEILING: usize = 20;

/// Upper bound on concurrent connects against a single host.
pub const PER_HOST_PORT_CEILING: usize = 50;

/// Outcome counters of one [`WorkerPool::run`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolReport {
    /// Items whose work completed normally.
    pub completed: usize,
    /// Items whose work panicked.
    pub panicked: usize,
}

impl PoolReport {
    /// Every item handed to the pool, whatever its outcome.
    pub fn processed(&self) -> usize {
        self.completed + self.panicked
    }
}

/// Runs work items on at most `concurrency` parallel tokio tasks.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    concurrency: usize,
}

impl WorkerPool {
    /// A pool of `concurrency` workers; zero is corrected to one.
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    /// Caps the worker count at `ceiling` regardless of what was requested.
    pub fn ceiling(self, ceiling: usize) -> Self {
        Self::new(self.concurrency.min(ceiling))
    }

    /// The effective worker count.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Processes every item with `work` and returns once the queue is drained.
    ///
    /// ```rust
    /// # use netdive::pool::WorkerPool;
    /// # use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
    /// # tokio::runtime::Runtime::new().unwrap().block_on(async {
    /// let seen = Arc::new(AtomicUsize::new(0));
    /// let counter = Arc::clone(&seen);
    /// let report = WorkerPool::new(4)
    ///     .run((0..10).collect(), move |_: u32| {
    ///         let counter = Arc::clone(&counter);
    ///         async move {
    ///             counter.fetch_add(1, Ordering::SeqCst);
    ///         }
    ///     })
    ///     .await;
    /// assert_eq!(report.completed, 10);
    /// assert_eq!(seen.load(Ordering::SeqCst), 10);
    /// # });
    /// ```
    pub async fn run<T, F, Fut>(&self, items: Vec<T>, work: F) -> PoolReport
    where
        T: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if items.is_empty() {
            return PoolReport::default();
        }

        let workers = self.concurrency.min(items.len());
        debug!(
            "Worker pool starting. \nWorkers {}\nItems {}",
            workers,
            items.len()
        );

        let queue = Arc::new(Mutex::new(items.into_iter()));
        let work = Arc::new(work);
        let mut set = JoinSet::new();

        for _ in 0..workers {
            let queue = Arc::clone(&queue);
            let work = Arc::clone(&work);
            set.spawn(async move {
                let mut report = PoolReport::default();
                loop {
                    let next = queue.lock().unwrap_or_else(PoisonError::into_inner).next();
                    let Some(item) = next else { break };

                    let outcome = AssertUnwindSafe(async { work(item).await })
                        .catch_unwind()
                        .await;
                    match outcome {
                        Ok(()) => report.completed += 1,
                        Err(_) => {
                            warn!("A work item panicked; continuing with the rest of the queue");
                            report.panicked += 1;
                        }
                    }
                }
                report
            });
        }

        let mut total = PoolReport::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(report) => {
                    total.completed += report.completed;
                    total.panicked += report.panicked;
                }
                Err(e) => warn!("Worker task failed to join: {e}"),
            }
        }
        total
    }
}
