use futures::future::join_all;
use futures::FutureExt;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// Fixed number of workers draining one shared queue.
///
/// Each worker pops the next item as soon as it finishes its current one,
/// so a slow item never holds up the rest of the queue. A worker only ever
/// has one item in flight. A panic inside one item's future is caught and
/// logged; the worker moves on to the next item.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    name: &'static str,
    workers: usize,
}

/// Outcome counts for one [`WorkerPool::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolReport {
    pub processed: usize,
    pub panicked: usize,
}

impl WorkerPool {
    pub fn new(name: &'static str, workers: usize) -> Self {
        Self {
            name,
            workers: workers.max(1),
        }
    }

    /// Runs `work` over every item and returns once all workers have
    /// drained the queue.
    pub async fn run<T, F, Fut>(&self, items: Vec<T>, work: F) -> PoolReport
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = ()>,
    {
        let worker_count = self.workers.min(items.len());
        if worker_count == 0 {
            return PoolReport::default();
        }

        let queue = Mutex::new(VecDeque::from(items));
        let processed = AtomicUsize::new(0);
        let panicked = AtomicUsize::new(0);

        let (queue, work, processed, panicked) = (&queue, &work, &processed, &panicked);
        let name = self.name;

        let workers = (0..worker_count).map(|worker| async move {
            loop {
                let next = queue
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .pop_front();
                let Some(item) = next else {
                    break;
                };

                if AssertUnwindSafe(work(item)).catch_unwind().await.is_err() {
                    tracing::warn!(pool = name, worker = worker, "Work item panicked, continuing");
                    panicked.fetch_add(1, Ordering::Relaxed);
                }
                processed.fetch_add(1, Ordering::Relaxed);
            }
        });
        join_all(workers).await;

        PoolReport {
            processed: processed.load(Ordering::Relaxed),
            panicked: panicked.load(Ordering::Relaxed),
        }
    }
}
