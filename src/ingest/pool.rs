//! Bounded-concurrency worker pool
//!
//! Runs a worker function over a list of items with at most `concurrency`
//! logical workers in flight. Workers share one atomic cursor, so every item is
//! claimed exactly once. The pool never retries: a worker returning `Err`
//! aborts that slot's remaining work while the other slots keep going.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use crate::ingest::rate_limit::TokenBucketLimiter;

/// Pool execution options
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Maximum number of logical workers (0 is treated as 1)
    pub concurrency: usize,
    /// Fixed delay a worker sleeps after each item
    pub delay: Duration,
    /// Limiter awaited before every worker invocation, with the weight to consume
    pub limiter: Option<(TokenBucketLimiter, u32)>,
}

impl PoolOptions {
    /// Options with the given concurrency, no delay and no limiter
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            delay: Duration::ZERO,
            limiter: None,
        }
    }

    /// Sleep `delay` after each item
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Await `weight` tokens from `limiter` before each invocation
    pub fn with_limiter(mut self, limiter: TokenBucketLimiter, weight: u32) -> Self {
        self.limiter = Some((limiter, weight));
        self
    }
}

/// Outcome of a pool run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolReport {
    /// Worker invocations, successful or not
    pub invoked: usize,
    /// Invocations that returned `Ok`
    pub succeeded: usize,
    /// Slots that stopped early after a worker error
    pub aborted_workers: usize,
}

/// Run `worker` over `items` with bounded concurrency
///
/// Spawns `min(concurrency, items.len())` logical workers on the current task.
/// Within one worker, items are processed in ascending claimed-index order.
pub async fn run_pool<T, F, Fut, E>(items: Vec<T>, options: PoolOptions, worker: F) -> PoolReport
where
    T: Clone,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    let total = items.len();
    if total == 0 {
        return PoolReport::default();
    }

    let workers = options.concurrency.max(1).min(total);
    let cursor = AtomicUsize::new(0);
    let invoked = AtomicUsize::new(0);
    let succeeded = AtomicUsize::new(0);

    debug!(items = total, workers, "Starting worker pool");

    let slots = (0..workers).map(|slot| {
        let items = &items;
        let cursor = &cursor;
        let invoked = &invoked;
        let succeeded = &succeeded;
        let options = &options;
        let worker = &worker;

        async move {
            loop {
                let index = cursor.fetch_add(1, Ordering::SeqCst);
                if index >= total {
                    return false;
                }

                if let Some((limiter, weight)) = &options.limiter {
                    if let Err(e) = limiter.consume(*weight).await {
                        warn!(slot, error = %e, "Limiter unavailable, stopping worker");
                        return true;
                    }
                }

                invoked.fetch_add(1, Ordering::SeqCst);
                if let Err(e) = worker(items[index].clone()).await {
                    debug!(slot, index, error = %e, "Worker failed, aborting slot");
                    return true;
                }
                succeeded.fetch_add(1, Ordering::SeqCst);

                if !options.delay.is_zero() && cursor.load(Ordering::SeqCst) < total {
                    tokio::time::sleep(options.delay).await;
                }
            }
        }
    });

    let aborted_workers = futures::future::join_all(slots)
        .await
        .into_iter()
        .filter(|aborted| *aborted)
        .count();

    let report = PoolReport {
        invoked: invoked.into_inner(),
        succeeded: succeeded.into_inner(),
        aborted_workers,
    };
    debug!(?report, "Worker pool finished");
    report
}
