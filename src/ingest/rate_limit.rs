//! Token bucket rate limiting
//!
//! Implements a weighted token bucket with a strict FIFO wait queue. Tokens refill
//! continuously; a request that cannot be served immediately joins the queue and a
//! single re-evaluation timer is armed for the whole queue, never one per waiter.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{sleep, Instant};
use tracing::trace;

use crate::ingest::config::MIN_LIMITER_WAIT_MS;
use crate::metrics::RateLimiterMetrics;
use crate::registry::RateBudget;

/// Point-in-time view of a limiter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimiterStats {
    /// Tokens currently available
    pub tokens: f64,
    /// Waiters queued behind the head
    pub queue_length: usize,
    /// Bucket capacity
    pub capacity: f64,
}

struct Waiter {
    weight: f64,
    tx: oneshot::Sender<()>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
    queue: VecDeque<Waiter>,
    timer_armed: bool,
}

struct Bucket {
    capacity: f64,
    refill_per_ms: f64,
    state: Mutex<BucketState>,
}

impl Bucket {
    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed_ms = now.duration_since(state.last_refill).as_secs_f64() * 1000.0;
        if elapsed_ms > 0.0 {
            state.tokens = (state.tokens + elapsed_ms * self.refill_per_ms).min(self.capacity);
            state.last_refill = now;
        }
    }

    /// Serve queued waiters in arrival order, then arm the re-evaluation timer if
    /// the head still cannot be served.
    fn evaluate(bucket: &Arc<Bucket>, state: &mut BucketState) {
        while let Some(head) = state.queue.front() {
            if head.tx.is_closed() {
                state.queue.pop_front();
                continue;
            }
            if state.tokens < head.weight {
                break;
            }
            if let Some(waiter) = state.queue.pop_front() {
                state.tokens -= waiter.weight;
                if waiter.tx.send(()).is_err() {
                    // Receiver went away between the check and the send.
                    state.tokens = (state.tokens + waiter.weight).min(bucket.capacity);
                }
            }
        }

        let Some(head) = state.queue.front() else {
            return;
        };
        if state.timer_armed {
            return;
        }

        let deficit = (head.weight - state.tokens).max(0.0);
        let wait_ms = ((deficit / bucket.refill_per_ms).ceil() as u64).max(MIN_LIMITER_WAIT_MS);
        state.timer_armed = true;
        trace!(wait_ms, queue_length = state.queue.len(), "Arming limiter timer");

        let bucket = Arc::clone(bucket);
        tokio::spawn(async move {
            sleep(Duration::from_millis(wait_ms)).await;
            let mut state = bucket.lock();
            state.timer_armed = false;
            bucket.refill(&mut state);
            Bucket::evaluate(&bucket, &mut state);
        });
    }
}

/// Queued side of a `consume` call
///
/// If the caller goes away after its tokens were deducted but before it observed
/// the wakeup, the tokens go back to the bucket.
struct PendingConsume {
    bucket: Arc<Bucket>,
    weight: f64,
    rx: oneshot::Receiver<()>,
    served: bool,
}

impl Drop for PendingConsume {
    fn drop(&mut self) {
        if self.served {
            return;
        }
        // After close no send can succeed, so try_recv settles the race.
        self.rx.close();
        if self.rx.try_recv().is_ok() {
            let mut state = self.bucket.lock();
            self.bucket.refill(&mut state);
            state.tokens = (state.tokens + self.weight).min(self.bucket.capacity);
            trace!(weight = self.weight, "Refunding tokens of a dropped waiter");
            // A non-empty queue always has its timer armed, so this never spawns.
            Bucket::evaluate(&self.bucket, &mut state);
        }
    }
}

/// Weighted token bucket shared by every pipeline of one platform
#[derive(Clone)]
pub struct TokenBucketLimiter {
    bucket: Arc<Bucket>,
}

impl TokenBucketLimiter {
    /// Create a full bucket that refills `capacity` tokens every `refill_interval`
    ///
    /// # Arguments
    /// * `capacity` - Maximum tokens held by the bucket
    /// * `refill_interval` - Time for an empty bucket to refill completely
    pub fn new(capacity: u32, refill_interval: Duration) -> Self {
        let capacity = f64::from(capacity.max(1));
        let interval_ms = (refill_interval.as_secs_f64() * 1000.0).max(1.0);
        Self {
            bucket: Arc::new(Bucket {
                capacity,
                refill_per_ms: capacity / interval_ms,
                state: Mutex::new(BucketState {
                    tokens: capacity,
                    last_refill: Instant::now(),
                    queue: VecDeque::new(),
                    timer_armed: false,
                }),
            }),
        }
    }

    /// Create a limiter from a platform budget
    pub fn from_budget(budget: &RateBudget) -> Self {
        Self::new(budget.capacity, budget.refill_interval())
    }

    /// Wait until `weight` tokens have been deducted
    ///
    /// Completes immediately when no one is queued and enough tokens exist.
    /// Weights above capacity are served once the bucket is full.
    pub async fn consume(&self, weight: u32) -> Result<(), RateLimitError> {
        let mut metrics = RateLimiterMetrics::new();
        metrics.start_acquire();
        let weight_f = f64::from(weight).min(self.bucket.capacity);

        let rx = {
            let mut state = self.bucket.lock();
            self.bucket.refill(&mut state);

            if state.queue.is_empty() && state.tokens >= weight_f {
                state.tokens -= weight_f;
                metrics.update_available_permits(state.tokens);
                drop(state);
                metrics.record_acquired(weight);
                return Ok(());
            }

            let (tx, rx) = oneshot::channel();
            state.queue.push_back(Waiter {
                weight: weight_f,
                tx,
            });
            Bucket::evaluate(&self.bucket, &mut state);
            rx
        };

        let mut pending = PendingConsume {
            bucket: Arc::clone(&self.bucket),
            weight: weight_f,
            rx,
            served: false,
        };
        (&mut pending.rx).await.map_err(|_| RateLimitError::Closed)?;
        pending.served = true;
        metrics.record_acquired(weight);
        Ok(())
    }

    /// Current tokens, queue length and capacity
    pub fn stats(&self) -> LimiterStats {
        let mut state = self.bucket.lock();
        self.bucket.refill(&mut state);
        LimiterStats {
            tokens: state.tokens,
            queue_length: state.queue.len(),
            capacity: self.bucket.capacity,
        }
    }

    /// Bucket capacity
    pub fn capacity(&self) -> f64 {
        self.bucket.capacity
    }
}

impl std::fmt::Debug for TokenBucketLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("TokenBucketLimiter")
            .field("tokens", &stats.tokens)
            .field("queue_length", &stats.queue_length)
            .field("capacity", &stats.capacity)
            .finish()
    }
}

/// Rate limiter errors
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// The waiter was discarded before being served
    #[error("rate limiter closed before the request was served")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[tokio::test(start_paused = true)]
    async fn test_fresh_consume_is_immediate() {
        let limiter = TokenBucketLimiter::new(100, Duration::from_secs(10));
        let start = Instant::now();
        limiter.consume(30).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);

        let stats = limiter.stats();
        assert_eq!(stats.tokens, 70.0);
        assert_eq!(stats.queue_length, 0);
        assert_eq!(stats.capacity, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_refill() {
        // 10 tokens per second
        let limiter = TokenBucketLimiter::new(10, Duration::from_secs(1));
        limiter.consume(10).await.unwrap();

        let start = Instant::now();
        limiter.consume(5).await.unwrap();
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(500), "waited {waited:?}");
        assert!(waited < Duration::from_millis(600), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_head_of_line_blocks_smaller_waiters() {
        let limiter = TokenBucketLimiter::new(10, Duration::from_secs(1));
        limiter.consume(10).await.unwrap();

        let order = Arc::new(StdMutex::new(Vec::new()));
        let big = {
            let limiter = limiter.clone();
            let order = order.clone();
            tokio::spawn(async move {
                limiter.consume(8).await.unwrap();
                order.lock().unwrap().push(8);
            })
        };
        tokio::task::yield_now().await;
        let small = {
            let limiter = limiter.clone();
            let order = order.clone();
            tokio::spawn(async move {
                limiter.consume(1).await.unwrap();
                order.lock().unwrap().push(1);
            })
        };

        big.await.unwrap();
        small.await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec![8, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_weight_above_capacity_drains_full_bucket() {
        let limiter = TokenBucketLimiter::new(5, Duration::from_secs(1));
        limiter.consume(3).await.unwrap();

        let start = Instant::now();
        limiter.consume(50).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(600));
        assert!(limiter.stats().tokens < 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_waiter_does_not_consume() {
        let limiter = TokenBucketLimiter::new(10, Duration::from_secs(1));
        limiter.consume(10).await.unwrap();

        let pending = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.consume(10).await })
        };
        tokio::task::yield_now().await;
        pending.abort();
        let _ = pending.await;

        tokio::time::sleep(Duration::from_secs(2)).await;
        let stats = limiter.stats();
        assert_eq!(stats.queue_length, 0);
        assert_eq!(stats.tokens, 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_dropped_after_deduction_is_refunded() {
        // 10 tokens per second
        let limiter = TokenBucketLimiter::new(10, Duration::from_secs(1));
        limiter.consume(10).await.unwrap();

        let mut pending = Box::pin(limiter.consume(5));
        assert!(futures::poll!(pending.as_mut()).is_pending());
        assert_eq!(limiter.stats().queue_length, 1);

        // The timer serves the waiter, but the future is never polled again
        tokio::time::advance(Duration::from_millis(600)).await;
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        let served = limiter.stats();
        assert_eq!(served.queue_length, 0);
        assert!(served.tokens < 1.5, "tokens {}", served.tokens);

        drop(pending);
        let refunded = limiter.stats();
        assert!(refunded.tokens >= 5.9, "tokens {}", refunded.tokens);
        assert!(refunded.tokens <= refunded.capacity);
    }
}
