//! Worker pool and token bucket working together

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use perp_data_ingestor::ingest::pool::{run_pool, PoolOptions};
use perp_data_ingestor::ingest::TokenBucketLimiter;

#[tokio::test(start_paused = true)]
async fn test_shared_limiter_paces_two_pools() {
    // Two pipelines of one platform share a 4-token bucket refilled every second
    let limiter = TokenBucketLimiter::new(4, Duration::from_secs(1));
    let started = Instant::now();
    let calls = Arc::new(Mutex::new(Vec::new()));

    let pool = |label: &'static str| {
        let options = PoolOptions::new(2).with_limiter(limiter.clone(), 1);
        let calls = calls.clone();
        run_pool((0..4).collect::<Vec<u32>>(), options, move |item| {
            let calls = calls.clone();
            async move {
                calls.lock().unwrap().push((label, item, started.elapsed()));
                Ok::<(), String>(())
            }
        })
    };

    let (funding, candles) = tokio::join!(pool("funding"), pool("candles"));
    assert_eq!(funding.succeeded, 4);
    assert_eq!(candles.succeeded, 4);

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 8);
    // The first four fit the full bucket, the rest wait for refill
    let immediate = calls.iter().filter(|(_, _, at)| *at < Duration::from_millis(10)).count();
    assert_eq!(immediate, 4);
    let last = calls.iter().map(|(_, _, at)| *at).max().unwrap();
    assert!(last >= Duration::from_millis(900), "last call at {last:?}");
}

#[tokio::test(start_paused = true)]
async fn test_item_delay_spaces_a_single_worker() {
    let started = Instant::now();
    let stamps = Arc::new(Mutex::new(Vec::new()));
    let invoked = AtomicUsize::new(0);

    let report = run_pool(
        vec!["BTC", "ETH", "SOL"],
        PoolOptions::new(1).with_delay(Duration::from_millis(100)),
        |_symbol| {
            invoked.fetch_add(1, Ordering::SeqCst);
            let stamps = stamps.clone();
            async move {
                stamps.lock().unwrap().push(started.elapsed());
                Ok::<(), String>(())
            }
        },
    )
    .await;

    assert_eq!(report.invoked, 3);
    assert_eq!(invoked.load(Ordering::SeqCst), 3);
    let stamps = stamps.lock().unwrap();
    assert!(stamps[1] >= stamps[0] + Duration::from_millis(100));
    assert!(stamps[2] >= stamps[1] + Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn test_tokens_stay_within_bounds_under_contention() {
    let limiter = TokenBucketLimiter::new(20, Duration::from_millis(500));
    let consumers: Vec<_> = (0..40u32)
        .map(|i| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.consume(1 + i % 7).await })
        })
        .collect();

    let observer = {
        let limiter = limiter.clone();
        tokio::spawn(async move {
            for _ in 0..200 {
                let stats = limiter.stats();
                assert!(stats.tokens >= 0.0, "negative tokens: {stats:?}");
                assert!(stats.tokens <= stats.capacity, "overfull bucket: {stats:?}");
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        })
    };

    for consumer in consumers {
        consumer.await.unwrap().unwrap();
    }
    observer.await.unwrap();
    assert_eq!(limiter.stats().queue_length, 0);
}
