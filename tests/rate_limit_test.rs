use std::sync::Arc;
use std::time::Duration;

use mimir::transport::RateLimiter;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn first_request_does_not_wait() {
    let limiter = RateLimiter::new("test", Duration::from_secs(1));
    assert_eq!(limiter.acquire().await, Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn back_to_back_requests_are_spaced() {
    let limiter = RateLimiter::new("test", Duration::from_secs(1));
    let start = Instant::now();
    limiter.acquire().await;
    limiter.acquire().await;
    limiter.acquire().await;
    assert!(start.elapsed() >= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn idle_time_counts_toward_the_interval() {
    let limiter = RateLimiter::new("test", Duration::from_secs(1));
    limiter.acquire().await;
    tokio::time::advance(Duration::from_millis(700)).await;
    let waited = limiter.acquire().await;
    assert!(waited >= Duration::from_millis(300), "waited {waited:?}");
    assert!(waited < Duration::from_millis(310), "waited {waited:?}");
}

#[tokio::test(start_paused = true)]
async fn concurrent_callers_are_released_one_interval_apart() {
    let limiter = Arc::new(RateLimiter::new("test", Duration::from_secs(1)));
    let start = Instant::now();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let limiter = Arc::clone(&limiter);
        handles.push(tokio::spawn(async move {
            limiter.acquire().await;
            Instant::now()
        }));
    }
    let mut released = Vec::new();
    for handle in handles {
        released.push(handle.await.unwrap());
    }
    released.sort();

    for pair in released.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(1));
    }
    assert!(start.elapsed() >= Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn jitter_is_added_on_top_of_the_interval() {
    let limiter = RateLimiter::new("test", Duration::from_secs(1))
        .with_jitter(Duration::from_millis(500)..=Duration::from_secs(2));
    limiter.acquire().await;
    for _ in 0..10 {
        let waited = limiter.acquire().await;
        assert!(waited >= Duration::from_millis(1500), "waited {waited:?}");
        assert!(waited <= Duration::from_millis(3010), "waited {waited:?}");
    }
}
