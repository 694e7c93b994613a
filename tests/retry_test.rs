use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use mimir::{MimirError, Result, RetryPolicy};
use tokio::time::Instant;

/// Operation that fails N times then succeeds.
struct FailThenSucceed {
    fail_count: AtomicU32,
    fail_with: fn() -> MimirError,
    total_calls: AtomicU32,
}

impl FailThenSucceed {
    fn new(failures: u32, fail_with: fn() -> MimirError) -> Self {
        Self {
            fail_count: AtomicU32::new(failures),
            fail_with,
            total_calls: AtomicU32::new(0),
        }
    }

    async fn call(&self) -> Result<&'static str> {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        let remaining = self.fail_count.load(Ordering::Relaxed);
        if remaining > 0 {
            self.fail_count.fetch_sub(1, Ordering::Relaxed);
            return Err((self.fail_with)());
        }
        Ok("ok")
    }

    fn call_count(&self) -> u32 {
        self.total_calls.load(Ordering::Relaxed)
    }
}

fn network() -> MimirError {
    MimirError::Network {
        provider: "mock".into(),
        message: "connection reset".into(),
    }
}

fn timeout() -> MimirError {
    MimirError::Timeout {
        provider: "mock".into(),
        elapsed: None,
    }
}

fn auth() -> MimirError {
    MimirError::from_status("mock", 401, None, "bad key")
}

fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new()
        .max_retries(max_retries)
        .base_delay(Duration::from_millis(1))
        .jitter(Duration::ZERO)
}

#[tokio::test(start_paused = true)]
async fn retries_on_transient_error_then_succeeds() {
    let op = FailThenSucceed::new(2, network);
    let result = fast_policy(3).execute(|| op.call()).await;
    assert_eq!(result.unwrap(), "ok");
    assert_eq!(op.call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn auth_error_is_not_retried() {
    let op = FailThenSucceed::new(5, auth);
    let result = fast_policy(3).execute(|| op.call()).await;
    assert!(matches!(result, Err(MimirError::Auth { .. })));
    assert_eq!(op.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn validation_error_is_not_retried() {
    let op = FailThenSucceed::new(5, || MimirError::from_status("mock", 400, None, "bad"));
    let result = fast_policy(3).execute(|| op.call()).await;
    assert_eq!(result.unwrap_err().kind(), "validation");
    assert_eq!(op.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn circuit_open_is_not_retried() {
    let op = FailThenSucceed::new(5, || MimirError::CircuitOpen {
        provider: "mock".into(),
        retry_after: None,
    });
    let result = fast_policy(3).execute(|| op.call()).await;
    assert_eq!(result.unwrap_err().kind(), "circuit_open");
    assert_eq!(op.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn exhausting_retries_returns_last_error() {
    let op = FailThenSucceed::new(100, timeout);
    let result = fast_policy(3).execute(|| op.call()).await;
    assert!(matches!(result, Err(MimirError::Timeout { .. })));
    assert_eq!(op.call_count(), 4, "initial attempt + 3 retries");
}

#[tokio::test(start_paused = true)]
async fn disabled_policy_makes_one_attempt() {
    let op = FailThenSucceed::new(1, network);
    let result = RetryPolicy::disabled().execute(|| op.call()).await;
    assert!(result.is_err());
    assert_eq!(op.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn backoff_grows_exponentially() {
    let op = FailThenSucceed::new(3, network);
    let policy = RetryPolicy::new()
        .max_retries(3)
        .base_delay(Duration::from_secs(1))
        .jitter(Duration::ZERO);

    let start = Instant::now();
    policy.execute(|| op.call()).await.unwrap();
    let elapsed = start.elapsed();

    // 1s + 2s + 4s
    assert!(elapsed >= Duration::from_secs(7), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(8), "elapsed {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn retry_after_hint_overrides_backoff() {
    let op = FailThenSucceed::new(1, || {
        MimirError::from_status("mock", 429, Some(Duration::from_secs(10)), "slow down")
    });

    let start = Instant::now();
    fast_policy(3).execute(|| op.call()).await.unwrap();
    assert!(start.elapsed() >= Duration::from_secs(10));
    assert_eq!(op.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn oversized_retry_after_hint_is_capped_at_max_delay() {
    let op = FailThenSucceed::new(1, || {
        MimirError::from_status("mock", 429, Some(Duration::from_secs(86_400)), "come back tomorrow")
    });
    let policy = RetryPolicy::new()
        .max_retries(1)
        .max_delay(Duration::from_secs(60))
        .jitter(Duration::ZERO);

    let start = Instant::now();
    policy.execute(|| op.call()).await.unwrap();
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(60), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(61), "elapsed {elapsed:?}");
    assert_eq!(op.call_count(), 2);
}
