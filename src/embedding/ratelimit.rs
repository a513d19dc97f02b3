//! Process-wide token bucket per `(provider, api_key)` (spec §4.2, §5)

use parking_lot::Mutex;
use std::time::Instant;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// A single `(provider, api_key)` bucket. The registry in [`crate::engine`]
/// keys a `DashMap<String, TokenBucket>` by that tuple.
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<Bucket>,
}

impl TokenBucket {
    pub fn new(rps: f64, burst: u32) -> Self {
        TokenBucket {
            capacity: burst as f64,
            refill_per_sec: rps,
            state: Mutex::new(Bucket {
                tokens: burst as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Attempts to take one token; returns `Some(wait)` with how long the
    /// caller should back off before retrying if none are available.
    pub fn try_acquire(&self) -> Option<std::time::Duration> {
        let mut bucket = self.state.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            None
        } else {
            let deficit = 1.0 - bucket.tokens;
            Some(std::time::Duration::from_secs_f64(deficit / self.refill_per_sec))
        }
    }
}

/// Jittered exponential backoff: `base * 2^attempt + jitter`, capped at `max_attempts`.
pub async fn retry_with_backoff<F, Fut, T>(
    mut attempt_fn: F,
    max_attempts: u32,
    base: std::time::Duration,
) -> crate::error::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = crate::error::Result<T>>,
{
    let mut last_err = None;
    for attempt in 0..max_attempts {
        match attempt_fn().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < max_attempts => {
                let jitter_ms = rand::random::<u64>() % 100;
                let backoff = base * 2u32.pow(attempt) + std::time::Duration::from_millis(jitter_ms);
                last_err = Some(err);
                tokio::time::sleep(backoff).await;
            }
            Err(err) => return Err(err),
        }
    }
    Err(last_err.unwrap_or(crate::error::MemoriaError::Internal(
        "retry loop exited without attempting".into(),
    )))
}
