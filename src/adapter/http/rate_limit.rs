//! Client-side token-bucket rate limiting.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Token bucket refilled continuously at `tokens_per_sec`, with capacity
/// equal to one second of refill. `acquire` suspends until a token is
/// available; the lock is never held across the sleep.
pub struct RateLimiter {
    tokens_per_sec: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    refilled_at: Instant,
}

impl RateLimiter {
    #[must_use]
    pub fn new(tokens_per_sec: f64) -> Self {
        Self {
            tokens_per_sec,
            state: Mutex::new(BucketState {
                tokens: tokens_per_sec,
                refilled_at: Instant::now(),
            }),
        }
    }

    /// Take one token, waiting for refill when the bucket is empty.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock();
                let elapsed = state.refilled_at.elapsed().as_secs_f64();
                state.tokens =
                    (state.tokens + elapsed * self.tokens_per_sec).min(self.tokens_per_sec);
                state.refilled_at = Instant::now();
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    Some(Duration::from_secs_f64(
                        (1.0 - state.tokens) / self.tokens_per_sec,
                    ))
                }
            };
            match wait {
                None => return,
                Some(duration) => tokio::time::sleep(duration).await,
            }
        }
    }
}
