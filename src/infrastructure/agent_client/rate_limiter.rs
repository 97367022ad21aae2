//! Token-bucket rate limiter guarding outbound calls to the Cloud Agent API.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::time::sleep;

/// Tokens refill continuously at `refill_rate` per second, capped at
/// `capacity`. `acquire` blocks until at least one token is available.
pub struct TokenBucketRateLimiter {
    tokens: Arc<Mutex<f64>>,
    capacity: f64,
    refill_rate: f64,
    last_refill: Arc<Mutex<Instant>>,
}

impl TokenBucketRateLimiter {
    pub fn new(requests_per_second: f64) -> Self {
        assert!(requests_per_second > 0.0, "requests_per_second must be positive");

        Self {
            tokens: Arc::new(Mutex::new(requests_per_second)),
            capacity: requests_per_second,
            refill_rate: requests_per_second,
            last_refill: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub async fn acquire(&self) {
        loop {
            let mut tokens = self.tokens.lock().await;
            let mut last_refill = self.last_refill.lock().await;

            let now = Instant::now();
            let elapsed = now.duration_since(*last_refill).as_secs_f64();
            let refilled = (*tokens + elapsed * self.refill_rate).min(self.capacity);

            if refilled >= 1.0 {
                *tokens = refilled - 1.0;
                *last_refill = now;
                return;
            }

            let wait_secs = (1.0 - refilled) / self.refill_rate;
            drop(tokens);
            drop(last_refill);
            sleep(Duration::from_secs_f64(wait_secs)).await;
        }
    }

    #[cfg(test)]
    pub async fn available_tokens(&self) -> f64 {
        let tokens = self.tokens.lock().await;
        let last_refill = self.last_refill.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(*last_refill).as_secs_f64();
        (*tokens + elapsed * self.refill_rate).min(self.capacity)
    }
}
