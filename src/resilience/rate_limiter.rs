//! Client-side token bucket rate limiter
//!
//! Paces outgoing requests so the client stays under the server's limits
//! instead of provoking 429 responses. Tokens refill continuously at
//! `refill_rate` per second up to `capacity`; `acquire()` consumes one
//! token, sleeping when the bucket is empty. The bucket lock is held
//! across the sleep so waiters are admitted in order and the bucket can
//! never be driven negative.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{SdkError, SdkResult};
use crate::resilience::{Clock, SystemClock};

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Async token bucket
///
/// Generic over [`Clock`] so refill arithmetic can be tested with a mock
/// clock.
pub struct TokenBucket<C: Clock = SystemClock> {
    capacity: f64,
    refill_rate: f64,
    state: Mutex<BucketState>,
    clock: C,
}

impl TokenBucket<SystemClock> {
    /// Create a bucket with the given capacity and refill rate (tokens/sec)
    pub fn new(capacity: f64, refill_rate: f64) -> SdkResult<Self> {
        Self::with_clock(capacity, refill_rate, SystemClock)
    }
}

impl<C: Clock> TokenBucket<C> {
    /// Create a bucket with a custom clock (useful for testing)
    pub fn with_clock(capacity: f64, refill_rate: f64, clock: C) -> SdkResult<Self> {
        if capacity < 1.0 {
            return Err(SdkError::configuration("rate limiter capacity must be at least 1"));
        }
        if refill_rate <= 0.0 {
            return Err(SdkError::configuration("rate limiter refill rate must be positive"));
        }

        let state = BucketState { tokens: capacity, last_refill: clock.now() };
        Ok(Self { capacity, refill_rate, state: Mutex::new(state), clock })
    }

    /// Acquire one token, waiting if the bucket is empty
    ///
    /// Never fails; a drained bucket delays the caller until enough refill
    /// has accrued for one token.
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;
        self.refill(&mut state);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            return;
        }

        let wait = Duration::from_secs_f64((1.0 - state.tokens) / self.refill_rate);
        debug!(wait_ms = wait.as_millis() as u64, "rate limit reached, waiting for token");
        tokio::time::sleep(wait).await;
        // The refill accrued during the sleep paid for this token; move
        // the refill marker forward so it is not credited again.
        state.tokens = 0.0;
        state.last_refill = self.clock.now();
    }

    /// Current token count after refill, without consuming
    pub async fn available(&self) -> f64 {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        state.tokens
    }

    fn refill(&self, state: &mut BucketState) {
        let now = self.clock.now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);
        state.last_refill = now;
    }
}

impl<C: Clock> std::fmt::Debug for TokenBucket<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("capacity", &self.capacity)
            .field("refill_rate", &self.refill_rate)
            .finish()
    }
}
