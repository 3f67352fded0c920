//! Token-bucket admission limiter.

use parking_lot::Mutex;
use tokio::time::Instant;

/// Token bucket refilled continuously at `capacity` tokens per minute.
///
/// Uses `tokio::time::Instant`, so paused-clock tests can advance it.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Bucket holding `n` tokens, refilled at `n` per minute.
    pub fn per_minute(n: u32) -> Self {
        let capacity = f64::from(n);
        Self {
            capacity,
            refill_per_sec: capacity / 60.0,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token if available.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Refill to capacity.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.tokens = self.capacity;
        state.last_refill = Instant::now();
    }

    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }
}
