use std::{sync::Mutex, time::Duration};

use tokio::time::Instant;

/// Absorbs float drift so a wait computed by [`TokenBucket::time_until_available`]
/// is always enough to pass the next [`TokenBucket::try_consume`].
const TOKEN_EPSILON: f64 = 1e-9;

/// Lazily refilled token bucket.
///
/// There is no background timer: every call first credits the tokens earned
/// since the previous call, capped at `capacity`.
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug, Clone, Copy)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket holding `capacity` tokens, refilled at `refill_rate_per_second`.
    #[must_use]
    pub fn new(capacity: u32, refill_rate_per_second: f64) -> Self {
        Self::new_at(capacity, refill_rate_per_second, Instant::now())
    }

    fn new_at(capacity: u32, refill_rate_per_second: f64, now: Instant) -> Self {
        let capacity = f64::from(capacity);
        Self {
            capacity,
            refill_rate: refill_rate_per_second.max(0.0),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: now,
            }),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Take `n` tokens if they are all available. Never consumes partially.
    pub fn try_consume(&self, n: u32) -> bool {
        self.try_consume_at(n, Instant::now())
    }

    pub fn try_consume_at(&self, n: u32, now: Instant) -> bool {
        let wanted = f64::from(n);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.refill(&mut state, now);
        if state.tokens + TOKEN_EPSILON >= wanted {
            state.tokens = (state.tokens - wanted).max(0.0);
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn available_tokens(&self) -> f64 {
        self.available_tokens_at(Instant::now())
    }

    #[must_use]
    pub fn available_tokens_at(&self, now: Instant) -> f64 {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.refill(&mut state, now);
        state.tokens
    }

    /// How long until `n` tokens will be available.
    ///
    /// Returns [`Duration::ZERO`] when they already are and [`Duration::MAX`]
    /// when they never will be (more than capacity, or no refill).
    #[must_use]
    pub fn time_until_available(&self, n: u32) -> Duration {
        self.time_until_available_at(n, Instant::now())
    }

    #[must_use]
    pub fn time_until_available_at(&self, n: u32, now: Instant) -> Duration {
        let wanted = f64::from(n);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.refill(&mut state, now);

        let deficit = wanted - state.tokens;
        if deficit <= TOKEN_EPSILON {
            return Duration::ZERO;
        }
        if wanted > self.capacity || self.refill_rate <= 0.0 {
            return Duration::MAX;
        }
        Duration::try_from_secs_f64(deficit / self.refill_rate).unwrap_or(Duration::MAX)
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        // Calls may arrive with a slightly older `now`; never move the clock back.
        if now <= state.last_refill {
            return;
        }
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);
        state.last_refill = now;
    }
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("capacity", &self.capacity)
            .field("refill_rate", &self.refill_rate)
            .finish_non_exhaustive()
    }
}
