//! Per-provider token bucket admission control.
//!
//! Refill is lazy: tokens are topped up from the wall-clock delta only when
//! the bucket is touched, so an idle bucket costs nothing between requests.

use std::sync::Mutex;
use std::time::Instant;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenBucketError {
    #[error("invalid token bucket config: max_tokens and refill_rate must be positive")]
    InvalidConfig,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// A classical token bucket guarded by a single mutex; `try_acquire` is O(1).
#[derive(Debug)]
pub struct TokenBucket {
    max_tokens: f64,
    refill_rate: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(max_tokens: f64, refill_rate: f64) -> Result<Self, TokenBucketError> {
        if max_tokens <= 0.0 || refill_rate <= 0.0 {
            return Err(TokenBucketError::InvalidConfig);
        }
        Ok(Self {
            max_tokens,
            refill_rate,
            state: Mutex::new(BucketState {
                tokens: max_tokens,
                last_refill: Instant::now(),
            }),
        })
    }

    fn refill_locked(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.max_tokens);
            state.last_refill = now;
        }
    }

    /// Atomically refills then decrements by one if at least one token is available.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        self.refill_locked(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Refills then returns the floor of the remaining tokens.
    pub fn remaining(&self) -> u64 {
        let mut state = self.state.lock().unwrap();
        self.refill_locked(&mut state);
        state.tokens.floor() as u64
    }

    /// Seconds until at least one token will be available, minimum 1 when empty.
    pub fn retry_after(&self) -> u64 {
        let mut state = self.state.lock().unwrap();
        self.refill_locked(&mut state);
        if state.tokens >= 1.0 {
            return 0;
        }
        let deficit = 1.0 - state.tokens;
        (deficit / self.refill_rate).ceil().max(1.0) as u64
    }

    pub fn max_tokens(&self) -> f64 {
        self.max_tokens
    }
}

/// Lazily constructs one bucket per provider on first reference.
#[derive(Debug, Default)]
pub struct TokenBucketRegistry {
    buckets: dashmap::DashMap<String, std::sync::Arc<TokenBucket>>,
}

impl TokenBucketRegistry {
    pub fn new() -> Self {
        Self {
            buckets: dashmap::DashMap::new(),
        }
    }

    pub fn get_or_create(
        &self,
        provider: &str,
        max_tokens: f64,
        refill_rate: f64,
    ) -> Result<std::sync::Arc<TokenBucket>, TokenBucketError> {
        if let Some(bucket) = self.buckets.get(provider) {
            return Ok(bucket.clone());
        }
        let bucket = std::sync::Arc::new(TokenBucket::new(max_tokens, refill_rate)?);
        Ok(self
            .buckets
            .entry(provider.to_string())
            .or_insert(bucket)
            .clone())
    }
}
