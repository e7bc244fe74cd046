//! Retry classification and backoff calculation, shared by the fallback
//! executor for both per-provider retries and cross-provider failover.

use std::time::Duration;

use rand::Rng;

use crate::error::ProviderError;

/// Whether a provider error is worth retrying (same provider) or falling
/// back from (next provider). Client errors other than rate limiting are
/// not retryable: retrying a 401 or a 404 model name never succeeds.
pub fn is_retryable(error: &ProviderError) -> bool {
    matches!(
        error,
        ProviderError::RateLimit
            | ProviderError::ServiceUnavailable
            | ProviderError::Timeout
            | ProviderError::Network { .. }
    ) || matches!(error, ProviderError::Api { status, .. } if is_retryable_status(*status))
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

/// Exponential backoff with +/-20% jitter, capped at `max`.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exp = base.as_millis().saturating_mul(1u128 << attempt.min(20));
    let capped = exp.min(max.as_millis());
    let jitter_frac = rand::thread_rng().gen_range(-0.2..=0.2);
    let jittered = (capped as f64) * (1.0 + jitter_frac);
    Duration::from_millis(jittered.max(0.0) as u64)
}
