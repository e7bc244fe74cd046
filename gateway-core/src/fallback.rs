//! Cross-provider failover with per-provider retry, all bounded by a single
//! overall deadline.
//!
//! Cancellation is explicit: the caller hands in the overall deadline token,
//! each attempt gets a fresh per-attempt token linked to it via
//! [`tokio_util::sync::CancellationToken::child_token`], and the previous
//! attempt's token is cancelled before the next attempt starts so in-flight
//! sockets release promptly instead of leaking until the deadline fires.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::retry::{calculate_backoff, is_retryable};

#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub provider: String,
    pub attempt: u32,
    pub latency_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub enum FallbackError {
    /// The overall deadline tripped before any provider succeeded.
    DeadlineExceeded { attempts: Vec<AttemptRecord> },
    /// Every provider in the ranked list exhausted its retries without
    /// the deadline tripping.
    AllProvidersFailed {
        attempts: Vec<AttemptRecord>,
        providers_tried: Vec<String>,
    },
}

#[derive(Debug, Clone)]
pub struct FallbackOptions {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub streaming: bool,
}

impl Default for FallbackOptions {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_base: Duration::from_millis(200),
            backoff_max: Duration::from_secs(10),
            streaming: false,
        }
    }
}

enum AttemptOutcome<T> {
    Success(T),
    /// Retryable, or out of retries for this provider; move to next
    /// provider or retry, as the per-provider loop decides.
    ExhaustedForProvider,
    DeadlineTripped,
}

/// Runs `execute` against each provider in `providers`, in order, with
/// per-provider retry, until one succeeds or every provider/the deadline
/// is exhausted.
pub async fn run_with_fallback<T, E, F, Fut>(
    providers: &[String],
    deadline: &CancellationToken,
    options: &FallbackOptions,
    mut execute: F,
) -> Result<(T, Vec<AttemptRecord>), FallbackError>
where
    F: FnMut(String, CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<ProviderError>,
{
    let attempts_per_provider = if options.streaming {
        1
    } else {
        options.max_retries + 1
    };
    let mut log = Vec::new();
    let mut providers_tried = Vec::new();

    for provider in providers {
        providers_tried.push(provider.clone());
        let mut attempt_token: Option<CancellationToken> = None;

        for attempt in 0..attempts_per_provider {
            if deadline.is_cancelled() {
                if let Some(token) = attempt_token.take() {
                    token.cancel();
                }
                return Err(FallbackError::DeadlineExceeded { attempts: log });
            }

            if let Some(previous) = attempt_token.take() {
                previous.cancel();
            }
            let this_attempt = deadline.child_token();
            attempt_token = Some(this_attempt.clone());

            let started = Instant::now();
            let outcome = match execute(provider.clone(), this_attempt.clone()).await {
                Ok(value) => {
                    log.push(AttemptRecord {
                        provider: provider.clone(),
                        attempt,
                        latency_ms: started.elapsed().as_millis() as u64,
                        error: None,
                    });
                    AttemptOutcome::Success(value)
                }
                Err(err) => {
                    let provider_err: ProviderError = err.into();
                    log.push(AttemptRecord {
                        provider: provider.clone(),
                        attempt,
                        latency_ms: started.elapsed().as_millis() as u64,
                        error: Some(provider_err.to_string()),
                    });
                    if deadline.is_cancelled() {
                        AttemptOutcome::DeadlineTripped
                    } else if is_retryable(&provider_err) && attempt + 1 < attempts_per_provider {
                        let backoff =
                            calculate_backoff(attempt, options.backoff_base, options.backoff_max);
                        tokio::select! {
                            _ = sleep(backoff) => {}
                            _ = deadline.cancelled() => {}
                        }
                        AttemptOutcome::ExhaustedForProvider
                    } else {
                        AttemptOutcome::ExhaustedForProvider
                    }
                }
            };

            match outcome {
                AttemptOutcome::Success(value) => {
                    if let Some(token) = attempt_token.take() {
                        token.cancel();
                    }
                    return Ok((value, log));
                }
                AttemptOutcome::DeadlineTripped => {
                    if let Some(token) = attempt_token.take() {
                        token.cancel();
                    }
                    return Err(FallbackError::DeadlineExceeded { attempts: log });
                }
                AttemptOutcome::ExhaustedForProvider => continue,
            }
        }

        if let Some(token) = attempt_token.take() {
            token.cancel();
        }
    }

    Err(FallbackError::AllProvidersFailed {
        attempts: log,
        providers_tried,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn first_provider_success_short_circuits() {
        let providers = vec!["openai".to_string(), "anthropic".to_string()];
        let deadline = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let result: Result<(&str, Vec<AttemptRecord>), FallbackError> = run_with_fallback(
            &providers,
            &deadline,
            &FallbackOptions::default(),
            move |_provider, _token| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, ProviderError>("ok") }
            },
        )
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failover_to_second_provider_on_non_retryable_error() {
        let providers = vec!["openai".to_string(), "anthropic".to_string()];
        let deadline = CancellationToken::new();
        let result: Result<(&str, Vec<AttemptRecord>), FallbackError> = run_with_fallback(
            &providers,
            &deadline,
            &FallbackOptions::default(),
            move |provider, _token| {
                let provider = provider.clone();
                async move {
                    if provider == "openai" {
                        Err(ProviderError::InvalidApiKey)
                    } else {
                        Ok("ok")
                    }
                }
            },
        )
        .await;
        let (value, log) = result.unwrap();
        assert_eq!(value, "ok");
        assert_eq!(log.iter().filter(|a| a.provider == "openai").count(), 1);
    }

    #[tokio::test]
    async fn all_providers_failed_when_every_attempt_errors() {
        let providers = vec!["openai".to_string()];
        let deadline = CancellationToken::new();
        let mut options = FallbackOptions::default();
        options.backoff_base = Duration::from_millis(1);
        options.backoff_max = Duration::from_millis(5);
        let result: Result<((), Vec<AttemptRecord>), FallbackError> = run_with_fallback(
            &providers,
            &deadline,
            &options,
            move |_provider, _token| async move { Err::<(), _>(ProviderError::ServiceUnavailable) },
        )
        .await;
        match result {
            Err(FallbackError::AllProvidersFailed { attempts, .. }) => {
                assert_eq!(attempts.len(), options.max_retries as usize + 1);
            }
            _ => panic!("expected AllProvidersFailed"),
        }
    }

    #[tokio::test]
    async fn deadline_exceeded_before_any_success_returns_deadline_error() {
        let providers = vec!["openai".to_string()];
        let deadline = CancellationToken::new();
        deadline.cancel();
        let result: Result<((), Vec<AttemptRecord>), FallbackError> = run_with_fallback(
            &providers,
            &deadline,
            &FallbackOptions::default(),
            move |_provider, _token| async move { Ok::<(), ProviderError>(()) },
        )
        .await;
        assert!(matches!(result, Err(FallbackError::DeadlineExceeded { .. })));
    }

    #[tokio::test]
    async fn streaming_disables_retry_within_provider() {
        let providers = vec!["openai".to_string(), "anthropic".to_string()];
        let deadline = CancellationToken::new();
        let mut options = FallbackOptions::default();
        options.streaming = true;
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let _ = run_with_fallback::<(), ProviderError, _, _>(
            &providers,
            &deadline,
            &options,
            move |_provider, _token| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                async move { Err(ProviderError::ServiceUnavailable) }
            },
        )
        .await;
        // one attempt per provider, never per-provider retries
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
