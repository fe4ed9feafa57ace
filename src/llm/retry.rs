//! Retry policy for provider calls.
//!
//! 429 responses honor the server's `Retry-After` when present, otherwise
//! back off exponentially. 5xx responses back off exponentially. Everything
//! else propagates immediately. Built on `backon` with a rate-limit-aware
//! delay adjuster.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use backon::{BackoffBuilder, ExponentialBuilder};
use tracing::warn;

use crate::errors::ProviderError;

/// Base delay for the first retry attempt.
pub const BASE_RETRY_DELAY_MS: u64 = 1000;

/// Maximum retry attempts after the initial call.
pub const MAX_RETRIES: usize = 3;

/// Standard provider backoff: 1s → 2s → 4s, capped at 30s.
pub fn provider_backoff() -> ExponentialBuilder {
    ExponentialBuilder::new()
        .with_min_delay(Duration::from_millis(BASE_RETRY_DELAY_MS))
        .with_max_delay(Duration::from_secs(30))
        .with_factor(2.0)
        .with_max_times(MAX_RETRIES)
}

/// If the error carries a `Retry-After`, the delay is at least that long.
pub fn adjust_for_rate_limit(err: &ProviderError, dur: Option<Duration>) -> Option<Duration> {
    match (err, dur) {
        (
            ProviderError::RateLimited {
                retry_after_ms: Some(ms),
                ..
            },
            Some(d),
        ) => Some(d.max(Duration::from_millis(*ms))),
        (_, dur) => dur,
    }
}

/// Run `op` with the retry policy applied.
///
/// Retries only when the failure downcasts to a retryable [`ProviderError`];
/// other errors (including auth and invalid-request) propagate on the first
/// attempt.
pub async fn with_retries<F, Fut>(mut op: F) -> Result<crate::llm::types::ChatResponse>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<crate::llm::types::ChatResponse>>,
{
    let mut backoff = provider_backoff().build();

    loop {
        match op().await {
            Ok(response) => return Ok(response),
            Err(e) => {
                let retryable = e
                    .downcast_ref::<ProviderError>()
                    .map(|pe| pe.is_retryable())
                    .unwrap_or(false);
                if !retryable {
                    return Err(e);
                }

                let delay = backoff.next();
                let delay = match e.downcast_ref::<ProviderError>() {
                    Some(pe) => adjust_for_rate_limit(pe, delay),
                    None => delay,
                };

                match delay {
                    Some(d) => {
                        warn!("Provider call failed ({}), retrying in {:?}", e, d);
                        tokio::time::sleep(d).await;
                    }
                    // Retries exhausted.
                    None => return Err(e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::{ChatResponse, ContentBlock, StopReason};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn ok_response() -> ChatResponse {
        ChatResponse {
            content: vec![ContentBlock::Text { text: "ok".into() }],
            stop_reason: StopReason::EndTurn,
        }
    }

    #[test]
    fn test_adjust_rate_limited_uses_max() {
        let err = ProviderError::RateLimited {
            status: 429,
            retry_after_ms: Some(5000),
        };
        // Backoff suggests 1s, server says 5s → use 5s.
        let result = adjust_for_rate_limit(&err, Some(Duration::from_secs(1)));
        assert_eq!(result, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_adjust_rate_limited_backoff_already_larger() {
        let err = ProviderError::RateLimited {
            status: 429,
            retry_after_ms: Some(500),
        };
        let result = adjust_for_rate_limit(&err, Some(Duration::from_secs(2)));
        assert_eq!(result, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_adjust_without_header_passes_through() {
        let err = ProviderError::RateLimited {
            status: 429,
            retry_after_ms: None,
        };
        let result = adjust_for_rate_limit(&err, Some(Duration::from_secs(1)));
        assert_eq!(result, Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_adjust_server_error_passes_through() {
        let err = ProviderError::Server {
            status: 503,
            message: "overloaded".into(),
        };
        let result = adjust_for_rate_limit(&err, Some(Duration::from_secs(1)));
        assert_eq!(result, Some(Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_server_error_then_succeeds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result = with_retries(move || {
            let calls = calls_clone.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(ProviderError::Server {
                        status: 500,
                        message: "boom".into(),
                    }
                    .into())
                } else {
                    Ok(ok_response())
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_propagates_immediately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result = with_retries(move || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<ChatResponse, _>(
                    ProviderError::Auth {
                        status: 401,
                        message: "bad key".into(),
                    }
                    .into(),
                )
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhaust() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result = with_retries(move || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<ChatResponse, _>(
                    ProviderError::Server {
                        status: 502,
                        message: "bad gateway".into(),
                    }
                    .into(),
                )
            }
        })
        .await;

        assert!(result.is_err());
        // Initial call + MAX_RETRIES.
        assert_eq!(calls.load(Ordering::SeqCst), 1 + MAX_RETRIES);
    }
}
