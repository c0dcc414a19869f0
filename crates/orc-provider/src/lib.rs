//! The Provider Adapter boundary (§6): a chat-completion call to a named
//! model with timeout/retry semantics. How any specific vendor is spoken to
//! is out of this repo's scope — this crate only defines the trait agents
//! call through, the retry/backoff helper shared by Workers and the
//! Coordinator (§4.2, §4.3), and a scripted fake for tests.

use std::time::Duration;

use async_trait::async_trait;
use orc_core::RetryConfig;
use rand::Rng;
use thiserror::Error;

pub mod http;
pub use http::{HttpProviderAdapter, HttpProviderKind};

/// What a Provider call returns (§6 Provider Adapter contract): decodable
/// text, or a marker meaning the payload was binary under the agreed
/// charset. Binary payloads never carry bytes through this boundary — the
/// caller (a Worker, §4.3) treats `Binary` as a hard failure, not content to
/// persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderResponse {
    /// Decodable text payload.
    Text(String),
    /// The payload was not decodable under the agreed charset.
    Binary,
}

/// Errors a Provider call can fail with (§6: `timeout|rate|5xx|invalid`).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The call exceeded its deadline.
    #[error("provider call timed out")]
    Timeout,
    /// The provider responded with a rate-limit status.
    #[error("provider rate limited the request")]
    RateLimited,
    /// The provider responded with a 5xx status.
    #[error("provider server error: {status}")]
    ServerError {
        /// The HTTP-equivalent status code reported.
        status: u16,
    },
    /// The request itself was invalid (bad prompt, unknown model, etc.) —
    /// never retryable, analogous to a 400 (§4.3, teacher's `is_retryable`).
    #[error("provider rejected the request: {0}")]
    Invalid(String),
}

impl ProviderError {
    /// Whether this error is worth retrying (§4.3, §7 kind 2). `Invalid` is
    /// a client-side mistake that retrying cannot fix.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProviderError::Invalid(_))
    }
}

/// The external LLM boundary consumed by Workers and the Coordinator (§6).
/// Implementations speak whatever HTTP/gRPC dialect a vendor needs; none of
/// that is in scope here.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Perform one chat-completion call. Implementations must honor
    /// `timeout` themselves and return `ProviderError::Timeout` on expiry
    /// rather than hanging past the deadline (§5 "every Provider call has a
    /// deadline").
    async fn call(
        &self,
        prompt: &str,
        model: &str,
        temperature: f32,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<ProviderResponse, ProviderError>;
}

/// Compute the uniform-random-then-doubling backoff delay for `attempt`
/// (0-based), per §4.3: "uniform random delay in this role's configured
/// [min,max], then 2x, then 4x, bounded". The multiplier saturates at 4x so
/// later attempts don't grow without bound.
pub fn compute_backoff(cfg: &RetryConfig, attempt: u32) -> Duration {
    let (lo, hi) = if cfg.min_ms <= cfg.max_ms {
        (cfg.min_ms, cfg.max_ms)
    } else {
        (cfg.max_ms, cfg.min_ms)
    };
    let base = if lo == hi {
        lo
    } else {
        rand::thread_rng().gen_range(lo..=hi)
    };
    let multiplier = 1u64 << attempt.min(2);
    let bound = cfg.max_ms.saturating_mul(4);
    base.saturating_mul(multiplier).min(bound.max(base))
}

/// Injectable sleep seam for deterministic backoff tests, the same pattern
/// the teacher's `FailoverBackend` uses for its `sleep_fn`.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Sleep for `delay`.
    async fn sleep(&self, delay: Duration);
}

/// The real clock: sleeps on the Tokio runtime.
pub struct RealClock;

#[async_trait]
impl Clock for RealClock {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Call `adapter` with retry/backoff per §4.3, up to `cfg.max_attempts`.
/// Returns the last error if every attempt is exhausted, so the caller can
/// decide whether to `mark_failed` (§7: only surfaced after exhaustion).
pub async fn call_with_retry(
    adapter: &dyn ProviderAdapter,
    clock: &dyn Clock,
    prompt: &str,
    model: &str,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
    cfg: &RetryConfig,
) -> Result<ProviderResponse, ProviderError> {
    let mut last_err = ProviderError::Invalid("no attempts configured".to_string());
    for attempt in 0..cfg.max_attempts {
        match adapter.call(prompt, model, temperature, max_tokens, timeout).await {
            Ok(resp) => return Ok(resp),
            Err(e) => {
                if !e.is_retryable() {
                    return Err(e);
                }
                last_err = e.clone();
                if attempt + 1 < cfg.max_attempts {
                    let delay = compute_backoff(cfg, attempt);
                    tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "provider call failed, backing off");
                    clock.sleep(delay).await;
                }
            }
        }
    }
    Err(last_err)
}

#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    //! A scripted fake Provider, matching the teacher's `MockBackend` idiom:
    //! a `Mutex<Vec<Result<...>>>` popped front-to-back on each call.
    use super::*;
    use tokio::sync::Mutex;

    /// Returns a pre-scripted sequence of results, one per call.
    pub struct ScriptedProvider {
        results: Mutex<Vec<Result<ProviderResponse, ProviderError>>>,
        pub calls: std::sync::atomic::AtomicU32,
    }

    impl ScriptedProvider {
        pub fn new(results: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
            Self {
                results: Mutex::new(results),
                calls: std::sync::atomic::AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ProviderAdapter for ScriptedProvider {
        async fn call(
            &self,
            _prompt: &str,
            _model: &str,
            _temperature: f32,
            _max_tokens: u32,
            _timeout: Duration,
        ) -> Result<ProviderResponse, ProviderError> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let mut results = self.results.lock().await;
            if results.is_empty() {
                Err(ProviderError::Invalid("ScriptedProvider: no more results".to_string()))
            } else {
                results.remove(0)
            }
        }
    }

    /// A clock that never actually sleeps, for fast deterministic tests.
    pub struct InstantClock;

    #[async_trait]
    impl Clock for InstantClock {
        async fn sleep(&self, _delay: Duration) {}
    }
}

#[cfg(test)]
mod tests {
    use super::fake::{InstantClock, ScriptedProvider};
    use super::*;

    fn cfg() -> RetryConfig {
        RetryConfig {
            min_ms: 10,
            max_ms: 20,
            max_attempts: 3,
        }
    }

    #[test]
    fn backoff_is_within_the_configured_bound_and_grows() {
        let cfg = cfg();
        for _ in 0..50 {
            let d0 = compute_backoff(&cfg, 0);
            let d1 = compute_backoff(&cfg, 1);
            let d2 = compute_backoff(&cfg, 2);
            assert!(d0.as_millis() >= 10 && d0.as_millis() <= 20);
            assert!(d1.as_millis() >= 20 && d1.as_millis() <= 40);
            assert!(d2.as_millis() >= 40 && d2.as_millis() <= 80);
        }
    }

    #[tokio::test]
    async fn retry_succeeds_on_second_attempt() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::Timeout),
            Ok(ProviderResponse::Text("ok".to_string())),
        ]);
        let result = call_with_retry(
            &provider,
            &InstantClock,
            "prompt",
            "model",
            0.2,
            100,
            Duration::from_secs(1),
            &cfg(),
        )
        .await;
        assert_eq!(result, Ok(ProviderResponse::Text("ok".to_string())));
        assert_eq!(provider.calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausting_retries_surfaces_the_last_error() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::Timeout),
            Err(ProviderError::Timeout),
            Err(ProviderError::ServerError { status: 503 }),
        ]);
        let result = call_with_retry(
            &provider,
            &InstantClock,
            "prompt",
            "model",
            0.2,
            100,
            Duration::from_secs(1),
            &cfg(),
        )
        .await;
        assert_eq!(result, Err(ProviderError::ServerError { status: 503 }));
        assert_eq!(provider.calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn invalid_error_is_not_retried() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::Invalid("bad prompt".to_string())),
            Ok(ProviderResponse::Text("should not be reached".to_string())),
        ]);
        let result = call_with_retry(
            &provider,
            &InstantClock,
            "prompt",
            "model",
            0.2,
            100,
            Duration::from_secs(1),
            &cfg(),
        )
        .await;
        assert!(matches!(result, Err(ProviderError::Invalid(_))));
        assert_eq!(provider.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_payload_is_a_successful_text_response() {
        let provider = ScriptedProvider::new(vec![Ok(ProviderResponse::Text(String::new()))]);
        let result = call_with_retry(
            &provider,
            &InstantClock,
            "prompt",
            "model",
            0.2,
            100,
            Duration::from_secs(1),
            &cfg(),
        )
        .await;
        assert_eq!(result, Ok(ProviderResponse::Text(String::new())));
    }
}
