//! Bounded retry and polling.
//!
//! Every wait in the pipeline goes through [`poll_until`] or
//! [`retry_transient`] with an explicit [`RetryPolicy`]; there are no ad hoc
//! sleep loops. Timing uses `tokio::time`, so tests can run with paused time.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::backends::ProviderError;
use crate::obs;

/// Interval and deadline for one call site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay after the first attempt (milliseconds).
    pub interval_ms: u64,
    /// Growth factor per attempt. `1.0` is a fixed interval.
    pub multiplier: f64,
    /// Upper bound for a single delay (milliseconds).
    pub max_interval_ms: u64,
    /// Total time budget (milliseconds).
    pub max_wait_ms: u64,
    /// Optional cap on the number of attempts.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval_ms: 1_000,
            multiplier: 2.0,
            max_interval_ms: 10_000,
            max_wait_ms: 60_000,
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// Same delay between every attempt.
    pub fn fixed(interval_ms: u64, max_wait_ms: u64) -> Self {
        Self {
            interval_ms,
            multiplier: 1.0,
            max_interval_ms: interval_ms,
            max_wait_ms,
            max_attempts: None,
        }
    }

    pub fn exponential(
        interval_ms: u64,
        multiplier: f64,
        max_interval_ms: u64,
        max_wait_ms: u64,
    ) -> Self {
        Self {
            interval_ms,
            multiplier,
            max_interval_ms,
            max_wait_ms,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Delay to wait after attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let scaled = self.interval_ms as f64 * self.multiplier.powi(exponent);
        let capped = scaled.min(self.max_interval_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.interval_ms == 0 {
            return Err("interval_ms must be greater than zero".to_string());
        }
        if self.multiplier.is_nan() || self.multiplier < 1.0 {
            return Err(format!("multiplier must be >= 1.0, got {}", self.multiplier));
        }
        if self.max_interval_ms < self.interval_ms {
            return Err(format!(
                "max_interval_ms ({}) must be >= interval_ms ({})",
                self.max_interval_ms, self.interval_ms
            ));
        }
        if self.max_wait_ms == 0 {
            return Err("max_wait_ms must be greater than zero".to_string());
        }
        if self.max_attempts == Some(0) {
            return Err("max_attempts must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Result of one check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus<T> {
    Done(T),
    /// Not there yet; carries the observed status for logs and timeouts.
    Pending(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("timed out waiting for {what} after {waited_ms}ms ({attempts} attempts)")]
    TimedOut {
        what: String,
        waited_ms: u64,
        attempts: u32,
        last_status: Option<String>,
        last_error: Option<String>,
    },

    #[error(transparent)]
    Fatal(#[from] ProviderError),
}

/// Call `check` until it reports `Done`, a non-transient error occurs, or the
/// policy's budget runs out.
///
/// Transient errors count as "still pending". The last check happens at the
/// deadline, never after it.
pub async fn poll_until<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut check: F,
) -> Result<T, PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollStatus<T>, ProviderError>>,
{
    let start = Instant::now();
    let deadline = start + Duration::from_millis(policy.max_wait_ms);
    let mut attempts: u32 = 0;
    let mut last_status = None;
    let mut last_error = None;

    loop {
        attempts += 1;
        match check().await {
            Ok(PollStatus::Done(value)) => return Ok(value),
            Ok(PollStatus::Pending(status)) => {
                tracing::debug!(what, attempt = attempts, status = %status, "still pending");
                last_status = Some(status);
            }
            Err(err) if err.is_transient() => {
                obs::emit_poll_retry(what, attempts, &err);
                last_error = Some(err.message);
            }
            Err(err) => return Err(PollError::Fatal(err)),
        }

        let now = Instant::now();
        let out_of_attempts = policy.max_attempts.is_some_and(|max| attempts >= max);
        if out_of_attempts || now >= deadline {
            return Err(PollError::TimedOut {
                what: what.to_string(),
                waited_ms: now.duration_since(start).as_millis() as u64,
                attempts,
                last_status,
                last_error,
            });
        }

        let delay = policy.delay_for(attempts).min(deadline - now);
        tokio::time::sleep(delay).await;
    }
}

/// Retry a read-only call on transient errors only.
///
/// Returns the last transient error once the budget is spent; any other
/// error is returned immediately. Never use this for calls with side
/// effects.
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let deadline = Instant::now() + Duration::from_millis(policy.max_wait_ms);
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => err,
            Err(err) => return Err(err),
        };

        let now = Instant::now();
        let out_of_attempts = policy.max_attempts.is_some_and(|max| attempts >= max);
        if out_of_attempts || now >= deadline {
            return Err(err);
        }
        obs::emit_poll_retry(what, attempts, &err);

        let delay = policy.delay_for(attempts).min(deadline - now);
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn fixed_policy_never_grows() {
        let policy = RetryPolicy::fixed(500, 10_000);
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(7), Duration::from_millis(500));
    }

    #[test]
    fn exponential_policy_is_capped() {
        let policy = RetryPolicy::exponential(100, 2.0, 1_000, 10_000);
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for(5), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(60), Duration::from_millis(1_000));
    }

    #[test]
    fn validate_rejects_nonsense() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(RetryPolicy::fixed(0, 1_000).validate().is_err());
        assert!(RetryPolicy::exponential(100, 0.5, 1_000, 1_000)
            .validate()
            .is_err());
        assert!(RetryPolicy::exponential(100, 2.0, 50, 1_000)
            .validate()
            .is_err());
        assert!(RetryPolicy::fixed(100, 1_000)
            .with_max_attempts(0)
            .validate()
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn poll_returns_once_done() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(1_000, 60_000);
        let value = poll_until(&policy, "thing", || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Ok(PollStatus::Pending(format!("step {}", n)))
                } else {
                    Ok(PollStatus::Done(n))
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_times_out_at_deadline() {
        let policy = RetryPolicy::fixed(1_000, 5_000);
        let started = Instant::now();
        let err = poll_until(&policy, "never", || async {
            Ok::<PollStatus<()>, ProviderError>(PollStatus::Pending("busy".to_string()))
        })
        .await
        .unwrap_err();

        match err {
            PollError::TimedOut {
                waited_ms,
                attempts,
                last_status,
                ..
            } => {
                assert_eq!(waited_ms, 5_000);
                assert_eq!(attempts, 6);
                assert_eq!(last_status.as_deref(), Some("busy"));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(started.elapsed(), Duration::from_millis(5_000));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_treats_transient_errors_as_pending() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(100, 10_000);
        let value = poll_until(&policy, "flaky", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(ProviderError::transient("throttled"))
                } else {
                    Ok(PollStatus::Done("ok"))
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, "ok");
    }

    #[tokio::test(start_paused = true)]
    async fn poll_aborts_on_fatal_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(100, 10_000);
        let err = poll_until(&policy, "broken", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<PollStatus<()>, _>(ProviderError::fatal("denied")) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, PollError::Fatal(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_respects_max_attempts() {
        let policy = RetryPolicy::fixed(100, 60_000).with_max_attempts(3);
        let err = poll_until(&policy, "capped", || async {
            Ok::<PollStatus<()>, ProviderError>(PollStatus::Pending("busy".to_string()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, PollError::TimedOut { attempts: 3, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_transient_gives_up_on_other_errors() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(100, 10_000);
        let err = retry_transient(&policy, "lookup", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(ProviderError::not_found("gone")) }
        })
        .await
        .unwrap_err();
        assert_eq!(err, ProviderError::not_found("gone"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_transient_returns_last_error_when_exhausted() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(100, 10_000).with_max_attempts(4);
        let err = retry_transient(&policy, "lookup", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(ProviderError::transient("throttled")) }
        })
        .await
        .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
