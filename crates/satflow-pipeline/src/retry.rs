//! Rule-level retries and the delay between attempts.
//!
//! The policy lives in the workflow's `engine` section:
//!
//! ```json
//! "backoff": {"kind": "exponential", "base_ms": 1000, "max_ms": 60000}
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Delay between attempts of a task whose rule sets `retries`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// Retry immediately.
    None,
    Fixed { delay_ms: u64 },
    /// `base_ms * 2^attempt`, capped at `max_ms`.
    Exponential { base_ms: u64, max_ms: u64 },
}

impl BackoffPolicy {
    /// Delay after the failed attempt number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let ms = match *self {
            BackoffPolicy::None => 0,
            BackoffPolicy::Fixed { delay_ms } => delay_ms,
            BackoffPolicy::Exponential { base_ms, max_ms } => {
                let factor = 2u64.saturating_pow(u32::try_from(attempt).unwrap_or(u32::MAX));
                base_ms.saturating_mul(factor).min(max_ms)
            }
        };
        Duration::from_millis(ms)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            base_ms: 1_000,
            max_ms: 60_000,
        }
    }
}

/// Run `f` up to `max_retries + 1` times, sleeping per `policy` in between.
///
/// Only [`satflow_types::SatflowError::is_retryable`] errors are retried. The
/// closure receives the 0-indexed attempt number.
pub async fn execute_with_retry<T, F, Fut>(
    f: F,
    max_retries: usize,
    policy: &BackoffPolicy,
    task: &str,
) -> satflow_types::Result<T>
where
    F: Fn(usize) -> Fut,
    Fut: std::future::Future<Output = satflow_types::Result<T>>,
{
    let mut attempt = 0;
    loop {
        match f(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    task = %task,
                    attempt = attempt + 1,
                    max_attempts = max_retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Task attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use satflow_types::SatflowError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    fn exit_failure(task: &str) -> SatflowError {
        SatflowError::TaskExecution {
            task: task.into(),
            message: "exited with code 1".into(),
            log_path: None,
            log_tail: String::new(),
        }
    }

    #[tokio::test]
    async fn second_attempt_recovers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result = execute_with_retry(
            move |attempt| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if attempt == 0 {
                        Err(exit_failure("align[contig=c1]"))
                    } else {
                        Ok(attempt)
                    }
                }
            },
            2,
            &BackoffPolicy::None,
            "align[contig=c1]",
        )
        .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn gives_up_after_retries_with_last_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result: satflow_types::Result<()> = execute_with_retry(
            move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(exit_failure("srf"))
                }
            },
            2,
            &BackoffPolicy::None,
            "srf",
        )
        .await;
        assert!(matches!(result, Err(SatflowError::TaskExecution { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn configuration_errors_are_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result: satflow_types::Result<()> = execute_with_retry(
            move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(SatflowError::Configuration("no input named 'x'".into()))
                }
            },
            5,
            &BackoffPolicy::None,
            "kmc",
        )
        .await;
        assert!(matches!(result, Err(SatflowError::Configuration(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fixed_policy_waits_between_attempts() {
        let started = Instant::now();
        let result = execute_with_retry(
            |attempt| async move {
                if attempt < 2 {
                    Err(exit_failure("dump"))
                } else {
                    Ok(())
                }
            },
            2,
            &BackoffPolicy::Fixed { delay_ms: 40 },
            "dump",
        )
        .await;
        assert!(result.is_ok());
        assert!(started.elapsed() >= Duration::from_millis(80));
    }

    #[test]
    fn exponential_delay_is_capped() {
        let policy = BackoffPolicy::Exponential {
            base_ms: 100,
            max_ms: 500,
        };
        let delays: Vec<u128> = (0..5).map(|a| policy.delay_for_attempt(a).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);
        assert_eq!(policy.delay_for_attempt(usize::MAX), Duration::from_millis(500));
        assert_eq!(BackoffPolicy::None.delay_for_attempt(3), Duration::ZERO);
    }

    #[test]
    fn policy_reads_from_json() {
        let fixed: BackoffPolicy =
            serde_json::from_str(r#"{"kind": "fixed", "delay_ms": 250}"#).unwrap();
        assert_eq!(fixed.delay_for_attempt(4), Duration::from_millis(250));
        let none: BackoffPolicy = serde_json::from_str(r#"{"kind": "none"}"#).unwrap();
        assert_eq!(none, BackoffPolicy::None);
    }
}
