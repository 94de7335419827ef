//! Retry wrapper: exponential backoff with jitter over a transient/permanent
//! error classification, shared by every provider client.

use rand::Rng;
use std::time::Duration;

/// Whether a failed call is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Transient,
    Permanent,
}

/// Minimal, provider-agnostic view of a failed call, fed to the classifier.
#[derive(Debug, Clone, Default)]
pub struct FailureInfo {
    pub error_code: Option<String>,
    pub http_status: Option<u16>,
    pub message: String,
    pub socket_errno: Option<&'static str>,
}

const TRANSIENT_CODES: &[&str] = &[
    "DEADLINE_EXCEEDED",
    "RESOURCE_EXHAUSTED",
    "UNAVAILABLE",
    "INTERNAL",
    "SERVICE_UNAVAILABLE",
];

const TRANSIENT_HTTP_STATUSES: &[u16] = &[408, 429, 500, 502, 503, 504];

const TRANSIENT_MESSAGE_FRAGMENTS: &[&str] = &[
    "timeout",
    "deadline",
    "unavailable",
    "resource exhausted",
    "rate limit",
    "too many requests",
];

const TRANSIENT_ERRNOS: &[&str] = &["ECONNREFUSED", "ECONNRESET", "ETIMEDOUT"];

/// Classifies a failure as transient (retry) or permanent (surface immediately).
pub fn classify(failure: &FailureInfo) -> Classification {
    if let Some(code) = &failure.error_code {
        if TRANSIENT_CODES.contains(&code.as_str()) {
            return Classification::Transient;
        }
    }
    if let Some(status) = failure.http_status {
        if TRANSIENT_HTTP_STATUSES.contains(&status) {
            return Classification::Transient;
        }
    }
    let lower = failure.message.to_lowercase();
    if TRANSIENT_MESSAGE_FRAGMENTS
        .iter()
        .any(|frag| lower.contains(frag))
    {
        return Classification::Transient;
    }
    if let Some(errno) = failure.socket_errno {
        if TRANSIENT_ERRNOS.contains(&errno) {
            return Classification::Transient;
        }
    }
    Classification::Permanent
}

/// Backoff policy. Delay before attempt `k` (0-indexed) is
/// `min(initial * multiplier^k, max) + uniform(0, jitter * that)`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub multiplier: f64,
    pub max: Duration,
    pub jitter: f64,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            multiplier: 2.0,
            max: Duration::from_secs(30),
            jitter: 0.1,
            max_attempts: 4,
        }
    }
}

impl RetryPolicy {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = (self.initial.as_secs_f64() * self.multiplier.powi(attempt as i32))
            .min(self.max.as_secs_f64());
        let jitter_span = base * self.jitter;
        let jitter = rand::thread_rng().gen_range(0.0..=jitter_span.max(0.0));
        Duration::from_secs_f64(base + jitter)
    }
}

/// Error surfaced once a retryable operation exhausts `max_attempts`, or
/// immediately for a permanent failure.
#[derive(Debug, thiserror::Error)]
#[error("{operation} failed after {attempts} attempt(s): {message}")]
pub struct RetryError {
    pub operation: &'static str,
    pub attempts: u32,
    pub message: String,
    pub classification: Classification,
}

/// Runs `op`, retrying transient failures per `policy`. `op` returns either
/// the success value or a [`FailureInfo`] describing the error; `classify`
/// decides whether to retry.
pub async fn with_retry<T, F, Fut>(
    operation: &'static str,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, FailureInfo>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(failure) => {
                let verdict = classify(&failure);
                attempt += 1;
                tracing::warn!(
                    operation,
                    attempt,
                    classification = ?verdict,
                    message = %failure.message,
                    "provider call failed"
                );
                if verdict == Classification::Permanent || attempt >= policy.max_attempts {
                    return Err(RetryError {
                        operation,
                        attempts: attempt,
                        message: failure.message,
                        classification: verdict,
                    });
                }
                tokio::time::sleep(policy.delay_for_attempt(attempt - 1)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(message: &str) -> FailureInfo {
        FailureInfo {
            message: message.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn classifies_by_error_code() {
        let f = FailureInfo {
            error_code: Some("RESOURCE_EXHAUSTED".to_string()),
            ..Default::default()
        };
        assert_eq!(classify(&f), Classification::Transient);
    }

    #[test]
    fn classifies_by_http_status() {
        let f = FailureInfo {
            http_status: Some(503),
            ..Default::default()
        };
        assert_eq!(classify(&f), Classification::Transient);
    }

    #[test]
    fn classifies_by_message_case_insensitive() {
        assert_eq!(classify(&failure("Too Many Requests")), Classification::Transient);
    }

    #[test]
    fn classifies_by_errno() {
        let f = FailureInfo {
            socket_errno: Some("ECONNRESET"),
            ..Default::default()
        };
        assert_eq!(classify(&f), Classification::Transient);
    }

    #[test]
    fn unknown_failure_is_permanent() {
        assert_eq!(classify(&failure("invalid argument")), Classification::Permanent);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_until_success() {
        let policy = RetryPolicy {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(10),
            ..Default::default()
        };
        let mut calls = 0;
        let result = with_retry("op", &policy, || {
            calls += 1;
            let this_call = calls;
            async move {
                if this_call < 3 {
                    Err(failure("timeout"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn permanent_failure_surfaces_immediately() {
        let policy = RetryPolicy::default();
        let mut calls = 0;
        let result: Result<(), RetryError> = with_retry("op", &policy, || {
            calls += 1;
            async { Err(failure("invalid argument")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_max_attempts_on_persistent_transient_failure() {
        let policy = RetryPolicy {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(5),
            max_attempts: 4,
            ..Default::default()
        };
        let mut calls = 0;
        let result: Result<(), RetryError> = with_retry("op", &policy, || {
            calls += 1;
            async { Err(failure("unavailable")) }
        })
        .await;
        assert_eq!(calls, 4);
        assert_eq!(result.unwrap_err().classification, Classification::Transient);
    }
}
