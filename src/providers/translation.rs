//! Batch text translation provider contract, plus the fail-open wrapper the
//! rest of the crate actually calls.

use crate::retry::{with_retry, FailureInfo, RetryPolicy};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
#[error("{0}")]
pub struct TranslationError(pub String);

impl From<TranslationError> for FailureInfo {
    fn from(e: TranslationError) -> Self {
        FailureInfo {
            message: e.0,
            ..Default::default()
        }
    }
}

/// Raw vendor call: `(text, from_lang, to_lang) -> translated_text`. The
/// vendor is always invoked with distinct `from`/`to`; the `from == to`
/// short-circuit lives in [`TranslationClient`], not here.
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    async fn translate(
        &self,
        text: &str,
        from_lang: &str,
        to_lang: &str,
    ) -> Result<String, TranslationError>;
}

/// Outcome of one `translate` call. `degraded` is true only when a real
/// provider failure forced the passthrough — not when `from_lang == to_lang`
/// skipped the call entirely — so callers can report `hasErrors`/`errorCount`.
pub struct TranslationOutcome {
    pub text: String,
    pub degraded: bool,
}

/// Wraps a [`TranslationProvider`] with the retry policy and the fail-open
/// passthrough behavior §4.2/§7 require: permanent failures (and retry
/// exhaustion) return the original text rather than propagating an error.
pub struct TranslationClient {
    provider: Box<dyn TranslationProvider>,
    retry_policy: RetryPolicy,
}

impl TranslationClient {
    pub fn new(provider: Box<dyn TranslationProvider>, retry_policy: RetryPolicy) -> Self {
        Self {
            provider,
            retry_policy,
        }
    }

    /// Always succeeds: on `from == to`, or on any irrecoverable provider
    /// failure, returns the original text unchanged.
    pub async fn translate(&self, text: &str, from_lang: &str, to_lang: &str) -> TranslationOutcome {
        if from_lang == to_lang {
            return TranslationOutcome {
                text: text.to_string(),
                degraded: false,
            };
        }
        let result = with_retry("translate", &self.retry_policy, || async {
            self.provider
                .translate(text, from_lang, to_lang)
                .await
                .map_err(FailureInfo::from)
        })
        .await;
        match result {
            Ok(translated) => TranslationOutcome {
                text: translated,
                degraded: false,
            },
            Err(err) => {
                tracing::warn!(
                    from_lang,
                    to_lang,
                    error = %err,
                    "translation failed permanently, passing source text through"
                );
                TranslationOutcome {
                    text: text.to_string(),
                    degraded: true,
                }
            }
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Appends `[to_lang]` to the input, deterministically, for tests.
    pub struct FakeTranslationProvider {
        pub fail_permanently_for: Option<String>,
        pub calls: AtomicUsize,
    }

    impl Default for FakeTranslationProvider {
        fn default() -> Self {
            Self {
                fail_permanently_for: None,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TranslationProvider for FakeTranslationProvider {
        async fn translate(
            &self,
            text: &str,
            _from_lang: &str,
            to_lang: &str,
        ) -> Result<String, TranslationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_permanently_for.as_deref() == Some(to_lang) {
                return Err(TranslationError("invalid argument".to_string()));
            }
            Ok(format!("{text} [{to_lang}]"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeTranslationProvider;
    use super::*;

    #[tokio::test]
    async fn same_language_is_passthrough_without_calling_provider() {
        let provider = FakeTranslationProvider::default();
        let calls_before = provider.calls.load(std::sync::atomic::Ordering::SeqCst);
        let client = TranslationClient::new(Box::new(provider), RetryPolicy::default());
        let out = client.translate("hello", "English", "English").await;
        assert_eq!(out.text, "hello");
        assert!(!out.degraded);
        assert_eq!(calls_before, 0);
    }

    #[tokio::test]
    async fn translates_via_provider() {
        let client = TranslationClient::new(
            Box::new(FakeTranslationProvider::default()),
            RetryPolicy::default(),
        );
        let out = client.translate("hello", "English", "Spanish").await;
        assert_eq!(out.text, "hello [Spanish]");
        assert!(!out.degraded);
    }

    #[tokio::test]
    async fn permanent_failure_falls_back_to_source_text() {
        let provider = FakeTranslationProvider {
            fail_permanently_for: Some("French".to_string()),
            ..Default::default()
        };
        let client = TranslationClient::new(Box::new(provider), RetryPolicy::default());
        let out = client.translate("hello", "English", "French").await;
        assert_eq!(out.text, "hello");
        assert!(out.degraded);
    }
}
