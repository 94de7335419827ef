//! Batch text-to-speech provider contract, plus the locale/voice resolution
//! and retry wrapper the rest of the crate calls.

use crate::languages::{base_language, locales_sharing_base, tts_voice_locale, DEFAULT_LOCALE};
use crate::retry::{with_retry, FailureInfo, RetryPolicy};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
#[error("{0}")]
pub struct TtsError(pub String);

impl From<TtsError> for FailureInfo {
    fn from(e: TtsError) -> Self {
        FailureInfo {
            message: e.0,
            ..Default::default()
        }
    }
}

/// Raw vendor call: `(text, locale, voice) -> MP3 bytes`.
#[async_trait]
pub trait TextToSpeechProvider: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        locale: &str,
        voice: &str,
    ) -> Result<Vec<u8>, TtsError>;

    /// Voices the provider actually has for a locale, used for fallback
    /// resolution. Returning an empty list means "no locale-specific voice".
    fn voices_for_locale(&self, locale: &str) -> Vec<&'static str>;
}

/// Wraps a [`TextToSpeechProvider`] with locale/voice resolution (§4.2) and
/// the retry policy. Returns `None` on irrecoverable failure so the caller
/// can simply omit the `audio-synthesized` event for that language.
pub struct TtsClient {
    provider: Box<dyn TextToSpeechProvider>,
    retry_policy: RetryPolicy,
}

impl TtsClient {
    pub fn new(provider: Box<dyn TextToSpeechProvider>, retry_policy: RetryPolicy) -> Self {
        Self {
            provider,
            retry_policy,
        }
    }

    /// Resolves a display language name to the locale used for voice
    /// selection, then to a concrete voice: a locale-specific voice if one
    /// exists, else a base-language match, else English.
    pub fn resolve_voice(&self, display_language: &str, requested_voice: Option<&str>) -> String {
        if let Some(voice) = requested_voice {
            return voice.to_string();
        }
        let locale = tts_voice_locale(display_language);
        if let Some(voice) = self.provider.voices_for_locale(locale).first() {
            return voice.to_string();
        }
        let base = base_language(locale);
        for candidate_locale in locales_sharing_base(base) {
            if let Some(voice) = self.provider.voices_for_locale(candidate_locale).first() {
                return voice.to_string();
            }
        }
        self.provider
            .voices_for_locale(DEFAULT_LOCALE)
            .first()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "default".to_string())
    }

    /// Synthesizes `text` for `display_language`. Returns `None` on
    /// irrecoverable failure — the caller omits the audio event.
    pub async fn synthesize(
        &self,
        text: &str,
        display_language: &str,
        voice: Option<&str>,
    ) -> Option<Vec<u8>> {
        let locale = tts_voice_locale(display_language);
        let resolved_voice = self.resolve_voice(display_language, voice);
        let result = with_retry("synthesize", &self.retry_policy, || async {
            self.provider
                .synthesize(text, locale, &resolved_voice)
                .await
                .map_err(FailureInfo::from)
        })
        .await;
        match result {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                tracing::warn!(display_language, error = %err, "synthesis failed permanently, omitting audio");
                None
            }
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use super::*;

    pub struct FakeTtsProvider {
        pub fail_permanently: bool,
    }

    impl Default for FakeTtsProvider {
        fn default() -> Self {
            Self { fail_permanently: false }
        }
    }

    #[async_trait]
    impl TextToSpeechProvider for FakeTtsProvider {
        async fn synthesize(
            &self,
            text: &str,
            locale: &str,
            _voice: &str,
        ) -> Result<Vec<u8>, TtsError> {
            if self.fail_permanently {
                return Err(TtsError("invalid argument".to_string()));
            }
            Ok(format!("mp3:{locale}:{text}").into_bytes())
        }

        fn voices_for_locale(&self, locale: &str) -> Vec<&'static str> {
            if locale == "en-US" {
                vec!["en-US-default"]
            } else {
                vec![]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeTtsProvider;
    use super::*;

    #[tokio::test]
    async fn synthesizes_audio_for_known_locale() {
        let client = TtsClient::new(Box::new(FakeTtsProvider::default()), RetryPolicy::default());
        let audio = client.synthesize("Hello", "English", None).await;
        assert!(audio.is_some());
    }

    #[tokio::test]
    async fn falls_back_to_english_when_no_locale_voice_exists() {
        let client = TtsClient::new(Box::new(FakeTtsProvider::default()), RetryPolicy::default());
        let voice = client.resolve_voice("French", None);
        assert_eq!(voice, "en-US-default");
    }

    #[tokio::test]
    async fn arabic_resolves_voice_against_cross_region_locale() {
        let client = TtsClient::new(Box::new(FakeTtsProvider::default()), RetryPolicy::default());
        // ar-XA has no registered voice in the fake either, so this should
        // still degrade to English rather than panicking or erroring.
        let voice = client.resolve_voice("Arabic", None);
        assert_eq!(voice, "en-US-default");
    }

    #[tokio::test]
    async fn falls_back_to_base_language_sibling_before_english() {
        // The provider has no ar-XA voice (the cross-region locale used for
        // selection), but does have one for ar-SA, a same-base sibling.
        struct ArSaOnlyProvider;
        #[async_trait]
        impl TextToSpeechProvider for ArSaOnlyProvider {
            async fn synthesize(&self, text: &str, locale: &str, _voice: &str) -> Result<Vec<u8>, TtsError> {
                Ok(format!("mp3:{locale}:{text}").into_bytes())
            }
            fn voices_for_locale(&self, locale: &str) -> Vec<&'static str> {
                if locale == "ar-SA" {
                    vec!["ar-SA-default"]
                } else {
                    vec![]
                }
            }
        }
        let client = TtsClient::new(Box::new(ArSaOnlyProvider), RetryPolicy::default());
        let voice = client.resolve_voice("Arabic", None);
        assert_eq!(voice, "ar-SA-default");
    }

    #[tokio::test]
    async fn permanent_failure_returns_none() {
        let client = TtsClient::new(
            Box::new(FakeTtsProvider { fail_permanently: true }),
            RetryPolicy::default(),
        );
        let audio = client.synthesize("Hello", "English", None).await;
        assert!(audio.is_none());
    }
}
