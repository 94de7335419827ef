//! Translation Fan-out: turns one emitted [`SentenceEvent`] into a
//! translation (and, where wanted, synthesized audio) per distinct target
//! language among the session's connected participants (§4.7).

use crate::messages::ServerMessage;
use crate::model::{ParticipantStore, PreferredOutput, TranslationRecord, TranslationStore};
use crate::providers::translation::{TranslationClient, TranslationOutcome};
use crate::providers::tts::TtsClient;
use crate::room::SessionRoom;
use crate::sentence::SentenceEvent;
use crate::synthesis_cache::SynthesisCache;
use base64::Engine;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub struct TranslationFanout {
    translation_client: Arc<TranslationClient>,
    tts_client: Arc<TtsClient>,
    cache: Arc<SynthesisCache>,
    participant_store: Arc<dyn ParticipantStore>,
    translation_store: Arc<dyn TranslationStore>,
    translation_timeout: Duration,
}

impl TranslationFanout {
    pub fn new(
        translation_client: Arc<TranslationClient>,
        tts_client: Arc<TtsClient>,
        cache: Arc<SynthesisCache>,
        participant_store: Arc<dyn ParticipantStore>,
        translation_store: Arc<dyn TranslationStore>,
        translation_timeout: Duration,
    ) -> Self {
        Self {
            translation_client,
            tts_client,
            cache,
            participant_store,
            translation_store,
            translation_timeout,
        }
    }

    /// Computes `need_text`/`need_voice`, translates and synthesizes in
    /// parallel per language, and pushes the resulting messages onto
    /// `broadcast`. Persists a [`TranslationRecord`] for every language
    /// translated into, regardless of whether synthesis was also needed.
    pub async fn handle_sentence(&self, event: SentenceEvent, room: &SessionRoom) {
        let participants = self
            .participant_store
            .connected_participants(&event.session_id)
            .await;

        let mut need_text: HashSet<String> = HashSet::new();
        let mut need_voice: HashSet<String> = HashSet::new();
        for participant in &participants {
            need_text.insert(participant.language.clone());
            if participant.preferred_output == PreferredOutput::Voice {
                need_voice.insert(participant.language.clone());
            }
        }

        let translations: Vec<(String, TranslationOutcome)> = join_all(need_text.iter().map(|target_language| {
            let fanout = self;
            let event = &event;
            async move {
                let outcome = fanout.translate_with_timeout(&event.text, &event.source_language, target_language).await;
                (target_language.clone(), outcome)
            }
        }))
        .await;

        let mut translated_text_by_language: HashMap<String, String> = HashMap::new();
        let mut error_count: u32 = 0;
        for (target_language, outcome) in &translations {
            translated_text_by_language.insert(target_language.clone(), outcome.text.clone());
            if outcome.degraded {
                error_count += 1;
            }
            self.translation_store
                .persist(TranslationRecord {
                    session_id: event.session_id.clone(),
                    participant_id: event.participant_id.clone(),
                    original_text: event.text.clone(),
                    original_language: event.source_language.clone(),
                    target_language: target_language.clone(),
                    translated_text: outcome.text.clone(),
                    confidence: event.confidence,
                    timestamp: event.emitted_at,
                })
                .await;
        }

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        room.broadcast(ServerMessage::Translation {
            session_id: event.session_id.clone(),
            participant_id: event.participant_id.clone(),
            speaker_name: event.speaker_name.clone(),
            original_text: event.text.clone(),
            original_language: event.source_language.clone(),
            translations: translated_text_by_language.clone(),
            timestamp,
            has_errors: error_count > 0,
            error_count,
        });

        let synthesized: Vec<(String, Option<Vec<u8>>)> = join_all(need_voice.iter().map(|target_language| {
            let translated_text = translated_text_by_language
                .get(target_language)
                .cloned()
                .unwrap_or_else(|| event.text.clone());
            async move { (target_language.clone(), self.synthesize_with_cache(&translated_text, target_language).await) }
        }))
        .await;

        for (target_language, audio) in synthesized {
            if let Some(bytes) = audio {
                let audio_base64 = base64::engine::general_purpose::STANDARD.encode(&bytes);
                room.broadcast(ServerMessage::AudioSynthesized {
                    participant_id: event.participant_id.clone(),
                    target_language,
                    audio_base64,
                });
            }
        }
    }

    async fn translate_with_timeout(&self, text: &str, from_lang: &str, to_lang: &str) -> TranslationOutcome {
        match tokio::time::timeout(
            self.translation_timeout,
            self.translation_client.translate(text, from_lang, to_lang),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(to_lang, "translation timed out, passing source text through");
                TranslationOutcome {
                    text: text.to_string(),
                    degraded: true,
                }
            }
        }
    }

    async fn synthesize_with_cache(&self, text: &str, language_code: &str) -> Option<Vec<u8>> {
        if let Some(cached) = self.cache.get(text, language_code) {
            return Some(cached.as_ref().clone());
        }
        let audio = self.tts_client.synthesize(text, language_code, None).await?;
        self.cache.put(text, language_code, Arc::new(audio.clone()));
        Some(audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fake::{InMemoryParticipantStore, InMemoryTranslationStore};
    use crate::model::{Participant, ParticipantRole};
    use crate::providers::translation::fake::FakeTranslationProvider;
    use crate::providers::tts::fake::FakeTtsProvider;
    use crate::retry::RetryPolicy;
    use std::time::Instant;

    fn sentence() -> SentenceEvent {
        SentenceEvent {
            text: "Hello there.".to_string(),
            source_language: "English".to_string(),
            participant_id: "speaker".to_string(),
            speaker_name: "Ada".to_string(),
            session_id: "s1".to_string(),
            confidence: 0.95,
            emitted_at: Instant::now(),
        }
    }

    fn participant(id: &str, language: &str, preferred_output: PreferredOutput) -> Participant {
        Participant {
            participant_id: id.to_string(),
            session_id: "s1".to_string(),
            name: id.to_string(),
            role: ParticipantRole::Participant,
            language: language.to_string(),
            preferred_output,
            is_speaking: false,
            hand_raised: false,
        }
    }

    #[tokio::test]
    async fn translates_to_each_listener_language_once() {
        let participants = InMemoryParticipantStore::new();
        participants.insert_participant(participant("speaker", "English", PreferredOutput::Text));
        participants.insert_participant(participant("p2", "Spanish", PreferredOutput::Text));
        participants.insert_participant(participant("p3", "Spanish", PreferredOutput::Voice));
        participants.insert_participant(participant("p4", "French", PreferredOutput::Text));

        let translation_provider = FakeTranslationProvider::default();
        let translation_client = Arc::new(TranslationClient::new(Box::new(translation_provider), RetryPolicy::default()));
        let tts_client = Arc::new(TtsClient::new(Box::new(FakeTtsProvider::default()), RetryPolicy::default()));
        let cache = Arc::new(SynthesisCache::new(10));
        let translation_store = Arc::new(InMemoryTranslationStore::new());

        let fanout = TranslationFanout::new(
            translation_client,
            tts_client,
            cache,
            Arc::new(participants),
            translation_store.clone(),
            Duration::from_secs(10),
        );

        let room = SessionRoom::new("s1".to_string(), Duration::from_millis(10));
        let mut rx = room.join(crate::ids::ConnectionId::new(), "listener".to_string());
        fanout.handle_sentence(sentence(), &room).await;

        let mut translation_messages = 0;
        let mut audio = 0;
        while let Ok(msg) = rx.try_recv() {
            match msg {
                ServerMessage::Translation { translations, has_errors, .. } => {
                    translation_messages += 1;
                    assert_eq!(translations.len(), 3); // English (speaker), Spanish, French
                    assert_eq!(translations.get("English").unwrap(), "Hello there.");
                    assert_eq!(translations.get("Spanish").unwrap(), "Hello there. [Spanish]");
                    assert_eq!(translations.get("French").unwrap(), "Hello there. [French]");
                    assert!(!has_errors);
                }
                ServerMessage::AudioSynthesized { .. } => audio += 1,
                _ => {}
            }
        }
        assert_eq!(translation_messages, 1); // exactly one message per sentence
        assert_eq!(audio, 1); // only p3 wants voice
        assert_eq!(translation_store.records.lock().len(), 3);
    }

    #[tokio::test]
    async fn sole_speaker_still_gets_a_translation_record_for_their_own_language() {
        let participants = InMemoryParticipantStore::new();
        participants.insert_participant(participant("speaker", "English", PreferredOutput::Text));

        let translation_client = Arc::new(TranslationClient::new(
            Box::new(FakeTranslationProvider::default()),
            RetryPolicy::default(),
        ));
        let tts_client = Arc::new(TtsClient::new(Box::new(FakeTtsProvider::default()), RetryPolicy::default()));
        let cache = Arc::new(SynthesisCache::new(10));
        let translation_store = Arc::new(InMemoryTranslationStore::new());

        let fanout = TranslationFanout::new(
            translation_client,
            tts_client,
            cache,
            Arc::new(participants),
            translation_store.clone(),
            Duration::from_secs(10),
        );

        let room = SessionRoom::new("s1".to_string(), Duration::from_millis(10));
        fanout.handle_sentence(sentence(), &room).await;

        let records = translation_store.records.lock();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].target_language, "English");
    }

    #[tokio::test]
    async fn second_request_for_same_text_hits_cache() {
        let participants = InMemoryParticipantStore::new();
        participants.insert_participant(participant("speaker", "English", PreferredOutput::Text));
        participants.insert_participant(participant("p2", "Spanish", PreferredOutput::Voice));

        let tts_provider = FakeTtsProvider::default();
        let translation_client = Arc::new(TranslationClient::new(
            Box::new(FakeTranslationProvider::default()),
            RetryPolicy::default(),
        ));
        let tts_client = Arc::new(TtsClient::new(Box::new(tts_provider), RetryPolicy::default()));
        let cache = Arc::new(SynthesisCache::new(10));
        let participants = Arc::new(participants);
        let translation_store = Arc::new(InMemoryTranslationStore::new());

        let fanout = TranslationFanout::new(
            translation_client,
            tts_client,
            cache.clone(),
            participants,
            translation_store,
            Duration::from_secs(10),
        );

        let room = SessionRoom::new("s1".to_string(), Duration::from_millis(10));
        room.join(crate::ids::ConnectionId::new(), "listener".to_string());
        fanout.handle_sentence(sentence(), &room).await;

        assert!(!cache.is_empty());
    }
}
