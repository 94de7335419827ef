//! Data model for sessions and participants, plus the read-side store
//! interface the core consumes. Session/participant CRUD, moderation
//! endpoints, and persistence itself live outside this crate (§1).

use async_trait::async_trait;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantRole {
    Host,
    Participant,
    Guest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferredOutput {
    Voice,
    Text,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub host_participant_id: String,
    pub expires_at: Instant,
}

#[derive(Debug, Clone)]
pub struct Participant {
    pub participant_id: String,
    pub session_id: String,
    pub name: String,
    pub role: ParticipantRole,
    /// Display language name, as carried on the wire (e.g. `"English"`).
    pub language: String,
    pub preferred_output: PreferredOutput,
    pub is_speaking: bool,
    pub hand_raised: bool,
}

/// Translation Record: one row per target language per emitted sentence.
#[derive(Debug, Clone)]
pub struct TranslationRecord {
    pub session_id: String,
    pub participant_id: String,
    pub original_text: String,
    pub original_language: String,
    pub target_language: String,
    pub translated_text: String,
    pub confidence: f32,
    pub timestamp: Instant,
}

/// Read-side lookup into the externally-owned session/participant store.
/// Implemented once against the real persistence backend, and once
/// in-process for tests.
#[async_trait]
pub trait ParticipantStore: Send + Sync {
    async fn session(&self, session_id: &str) -> Option<Session>;
    async fn participant(&self, session_id: &str, participant_id: &str) -> Option<Participant>;
    /// Participants currently connected to the room, used by the
    /// Translation Fan-out to compute `need_text`/`need_voice`.
    async fn connected_participants(&self, session_id: &str) -> Vec<Participant>;
}

/// Write side: appends Translation Records off the critical path.
#[async_trait]
pub trait TranslationStore: Send + Sync {
    async fn persist(&self, record: TranslationRecord);
}

/// Looks up sessions/participants from the externally-owned REST API that
/// owns session CRUD, participant CRUD, and moderation (§1, out of scope
/// here). Read-only from this crate's perspective.
pub struct HttpParticipantStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpParticipantStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[derive(serde::Deserialize)]
struct WireParticipant {
    participant_id: String,
    session_id: String,
    name: String,
    role: String,
    language: String,
    preferred_output: String,
    is_speaking: bool,
    hand_raised: bool,
}

impl From<WireParticipant> for Participant {
    fn from(w: WireParticipant) -> Self {
        Participant {
            participant_id: w.participant_id,
            session_id: w.session_id,
            name: w.name,
            role: match w.role.as_str() {
                "host" => ParticipantRole::Host,
                "guest" => ParticipantRole::Guest,
                _ => ParticipantRole::Participant,
            },
            language: w.language,
            preferred_output: match w.preferred_output.as_str() {
                "voice" => PreferredOutput::Voice,
                _ => PreferredOutput::Text,
            },
            is_speaking: w.is_speaking,
            hand_raised: w.hand_raised,
        }
    }
}

#[async_trait]
impl ParticipantStore for HttpParticipantStore {
    async fn session(&self, session_id: &str) -> Option<Session> {
        #[derive(serde::Deserialize)]
        struct WireSession {
            session_id: String,
            host_participant_id: String,
            expires_in_secs: u64,
        }
        let url = format!("{}/sessions/{session_id}", self.base_url);
        let wire: WireSession = self.client.get(url).send().await.ok()?.json().await.ok()?;
        Some(Session {
            session_id: wire.session_id,
            host_participant_id: wire.host_participant_id,
            expires_at: Instant::now() + std::time::Duration::from_secs(wire.expires_in_secs),
        })
    }

    async fn participant(&self, session_id: &str, participant_id: &str) -> Option<Participant> {
        let url = format!("{}/sessions/{session_id}/participants/{participant_id}", self.base_url);
        let wire: WireParticipant = self.client.get(url).send().await.ok()?.json().await.ok()?;
        Some(wire.into())
    }

    async fn connected_participants(&self, session_id: &str) -> Vec<Participant> {
        let url = format!("{}/sessions/{session_id}/participants", self.base_url);
        let Ok(response) = self.client.get(url).send().await else {
            return Vec::new();
        };
        response
            .json::<Vec<WireParticipant>>()
            .await
            .unwrap_or_default()
            .into_iter()
            .map(Participant::from)
            .collect()
    }
}

/// Appends Translation Records to the externally-owned store for post-hoc
/// retrieval (transcript rendering, PDF export — both out of scope here).
pub struct HttpTranslationStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTranslationStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[derive(serde::Serialize)]
struct WireTranslationRecord<'a> {
    session_id: &'a str,
    participant_id: &'a str,
    original_text: &'a str,
    original_language: &'a str,
    target_language: &'a str,
    translated_text: &'a str,
    confidence: f32,
}

#[async_trait]
impl TranslationStore for HttpTranslationStore {
    async fn persist(&self, record: TranslationRecord) {
        let url = format!("{}/translation-records", self.base_url);
        let body = WireTranslationRecord {
            session_id: &record.session_id,
            participant_id: &record.participant_id,
            original_text: &record.original_text,
            original_language: &record.original_language,
            target_language: &record.target_language,
            translated_text: &record.translated_text,
            confidence: record.confidence,
        };
        if let Err(err) = self.client.post(url).json(&body).send().await {
            tracing::warn!(error = %err, "failed to persist translation record");
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct InMemoryParticipantStore {
        sessions: Mutex<HashMap<String, Session>>,
        participants: Mutex<HashMap<(String, String), Participant>>,
    }

    impl InMemoryParticipantStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert_session(&self, session: Session) {
            self.sessions.lock().insert(session.session_id.clone(), session);
        }

        pub fn insert_participant(&self, participant: Participant) {
            self.participants.lock().insert(
                (participant.session_id.clone(), participant.participant_id.clone()),
                participant,
            );
        }
    }

    #[async_trait]
    impl ParticipantStore for InMemoryParticipantStore {
        async fn session(&self, session_id: &str) -> Option<Session> {
            self.sessions.lock().get(session_id).cloned()
        }

        async fn participant(&self, session_id: &str, participant_id: &str) -> Option<Participant> {
            self.participants
                .lock()
                .get(&(session_id.to_string(), participant_id.to_string()))
                .cloned()
        }

        async fn connected_participants(&self, session_id: &str) -> Vec<Participant> {
            self.participants
                .lock()
                .values()
                .filter(|p| p.session_id == session_id)
                .cloned()
                .collect()
        }
    }

    #[derive(Default)]
    pub struct InMemoryTranslationStore {
        pub records: Mutex<Vec<TranslationRecord>>,
    }

    impl InMemoryTranslationStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl TranslationStore for InMemoryTranslationStore {
        async fn persist(&self, record: TranslationRecord) {
            self.records.lock().push(record);
        }
    }
}
