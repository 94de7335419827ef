//! Wire protocol: tagged JSON control messages exchanged over the
//! WebSocket's text channel. Binary frames carry raw PCM and are not
//! represented here (§5).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Inbound: sent by a connection once after joining, and again whenever its
/// preferences change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    JoinSession {
        session_id: String,
        participant_id: String,
    },
    AudioMetadata {
        participant_id: String,
        sample_rate_hz: u32,
        primary_language_code: String,
    },
    /// Re-binds the connection's upcoming binary frames to a speaker identity
    /// without reconfiguring the stream's sample rate or language.
    AudioChunkMetadata {
        participant_id: String,
        speaker_name: String,
        is_participant: bool,
    },
    SpeakerStatus {
        participant_id: String,
        is_active: bool,
        is_muted: bool,
    },
    HandRaise {
        participant_id: String,
        participant_name: String,
        hand_raised: bool,
    },
    /// The host's mechanism for granting or revoking `is_speaking`.
    SpeakPermission {
        participant_id: String,
        is_speaking: bool,
    },
}

/// Outbound: broadcast to listeners in a Session Room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    InterimTranscript {
        participant_id: String,
        speaker_name: String,
        text: String,
    },
    Translation {
        session_id: String,
        participant_id: String,
        speaker_name: String,
        original_text: String,
        original_language: String,
        /// Target language name to translated text, one entry per listener
        /// language in the room (speaker's own language included).
        translations: HashMap<String, String>,
        /// Milliseconds since the Unix epoch.
        timestamp: u64,
        has_errors: bool,
        error_count: u32,
    },
    AudioSynthesized {
        participant_id: String,
        target_language: String,
        /// Base64-encoded MP3 bytes.
        audio_base64: String,
    },
    ParticipantJoined {
        participant_id: String,
        name: String,
    },
    ParticipantLeft {
        participant_id: String,
    },
    /// Relayed verbatim from the client message of the same name.
    SpeakerStatus {
        participant_id: String,
        is_active: bool,
        is_muted: bool,
    },
    HandRaise {
        participant_id: String,
        participant_name: String,
        hand_raised: bool,
    },
    SpeakPermission {
        participant_id: String,
        is_speaking: bool,
    },
    Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_tag_is_kebab_case() {
        let msg = ClientMessage::JoinSession {
            session_id: "s1".to_string(),
            participant_id: "p1".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"join-session\""));
    }

    #[test]
    fn translation_carries_one_entry_per_target_language() {
        let mut translations = HashMap::new();
        translations.insert("Spanish".to_string(), "hola".to_string());
        translations.insert("French".to_string(), "bonjour".to_string());
        let msg = ServerMessage::Translation {
            session_id: "s1".to_string(),
            participant_id: "p1".to_string(),
            speaker_name: "Alice".to_string(),
            original_text: "hello".to_string(),
            original_language: "English".to_string(),
            translations,
            timestamp: 1_700_000_000_000,
            has_errors: false,
            error_count: 0,
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: ServerMessage = serde_json::from_str(&json).unwrap();
        match back {
            ServerMessage::Translation { translations, .. } => {
                assert_eq!(translations.get("Spanish").unwrap(), "hola");
                assert_eq!(translations.get("French").unwrap(), "bonjour");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn server_message_roundtrips() {
        let msg = ServerMessage::AudioSynthesized {
            participant_id: "p1".to_string(),
            target_language: "Spanish".to_string(),
            audio_base64: "abcd".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: ServerMessage = serde_json::from_str(&json).unwrap();
        match back {
            ServerMessage::AudioSynthesized { audio_base64, .. } => assert_eq!(audio_base64, "abcd"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
