//! Transport Adapter: the `tokio-tungstenite` WebSocket server. Dispatches
//! inbound JSON text frames to control-message handling and binary frames to
//! the speaker stream for the connection's bound participant (§4.9).

use crate::config::Config;
use crate::fanout::TranslationFanout;
use crate::ids::ConnectionId;
use crate::messages::{ClientMessage, ServerMessage};
use crate::model::{ParticipantRole, ParticipantStore};
use crate::room::RoomRegistry;
use crate::sentence::SentenceEvent;
use crate::speaker_stream::{InterimEvent, SpeakerStreamErrorEvent};
use crate::stream_manager::StreamManager;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub struct Transport {
    config: Config,
    rooms: Arc<RoomRegistry>,
    streams: Arc<StreamManager>,
    participants: Arc<dyn ParticipantStore>,
    fanout: Arc<TranslationFanout>,
    /// `(session_id, participant_id)` pairs authorized to write audio,
    /// either fetched from the participant store or granted live via a
    /// `speak-permission` message (§4.8).
    speaking_authorized: Mutex<HashSet<(String, String)>>,
}

impl Transport {
    pub fn new(
        config: Config,
        rooms: Arc<RoomRegistry>,
        streams: Arc<StreamManager>,
        participants: Arc<dyn ParticipantStore>,
        fanout: Arc<TranslationFanout>,
    ) -> Self {
        Self {
            config,
            rooms,
            streams,
            participants,
            fanout,
            speaking_authorized: Mutex::new(HashSet::new()),
        }
    }

    /// Checks whether `participant_id` may currently write audio into
    /// `session_id`'s speaker stream, caching a positive result so repeated
    /// frames don't each cost a participant-store lookup.
    async fn is_authorized_to_speak(&self, session_id: &str, participant_id: &str) -> bool {
        let key = (session_id.to_string(), participant_id.to_string());
        if self.speaking_authorized.lock().contains(&key) {
            return true;
        }
        let Some(participant) = self.participants.participant(session_id, participant_id).await else {
            return false;
        };
        if participant.session_id != session_id {
            return false;
        }
        let authorized = participant.is_speaking || participant.role == ParticipantRole::Host;
        if authorized {
            self.speaking_authorized.lock().insert(key);
        }
        authorized
    }

    /// Applies a host's `speak-permission` grant or revocation.
    fn set_speaking_authorized(&self, session_id: &str, participant_id: &str, is_speaking: bool) {
        let key = (session_id.to_string(), participant_id.to_string());
        if is_speaking {
            self.speaking_authorized.lock().insert(key);
        } else {
            self.speaking_authorized.lock().remove(&key);
        }
    }

    /// Drains emitted sentences and runs the Translation Fan-out, broadcasting
    /// results into the owning session's room.
    pub fn spawn_sentence_consumer(self: &Arc<Self>, mut sentence_rx: mpsc::UnboundedReceiver<SentenceEvent>) {
        let this = self.clone();
        tokio::spawn(async move {
            while let Some(event) = sentence_rx.recv().await {
                if let Some(room) = this.rooms.get(&event.session_id) {
                    this.fanout.handle_sentence(event, &room).await;
                }
            }
        });
    }

    /// Drains interim (non-final) transcripts and broadcasts them directly,
    /// bypassing translation — interim text is shown only in the source
    /// language while the speaker is still talking.
    pub fn spawn_interim_consumer(self: &Arc<Self>, mut interim_rx: mpsc::UnboundedReceiver<InterimEvent>) {
        let this = self.clone();
        tokio::spawn(async move {
            while let Some(event) = interim_rx.recv().await {
                if let Some(room) = this.rooms.get(&event.session_id) {
                    room.broadcast(ServerMessage::InterimTranscript {
                        participant_id: event.participant_id,
                        speaker_name: event.speaker_name,
                        text: event.text,
                    });
                }
            }
        });
    }

    /// Drains speaker-stream errors and surfaces fatal ones to the owning
    /// session's listeners.
    pub fn spawn_error_consumer(self: &Arc<Self>, mut error_rx: mpsc::UnboundedReceiver<SpeakerStreamErrorEvent>) {
        let this = self.clone();
        tokio::spawn(async move {
            while let Some(event) = error_rx.recv().await {
                tracing::warn!(
                    session_id = %event.session_id,
                    participant_id = %event.participant_id,
                    fatal = event.fatal,
                    message = %event.message,
                    "speaker stream error"
                );
                if event.fatal {
                    if let Some(room) = this.rooms.get(&event.session_id) {
                        room.broadcast(ServerMessage::Error {
                            message: format!("speaker {} disconnected: {}", event.participant_id, event.message),
                        });
                    }
                }
            }
        });
    }

    pub async fn serve(self: Arc<Self>) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "listening for WebSocket connections");
        loop {
            let (socket, peer_addr) = listener.accept().await?;
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(err) = this.handle_connection(socket).await {
                    tracing::warn!(%peer_addr, error = %err, "connection closed with error");
                }
            });
        }
    }

    async fn handle_connection(&self, socket: TcpStream) -> Result<(), TransportError> {
        let ws = tokio_tungstenite::accept_async(socket).await?;
        let (mut ws_tx, mut ws_rx) = ws.split();
        let connection_id = ConnectionId::new();

        let mut conn = ConnectionState::default();

        loop {
            tokio::select! {
                incoming = ws_rx.next() => {
                    let Some(frame) = incoming else { break };
                    let frame = frame?;
                    match frame {
                        Message::Text(text) => {
                            if text.len() > self.config.max_frame_bytes {
                                tracing::warn!(len = text.len(), "rejecting oversized text frame");
                                continue;
                            }
                            self.handle_text_frame(&text, connection_id, &mut conn).await;
                        }
                        Message::Binary(bytes) => {
                            if bytes.len() > self.config.max_frame_bytes {
                                tracing::warn!(len = bytes.len(), "rejecting oversized binary frame");
                                continue;
                            }
                            self.handle_binary_frame(&bytes, &conn).await;
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
                outgoing = async {
                    match conn.room_rx.as_mut() {
                        Some(rx) => rx.recv().await,
                        None => std::future::pending().await,
                    }
                } => {
                    let Some(message) = outgoing else { continue };
                    let json = serde_json::to_string(&message)?;
                    ws_tx.send(Message::Text(json)).await?;
                }
            }
        }

        if let Some(session_id) = &conn.session_id {
            if let Some(room) = self.rooms.get(session_id) {
                if let Some(participant_id) = &conn.participant_id {
                    room.broadcast(ServerMessage::ParticipantLeft {
                        participant_id: participant_id.clone(),
                    });
                }
                room.leave(connection_id);
                self.rooms.drop_if_empty(session_id);
            }
        }
        Ok(())
    }

    async fn handle_text_frame(&self, text: &str, connection_id: ConnectionId, conn: &mut ConnectionState) {
        let Ok(message) = serde_json::from_str::<ClientMessage>(text) else {
            tracing::warn!("ignoring malformed control message");
            return;
        };
        match message {
            ClientMessage::JoinSession {
                session_id: sid,
                participant_id: pid,
            } => {
                if self.participants.session(&sid).await.is_none() {
                    tracing::warn!(session_id = %sid, "join-session for unknown session");
                    return;
                }
                let name = self
                    .participants
                    .participant(&sid, &pid)
                    .await
                    .map(|p| p.name)
                    .unwrap_or_default();
                let room = self.rooms.get_or_create(&sid);
                conn.room_rx = Some(room.join(connection_id, pid.clone()));
                conn.session_id = Some(sid);
                conn.participant_id = Some(pid.clone());
                conn.speaking_participant_id = Some(pid.clone());
                room.broadcast(ServerMessage::ParticipantJoined {
                    participant_id: pid,
                    name,
                });
            }
            ClientMessage::AudioMetadata {
                participant_id,
                sample_rate_hz,
                primary_language_code,
            } => {
                if let Some(sid) = conn.session_id.as_ref() {
                    let speaker_name = self
                        .participants
                        .participant(sid, &participant_id)
                        .await
                        .map(|p| p.name)
                        .unwrap_or_else(|| participant_id.clone());
                    let handle =
                        self.streams
                            .get_or_create(sid, &participant_id, &speaker_name, sample_rate_hz, &primary_language_code);
                    handle.configure(sample_rate_hz, primary_language_code);
                    conn.speaking_participant_id = Some(participant_id);
                }
            }
            ClientMessage::AudioChunkMetadata {
                participant_id,
                speaker_name,
                is_participant: _,
            } => {
                conn.speaking_participant_id = Some(participant_id);
                conn.speaker_name = Some(speaker_name);
            }
            ClientMessage::SpeakerStatus { participant_id, is_active, is_muted } => {
                if let Some(room) = conn.session_id.as_ref().and_then(|sid| self.rooms.get(sid)) {
                    room.broadcast(ServerMessage::SpeakerStatus { participant_id, is_active, is_muted });
                }
            }
            ClientMessage::HandRaise { participant_id, participant_name, hand_raised } => {
                if let Some(room) = conn.session_id.as_ref().and_then(|sid| self.rooms.get(sid)) {
                    room.broadcast(ServerMessage::HandRaise { participant_id, participant_name, hand_raised });
                }
            }
            ClientMessage::SpeakPermission { participant_id, is_speaking } => {
                if let Some(sid) = conn.session_id.clone() {
                    self.set_speaking_authorized(&sid, &participant_id, is_speaking);
                    if let Some(room) = self.rooms.get(&sid) {
                        room.broadcast(ServerMessage::SpeakPermission { participant_id, is_speaking });
                    }
                }
            }
        }
    }

    async fn handle_binary_frame(&self, bytes: &[u8], conn: &ConnectionState) {
        let (Some(session_id), Some(participant_id)) = (&conn.session_id, &conn.speaking_participant_id) else {
            return;
        };
        let Some(room) = self.rooms.get(session_id) else {
            return;
        };
        if !room.allow_ingress_frame(participant_id) {
            return;
        }
        if !self.is_authorized_to_speak(session_id, participant_id).await {
            tracing::warn!(session_id, participant_id, "dropping binary frame from unauthorized speaker");
            return;
        }
        let samples: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        let speaker_name = conn.speaker_name.clone().unwrap_or_else(|| participant_id.clone());
        let handle = self
            .streams
            .get_or_create(session_id, participant_id, &speaker_name, 16000, "English");
        handle.write_frame(samples);
    }
}

/// Per-connection mutable state threaded through frame handling.
#[derive(Default)]
struct ConnectionState {
    session_id: Option<String>,
    /// The identity this connection joined as.
    participant_id: Option<String>,
    /// The identity its upcoming binary frames are bound to; starts out the
    /// same as `participant_id` but can be re-pointed by `audio-metadata` or
    /// `audio-chunk-metadata` (§6).
    speaking_participant_id: Option<String>,
    speaker_name: Option<String>,
    room_rx: Option<mpsc::Receiver<ServerMessage>>,
}

/// Decodes a base64-encoded audio payload embedded in a control message.
pub fn decode_audio_base64(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::STANDARD.decode(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_roundtrip() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"hello");
        assert_eq!(decode_audio_base64(&encoded).unwrap(), b"hello");
    }
}
