//! Concrete provider clients for the three external collaborators (§1): a
//! WebSocket streaming-STT vendor, and two batch JSON/REST vendors for
//! translation and TTS. None of these are dictated by the spec — it only
//! requires something living behind the three trait contracts — so these
//! are generic enough to point at whatever vendor endpoint the deployment
//! configures.

use crate::providers::stt::{SpeechToTextProvider, SttError, SttEvent, SttStream, SttStreamConfig};
use crate::providers::translation::{TranslationError, TranslationProvider};
use crate::providers::tts::{TextToSpeechProvider, TtsError};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// Opens one WebSocket connection per stream to a vendor that speaks a
/// small JSON-control / binary-audio protocol: a text `start` frame with the
/// stream config, binary PCM frames, and text `transcript`/`end` frames back.
pub struct WsSttProvider {
    endpoint: String,
}

impl WsSttProvider {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { endpoint: endpoint.into() }
    }
}

#[derive(Serialize)]
struct StartMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    sample_rate_hz: u32,
    primary_language_code: &'a str,
    alternative_language_codes: &'a [String],
    enable_automatic_punctuation: bool,
    enhanced_model: bool,
    interim_results: bool,
    single_utterance: bool,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum VendorEvent {
    Transcript {
        transcript: String,
        language_code: String,
        confidence: f32,
        is_final: bool,
    },
    Error {
        message: String,
        #[serde(default)]
        code: Option<String>,
    },
    End,
}

#[async_trait]
impl SpeechToTextProvider for WsSttProvider {
    async fn open_stream(&self, config: SttStreamConfig) -> Result<Box<dyn SttStream>, SttError> {
        let (ws, _) = tokio_tungstenite::connect_async(&self.endpoint)
            .await
            .map_err(|e| SttError::OpenFailed(e.to_string()))?;
        let (mut sink, mut source) = ws.split();

        let start = StartMessage {
            kind: "start",
            sample_rate_hz: config.sample_rate_hz,
            primary_language_code: &config.primary_language_code,
            alternative_language_codes: &config.alternative_language_codes,
            enable_automatic_punctuation: config.enable_automatic_punctuation,
            enhanced_model: config.enhanced_model,
            interim_results: config.interim_results,
            single_utterance: config.single_utterance,
        };
        let start_json = serde_json::to_string(&start).map_err(|e| SttError::OpenFailed(e.to_string()))?;
        sink.send(Message::Text(start_json))
            .await
            .map_err(|e| SttError::OpenFailed(e.to_string()))?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                let Ok(frame) = frame else { break };
                if let Message::Text(text) = frame {
                    match serde_json::from_str::<VendorEvent>(&text) {
                        Ok(VendorEvent::Transcript {
                            transcript,
                            language_code,
                            confidence,
                            is_final,
                        }) => {
                            let _ = event_tx.send(SttEvent::Transcript {
                                transcript,
                                language_code,
                                confidence,
                                is_final,
                            });
                        }
                        Ok(VendorEvent::Error { message, code }) => {
                            let _ = event_tx.send(SttEvent::Error { message, code });
                        }
                        Ok(VendorEvent::End) => {
                            let _ = event_tx.send(SttEvent::End);
                            break;
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "dropping unparseable stt vendor frame");
                            continue;
                        }
                    }
                }
            }
        });

        Ok(Box::new(WsSttStream { sink, event_rx, closed: false }))
    }
}

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

struct WsSttStream {
    sink: WsSink,
    event_rx: mpsc::UnboundedReceiver<SttEvent>,
    closed: bool,
}

#[async_trait]
impl SttStream for WsSttStream {
    async fn write_frame(&mut self, samples: &[i16]) -> Result<(), SttError> {
        if self.closed {
            return Err(SttError::Closed);
        }
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        self.sink
            .send(Message::Binary(bytes))
            .await
            .map_err(|e| SttError::WriteFailed(e.to_string()))
    }

    async fn next_event(&mut self) -> Option<SttEvent> {
        self.event_rx.recv().await
    }

    async fn close(&mut self) {
        self.closed = true;
        let _ = self.sink.send(Message::Close(None)).await;
    }
}

/// Batch translation over a JSON REST endpoint:
/// `POST {endpoint} {text, source_language_code, target_language_code} -> {translated_text}`.
pub struct HttpTranslationProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTranslationProvider {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[derive(Serialize)]
struct TranslateRequest<'a> {
    text: &'a str,
    source_language_code: &'a str,
    target_language_code: &'a str,
}

#[derive(Deserialize)]
struct TranslateResponse {
    translated_text: String,
}

#[async_trait]
impl TranslationProvider for HttpTranslationProvider {
    async fn translate(&self, text: &str, from_lang: &str, to_lang: &str) -> Result<String, TranslationError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&TranslateRequest {
                text,
                source_language_code: from_lang,
                target_language_code: to_lang,
            })
            .send()
            .await
            .map_err(|e| TranslationError(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TranslationError(format!("http status {}", response.status())));
        }
        response
            .json::<TranslateResponse>()
            .await
            .map(|body| body.translated_text)
            .map_err(|e| TranslationError(e.to_string()))
    }
}

/// Batch text-to-speech over a JSON REST endpoint:
/// `POST {endpoint} {text, locale, voice} -> raw MP3 bytes`.
pub struct HttpTtsProvider {
    client: reqwest::Client,
    endpoint: String,
    known_voices: Vec<(&'static str, &'static str)>,
}

impl HttpTtsProvider {
    pub fn new(endpoint: impl Into<String>, known_voices: Vec<(&'static str, &'static str)>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            known_voices,
        }
    }
}

#[derive(Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    locale: &'a str,
    voice: &'a str,
}

#[async_trait]
impl TextToSpeechProvider for HttpTtsProvider {
    async fn synthesize(&self, text: &str, locale: &str, voice: &str) -> Result<Vec<u8>, TtsError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&SynthesizeRequest { text, locale, voice })
            .send()
            .await
            .map_err(|e| TtsError(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TtsError(format!("http status {}", response.status())));
        }
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| TtsError(e.to_string()))
    }

    fn voices_for_locale(&self, locale: &str) -> Vec<&'static str> {
        self.known_voices
            .iter()
            .filter(|(l, _)| *l == locale)
            .map(|(_, voice)| *voice)
            .collect()
    }
}
