//! Speaker Stream: the per-(session, participant) state machine that owns
//! one live streaming-STT connection, gates audio through VAD, aggregates
//! fragments into sentences, and rotates the STT stream before the
//! provider's duration cap (§4.4).

use crate::providers::stt::{SpeechToTextProvider, SttError, SttEvent, SttStream, SttStreamConfig};
use crate::retry::{Classification, FailureInfo};
use crate::sentence::{EmitTrigger, SentenceAccumulator, SentenceEvent};
use crate::vad::VoiceActivityGate;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::sleep_until;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakerStreamState {
    Idle,
    Starting,
    Active,
    Rotating,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct InterimEvent {
    pub text: String,
    pub participant_id: String,
    pub speaker_name: String,
    pub session_id: String,
}

#[derive(Debug, Clone)]
pub struct SpeakerStreamErrorEvent {
    pub session_id: String,
    pub participant_id: String,
    pub message: String,
    pub fatal: bool,
}

pub struct SpeakerStreamConfig {
    pub session_id: String,
    pub participant_id: String,
    pub speaker_name: String,
    pub sample_rate_hz: u32,
    pub primary_language_code: String,
    pub rotation_check_interval: Duration,
    pub rotation_age: Duration,
    pub rotation_drain: Duration,
    /// Provider's hard session-duration cap. `rotation_age` should always
    /// fall comfortably under this; if a stream is ever still open at the
    /// cap, that means rotation failed to keep up and the worker forces a
    /// restart rather than waiting for the vendor to drop the connection.
    pub stt_session_cap: Duration,
    pub restart_delay: Duration,
    pub restart_activity_window: Duration,
}

enum Command {
    WriteFrame(Vec<i16>),
    Configure {
        sample_rate_hz: u32,
        primary_language_code: String,
    },
    Stop,
}

/// Handle returned to the Stream Manager. Cheap to clone; the worker task
/// owns all mutable state.
#[derive(Clone)]
pub struct SpeakerStreamHandle {
    commands: mpsc::UnboundedSender<Command>,
    last_activity_at: Arc<Mutex<Instant>>,
}

impl SpeakerStreamHandle {
    pub fn write_frame(&self, samples: Vec<i16>) {
        *self.last_activity_at.lock() = Instant::now();
        let _ = self.commands.send(Command::WriteFrame(samples));
    }

    pub fn configure(&self, sample_rate_hz: u32, primary_language_code: String) {
        let _ = self.commands.send(Command::Configure {
            sample_rate_hz,
            primary_language_code,
        });
    }

    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
    }

    pub fn last_activity_at(&self) -> Instant {
        *self.last_activity_at.lock()
    }
}

/// Spawns the dedicated worker task for one speaker and returns a handle to
/// it. `sentence_tx`/`interim_tx`/`error_tx` are the sinks the Stream
/// Manager wires to the Translation Fan-out and the Session Room.
pub fn spawn(
    config: SpeakerStreamConfig,
    stt_provider: Arc<dyn SpeechToTextProvider>,
    sentence_tx: mpsc::UnboundedSender<SentenceEvent>,
    interim_tx: mpsc::UnboundedSender<InterimEvent>,
    error_tx: mpsc::UnboundedSender<SpeakerStreamErrorEvent>,
) -> (SpeakerStreamHandle, JoinHandle<()>) {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let last_activity_at = Arc::new(Mutex::new(Instant::now()));

    let worker = Worker {
        config,
        stt_provider,
        sentence_tx,
        interim_tx,
        error_tx,
        commands: commands_rx,
        last_activity_at: last_activity_at.clone(),
        state: SpeakerStreamState::Idle,
        pending: VecDeque::new(),
        vad: VoiceActivityGate::new(),
        accumulator: SentenceAccumulator::new(),
        current_stream: None,
        old_stream: None,
        stream_created_at: Instant::now(),
        last_final_at: None,
        silence_deadline: None,
        drain_deadline: None,
        restart_disabled: false,
    };

    let join = tokio::spawn(worker.run());
    (
        SpeakerStreamHandle {
            commands: commands_tx,
            last_activity_at,
        },
        join,
    )
}

struct Worker {
    config: SpeakerStreamConfig,
    stt_provider: Arc<dyn SpeechToTextProvider>,
    sentence_tx: mpsc::UnboundedSender<SentenceEvent>,
    interim_tx: mpsc::UnboundedSender<InterimEvent>,
    error_tx: mpsc::UnboundedSender<SpeakerStreamErrorEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    last_activity_at: Arc<Mutex<Instant>>,

    state: SpeakerStreamState,
    pending: VecDeque<Vec<i16>>,
    vad: VoiceActivityGate,
    accumulator: SentenceAccumulator,
    current_stream: Option<Box<dyn SttStream>>,
    old_stream: Option<Box<dyn SttStream>>,
    stream_created_at: Instant,
    last_final_at: Option<Instant>,
    silence_deadline: Option<Instant>,
    drain_deadline: Option<Instant>,
    restart_disabled: bool,
}

const SENTENCE_SILENCE_THRESHOLD: Duration = Duration::from_millis(500);

impl Worker {
    async fn run(mut self) {
        let mut rotation_ticker = tokio::time::interval(self.config.rotation_check_interval);
        loop {
            let silence_at = self
                .silence_deadline
                .map(tokio::time::Instant::from_std)
                .unwrap_or_else(tokio::time::Instant::now);
            let drain_at = self
                .drain_deadline
                .map(tokio::time::Instant::from_std)
                .unwrap_or_else(tokio::time::Instant::now);

            tokio::select! {
                _ = sleep_until(silence_at), if self.silence_deadline.is_some() => {
                    self.silence_deadline = None;
                    self.flush_accumulator(EmitTrigger::Silence);
                }
                _ = sleep_until(drain_at), if self.drain_deadline.is_some() => {
                    self.drain_deadline = None;
                    if let Some(mut old) = self.old_stream.take() {
                        old.close().await;
                    }
                    if self.state == SpeakerStreamState::Rotating {
                        self.state = SpeakerStreamState::Active;
                    }
                }
                _ = rotation_ticker.tick() => {
                    self.maybe_rotate().await;
                }
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(Command::WriteFrame(samples)) => self.handle_write(samples).await,
                        Some(Command::Configure { sample_rate_hz, primary_language_code }) => {
                            self.config.sample_rate_hz = sample_rate_hz;
                            self.config.primary_language_code = primary_language_code;
                            self.restart_stream().await;
                        }
                        Some(Command::Stop) | None => {
                            self.handle_stop().await;
                            return;
                        }
                    }
                }
                event = Self::poll_stream(&mut self.current_stream), if self.current_stream.is_some() => {
                    self.handle_event(event, false).await;
                }
                event = Self::poll_stream(&mut self.old_stream), if self.old_stream.is_some() => {
                    self.handle_event(event, true).await;
                }
            }
        }
    }

    async fn poll_stream(stream: &mut Option<Box<dyn SttStream>>) -> Option<SttEvent> {
        match stream {
            Some(s) => s.next_event().await,
            None => std::future::pending::<Option<SttEvent>>().await,
        }
    }

    async fn handle_write(&mut self, samples: Vec<i16>) {
        *self.last_activity_at.lock() = Instant::now();
        match self.state {
            SpeakerStreamState::Idle => {
                self.pending.push_back(samples);
                self.state = SpeakerStreamState::Starting;
                self.open_stream().await;
            }
            SpeakerStreamState::Starting => {
                self.pending.push_back(samples);
            }
            SpeakerStreamState::Active | SpeakerStreamState::Rotating => {
                let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
                if self.vad.should_forward(&bytes) {
                    if let Some(stream) = self.current_stream.as_mut() {
                        let _ = stream.write_frame(&samples).await;
                    }
                }
            }
            SpeakerStreamState::Stopped => {}
        }
    }

    async fn open_stream(&mut self) {
        let stt_config = SttStreamConfig::new(
            self.config.sample_rate_hz,
            self.config.primary_language_code.clone(),
        );
        match self.stt_provider.open_stream(stt_config).await {
            Ok(stream) => {
                self.current_stream = Some(stream);
                self.stream_created_at = Instant::now();
                self.state = SpeakerStreamState::Active;
                self.drain_pending().await;
            }
            Err(err) => {
                self.state = SpeakerStreamState::Idle;
                let _ = self.error_tx.send(SpeakerStreamErrorEvent {
                    session_id: self.config.session_id.clone(),
                    participant_id: self.config.participant_id.clone(),
                    message: err.to_string(),
                    fatal: false,
                });
            }
        }
    }

    async fn drain_pending(&mut self) {
        while let Some(samples) = self.pending.pop_front() {
            let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
            if self.vad.should_forward(&bytes) {
                if let Some(stream) = self.current_stream.as_mut() {
                    let _ = stream.write_frame(&samples).await;
                }
            }
        }
    }

    async fn maybe_rotate(&mut self) {
        if self.state != SpeakerStreamState::Active {
            return;
        }
        if self.stream_created_at.elapsed() >= self.config.stt_session_cap {
            tracing::warn!(
                participant_id = %self.config.participant_id,
                "stream reached provider session cap without rotating, forcing restart"
            );
            self.handle_failure(FailureInfo {
                error_code: Some("UNAVAILABLE".to_string()),
                message: "stream exceeded provider session cap".to_string(),
                ..Default::default()
            })
            .await;
            return;
        }
        if self.stream_created_at.elapsed() < self.config.rotation_age {
            return;
        }
        let stt_config = SttStreamConfig::new(
            self.config.sample_rate_hz,
            self.config.primary_language_code.clone(),
        );
        match self.stt_provider.open_stream(stt_config).await {
            Ok(new_stream) => {
                self.old_stream = self.current_stream.take();
                self.current_stream = Some(new_stream);
                self.stream_created_at = Instant::now();
                self.state = SpeakerStreamState::Rotating;
                self.drain_deadline = Some(Instant::now() + self.config.rotation_drain);
                tracing::info!(
                    participant_id = %self.config.participant_id,
                    "rotating speaker stream before provider session cap"
                );
            }
            Err(err) => {
                let _ = self.error_tx.send(SpeakerStreamErrorEvent {
                    session_id: self.config.session_id.clone(),
                    participant_id: self.config.participant_id.clone(),
                    message: err.to_string(),
                    fatal: false,
                });
            }
        }
    }

    async fn handle_event(&mut self, event: Option<SttEvent>, from_old_stream: bool) {
        match event {
            Some(SttEvent::Transcript {
                transcript,
                confidence,
                is_final,
                ..
            }) => {
                if !is_final {
                    let _ = self.interim_tx.send(InterimEvent {
                        text: transcript,
                        participant_id: self.config.participant_id.clone(),
                        speaker_name: self.config.speaker_name.clone(),
                        session_id: self.config.session_id.clone(),
                    });
                    return;
                }
                self.last_final_at = Some(Instant::now());
                match self.accumulator.push_final(&transcript, confidence) {
                    Some(trigger) => self.flush_accumulator(trigger),
                    None => {
                        self.silence_deadline = Some(Instant::now() + SENTENCE_SILENCE_THRESHOLD);
                    }
                }
            }
            Some(SttEvent::Error { message, code }) => {
                if from_old_stream {
                    tracing::warn!(participant_id = %self.config.participant_id, message, "error draining old stream, ignoring");
                } else {
                    self.handle_failure(FailureInfo {
                        error_code: code,
                        message,
                        ..Default::default()
                    })
                    .await;
                }
            }
            Some(SttEvent::End) => {
                if from_old_stream {
                    self.old_stream = None;
                } else {
                    // A clean provider-initiated close with no vendor error
                    // attached; treat it like any other dropped connection.
                    self.handle_failure(FailureInfo {
                        error_code: Some("UNAVAILABLE".to_string()),
                        message: "stream ended".to_string(),
                        ..Default::default()
                    })
                    .await;
                }
            }
            None => {
                if from_old_stream {
                    self.old_stream = None;
                } else {
                    self.current_stream = None;
                    self.handle_failure(FailureInfo {
                        error_code: Some("UNAVAILABLE".to_string()),
                        message: "stream closed unexpectedly".to_string(),
                        ..Default::default()
                    })
                    .await;
                }
            }
        }
    }

    /// Classifies `failure` and either restarts the stream (transient, and
    /// restarts aren't disabled) or stops the worker for good (permanent).
    /// `RESOURCE_EXHAUSTED`/quota errors still restart once but disable all
    /// further restarts for this speaker, per §4.4, to avoid a tight loop.
    async fn handle_failure(&mut self, failure: FailureInfo) {
        let quota_error = failure.error_code.as_deref() == Some("RESOURCE_EXHAUSTED");
        if crate::retry::classify(&failure) == Classification::Transient && !self.restart_disabled {
            self.state = SpeakerStreamState::Idle;
            let recent_activity = self
                .last_final_at
                .map(|t| t.elapsed() <= self.config.restart_activity_window)
                .unwrap_or(false);
            let _ = self.error_tx.send(SpeakerStreamErrorEvent {
                session_id: self.config.session_id.clone(),
                participant_id: self.config.participant_id.clone(),
                message: failure.message.clone(),
                fatal: false,
            });
            if quota_error {
                self.restart_disabled = true;
            }
            if recent_activity {
                tokio::time::sleep(self.config.restart_delay).await;
                self.state = SpeakerStreamState::Starting;
                self.open_stream().await;
            }
        } else {
            self.state = SpeakerStreamState::Stopped;
            let _ = self.error_tx.send(SpeakerStreamErrorEvent {
                session_id: self.config.session_id.clone(),
                participant_id: self.config.participant_id.clone(),
                message: failure.message,
                fatal: true,
            });
        }
    }

    async fn restart_stream(&mut self) {
        if let Some(mut stream) = self.current_stream.take() {
            stream.close().await;
        }
        self.state = SpeakerStreamState::Idle;
    }

    fn flush_accumulator(&mut self, trigger: EmitTrigger) {
        if let Some((text, confidence)) = self.accumulator.take() {
            tracing::debug!(trigger = ?trigger, "emitting sentence event");
            let _ = self.sentence_tx.send(SentenceEvent {
                text,
                source_language: self.config.primary_language_code.clone(),
                participant_id: self.config.participant_id.clone(),
                speaker_name: self.config.speaker_name.clone(),
                session_id: self.config.session_id.clone(),
                confidence,
                emitted_at: Instant::now(),
            });
        }
    }

    async fn handle_stop(&mut self) {
        self.flush_accumulator(EmitTrigger::Flush);
        if let Some(mut stream) = self.current_stream.take() {
            stream.close().await;
        }
        if let Some(mut stream) = self.old_stream.take() {
            stream.close().await;
        }
        self.pending.clear();
        self.state = SpeakerStreamState::Stopped;
    }
}
