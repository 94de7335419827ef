//! Streaming Speech-to-Text provider contract.
//!
//! One long-lived bidirectional stream per speaker. The core pushes raw PCM
//! frames in and reads back interim/final transcript events until the
//! provider closes the stream (its own session-duration cap, or an error).

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SttError {
    #[error("failed to open stream: {0}")]
    OpenFailed(String),
    #[error("stream write failed: {0}")]
    WriteFailed(String),
    #[error("provider error: {0}")]
    ProviderError(String),
    #[error("stream already closed")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct SttStreamConfig {
    pub sample_rate_hz: u32,
    pub primary_language_code: String,
    pub alternative_language_codes: Vec<String>,
    pub enable_automatic_punctuation: bool,
    pub enhanced_model: bool,
    pub interim_results: bool,
    pub single_utterance: bool,
}

impl SttStreamConfig {
    pub fn new(sample_rate_hz: u32, primary_language_code: impl Into<String>) -> Self {
        Self {
            sample_rate_hz,
            primary_language_code: primary_language_code.into(),
            alternative_language_codes: Vec::new(),
            enable_automatic_punctuation: true,
            enhanced_model: true,
            interim_results: true,
            single_utterance: false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum SttEvent {
    Transcript {
        transcript: String,
        language_code: String,
        confidence: f32,
        is_final: bool,
    },
    /// A vendor-reported error frame, carrying its error code when one was
    /// given so callers can classify transient vs. permanent failures.
    Error {
        message: String,
        code: Option<String>,
    },
    End,
}

/// One open streaming-STT session. The core polls `next_event` on a
/// dedicated worker task; `write_frame` is called from the same worker after
/// VAD has gated the frame.
#[async_trait]
pub trait SttStream: Send {
    async fn write_frame(&mut self, samples: &[i16]) -> Result<(), SttError>;
    async fn next_event(&mut self) -> Option<SttEvent>;
    async fn close(&mut self);
}

/// Opens streaming-STT sessions. Implemented once against the real vendor
/// API and once as an in-process fake for tests.
#[async_trait]
pub trait SpeechToTextProvider: Send + Sync {
    async fn open_stream(
        &self,
        config: SttStreamConfig,
    ) -> Result<Box<dyn SttStream>, SttError>;
}

/// Deterministic in-process fake: echoes back whatever is pushed to
/// `script_finals`/`script_interims` in order, without a network call.
/// Mirrors the shape of the teacher's `StubSTT` test double.
#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use super::*;
    use tokio::sync::mpsc;

    pub struct FakeSttProvider;

    #[async_trait]
    impl SpeechToTextProvider for FakeSttProvider {
        async fn open_stream(
            &self,
            _config: SttStreamConfig,
        ) -> Result<Box<dyn SttStream>, SttError> {
            let (tx, rx) = mpsc::unbounded_channel();
            Ok(Box::new(FakeSttStream::new(tx, rx)))
        }
    }

    pub struct FakeSttStream {
        #[allow(dead_code)]
        tx: mpsc::UnboundedSender<SttEvent>,
        rx: mpsc::UnboundedReceiver<SttEvent>,
        closed: bool,
    }

    impl FakeSttStream {
        pub fn new(
            tx: mpsc::UnboundedSender<SttEvent>,
            rx: mpsc::UnboundedReceiver<SttEvent>,
        ) -> Self {
            Self { tx, rx, closed: false }
        }

        /// Test hook: inject an event as if the vendor had produced it.
        pub fn sender(&self) -> mpsc::UnboundedSender<SttEvent> {
            self.tx.clone()
        }
    }

    #[async_trait]
    impl SttStream for FakeSttStream {
        async fn write_frame(&mut self, _samples: &[i16]) -> Result<(), SttError> {
            if self.closed {
                return Err(SttError::Closed);
            }
            Ok(())
        }

        async fn next_event(&mut self) -> Option<SttEvent> {
            self.rx.recv().await
        }

        async fn close(&mut self) {
            self.closed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeSttStream;
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn fake_stream_delivers_injected_events() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut stream = FakeSttStream::new(tx.clone(), rx);

        tx.send(SttEvent::Transcript {
            transcript: "hi".to_string(),
            language_code: "en-US".to_string(),
            confidence: 0.9,
            is_final: true,
        })
        .unwrap();

        match stream.next_event().await {
            Some(SttEvent::Transcript { transcript, .. }) => assert_eq!(transcript, "hi"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn write_fails_after_close() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut stream = FakeSttStream::new(tx, rx);
        stream.close().await;
        assert!(stream.write_frame(&[0]).await.is_err());
    }
}
