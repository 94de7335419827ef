//! Stream Manager: the `(session_id, participant_id) -> SpeakerStreamHandle`
//! registry. Lazily creates a speaker stream on first frame, reaps idle ones
//! on a fixed interval (§4.5).

use crate::providers::stt::SpeechToTextProvider;
use crate::sentence::SentenceEvent;
use crate::speaker_stream::{self, InterimEvent, SpeakerStreamConfig, SpeakerStreamErrorEvent, SpeakerStreamHandle};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
struct StreamKey {
    session_id: String,
    participant_id: String,
}

struct Entry {
    handle: SpeakerStreamHandle,
    worker: JoinHandle<()>,
}

/// Owns every live speaker stream in the process. One instance per server.
pub struct StreamManager {
    streams: Mutex<HashMap<StreamKey, Entry>>,
    stt_provider: Arc<dyn SpeechToTextProvider>,
    inactivity_timeout: Duration,
    rotation_check_interval: Duration,
    rotation_age: Duration,
    rotation_drain: Duration,
    stt_session_cap: Duration,
    restart_delay: Duration,
    restart_activity_window: Duration,
    sentence_tx: mpsc::UnboundedSender<SentenceEvent>,
    interim_tx: mpsc::UnboundedSender<InterimEvent>,
    error_tx: mpsc::UnboundedSender<SpeakerStreamErrorEvent>,
}

impl StreamManager {
    pub fn new(
        stt_provider: Arc<dyn SpeechToTextProvider>,
        config: &crate::config::Config,
        sentence_tx: mpsc::UnboundedSender<SentenceEvent>,
        interim_tx: mpsc::UnboundedSender<InterimEvent>,
        error_tx: mpsc::UnboundedSender<SpeakerStreamErrorEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            streams: Mutex::new(HashMap::new()),
            stt_provider,
            inactivity_timeout: config.inactivity_timeout,
            rotation_check_interval: config.rotation_check_interval,
            rotation_age: config.rotation_age,
            rotation_drain: config.rotation_drain,
            stt_session_cap: config.stt_session_cap,
            restart_delay: Duration::from_millis(500),
            restart_activity_window: Duration::from_secs(5),
            sentence_tx,
            interim_tx,
            error_tx,
        })
    }

    /// Returns the handle for `(session_id, participant_id)`, spawning a new
    /// speaker stream worker if one doesn't already exist.
    pub fn get_or_create(
        &self,
        session_id: &str,
        participant_id: &str,
        speaker_name: &str,
        sample_rate_hz: u32,
        primary_language_code: &str,
    ) -> SpeakerStreamHandle {
        let key = StreamKey {
            session_id: session_id.to_string(),
            participant_id: participant_id.to_string(),
        };
        let mut streams = self.streams.lock();
        if let Some(entry) = streams.get(&key) {
            return entry.handle.clone();
        }
        let (handle, worker) = speaker_stream::spawn(
            SpeakerStreamConfig {
                session_id: session_id.to_string(),
                participant_id: participant_id.to_string(),
                speaker_name: speaker_name.to_string(),
                sample_rate_hz,
                primary_language_code: primary_language_code.to_string(),
                rotation_check_interval: self.rotation_check_interval,
                rotation_age: self.rotation_age,
                rotation_drain: self.rotation_drain,
                stt_session_cap: self.stt_session_cap,
                restart_delay: self.restart_delay,
                restart_activity_window: self.restart_activity_window,
            },
            self.stt_provider.clone(),
            self.sentence_tx.clone(),
            self.interim_tx.clone(),
            self.error_tx.clone(),
        );
        streams.insert(key, Entry { handle: handle.clone(), worker });
        handle
    }

    pub fn stop_stream(&self, session_id: &str, participant_id: &str) {
        let key = StreamKey {
            session_id: session_id.to_string(),
            participant_id: participant_id.to_string(),
        };
        if let Some(entry) = self.streams.lock().remove(&key) {
            entry.handle.stop();
        }
    }

    /// Stops and drops every speaker stream belonging to a session, e.g.
    /// when the last listener leaves a Session Room.
    pub fn stop_session(&self, session_id: &str) {
        let mut streams = self.streams.lock();
        let dead: Vec<StreamKey> = streams
            .keys()
            .filter(|k| k.session_id == session_id)
            .cloned()
            .collect();
        for key in dead {
            if let Some(entry) = streams.remove(&key) {
                entry.handle.stop();
            }
        }
    }

    /// Stops and drops every speaker stream. Called on process shutdown.
    pub fn destroy(&self) {
        let mut streams = self.streams.lock();
        for (_, entry) in streams.drain() {
            entry.handle.stop();
        }
    }

    /// Removes streams idle for longer than `inactivity_timeout`. Meant to
    /// be driven by a periodic task started alongside the manager.
    pub fn reap_idle(&self) {
        let mut streams = self.streams.lock();
        let timeout = self.inactivity_timeout;
        let dead: Vec<StreamKey> = streams
            .iter()
            .filter(|(_, entry)| entry.handle.last_activity_at().elapsed() > timeout)
            .map(|(key, _)| key.clone())
            .collect();
        for key in dead {
            if let Some(entry) = streams.remove(&key) {
                tracing::info!(
                    session_id = %key.session_id,
                    participant_id = %key.participant_id,
                    "reaping idle speaker stream"
                );
                entry.handle.stop();
            }
        }
    }
}

/// Spawns the periodic reaper task. Returns its `JoinHandle` so callers can
/// abort it on shutdown.
pub fn spawn_reaper(manager: Arc<StreamManager>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            manager.reap_idle();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::providers::stt::fake::FakeSttProvider;

    fn manager() -> Arc<StreamManager> {
        let (sentence_tx, _r1) = mpsc::unbounded_channel();
        let (interim_tx, _r2) = mpsc::unbounded_channel();
        let (error_tx, _r3) = mpsc::unbounded_channel();
        StreamManager::new(Arc::new(FakeSttProvider), &Config::default(), sentence_tx, interim_tx, error_tx)
    }

    #[tokio::test]
    async fn get_or_create_reuses_existing_stream() {
        let manager = manager();
        let a = manager.get_or_create("s1", "p1", "Ada", 16000, "en-US");
        let b = manager.get_or_create("s1", "p1", "Ada", 16000, "en-US");
        a.write_frame(vec![0i16; 10]);
        b.write_frame(vec![0i16; 10]);
        assert_eq!(manager.streams.lock().len(), 1);
        manager.destroy();
    }

    #[tokio::test]
    async fn stop_session_removes_only_that_sessions_streams() {
        let manager = manager();
        manager.get_or_create("s1", "p1", "Ada", 16000, "en-US");
        manager.get_or_create("s2", "p1", "Bob", 16000, "en-US");
        manager.stop_session("s1");
        assert_eq!(manager.streams.lock().len(), 1);
        manager.destroy();
    }
}
