//! Process configuration, loaded once at startup and passed down explicitly
//! to every component — no ambient singletons, no ad hoc `std::env::var` deep
//! inside a module.

use crate::retry::RetryPolicy;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub max_frame_bytes: usize,
    pub translation_timeout: Duration,
    pub retry_policy: RetryPolicy,
    pub reaper_interval: Duration,
    pub inactivity_timeout: Duration,
    pub rotation_check_interval: Duration,
    pub rotation_age: Duration,
    pub rotation_drain: Duration,
    pub stt_session_cap: Duration,
    pub synthesis_cache_capacity: usize,
    pub ingress_min_frame_gap: Duration,
    pub stt_endpoint: String,
    pub translation_endpoint: String,
    pub tts_endpoint: String,
    pub participant_store_base_url: String,
    pub translation_store_base_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            max_frame_bytes: 10 * 1024 * 1024,
            translation_timeout: Duration::from_secs(10),
            retry_policy: RetryPolicy::default(),
            reaper_interval: Duration::from_secs(30),
            inactivity_timeout: Duration::from_secs(30),
            rotation_check_interval: Duration::from_secs(30),
            rotation_age: Duration::from_secs(4 * 60),
            rotation_drain: Duration::from_secs(2),
            stt_session_cap: Duration::from_secs(5 * 60),
            synthesis_cache_capacity: 500,
            ingress_min_frame_gap: Duration::from_millis(10),
            stt_endpoint: "ws://localhost:9001/stt".to_string(),
            translation_endpoint: "http://localhost:9002/translate".to_string(),
            tts_endpoint: "http://localhost:9003/synthesize".to_string(),
            participant_store_base_url: "http://localhost:9000/api".to_string(),
            translation_store_base_url: "http://localhost:9000/api".to_string(),
        }
    }
}

impl Config {
    /// Builds configuration from environment variables, falling back to the
    /// documented defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: std::env::var("INTERPRETER_BIND_ADDR").unwrap_or(defaults.bind_addr),
            max_frame_bytes: env_usize("INTERPRETER_MAX_FRAME_BYTES", defaults.max_frame_bytes),
            synthesis_cache_capacity: env_usize(
                "INTERPRETER_CACHE_CAPACITY",
                defaults.synthesis_cache_capacity,
            ),
            stt_endpoint: std::env::var("INTERPRETER_STT_ENDPOINT").unwrap_or(defaults.stt_endpoint),
            translation_endpoint: std::env::var("INTERPRETER_TRANSLATION_ENDPOINT")
                .unwrap_or(defaults.translation_endpoint),
            tts_endpoint: std::env::var("INTERPRETER_TTS_ENDPOINT").unwrap_or(defaults.tts_endpoint),
            participant_store_base_url: std::env::var("INTERPRETER_PARTICIPANT_STORE_URL")
                .unwrap_or(defaults.participant_store_base_url),
            translation_store_base_url: std::env::var("INTERPRETER_TRANSLATION_STORE_URL")
                .unwrap_or(defaults.translation_store_base_url),
            ..defaults
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
