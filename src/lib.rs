//! Real-time multilingual interpretation for live meetings.
//!
//! One speaker's audio flows through voice-activity detection, a streaming
//! speech-to-text connection, sentence aggregation, and the Translation
//! Fan-out, landing as translated text and (optionally) synthesized speech
//! in every other participant's language. See each module for its piece of
//! that pipeline.

pub mod config;
pub mod fanout;
pub mod ids;
pub mod languages;
pub mod messages;
pub mod model;
pub mod providers;
pub mod retry;
pub mod room;
pub mod sentence;
pub mod speaker_stream;
pub mod stream_manager;
pub mod synthesis_cache;
pub mod transport;
pub mod vad;

pub use config::Config;
pub use fanout::TranslationFanout;
pub use ids::ConnectionId;
pub use messages::{ClientMessage, ServerMessage};
pub use room::{RoomRegistry, SessionRoom};
pub use stream_manager::StreamManager;
pub use synthesis_cache::SynthesisCache;
pub use transport::Transport;
