//! Thin adapters around the external Speech-to-Text, Text Translation, and
//! Text-to-Speech vendors. The rest of the crate depends only on the traits
//! and types declared here — never on a vendor-specific field.

pub mod http;
pub mod stt;
pub mod translation;
pub mod tts;

pub use http::{HttpTranslationProvider, HttpTtsProvider, WsSttProvider};
pub use stt::{SpeechToTextProvider, SttEvent, SttStream, SttStreamConfig};
pub use translation::TranslationProvider;
pub use tts::TextToSpeechProvider;
