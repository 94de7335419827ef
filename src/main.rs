//! Entry point: wires the provider clients, the Stream Manager, the Session
//! Room registry, and the Translation Fan-out together behind one
//! WebSocket listener, then runs until `ctrl_c`.

use std::sync::Arc;
use interpreter_core::providers::{HttpTranslationProvider, HttpTtsProvider, WsSttProvider};
use interpreter_core::{Config, RoomRegistry, StreamManager, Transport, TranslationFanout};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    info!(bind_addr = %config.bind_addr, "starting interpretation service");

    let participants: Arc<dyn interpreter_core::model::ParticipantStore> = Arc::new(
        interpreter_core::model::HttpParticipantStore::new(config.participant_store_base_url.clone()),
    );
    let translation_store: Arc<dyn interpreter_core::model::TranslationStore> = Arc::new(
        interpreter_core::model::HttpTranslationStore::new(config.translation_store_base_url.clone()),
    );

    let stt_provider: Arc<dyn interpreter_core::providers::SpeechToTextProvider> =
        Arc::new(WsSttProvider::new(config.stt_endpoint.clone()));
    let translation_client = Arc::new(interpreter_core::providers::translation::TranslationClient::new(
        Box::new(HttpTranslationProvider::new(config.translation_endpoint.clone())),
        config.retry_policy,
    ));
    let tts_client = Arc::new(interpreter_core::providers::tts::TtsClient::new(
        Box::new(HttpTtsProvider::new(
            config.tts_endpoint.clone(),
            interpreter_core::languages::default_known_voices(),
        )),
        config.retry_policy,
    ));
    let cache = Arc::new(interpreter_core::SynthesisCache::new(config.synthesis_cache_capacity));

    let fanout = Arc::new(TranslationFanout::new(
        translation_client,
        tts_client,
        cache,
        participants.clone(),
        translation_store,
        config.translation_timeout,
    ));

    let (sentence_tx, sentence_rx) = tokio::sync::mpsc::unbounded_channel();
    let (interim_tx, interim_rx) = tokio::sync::mpsc::unbounded_channel();
    let (error_tx, error_rx) = tokio::sync::mpsc::unbounded_channel();

    let stream_manager = StreamManager::new(stt_provider, &config, sentence_tx, interim_tx, error_tx);
    let reaper = interpreter_core::stream_manager::spawn_reaper(stream_manager.clone(), config.reaper_interval);

    let rooms = Arc::new(RoomRegistry::new(config.ingress_min_frame_gap));
    let transport = Arc::new(Transport::new(
        config.clone(),
        rooms,
        stream_manager.clone(),
        participants,
        fanout,
    ));
    transport.spawn_sentence_consumer(sentence_rx);
    transport.spawn_interim_consumer(interim_rx);
    transport.spawn_error_consumer(error_rx);

    let serve_handle = tokio::spawn(transport.clone().serve());

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining streams");
    reaper.abort();
    stream_manager.destroy();
    serve_handle.abort();

    Ok(())
}
