//! Service wiring: connects the broker, initializes backends, and runs the
//! selected stage loops plus the HTTP API until shutdown.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::ValueEnum;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Duration;
use tracing::{error, info, warn};

use crate::backend::{GenerationAdapter, HttpSpeechBackend, OllamaBackend};
use crate::broker::{RedisBroker, StreamBroker};
use crate::config::{Config, StageTuning};
use crate::context::{ContextPersistence, ContextStore};
use crate::http::{create_router, AppState};
use crate::stage::{ConsumerSettings, LlmStage, StageConsumer, TtsStage};

/// Which pipeline stages this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StageSelection {
    /// Wake-word commands -> LLM responses
    Llm,
    /// LLM responses -> synthesized audio
    Tts,
    /// Both stages in one process
    All,
}

impl StageSelection {
    fn runs_llm(self) -> bool {
        matches!(self, Self::Llm | Self::All)
    }

    fn runs_tts(self) -> bool {
        matches!(self, Self::Tts | Self::All)
    }
}

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub stage: StageSelection,
    pub consumer_name: String,
}

fn consumer_settings(tuning: &StageTuning, consumer_name: &str) -> ConsumerSettings {
    ConsumerSettings {
        input_stream: tuning.input_stream.clone(),
        output_stream: tuning.output_stream.clone(),
        group: tuning.group.clone(),
        consumer_name: consumer_name.to_string(),
        read_count: tuning.read_count,
        block_ms: tuning.block_ms,
        stale_after_ms: tuning.stale_after_ms,
        reclaim_interval: Duration::from_secs(tuning.reclaim_interval_secs),
    }
}

/// Run the service until Ctrl+C.
///
/// Broker connection and (for the LLM stage) model initialization are
/// fatal; everything downstream degrades and retries instead.
pub async fn run(config: Config, opts: ServiceOptions) -> Result<()> {
    info!(
        "Starting {} (stage: {:?}, consumer: {})",
        config.service.name, opts.stage, opts.consumer_name
    );

    let redis = Arc::new(RedisBroker::connect(&config.redis.url).await?);
    let broker: Arc<dyn StreamBroker> = redis.clone();
    let persistence: Arc<dyn ContextPersistence> = redis.clone();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = JoinSet::new();
    let mut stats_streams = Vec::new();

    // LLM stage
    let language_backend = if opts.stage.runs_llm() {
        let ollama = Arc::new(OllamaBackend::new(&config.ollama));
        ollama
            .initialize()
            .await
            .context("Ollama initialization failed")?;

        // The stage cleans the question before prompt assembly; the
        // assembled prompt must reach the model intact.
        let adapter = Arc::new(
            GenerationAdapter::new(
                ollama.clone(),
                None,
                config.ollama.max_retries,
                Duration::from_secs(config.ollama.timeout_secs),
                usize::MAX,
            )
            .preserving_input(),
        );

        let context = Arc::new(ContextStore::new(persistence.clone()));
        let tuning = &config.llm_stage;
        let stage = Arc::new(LlmStage::new(
            broker.clone(),
            adapter,
            context.clone(),
            tuning.output_stream.clone(),
            config.ollama.personality_prompt.clone(),
        ));

        let consumer = Arc::new(StageConsumer::new(
            broker.clone(),
            stage,
            consumer_settings(tuning, &opts.consumer_name),
        ));
        consumer.ensure_topology().await?;
        stats_streams.push(tuning.input_stream.clone());
        stats_streams.push(tuning.output_stream.clone());

        let intake = consumer.clone();
        let intake_shutdown = shutdown_rx.clone();
        tasks.spawn(async move { intake.run_intake(intake_shutdown).await });

        let reclaim = consumer;
        let reclaim_shutdown = shutdown_rx.clone();
        tasks.spawn(async move { reclaim.run_reclaim(reclaim_shutdown).await });

        let eviction_interval = Duration::from_secs(config.context.eviction_interval_secs);
        let eviction_shutdown = shutdown_rx.clone();
        tasks.spawn(async move {
            context.run_eviction(eviction_interval, eviction_shutdown).await
        });

        Some(ollama)
    } else {
        None
    };

    // TTS stage
    let speech_adapter = if opts.stage.runs_tts() {
        let speech = &config.speech;
        let timeout = Duration::from_secs(speech.timeout_secs);
        let primary: Arc<dyn crate::backend::GenerationBackend> = Arc::new(HttpSpeechBackend::new(
            speech.engine.clone(),
            speech.endpoint.clone(),
            speech.language.clone(),
            speech.audio_format.clone(),
            timeout,
        ));
        let fallback = match (&speech.fallback_engine, &speech.fallback_endpoint) {
            (Some(engine), Some(endpoint)) => {
                let backend: Arc<dyn crate::backend::GenerationBackend> =
                    Arc::new(HttpSpeechBackend::new(
                        engine.clone(),
                        endpoint.clone(),
                        speech.language.clone(),
                        speech.audio_format.clone(),
                        timeout,
                    ));
                Some(backend)
            }
            (None, None) => None,
            _ => {
                warn!("Fallback speech engine and endpoint must both be set; ignoring fallback");
                None
            }
        };

        let adapter = Arc::new(GenerationAdapter::new(
            primary,
            fallback,
            speech.retry_attempts,
            timeout,
            speech.max_text_chars,
        ));

        let tuning = &config.tts_stage;
        let stage = Arc::new(TtsStage::new(
            broker.clone(),
            adapter.clone(),
            tuning.output_stream.clone(),
            speech.language.clone(),
        ));

        let consumer = Arc::new(StageConsumer::new(
            broker.clone(),
            stage,
            consumer_settings(tuning, &opts.consumer_name),
        ));
        consumer.ensure_topology().await?;
        stats_streams.push(tuning.input_stream.clone());
        stats_streams.push(tuning.output_stream.clone());

        let intake = consumer.clone();
        let intake_shutdown = shutdown_rx.clone();
        tasks.spawn(async move { intake.run_intake(intake_shutdown).await });

        let reclaim = consumer;
        let reclaim_shutdown = shutdown_rx.clone();
        tasks.spawn(async move { reclaim.run_reclaim(reclaim_shutdown).await });

        Some(adapter)
    } else {
        None
    };

    stats_streams.dedup();

    // HTTP API
    let state = AppState {
        broker: broker.clone(),
        language: language_backend,
        speech: speech_adapter,
        streams: stats_streams,
        service_name: config.service.name.clone(),
    };
    let router = create_router(state);
    let addr = format!("{}:{}", config.service.http.bind, config.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind HTTP listener on {}", addr))?;
    info!("HTTP API listening on {}", addr);

    let mut http_shutdown = shutdown_rx.clone();
    tasks.spawn(async move {
        let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
            let _ = http_shutdown.changed().await;
        });
        if let Err(e) = serve.await {
            error!("HTTP server error: {}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received, stopping...");
    let _ = shutdown_tx.send(true);

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            error!("Task ended abnormally: {}", e);
        }
    }

    info!("{} stopped", config.service.name);
    Ok(())
}
