use super::state::AppState;
use crate::audio;
use crate::backend::{AdapterStats, GenerateOptions};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct BannerResponse {
    pub service: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub broker_connected: bool,
    /// Present only when this process runs the LLM stage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_ready: Option<bool>,
    /// Present only when this process runs the TTS stage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_configured: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub text: String,

    /// Override the configured synthesis language
    pub language: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    /// Base64-encoded audio
    pub audio_data: String,
    pub audio_format: String,
    pub audio_size: usize,
    pub duration_seconds: Option<f64>,
    pub engine: String,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech: Option<AdapterStats>,
    /// Stream name → current length; absent entries failed to query
    pub stream_lengths: HashMap<String, usize>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /
pub async fn banner(State(state): State<AppState>) -> impl IntoResponse {
    Json(BannerResponse {
        service: state.service_name.clone(),
        status: "running".to_string(),
    })
}

/// GET /health
/// Reports broker connectivity plus per-stage backend readiness. Responds
/// 503 when the broker is unreachable or a configured backend is not ready.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let broker_connected = match state.broker.ping().await {
        Ok(()) => true,
        Err(e) => {
            error!("Health check: broker ping failed: {}", e);
            false
        }
    };

    let language_ready = state.language.as_ref().map(|backend| backend.is_ready());
    let speech_configured = state.speech.as_ref().map(|_| true);

    let healthy = broker_connected && language_ready.unwrap_or(true);
    let status = if healthy { "healthy" } else { "unhealthy" };

    let body = Json(HealthResponse {
        status: status.to_string(),
        broker_connected,
        language_ready,
        speech_configured,
    });

    if healthy {
        (StatusCode::OK, body).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, body).into_response()
    }
}

/// POST /generate
/// One-shot speech synthesis outside the stream pipeline, for integration
/// checks and manual testing.
pub async fn generate_speech(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> impl IntoResponse {
    let Some(adapter) = state.speech.as_ref() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: "Speech synthesis is not enabled in this process".to_string(),
            }),
        )
            .into_response();
    };

    info!("One-shot synthesis request ({} chars)", req.text.len());

    let opts = GenerateOptions {
        language: req.language,
        voice_options: Default::default(),
    };

    match adapter.generate(&req.text, &opts).await {
        Ok(generated) => {
            let metadata = generated.metadata;
            (
                StatusCode::OK,
                Json(GenerateResponse {
                    audio_data: audio::encode_base64(&generated.artifact),
                    audio_format: metadata.format,
                    audio_size: metadata.size_bytes,
                    duration_seconds: metadata.duration_seconds,
                    engine: metadata.backend,
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!("One-shot synthesis failed: {}", e);
            (
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse {
                    error: format!("Synthesis failed: {}", e),
                }),
            )
                .into_response()
        }
    }
}

/// GET /stats
pub async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    let mut stream_lengths = HashMap::new();
    for stream in &state.streams {
        match state.broker.stream_len(stream).await {
            Ok(len) => {
                stream_lengths.insert(stream.clone(), len);
            }
            Err(e) => error!("Failed to query length of stream '{}': {}", stream, e),
        }
    }

    Json(StatsResponse {
        speech: state.speech.as_ref().map(|adapter| adapter.stats()),
        stream_lengths,
    })
}
