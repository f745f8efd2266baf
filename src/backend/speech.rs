use tokio::time::Duration;
use tracing::debug;

use super::{BackendError, GenerateOptions, Generated, GenerationBackend, GenerationMetadata};
use crate::audio;

/// HTTP speech-synthesis backend for the TTS stage.
///
/// One synchronous synthesis call per request, parameterized by language
/// and voice options, under a hard wall-clock timeout. Two instances with
/// different endpoints form the primary/fallback pair in the adapter.
pub struct HttpSpeechBackend {
    name: String,
    endpoint: String,
    default_language: String,
    audio_format: String,
    request_timeout: Duration,
}

impl HttpSpeechBackend {
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        default_language: impl Into<String>,
        audio_format: impl Into<String>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            default_language: default_language.into(),
            audio_format: audio_format.into(),
            request_timeout,
        }
    }
}

#[async_trait::async_trait]
impl GenerationBackend for HttpSpeechBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        input: &str,
        opts: &GenerateOptions,
    ) -> Result<Generated, BackendError> {
        let language = opts
            .language
            .clone()
            .unwrap_or_else(|| self.default_language.clone());

        // Fresh client per call, same reasoning as the LLM backend
        let client = reqwest::Client::builder()
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| BackendError::Request(e.to_string()))?;

        let body = serde_json::json!({
            "text": input,
            "language": language,
            "voice_options": opts.voice_options,
        });

        let response = client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout(self.request_timeout)
                } else {
                    BackendError::Request(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(BackendError::Status(response.status().as_u16()));
        }

        let audio_bytes = response
            .bytes()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?
            .to_vec();

        if !audio::validate_audio(&audio_bytes, audio::MAX_AUDIO_BYTES) {
            return Err(BackendError::InvalidOutput);
        }

        debug!(
            "Speech synthesis successful: {} chars -> {} bytes",
            input.chars().count(),
            audio_bytes.len()
        );

        let metadata = GenerationMetadata {
            backend: self.name.clone(),
            format: self.audio_format.clone(),
            size_bytes: audio_bytes.len(),
            duration_seconds: audio::estimate_duration(&audio_bytes, &self.audio_format),
            text_length: input.chars().count(),
            encoding: "base64".to_string(),
        };

        Ok(Generated {
            artifact: audio_bytes,
            metadata,
        })
    }
}
