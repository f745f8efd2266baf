use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::StageProcessor;
use crate::audio;
use crate::backend::{GenerateOptions, GenerationAdapter};
use crate::broker::{StreamBroker, StreamEntry};
use crate::message::{self, AudioMessage, ResponseMessage};

/// Speech stage: LLM responses in, synthesized audio out.
pub struct TtsStage {
    broker: Arc<dyn StreamBroker>,
    adapter: Arc<GenerationAdapter>,
    output_stream: String,
    default_language: String,
}

impl TtsStage {
    pub fn new(
        broker: Arc<dyn StreamBroker>,
        adapter: Arc<GenerationAdapter>,
        output_stream: impl Into<String>,
        default_language: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            adapter,
            output_stream: output_stream.into(),
            default_language: default_language.into(),
        }
    }

    async fn synthesize(&self, entry_id: &str, response: &ResponseMessage) -> Result<()> {
        info!(
            "Processing LLM response {} for meeting {}",
            entry_id, response.meeting_id
        );

        let opts = GenerateOptions {
            language: Some(
                response
                    .language
                    .clone()
                    .unwrap_or_else(|| self.default_language.clone()),
            ),
            voice_options: Default::default(),
        };

        let generated = self
            .adapter
            .generate(&response.response, &opts)
            .await
            .context("TTS generation failed")?;

        let encoded_audio = audio::encode_base64(&generated.artifact);
        let metadata = generated.metadata;

        let audio_message = AudioMessage {
            audio_data: encoded_audio,
            audio_format: metadata.format.clone(),
            audio_duration: metadata.duration_seconds,
            audio_size: metadata.size_bytes,
            tts_engine: metadata.backend.clone(),
            audio_metadata: metadata,
            session_uid: response.session_uid.clone(),
            meeting_id: response.meeting_id.clone(),
            original_question: response.original_question.clone(),
            response_text: response.response.clone(),
            timestamp: Utc::now().to_rfc3339(),
            original_timestamp: response.timestamp.clone(),
            message_id: Uuid::new_v4().to_string(),
        };

        let payload =
            serde_json::to_string(&audio_message).context("Failed to serialize audio message")?;
        let published_id = self
            .broker
            .publish(&self.output_stream, &payload)
            .await
            .context("Failed to publish audio")?;

        info!(
            "Published TTS audio {} to {} for LLM response {}",
            published_id, self.output_stream, entry_id
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl StageProcessor for TtsStage {
    fn name(&self) -> &str {
        "tts"
    }

    async fn process(&self, entry: &StreamEntry) -> bool {
        let response = match message::decode_response(&entry.payload) {
            Ok(response) => response,
            Err(e) => {
                warn!("Dropping malformed response {}: {}", entry.id, e);
                return true;
            }
        };

        match self.synthesize(&entry.id, &response).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to process response {}: {:#}", entry.id, e);
                false
            }
        }
    }
}
