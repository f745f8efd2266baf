use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::StageProcessor;
use crate::backend::{clean_text, GenerateOptions, GenerationAdapter};
use crate::broker::{StreamBroker, StreamEntry};
use crate::context::ContextStore;
use crate::language;
use crate::message::{self, CommandMessage, ResponseMessage};

/// Questions longer than this are truncated at a word boundary before the
/// prompt is assembled; the assembled prompt itself is never cut.
const MAX_QUESTION_CHARS: usize = 1000;

/// Language stage: wake-word commands in, LLM responses out.
///
/// Builds an enriched prompt from session and meeting context, generates
/// through the adapter, records the turn, and publishes the response for
/// the speech stage.
pub struct LlmStage {
    broker: Arc<dyn StreamBroker>,
    adapter: Arc<GenerationAdapter>,
    context: Arc<ContextStore>,
    output_stream: String,
    personality: String,
}

impl LlmStage {
    pub fn new(
        broker: Arc<dyn StreamBroker>,
        adapter: Arc<GenerationAdapter>,
        context: Arc<ContextStore>,
        output_stream: impl Into<String>,
        personality: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            adapter,
            context,
            output_stream: output_stream.into(),
            personality: personality.into(),
        }
    }

    async fn respond(&self, entry_id: &str, command: &CommandMessage) -> Result<()> {
        info!(
            "Processing wake word command {}: '{}' for meeting {}",
            entry_id, command.question, command.meeting_id
        );

        let (lang, confidence) = language::detect(&command.question);
        debug!(
            "Detected language {} (confidence {:.2}) for command {}",
            lang, confidence, entry_id
        );
        // A confident non-English detection swaps in the localized
        // preamble; English keeps the configured personality.
        let personality = if lang != "en" && confidence > language::CONFIDENCE_THRESHOLD {
            language::prompt_template(lang).unwrap_or(&self.personality)
        } else {
            &self.personality
        };

        let prompt = self
            .context
            .build_prompt(
                personality,
                &command.session_uid,
                &command.meeting_id,
                &command.question,
            )
            .await;

        let generated = self
            .adapter
            .generate(&prompt, &GenerateOptions::default())
            .await
            .context("LLM generation failed")?;
        let response_text = String::from_utf8(generated.artifact)
            .context("LLM backend returned a non-text artifact")?;

        self.context
            .add_turn(
                &command.session_uid,
                &command.meeting_id,
                &command.question,
                &response_text,
                &command.context,
            )
            .await;

        let response = ResponseMessage {
            response: response_text,
            session_uid: command.session_uid.clone(),
            meeting_id: command.meeting_id.clone(),
            original_question: command.question.clone(),
            timestamp: Some(Utc::now().to_rfc3339()),
            original_timestamp: Some(command.timestamp.clone()),
            message_id: Some(Uuid::new_v4().to_string()),
            language: Some(lang.to_string()),
        };

        let payload =
            serde_json::to_string(&response).context("Failed to serialize response message")?;
        let published_id = self
            .broker
            .publish(&self.output_stream, &payload)
            .await
            .context("Failed to publish response")?;

        info!(
            "Published LLM response {} to {} for command {}",
            published_id, self.output_stream, entry_id
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl StageProcessor for LlmStage {
    fn name(&self) -> &str {
        "llm"
    }

    async fn process(&self, entry: &StreamEntry) -> bool {
        let mut command = match message::decode_command(&entry.payload) {
            Ok(command) => command,
            Err(e) => {
                // Structurally invalid; retrying cannot fix it
                warn!("Dropping malformed command {}: {}", entry.id, e);
                return true;
            }
        };

        // Clean the question itself, never the assembled prompt: truncating
        // after assembly would cut the question off the prompt's tail.
        command.question = match clean_text(&command.question, MAX_QUESTION_CHARS) {
            Some(question) => question,
            None => {
                warn!("Dropping command {} with empty question", entry.id);
                return true;
            }
        };

        match self.respond(&entry.id, &command).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to process command {}: {:#}", entry.id, e);
                false
            }
        }
    }
}
