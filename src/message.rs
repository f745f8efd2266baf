//! Typed payloads carried on the pipeline streams.
//!
//! Every stream entry is a single-field record `{payload: <JSON string>}`;
//! all structure lives inside the payload. Each stage decodes its input into
//! the tagged type for its hop. A payload that fails to decode is a
//! [`MessageError`] and is dropped (acknowledged), never retried.

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::backend::GenerationMetadata;

/// Decode failure for an inbound payload
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("payload failed to decode as {kind}: {source}")]
    Decode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Wake-word command consumed by the LLM stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandMessage {
    pub question: String,
    pub session_uid: String,
    /// Normalized to a string even when the producer sent a JSON number
    #[serde(deserialize_with = "meeting_id_as_string")]
    pub meeting_id: String,
    pub timestamp: String,
    #[serde(default)]
    pub context: String,
}

/// LLM response consumed by the TTS stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub response: String,
    pub session_uid: String,
    #[serde(deserialize_with = "meeting_id_as_string")]
    pub meeting_id: String,
    pub original_question: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub original_timestamp: Option<String>,
    /// Fresh identifier minted by the producing stage, distinct from the
    /// broker entry id. Downstream consumers key duplicate tolerance on it.
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

/// Synthesized audio published by the TTS stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioMessage {
    /// Base64-encoded audio bytes
    pub audio_data: String,
    pub audio_metadata: GenerationMetadata,
    pub session_uid: String,
    #[serde(deserialize_with = "meeting_id_as_string")]
    pub meeting_id: String,
    pub original_question: String,
    pub response_text: String,
    pub audio_format: String,
    pub audio_duration: Option<f64>,
    pub audio_size: usize,
    pub tts_engine: String,
    pub timestamp: String,
    #[serde(default)]
    pub original_timestamp: Option<String>,
    pub message_id: String,
}

pub fn decode_command(payload: &str) -> Result<CommandMessage, MessageError> {
    decode("command", payload)
}

pub fn decode_response(payload: &str) -> Result<ResponseMessage, MessageError> {
    decode("response", payload)
}

pub fn decode_audio(payload: &str) -> Result<AudioMessage, MessageError> {
    decode("audio", payload)
}

fn decode<T: serde::de::DeserializeOwned>(
    kind: &'static str,
    payload: &str,
) -> Result<T, MessageError> {
    serde_json::from_str(payload).map_err(|source| MessageError::Decode { kind, source })
}

/// Accept a string or a number for `meeting_id` and normalize to a string.
///
/// Mixed meeting_id types between stages caused lookups to miss downstream;
/// every re-published message carries the string form.
fn meeting_id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "meeting_id must be a string or number, got {}",
            other
        ))),
    }
}
