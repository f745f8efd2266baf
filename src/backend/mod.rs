//! Generation backends and the retry/fallback adapter wrapped around them.
//!
//! Both pipeline stages call an external, potentially flaky generation
//! service — model completion for the LLM stage, speech synthesis for the
//! TTS stage. The [`GenerationBackend`] trait is the narrow call contract;
//! [`GenerationAdapter`] layers input cleaning, bounded retries with
//! backoff, and a single fallback pass on top of it.

mod adapter;
mod ollama;
mod speech;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Duration;

pub use adapter::{clean_text, AdapterStats, GenerationAdapter};
pub use ollama::OllamaBackend;
pub use speech::HttpSpeechBackend;

/// Failure of a single generation call
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("input rejected: {0}")]
    InvalidInput(String),

    #[error("backend request failed: {0}")]
    Request(String),

    #[error("backend returned status {0}")]
    Status(u16),

    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend produced empty or invalid output")]
    InvalidOutput,

    #[error("backend is not ready")]
    NotReady,

    #[error("all backends exhausted (primary '{primary}', fallback {fallback:?})")]
    Exhausted {
        primary: String,
        fallback: Option<String>,
    },
}

/// Per-call options; the language stage ignores them, the speech stage maps
/// them onto the synthesis request.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub language: Option<String>,
    pub voice_options: HashMap<String, serde_json::Value>,
}

/// A successful generation: the artifact bytes plus the metadata downstream
/// stages and observability need.
#[derive(Debug, Clone)]
pub struct Generated {
    pub artifact: Vec<u8>,
    pub metadata: GenerationMetadata,
}

/// Metadata describing a generated artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationMetadata {
    /// Backend that actually produced the artifact
    pub backend: String,
    pub format: String,
    pub size_bytes: usize,
    pub duration_seconds: Option<f64>,
    /// Length of the (cleaned) input text
    pub text_length: usize,
    pub encoding: String,
}

/// Narrow call contract around one external generation service
#[async_trait::async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Identity reported in artifact metadata
    fn name(&self) -> &str;

    async fn generate(
        &self,
        input: &str,
        opts: &GenerateOptions,
    ) -> Result<Generated, BackendError>;
}
