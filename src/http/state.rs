use std::sync::Arc;

use crate::backend::{GenerationAdapter, OllamaBackend};
use crate::broker::StreamBroker;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<dyn StreamBroker>,
    /// Present when this process runs the LLM stage
    pub language: Option<Arc<OllamaBackend>>,
    /// Present when this process runs the TTS stage
    pub speech: Option<Arc<GenerationAdapter>>,
    /// Streams reported by the stats endpoint
    pub streams: Vec<String>,
    pub service_name: String,
}
