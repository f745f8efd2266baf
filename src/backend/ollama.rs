use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use futures::StreamExt;
use serde::Deserialize;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use super::{BackendError, GenerateOptions, Generated, GenerationBackend, GenerationMetadata};
use crate::config::OllamaConfig;

/// Ollama model-completion backend for the language stage.
///
/// Carries a cold-start contract: `initialize` verifies the server is
/// reachable, pulls the model if it is absent, and runs one synthetic
/// generation before the backend reports ready. Stream intake must not
/// start until readiness is reached.
pub struct OllamaBackend {
    base_url: String,
    model: String,
    request_timeout: Duration,
    temperature: f32,
    max_response_chars: usize,
    pull_verbose: bool,
    pull_progress_interval: u64,
    ready: AtomicBool,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

impl OllamaBackend {
    pub fn new(config: &OllamaConfig) -> Self {
        Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            request_timeout: Duration::from_secs(config.timeout_secs),
            temperature: config.temperature,
            max_response_chars: config.max_response_chars,
            pull_verbose: config.pull_verbose,
            pull_progress_interval: config.pull_progress_interval.max(1),
            ready: AtomicBool::new(false),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Each call gets an independent client so a poisoned connection never
    /// carries over into the next attempt.
    fn client(&self, timeout: Duration) -> Result<reqwest::Client, BackendError> {
        reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Request(e.to_string()))
    }

    /// Cold-start: reachability, model availability (pulling if absent),
    /// then one synthetic generation to confirm the model actually works.
    pub async fn initialize(&self) -> Result<()> {
        info!("Initializing Ollama backend for model: {}", self.model);

        self.check_health()
            .await
            .context("Ollama service is not healthy")?;

        if !self.is_model_available().await? {
            info!("Model {} not found, attempting to pull...", self.model);
            self.pull_model()
                .await
                .with_context(|| format!("Failed to pull model {}", self.model))?;
        }

        let test = self
            .generate_text("Test prompt. Respond with 'Hello' only.")
            .await
            .map_err(|e| anyhow::anyhow!("Model test generation failed: {}", e))?;
        debug!("Test generation returned {} chars", test.chars().count());

        self.ready.store(true, Ordering::SeqCst);
        info!("Ollama backend initialized successfully");
        Ok(())
    }

    /// Reachability probe against the model-listing endpoint
    pub async fn check_health(&self) -> Result<()> {
        let client = self
            .client(self.request_timeout)
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        let response = client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .context("Ollama health check request failed")?;
        anyhow::ensure!(
            response.status().is_success(),
            "Ollama health check failed with status {}",
            response.status()
        );
        Ok(())
    }

    pub async fn list_models(&self) -> Result<Vec<String>> {
        let client = self
            .client(self.request_timeout)
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        let response = client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .context("Failed to list Ollama models")?;
        anyhow::ensure!(
            response.status().is_success(),
            "Model listing failed with status {}",
            response.status()
        );
        let tags: TagsResponse = response
            .json()
            .await
            .context("Failed to parse model listing")?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    pub async fn is_model_available(&self) -> Result<bool> {
        let models = self.list_models().await?;
        let available = models.iter().any(|name| name == &self.model);
        if !available {
            info!("Model {} is not available", self.model);
        }
        Ok(available)
    }

    /// Pull the model, streaming progress lines.
    ///
    /// Progress updates are noisy during large downloads; status changes
    /// are always logged, repeats only every Nth update unless verbose.
    pub async fn pull_model(&self) -> Result<()> {
        info!("Pulling model: {}", self.model);

        // Model downloads can take far longer than a generation call
        let client = self
            .client(Duration::from_secs(600))
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        let response = client
            .post(format!("{}/api/pull", self.base_url))
            .json(&serde_json::json!({ "name": self.model }))
            .send()
            .await
            .context("Model pull request failed")?;
        anyhow::ensure!(
            response.status().is_success(),
            "Model pull failed with status {}",
            response.status()
        );

        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut last_status: Option<String> = None;
        let mut progress_count: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Model pull stream interrupted")?;
            buffer.extend_from_slice(&chunk);

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let Ok(progress) = serde_json::from_slice::<serde_json::Value>(&line) else {
                    continue;
                };
                let Some(status) = progress.get("status").and_then(|s| s.as_str()) else {
                    continue;
                };

                if last_status.as_deref() != Some(status) {
                    info!("Model pull: {}", status);
                    last_status = Some(status.to_string());
                } else if status == "pulling manifest" || status == "downloading" {
                    progress_count += 1;
                    if self.pull_verbose || progress_count % self.pull_progress_interval == 0 {
                        info!("Model pull: {} (progress update #{})", status, progress_count);
                    }
                }

                if status == "success" {
                    info!("Successfully pulled model: {}", self.model);
                    return Ok(());
                }
            }
        }

        Ok(())
    }

    async fn generate_text(&self, prompt: &str) -> Result<String, BackendError> {
        let client = self.client(self.request_timeout)?;
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": self.temperature,
                "num_predict": self.max_response_chars,
            },
        });

        let response = client
            .post(format!("{}/api/generate", self.base_url))
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

        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;
        Ok(generated.response.trim().to_string())
    }

    fn truncate_response(&self, text: String) -> String {
        if text.chars().count() <= self.max_response_chars {
            return text;
        }
        warn!(
            "Response too long ({} chars), truncating to {}",
            text.chars().count(),
            self.max_response_chars
        );
        let truncated: String = text.chars().take(self.max_response_chars).collect();
        format!("{}...", truncated)
    }
}

#[async_trait::async_trait]
impl GenerationBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(
        &self,
        input: &str,
        _opts: &GenerateOptions,
    ) -> Result<Generated, BackendError> {
        if !self.is_ready() {
            return Err(BackendError::NotReady);
        }

        let response = self.generate_text(input).await?;
        if response.is_empty() {
            return Err(BackendError::InvalidOutput);
        }
        let response = self.truncate_response(response);

        let size_bytes = response.len();
        Ok(Generated {
            artifact: response.into_bytes(),
            metadata: GenerationMetadata {
                backend: self.name().to_string(),
                format: "text".to_string(),
                size_bytes,
                duration_seconds: None,
                text_length: input.chars().count(),
                encoding: "utf-8".to_string(),
            },
        })
    }
}
