use anyhow::Result;
use serde::Deserialize;
use tracing::info;

const DEFAULT_PERSONALITY_PROMPT: &str = "You are Raven, a helpful AI assistant integrated into \
a meeting system. Provide concise, helpful responses to questions during meetings. Keep \
responses brief and relevant to the meeting context.";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default = "StageTuning::llm_defaults")]
    pub llm_stage: StageTuning,
    #[serde(default = "StageTuning::tts_defaults")]
    pub tts_stage: StageTuning,
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub speech: SpeechConfig,
    #[serde(default)]
    pub context: ContextConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "defaults::service_name")]
    pub name: String,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "defaults::http_bind")]
    pub bind: String,
    #[serde(default = "defaults::http_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "defaults::redis_url")]
    pub url: String,
}

/// Stream bindings and consumer-group tuning for one stage
#[derive(Debug, Clone, Deserialize)]
pub struct StageTuning {
    pub input_stream: String,
    pub output_stream: String,
    pub group: String,
    #[serde(default = "defaults::read_count")]
    pub read_count: usize,
    #[serde(default = "defaults::block_ms")]
    pub block_ms: u64,
    pub stale_after_ms: u64,
    pub reclaim_interval_secs: u64,
}

impl StageTuning {
    pub fn llm_defaults() -> Self {
        Self {
            input_stream: "hey_raven_commands".to_string(),
            output_stream: "llm_responses".to_string(),
            group: "llm_processor_group".to_string(),
            read_count: defaults::read_count(),
            block_ms: defaults::block_ms(),
            stale_after_ms: 60_000,
            reclaim_interval_secs: 60,
        }
    }

    pub fn tts_defaults() -> Self {
        Self {
            input_stream: "llm_responses".to_string(),
            output_stream: "tts_audio_queue".to_string(),
            group: "tts_processor_group".to_string(),
            read_count: defaults::read_count(),
            block_ms: defaults::block_ms(),
            stale_after_ms: 30_000,
            reclaim_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "defaults::ollama_url")]
    pub url: String,
    #[serde(default = "defaults::ollama_model")]
    pub model: String,
    #[serde(default = "defaults::ollama_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "defaults::ollama_max_retries")]
    pub max_retries: u32,
    #[serde(default = "defaults::temperature")]
    pub temperature: f32,
    #[serde(default = "defaults::max_response_chars")]
    pub max_response_chars: usize,
    #[serde(default = "defaults::personality_prompt")]
    pub personality_prompt: String,
    #[serde(default)]
    pub pull_verbose: bool,
    #[serde(default = "defaults::pull_progress_interval")]
    pub pull_progress_interval: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpeechConfig {
    #[serde(default = "defaults::speech_engine")]
    pub engine: String,
    #[serde(default = "defaults::speech_endpoint")]
    pub endpoint: String,
    /// Fallback synthesis endpoint; no fallback when absent
    #[serde(default)]
    pub fallback_engine: Option<String>,
    #[serde(default)]
    pub fallback_endpoint: Option<String>,
    #[serde(default = "defaults::speech_language")]
    pub language: String,
    #[serde(default = "defaults::audio_format")]
    pub audio_format: String,
    #[serde(default = "defaults::speech_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "defaults::speech_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "defaults::max_text_chars")]
    pub max_text_chars: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "defaults::eviction_interval_secs")]
    pub eviction_interval_secs: u64,
}

mod defaults {
    pub fn service_name() -> String {
        "raven-pipeline".to_string()
    }
    pub fn http_bind() -> String {
        "0.0.0.0".to_string()
    }
    pub fn http_port() -> u16 {
        8000
    }
    pub fn redis_url() -> String {
        "redis://redis:6379/0".to_string()
    }
    pub fn read_count() -> usize {
        10
    }
    pub fn block_ms() -> u64 {
        2000
    }
    pub fn ollama_url() -> String {
        "http://localhost:11434".to_string()
    }
    pub fn ollama_model() -> String {
        "mistral:7b".to_string()
    }
    pub fn ollama_timeout_secs() -> u64 {
        60
    }
    pub fn ollama_max_retries() -> u32 {
        3
    }
    pub fn temperature() -> f32 {
        0.7
    }
    pub fn max_response_chars() -> usize {
        500
    }
    pub fn personality_prompt() -> String {
        super::DEFAULT_PERSONALITY_PROMPT.to_string()
    }
    pub fn pull_progress_interval() -> u64 {
        10
    }
    pub fn speech_engine() -> String {
        "gtts".to_string()
    }
    pub fn speech_endpoint() -> String {
        "http://localhost:5002/api/tts".to_string()
    }
    pub fn speech_language() -> String {
        "en".to_string()
    }
    pub fn audio_format() -> String {
        "mp3".to_string()
    }
    pub fn speech_timeout_secs() -> u64 {
        10
    }
    pub fn speech_retry_attempts() -> u32 {
        3
    }
    pub fn max_text_chars() -> usize {
        1000
    }
    pub fn eviction_interval_secs() -> u64 {
        300
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: defaults::service_name(),
            http: HttpConfig::default(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: defaults::http_bind(),
            port: defaults::http_port(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: defaults::redis_url(),
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            url: defaults::ollama_url(),
            model: defaults::ollama_model(),
            timeout_secs: defaults::ollama_timeout_secs(),
            max_retries: defaults::ollama_max_retries(),
            temperature: defaults::temperature(),
            max_response_chars: defaults::max_response_chars(),
            personality_prompt: defaults::personality_prompt(),
            pull_verbose: false,
            pull_progress_interval: defaults::pull_progress_interval(),
        }
    }
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            engine: defaults::speech_engine(),
            endpoint: defaults::speech_endpoint(),
            fallback_engine: None,
            fallback_endpoint: None,
            language: defaults::speech_language(),
            audio_format: defaults::audio_format(),
            timeout_secs: defaults::speech_timeout_secs(),
            retry_attempts: defaults::speech_retry_attempts(),
            max_text_chars: defaults::max_text_chars(),
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            eviction_interval_secs: defaults::eviction_interval_secs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            redis: RedisConfig::default(),
            llm_stage: StageTuning::llm_defaults(),
            tts_stage: StageTuning::tts_defaults(),
            ollama: OllamaConfig::default(),
            speech: SpeechConfig::default(),
            context: ContextConfig::default(),
        }
    }
}

impl Config {
    /// Load from an optional config file layered under `RAVEN__`-prefixed
    /// environment overrides (e.g. `RAVEN__REDIS__URL`).
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        builder = builder.add_source(config::Environment::with_prefix("RAVEN").separator("__"));

        let settings = builder.build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Log the effective configuration at startup
    pub fn log_summary(&self) {
        info!("Configuration:");
        info!("  Redis: {}", self.redis.url);
        info!(
            "  LLM stage: {} -> {} (group '{}')",
            self.llm_stage.input_stream, self.llm_stage.output_stream, self.llm_stage.group
        );
        info!(
            "  TTS stage: {} -> {} (group '{}')",
            self.tts_stage.input_stream, self.tts_stage.output_stream, self.tts_stage.group
        );
        info!("  Ollama: {} (model {})", self.ollama.url, self.ollama.model);
        info!(
            "  Speech: {} via {} (language {})",
            self.speech.engine, self.speech.endpoint, self.speech.language
        );
        info!(
            "  HTTP: {}:{}",
            self.service.http.bind, self.service.http.port
        );
    }
}
