pub mod audio;
pub mod backend;
pub mod broker;
pub mod config;
pub mod context;
pub mod http;
pub mod language;
pub mod message;
pub mod service;
pub mod stage;

pub use backend::{
    BackendError, GenerateOptions, Generated, GenerationAdapter, GenerationBackend,
    GenerationMetadata, HttpSpeechBackend, OllamaBackend,
};
pub use broker::{MemoryBroker, PendingEntry, RedisBroker, StreamBroker, StreamEntry};
pub use config::Config;
pub use context::{ContextPersistence, ContextStore, MeetingContext, MemoryPersistence, SessionContext};
pub use http::{create_router, AppState};
pub use service::{ServiceOptions, StageSelection};
pub use message::{AudioMessage, CommandMessage, MessageError, ResponseMessage};
pub use stage::{LlmStage, StageConsumer, StageProcessor, TtsStage};
