use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use base64::Engine;
use raven_pipeline::backend::{
    BackendError, GenerateOptions, Generated, GenerationAdapter, GenerationBackend,
    GenerationMetadata,
};
use raven_pipeline::context::{ContextStore, MemoryPersistence};
use raven_pipeline::message::{decode_audio, decode_response, CommandMessage};
use raven_pipeline::stage::{ConsumerSettings, LlmStage, StageConsumer, TtsStage};
use raven_pipeline::{MemoryBroker, StreamBroker};
use tokio::time::{advance, Duration};

const COMMANDS: &str = "hey_raven_commands";
const RESPONSES: &str = "llm_responses";
const AUDIO: &str = "tts_audio_queue";
const LLM_GROUP: &str = "llm_processor_group";
const TTS_GROUP: &str = "tts_processor_group";

/// Test double standing in for Ollama or a synthesis endpoint
struct ScriptedBackend {
    name: &'static str,
    output: Vec<u8>,
    format: &'static str,
    fail_always: bool,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    fn text(name: &'static str, response: &str) -> Self {
        Self {
            name,
            output: response.as_bytes().to_vec(),
            format: "text",
            fail_always: false,
            calls: AtomicUsize::new(0),
        }
    }

    fn audio(name: &'static str, bytes: &[u8]) -> Self {
        Self {
            name,
            output: bytes.to_vec(),
            format: "mp3",
            fail_always: false,
            calls: AtomicUsize::new(0),
        }
    }

    fn failing(name: &'static str) -> Self {
        Self {
            name,
            output: Vec::new(),
            format: "text",
            fail_always: true,
            calls: AtomicUsize::new(0),
        }
    }
}

/// Records every prompt it receives, for asserting what reaches the model
struct CapturingBackend {
    response: &'static str,
    prompts: std::sync::Mutex<Vec<String>>,
}

impl CapturingBackend {
    fn new(response: &'static str) -> Self {
        Self {
            response,
            prompts: std::sync::Mutex::new(Vec::new()),
        }
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl GenerationBackend for CapturingBackend {
    fn name(&self) -> &str {
        "capture"
    }

    async fn generate(
        &self,
        input: &str,
        _opts: &GenerateOptions,
    ) -> Result<Generated, BackendError> {
        self.prompts.lock().unwrap().push(input.to_string());
        Ok(Generated {
            artifact: self.response.as_bytes().to_vec(),
            metadata: GenerationMetadata {
                backend: "capture".to_string(),
                format: "text".to_string(),
                size_bytes: self.response.len(),
                duration_seconds: None,
                text_length: input.len(),
                encoding: "utf-8".to_string(),
            },
        })
    }
}

#[async_trait::async_trait]
impl GenerationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        self.name
    }

    async fn generate(
        &self,
        input: &str,
        _opts: &GenerateOptions,
    ) -> Result<Generated, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_always {
            return Err(BackendError::Request("scripted failure".to_string()));
        }
        Ok(Generated {
            artifact: self.output.clone(),
            metadata: GenerationMetadata {
                backend: self.name.to_string(),
                format: self.format.to_string(),
                size_bytes: self.output.len(),
                duration_seconds: None,
                text_length: input.len(),
                encoding: "utf-8".to_string(),
            },
        })
    }
}

fn settings(input: &str, output: &str, group: &str, consumer: &str) -> ConsumerSettings {
    ConsumerSettings {
        input_stream: input.to_string(),
        output_stream: output.to_string(),
        group: group.to_string(),
        consumer_name: consumer.to_string(),
        read_count: 10,
        block_ms: 10,
        stale_after_ms: 60_000,
        reclaim_interval: Duration::from_secs(60),
    }
}

fn adapter_over(backend: ScriptedBackend) -> Arc<GenerationAdapter> {
    Arc::new(GenerationAdapter::new(
        Arc::new(backend),
        None,
        1,
        Duration::from_secs(5),
        1000,
    ))
}

/// Adapter wired the way the language stage wires it: the assembled prompt
/// passes through untouched.
fn prompt_adapter(backend: Arc<dyn GenerationBackend>) -> Arc<GenerationAdapter> {
    Arc::new(
        GenerationAdapter::new(backend, None, 1, Duration::from_secs(5), usize::MAX)
            .preserving_input(),
    )
}

fn llm_consumer_with_context(
    broker: &Arc<MemoryBroker>,
    adapter: Arc<GenerationAdapter>,
    context: Arc<ContextStore>,
    consumer: &str,
) -> StageConsumer {
    let trait_broker: Arc<dyn StreamBroker> = broker.clone();
    let stage = Arc::new(LlmStage::new(
        trait_broker.clone(),
        adapter,
        context,
        RESPONSES,
        "You are Raven.",
    ));
    StageConsumer::new(
        trait_broker,
        stage,
        settings(COMMANDS, RESPONSES, LLM_GROUP, consumer),
    )
}

fn llm_consumer(
    broker: &Arc<MemoryBroker>,
    adapter: Arc<GenerationAdapter>,
    consumer: &str,
) -> StageConsumer {
    let context = Arc::new(ContextStore::new(Arc::new(MemoryPersistence::new())));
    llm_consumer_with_context(broker, adapter, context, consumer)
}

fn tts_consumer(
    broker: &Arc<MemoryBroker>,
    adapter: Arc<GenerationAdapter>,
    consumer: &str,
) -> StageConsumer {
    let trait_broker: Arc<dyn StreamBroker> = broker.clone();
    let stage = Arc::new(TtsStage::new(trait_broker.clone(), adapter, AUDIO, "en"));
    StageConsumer::new(
        trait_broker,
        stage,
        settings(RESPONSES, AUDIO, TTS_GROUP, consumer),
    )
}

fn command_payload(question: &str) -> String {
    serde_json::to_string(&CommandMessage {
        question: question.to_string(),
        session_uid: "sess-1".to_string(),
        meeting_id: "meet-1".to_string(),
        timestamp: "2025-10-27T14:30:00Z".to_string(),
        context: String::new(),
    })
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_command_flows_through_both_stages() {
    let broker = Arc::new(MemoryBroker::new());
    let audio_bytes = b"\xff\xfbfake-mp3-frames";

    let llm = llm_consumer(
        &broker,
        prompt_adapter(Arc::new(ScriptedBackend::text("ollama", "The standup is at 10am."))),
        "llm-1",
    );
    let tts = tts_consumer(
        &broker,
        adapter_over(ScriptedBackend::audio("gtts", audio_bytes)),
        "tts-1",
    );

    // Groups must exist before traffic flows; they start at the stream tail
    llm.ensure_topology().await.unwrap();
    tts.ensure_topology().await.unwrap();
    broker.ensure_group(AUDIO, "probe").await.unwrap();

    broker
        .publish(COMMANDS, &command_payload("What time is the next standup?"))
        .await
        .unwrap();

    assert_eq!(llm.poll_once().await.unwrap(), 1);

    // The response landed downstream with provenance intact
    assert_eq!(broker.stream_len(RESPONSES).await.unwrap(), 1);
    assert_eq!(tts.poll_once().await.unwrap(), 1);

    let delivered = broker
        .read_batch(AUDIO, "probe", "probe-1", 10, 10)
        .await
        .unwrap();
    assert_eq!(delivered.len(), 1);

    let audio = decode_audio(&delivered[0].payload).unwrap();
    assert_eq!(audio.session_uid, "sess-1");
    assert_eq!(audio.meeting_id, "meet-1");
    assert_eq!(audio.original_question, "What time is the next standup?");
    assert_eq!(audio.response_text, "The standup is at 10am.");
    assert_eq!(audio.tts_engine, "gtts");
    assert_eq!(audio.audio_size, audio_bytes.len());
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(&audio.audio_data)
        .unwrap();
    assert_eq!(decoded, audio_bytes);

    // Both hops acked their input
    assert!(broker.pending(COMMANDS, LLM_GROUP, 100).await.unwrap().is_empty());
    assert!(broker.pending(RESPONSES, TTS_GROUP, 100).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_response_carries_fresh_message_id_and_timestamps() {
    let broker = Arc::new(MemoryBroker::new());
    let llm = llm_consumer(
        &broker,
        prompt_adapter(Arc::new(ScriptedBackend::text("ollama", "ok"))),
        "llm-1",
    );
    llm.ensure_topology().await.unwrap();
    broker.ensure_group(RESPONSES, "probe").await.unwrap();

    broker
        .publish(COMMANDS, &command_payload("hello"))
        .await
        .unwrap();
    llm.poll_once().await.unwrap();

    let delivered = broker
        .read_batch(RESPONSES, "probe", "probe-1", 10, 10)
        .await
        .unwrap();
    let response = decode_response(&delivered[0].payload).unwrap();
    assert_eq!(response.original_question, "hello");
    assert_eq!(
        response.original_timestamp.as_deref(),
        Some("2025-10-27T14:30:00Z")
    );
    assert!(response.timestamp.is_some());
    assert!(!response.message_id.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_malformed_command_is_dropped_not_retried() {
    let broker = Arc::new(MemoryBroker::new());
    let llm = llm_consumer(
        &broker,
        prompt_adapter(Arc::new(ScriptedBackend::text("ollama", "ok"))),
        "llm-1",
    );
    llm.ensure_topology().await.unwrap();

    broker.publish(COMMANDS, "{broken json").await.unwrap();
    // Structurally valid JSON missing meeting_id
    broker
        .publish(
            COMMANDS,
            r#"{"question": "hi", "session_uid": "s", "timestamp": "2025-10-27T14:30:00Z"}"#,
        )
        .await
        .unwrap();

    assert_eq!(llm.poll_once().await.unwrap(), 2);

    // Undecodable payloads are acked so they never clog the pending list
    assert!(broker.pending(COMMANDS, LLM_GROUP, 100).await.unwrap().is_empty());
    assert_eq!(broker.stream_len(RESPONSES).await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_generation_failure_leaves_entry_pending() {
    let broker = Arc::new(MemoryBroker::new());
    let llm = llm_consumer(&broker, prompt_adapter(Arc::new(ScriptedBackend::failing("ollama"))), "llm-1");
    llm.ensure_topology().await.unwrap();

    broker
        .publish(COMMANDS, &command_payload("hello"))
        .await
        .unwrap();
    assert_eq!(llm.poll_once().await.unwrap(), 1);

    // No ack on failure: the entry stays pending for redelivery or reclaim
    let pending = broker.pending(COMMANDS, LLM_GROUP, 100).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].consumer, "llm-1");
    assert_eq!(broker.stream_len(RESPONSES).await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_reclaim_rescues_entry_from_dead_consumer() {
    let broker = Arc::new(MemoryBroker::new());
    let llm = llm_consumer(
        &broker,
        prompt_adapter(Arc::new(ScriptedBackend::text("ollama", "rescued"))),
        "survivor",
    );
    llm.ensure_topology().await.unwrap();
    broker.ensure_group(RESPONSES, "probe").await.unwrap();

    broker
        .publish(COMMANDS, &command_payload("anyone there?"))
        .await
        .unwrap();

    // A consumer reads the entry and crashes before processing it
    let stolen = broker
        .read_batch(COMMANDS, LLM_GROUP, "dead-consumer", 10, 10)
        .await
        .unwrap();
    assert_eq!(stolen.len(), 1);

    // Below the idle threshold nothing is reclaimed
    advance(Duration::from_secs(30)).await;
    let summary = llm.reclaim_pass().await.unwrap();
    assert_eq!(summary.claimed, 0);

    // Past the threshold the survivor claims, processes, and acks it
    advance(Duration::from_secs(31)).await;
    let summary = llm.reclaim_pass().await.unwrap();
    assert_eq!(summary.claimed, 1);
    assert_eq!(summary.acked, 1);
    assert_eq!(summary.errors, 0);

    let delivered = broker
        .read_batch(RESPONSES, "probe", "probe-1", 10, 10)
        .await
        .unwrap();
    assert_eq!(delivered.len(), 1);
    let response = decode_response(&delivered[0].payload).unwrap();
    assert_eq!(response.response, "rescued");

    assert!(broker.pending(COMMANDS, LLM_GROUP, 100).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reclaim_skips_entries_still_being_worked() {
    let broker = Arc::new(MemoryBroker::new());
    let llm = llm_consumer(
        &broker,
        prompt_adapter(Arc::new(ScriptedBackend::text("ollama", "ok"))),
        "survivor",
    );
    llm.ensure_topology().await.unwrap();

    broker
        .publish(COMMANDS, &command_payload("slow one"))
        .await
        .unwrap();
    broker
        .read_batch(COMMANDS, LLM_GROUP, "busy-consumer", 10, 10)
        .await
        .unwrap();

    advance(Duration::from_secs(10)).await;
    let summary = llm.reclaim_pass().await.unwrap();
    assert_eq!(summary.claimed, 0);
    assert_eq!(summary.processed, 0);

    // Still owned by the original consumer
    let pending = broker.pending(COMMANDS, LLM_GROUP, 100).await.unwrap();
    assert_eq!(pending[0].consumer, "busy-consumer");
}

#[tokio::test(start_paused = true)]
async fn test_long_history_never_displaces_the_question() {
    let broker = Arc::new(MemoryBroker::new());
    let context = Arc::new(ContextStore::new(Arc::new(MemoryPersistence::new())));

    // Two prior exchanges with long answers, enough to dwarf any per-call
    // input cap
    for i in 0..2 {
        context
            .add_turn(
                "sess-1",
                "meet-1",
                &format!("question {}", i),
                &"y".repeat(400),
                "",
            )
            .await;
    }

    let capture = Arc::new(CapturingBackend::new("ok"));
    let llm = llm_consumer_with_context(
        &broker,
        prompt_adapter(capture.clone()),
        context,
        "llm-1",
    );
    llm.ensure_topology().await.unwrap();

    broker
        .publish(COMMANDS, &command_payload("When is the next standup?"))
        .await
        .unwrap();
    assert_eq!(llm.poll_once().await.unwrap(), 1);

    let prompts = capture.prompts();
    assert_eq!(prompts.len(), 1);
    let prompt = &prompts[0];

    // History is present in full and the question survives at the tail
    assert!(prompt.len() > 800);
    assert!(prompt.contains("Recent conversation history:"));
    assert!(prompt.contains(&"y".repeat(400)));
    assert!(prompt.contains("Current question: When is the next standup?"));
    assert!(prompt.ends_with("Provide a helpful, concise response:"));
    // Line structure is preserved, not collapsed to one line
    assert!(prompt.lines().count() > 5);
}

#[tokio::test(start_paused = true)]
async fn test_spanish_question_localizes_prompt_and_tags_response() {
    let broker = Arc::new(MemoryBroker::new());
    let capture = Arc::new(CapturingBackend::new("La reunión es a las diez."));
    let llm = llm_consumer(&broker, prompt_adapter(capture.clone()), "llm-1");
    llm.ensure_topology().await.unwrap();
    broker.ensure_group(RESPONSES, "probe").await.unwrap();

    broker
        .publish(COMMANDS, &command_payload("¿Dónde está la próxima reunión?"))
        .await
        .unwrap();
    assert_eq!(llm.poll_once().await.unwrap(), 1);

    let prompts = capture.prompts();
    assert!(prompts[0].contains("Responde en español"));

    let delivered = broker
        .read_batch(RESPONSES, "probe", "probe-1", 10, 10)
        .await
        .unwrap();
    let response = decode_response(&delivered[0].payload).unwrap();
    assert_eq!(response.language.as_deref(), Some("es"));
}

#[tokio::test(start_paused = true)]
async fn test_english_question_keeps_configured_personality() {
    let broker = Arc::new(MemoryBroker::new());
    let capture = Arc::new(CapturingBackend::new("ok"));
    let llm = llm_consumer(&broker, prompt_adapter(capture.clone()), "llm-1");
    llm.ensure_topology().await.unwrap();
    broker.ensure_group(RESPONSES, "probe").await.unwrap();

    broker
        .publish(COMMANDS, &command_payload("When is the next standup?"))
        .await
        .unwrap();
    assert_eq!(llm.poll_once().await.unwrap(), 1);

    let prompts = capture.prompts();
    assert!(prompts[0].starts_with("You are Raven."));

    let delivered = broker
        .read_batch(RESPONSES, "probe", "probe-1", 10, 10)
        .await
        .unwrap();
    let response = decode_response(&delivered[0].payload).unwrap();
    assert_eq!(response.language.as_deref(), Some("en"));
}

#[tokio::test(start_paused = true)]
async fn test_blank_question_is_dropped_not_retried() {
    let broker = Arc::new(MemoryBroker::new());
    let capture = Arc::new(CapturingBackend::new("ok"));
    let llm = llm_consumer(&broker, prompt_adapter(capture.clone()), "llm-1");
    llm.ensure_topology().await.unwrap();

    broker
        .publish(COMMANDS, &command_payload("   \n\t "))
        .await
        .unwrap();
    assert_eq!(llm.poll_once().await.unwrap(), 1);

    // Acked without ever reaching the model
    assert!(broker.pending(COMMANDS, LLM_GROUP, 100).await.unwrap().is_empty());
    assert_eq!(broker.stream_len(RESPONSES).await.unwrap(), 0);
    assert!(capture.prompts().is_empty());
}
