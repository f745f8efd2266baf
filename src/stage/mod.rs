//! Stage processors: the per-hop business logic and the consumer loops
//! that drive them.
//!
//! Each stage instance runs two independent loops against its input
//! stream/group: forward intake over the `>` cursor, and a periodic reclaim
//! sweep that rescues entries abandoned by crashed consumers. Both funnel
//! every entry through the same [`StageProcessor::process`] call.

mod consumer;
mod llm;
mod tts;

pub use consumer::{ConsumerSettings, ReclaimSummary, StageConsumer};
pub use llm::LlmStage;
pub use tts::TtsStage;

use crate::broker::StreamEntry;

/// One pipeline hop's per-message logic.
///
/// `process` returns whether the entry is safe to acknowledge. It never
/// lets an error escape: a malformed payload is logged and dropped
/// (`true`), any processing failure maps to `false` so the entry stays
/// pending for redelivery or reclaim.
#[async_trait::async_trait]
pub trait StageProcessor: Send + Sync {
    fn name(&self) -> &str;

    async fn process(&self, entry: &StreamEntry) -> bool;
}
