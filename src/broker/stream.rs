use anyhow::Result;

/// Field name of the single-field stream record
pub const PAYLOAD_FIELD: &str = "payload";

/// One entry read from a stream
#[derive(Debug, Clone)]
pub struct StreamEntry {
    /// Broker-assigned monotonic entry id
    pub id: String,
    /// Opaque JSON payload
    pub payload: String,
}

/// One entry delivered to the group but not yet acknowledged
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub id: String,
    /// Consumer currently holding delivery
    pub consumer: String,
    /// Milliseconds since last delivery to that consumer
    pub idle_ms: u64,
    pub delivery_count: u64,
}

/// Consumer-group stream protocol.
///
/// Forward intake (`read_batch` with the `>` cursor) and fault recovery
/// (`pending` + `claim`) are deliberately separate operations so a stage can
/// run them as independent loops with different cadences.
#[async_trait::async_trait]
pub trait StreamBroker: Send + Sync {
    /// Idempotently create `group` on `stream`, starting from the current
    /// tail. An already-existing group is not an error. Creates the stream
    /// if it does not exist yet.
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<()>;

    /// Guarantee `stream` exists even with no producers yet
    async fn ensure_stream(&self, stream: &str) -> Result<()>;

    /// Blocking read of up to `max_count` entries never delivered to this
    /// group, waiting up to `block_ms` before returning an empty batch.
    /// Entries come back in append order.
    async fn read_batch(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        max_count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamEntry>>;

    /// Batch-acknowledge processed entries, removing them from the pending
    /// set. Returns the number actually acknowledged.
    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> Result<usize>;

    /// One page of the group's pending-entry list, oldest first
    async fn pending(
        &self,
        stream: &str,
        group: &str,
        page_size: usize,
    ) -> Result<Vec<PendingEntry>>;

    /// Transfer ownership of the given entries to `consumer`, resetting
    /// their idle clocks. Only entries idle for at least `min_idle_ms` are
    /// reassigned; the rest are silently skipped. Returns the reassigned
    /// entries with their original payloads.
    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        ids: &[String],
    ) -> Result<Vec<StreamEntry>>;

    /// Append a payload as a single-field record; returns the assigned id
    async fn publish(&self, stream: &str, payload: &str) -> Result<String>;

    /// Number of entries currently in the stream
    async fn stream_len(&self, stream: &str) -> Result<usize>;

    /// Connectivity probe for readiness reporting
    async fn ping(&self) -> Result<()>;
}
