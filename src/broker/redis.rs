use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::streams::{
    StreamClaimReply, StreamPendingCountReply, StreamReadOptions, StreamReadReply,
};
use redis::AsyncCommands;
use tracing::{debug, info};

use super::stream::{PendingEntry, StreamBroker, StreamEntry, PAYLOAD_FIELD};

/// Redis Streams implementation of the stream-queue protocol.
///
/// Uses a multiplexed connection manager; every operation clones the manager
/// handle, so the broker is cheap to share across tasks.
pub struct RedisBroker {
    conn: ConnectionManager,
}

impl RedisBroker {
    /// Connect to Redis and verify the connection with a ping
    pub async fn connect(url: &str) -> Result<Self> {
        info!("Connecting to Redis at {}", url);

        let client = redis::Client::open(url).context("Invalid Redis URL")?;
        let conn = client
            .get_connection_manager()
            .await
            .context("Failed to connect to Redis")?;

        let broker = Self { conn };
        broker.ping().await.context("Redis ping failed")?;

        info!("Connected to Redis successfully");
        Ok(broker)
    }

    pub(crate) fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

#[async_trait::async_trait]
impl StreamBroker for RedisBroker {
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<()> {
        let mut conn = self.connection();
        let created: redis::RedisResult<()> =
            conn.xgroup_create_mkstream(stream, group, "$").await;

        match created {
            Ok(()) => {
                info!("Created consumer group '{}' on stream '{}'", group, stream);
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => {
                info!(
                    "Consumer group '{}' already exists on stream '{}'",
                    group, stream
                );
                Ok(())
            }
            Err(e) => Err(e).with_context(|| {
                format!("Failed to create group '{}' on stream '{}'", group, stream)
            }),
        }
    }

    async fn ensure_stream(&self, stream: &str) -> Result<()> {
        // Sentinel append-then-delete leaves an existing but empty stream
        let mut conn = self.connection();
        let sentinel_id: String = conn
            .xadd(stream, "*", &[(PAYLOAD_FIELD, "init")])
            .await
            .with_context(|| format!("Failed to initialize stream '{}'", stream))?;
        let _: usize = conn
            .xdel(stream, &[sentinel_id.as_str()])
            .await
            .with_context(|| format!("Failed to delete sentinel on stream '{}'", stream))?;

        debug!("Ensured stream '{}' exists", stream);
        Ok(())
    }

    async fn read_batch(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        max_count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamEntry>> {
        let mut conn = self.connection();
        let opts = StreamReadOptions::default()
            .group(group, consumer)
            .count(max_count)
            .block(block_ms as usize);

        // `>` cursor: only entries never delivered to this group
        let reply: StreamReadReply = conn
            .xread_options(&[stream], &[">"], &opts)
            .await
            .with_context(|| format!("Failed to read from stream '{}'", stream))?;

        let mut entries = Vec::new();
        for key in reply.keys {
            for id in key.ids {
                let payload: String = id.get(PAYLOAD_FIELD).unwrap_or_default();
                entries.push(StreamEntry {
                    id: id.id,
                    payload,
                });
            }
        }
        Ok(entries)
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection();
        let acked: usize = conn
            .xack(stream, group, ids)
            .await
            .with_context(|| format!("Failed to acknowledge entries on stream '{}'", stream))?;
        Ok(acked)
    }

    async fn pending(
        &self,
        stream: &str,
        group: &str,
        page_size: usize,
    ) -> Result<Vec<PendingEntry>> {
        let mut conn = self.connection();
        let reply: StreamPendingCountReply = conn
            .xpending_count(stream, group, "-", "+", page_size)
            .await
            .with_context(|| format!("Failed to list pending entries on stream '{}'", stream))?;

        Ok(reply
            .ids
            .into_iter()
            .map(|p| PendingEntry {
                id: p.id,
                consumer: p.consumer,
                idle_ms: p.last_delivered_ms as u64,
                delivery_count: p.times_delivered as u64,
            })
            .collect())
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        ids: &[String],
    ) -> Result<Vec<StreamEntry>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection();
        let reply: StreamClaimReply = conn
            .xclaim(stream, group, consumer, min_idle_ms, ids)
            .await
            .with_context(|| format!("Failed to claim entries on stream '{}'", stream))?;

        Ok(reply
            .ids
            .into_iter()
            .map(|id| {
                let payload: String = id.get(PAYLOAD_FIELD).unwrap_or_default();
                StreamEntry {
                    id: id.id,
                    payload,
                }
            })
            .collect())
    }

    async fn publish(&self, stream: &str, payload: &str) -> Result<String> {
        let mut conn = self.connection();
        let id: String = conn
            .xadd(stream, "*", &[(PAYLOAD_FIELD, payload)])
            .await
            .with_context(|| format!("Failed to publish to stream '{}'", stream))?;
        Ok(id)
    }

    async fn stream_len(&self, stream: &str) -> Result<usize> {
        let mut conn = self.connection();
        let len: usize = conn
            .xlen(stream)
            .await
            .with_context(|| format!("Failed to read length of stream '{}'", stream))?;
        Ok(len)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("Redis PING failed")?;
        anyhow::ensure!(pong == "PONG", "Unexpected PING reply: {}", pong);
        Ok(())
    }
}
