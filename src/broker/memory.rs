use std::collections::HashMap;

use anyhow::Result;
use tokio::sync::{Mutex, Notify};
use tokio::time::{sleep_until, Duration, Instant};

use super::stream::{PendingEntry, StreamBroker, StreamEntry};

/// In-process implementation of the stream-queue protocol.
///
/// Carries the same consumer-group semantics as the Redis implementation:
/// append-only entries, a per-group delivery cursor for the `>` path, and a
/// pending set with per-entry delivery instants and counts. Idle time is
/// measured against `tokio::time::Instant`, so tests run under a paused
/// clock can advance it deterministically.
#[derive(Default)]
pub struct MemoryBroker {
    streams: Mutex<HashMap<String, StreamState>>,
    publish_wakeup: Notify,
}

#[derive(Default)]
struct StreamState {
    next_seq: u64,
    entries: Vec<StoredEntry>,
    groups: HashMap<String, GroupState>,
}

struct StoredEntry {
    seq: u64,
    id: String,
    payload: String,
    deleted: bool,
}

struct GroupState {
    /// Next sequence number to deliver via the `>` cursor
    cursor: u64,
    pending: HashMap<String, PendingState>,
}

struct PendingState {
    seq: u64,
    consumer: String,
    delivered_at: Instant,
    delivery_count: u64,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn take_ready(
        state: &mut StreamState,
        group: &str,
        consumer: &str,
        max_count: usize,
    ) -> Vec<StreamEntry> {
        let StreamState { entries, groups, .. } = state;
        let Some(group_state) = groups.get_mut(group) else {
            return Vec::new();
        };

        let mut batch = Vec::new();
        let now = Instant::now();
        for entry in entries.iter() {
            if batch.len() >= max_count {
                break;
            }
            if entry.deleted || entry.seq < group_state.cursor {
                continue;
            }
            group_state.cursor = entry.seq + 1;
            group_state.pending.insert(
                entry.id.clone(),
                PendingState {
                    seq: entry.seq,
                    consumer: consumer.to_string(),
                    delivered_at: now,
                    delivery_count: 1,
                },
            );
            batch.push(StreamEntry {
                id: entry.id.clone(),
                payload: entry.payload.clone(),
            });
        }
        batch
    }
}

#[async_trait::async_trait]
impl StreamBroker for MemoryBroker {
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<()> {
        let mut streams = self.streams.lock().await;
        let state = streams.entry(stream.to_string()).or_default();
        let tail = state.next_seq;
        state.groups.entry(group.to_string()).or_insert(GroupState {
            cursor: tail,
            pending: HashMap::new(),
        });
        Ok(())
    }

    async fn ensure_stream(&self, stream: &str) -> Result<()> {
        let mut streams = self.streams.lock().await;
        streams.entry(stream.to_string()).or_default();
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
        let deadline = Instant::now() + Duration::from_millis(block_ms);

        loop {
            // Register for wakeups before checking, so a publish racing with
            // the check still wakes this reader.
            let wakeup = self.publish_wakeup.notified();

            {
                let mut streams = self.streams.lock().await;
                if let Some(state) = streams.get_mut(stream) {
                    let batch = Self::take_ready(state, group, consumer, max_count);
                    if !batch.is_empty() {
                        return Ok(batch);
                    }
                }
            }

            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }

            tokio::select! {
                _ = wakeup => {}
                _ = sleep_until(deadline) => return Ok(Vec::new()),
            }
        }
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> Result<usize> {
        let mut streams = self.streams.lock().await;
        let mut acked = 0;
        if let Some(state) = streams.get_mut(stream) {
            if let Some(group_state) = state.groups.get_mut(group) {
                for id in ids {
                    if group_state.pending.remove(id).is_some() {
                        acked += 1;
                    }
                }
            }
        }
        Ok(acked)
    }

    async fn pending(
        &self,
        stream: &str,
        group: &str,
        page_size: usize,
    ) -> Result<Vec<PendingEntry>> {
        let streams = self.streams.lock().await;
        let Some(group_state) = streams.get(stream).and_then(|s| s.groups.get(group)) else {
            return Ok(Vec::new());
        };

        let now = Instant::now();
        let mut page: Vec<(u64, PendingEntry)> = group_state
            .pending
            .iter()
            .map(|(id, p)| {
                (
                    p.seq,
                    PendingEntry {
                        id: id.clone(),
                        consumer: p.consumer.clone(),
                        idle_ms: now.saturating_duration_since(p.delivered_at).as_millis() as u64,
                        delivery_count: p.delivery_count,
                    },
                )
            })
            .collect();
        page.sort_by_key(|(seq, _)| *seq);
        page.truncate(page_size);
        Ok(page.into_iter().map(|(_, entry)| entry).collect())
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        ids: &[String],
    ) -> Result<Vec<StreamEntry>> {
        let mut streams = self.streams.lock().await;
        let Some(state) = streams.get_mut(stream) else {
            return Ok(Vec::new());
        };

        let now = Instant::now();
        let mut claimed = Vec::new();
        let StreamState { entries, groups, .. } = &mut *state;
        let Some(group_state) = groups.get_mut(group) else {
            return Ok(Vec::new());
        };

        for id in ids {
            let Some(pending) = group_state.pending.get_mut(id) else {
                continue;
            };
            let idle_ms = now.saturating_duration_since(pending.delivered_at).as_millis() as u64;
            if idle_ms < min_idle_ms {
                continue;
            }
            let Some(entry) = entries.iter().find(|e| e.id == *id && !e.deleted) else {
                // Entry trimmed from the stream; ownership transfer has
                // nothing to hand back.
                continue;
            };
            pending.consumer = consumer.to_string();
            pending.delivered_at = now;
            pending.delivery_count += 1;
            claimed.push(StreamEntry {
                id: entry.id.clone(),
                payload: entry.payload.clone(),
            });
        }
        Ok(claimed)
    }

    async fn publish(&self, stream: &str, payload: &str) -> Result<String> {
        let id = {
            let mut streams = self.streams.lock().await;
            let state = streams.entry(stream.to_string()).or_default();
            let seq = state.next_seq;
            state.next_seq += 1;
            let id = format!("{}-0", seq);
            state.entries.push(StoredEntry {
                seq,
                id: id.clone(),
                payload: payload.to_string(),
                deleted: false,
            });
            id
        };
        self.publish_wakeup.notify_waiters();
        Ok(id)
    }

    async fn stream_len(&self, stream: &str) -> Result<usize> {
        let streams = self.streams.lock().await;
        Ok(streams
            .get(stream)
            .map(|s| s.entries.iter().filter(|e| !e.deleted).count())
            .unwrap_or(0))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
