use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use super::StageProcessor;
use crate::broker::StreamBroker;

/// Delay before retrying after a broker failure in either loop
const BROKER_RETRY_DELAY: Duration = Duration::from_secs(5);
/// Pending entries are inspected in pages of this size, bounding sweep
/// memory regardless of total backlog
const PENDING_PAGE_SIZE: usize = 100;

/// Per-stage stream bindings and tuning knobs
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub input_stream: String,
    pub output_stream: String,
    pub group: String,
    pub consumer_name: String,
    /// Max entries per blocking read
    pub read_count: usize,
    /// Blocking read timeout
    pub block_ms: u64,
    /// Pending entries idle longer than this are eligible for claim
    pub stale_after_ms: u64,
    /// Cadence of the reclaim sweep
    pub reclaim_interval: Duration,
}

/// Outcome counters for one reclaim sweep
#[derive(Debug, Default, Clone, Copy)]
pub struct ReclaimSummary {
    pub claimed: usize,
    pub processed: usize,
    pub acked: usize,
    pub errors: usize,
}

/// Binds a [`StageProcessor`] to its input stream/group and drives both the
/// forward-intake loop and the reclaim sweep.
pub struct StageConsumer {
    broker: Arc<dyn StreamBroker>,
    processor: Arc<dyn StageProcessor>,
    settings: ConsumerSettings,
}

impl StageConsumer {
    pub fn new(
        broker: Arc<dyn StreamBroker>,
        processor: Arc<dyn StageProcessor>,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            broker,
            processor,
            settings,
        }
    }

    pub fn settings(&self) -> &ConsumerSettings {
        &self.settings
    }

    /// Create the input consumer group and make sure the output stream
    /// exists before any traffic flows.
    pub async fn ensure_topology(&self) -> Result<()> {
        self.broker
            .ensure_group(&self.settings.input_stream, &self.settings.group)
            .await?;
        self.broker
            .ensure_stream(&self.settings.output_stream)
            .await?;
        Ok(())
    }

    /// One blocking read and one batched acknowledgment.
    ///
    /// Entries are processed independently; the ack covers only the subset
    /// the processor reported safe. Returns how many entries were read.
    pub async fn poll_once(&self) -> Result<usize> {
        let batch = self
            .broker
            .read_batch(
                &self.settings.input_stream,
                &self.settings.group,
                &self.settings.consumer_name,
                self.settings.read_count,
                self.settings.block_ms,
            )
            .await?;

        if batch.is_empty() {
            return Ok(0);
        }

        let mut to_ack = Vec::new();
        for entry in &batch {
            if self.processor.process(entry).await {
                to_ack.push(entry.id.clone());
            }
        }

        if !to_ack.is_empty() {
            match self
                .broker
                .ack(&self.settings.input_stream, &self.settings.group, &to_ack)
                .await
            {
                Ok(acked) => debug!(
                    "[{}] Acknowledged {}/{} entries",
                    self.processor.name(),
                    acked,
                    batch.len()
                ),
                // Unacked entries are simply redelivered later; the work
                // that succeeded will publish duplicates downstream.
                Err(e) => error!(
                    "[{}] Failed to acknowledge {} entries: {}",
                    self.processor.name(),
                    to_ack.len(),
                    e
                ),
            }
        }

        Ok(batch.len())
    }

    /// Forward-intake loop: blocking reads until shutdown. Broker failures
    /// back off and retry; the loop never exits on its own.
    pub async fn run_intake(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "[{}] Intake loop started (stream '{}', group '{}', consumer '{}')",
            self.processor.name(),
            self.settings.input_stream,
            self.settings.group,
            self.settings.consumer_name
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                polled = self.poll_once() => {
                    if let Err(e) = polled {
                        error!(
                            "[{}] Broker error in intake loop: {}. Retrying after delay...",
                            self.processor.name(),
                            e
                        );
                        tokio::time::sleep(BROKER_RETRY_DELAY).await;
                    }
                }
            }
        }

        info!("[{}] Intake loop stopped", self.processor.name());
    }

    /// One full stale-entry sweep.
    ///
    /// Pages the pending list; each page's entries idle past the threshold
    /// are claimed under this consumer and run through the same processing
    /// function as fresh intake, acknowledged on success. Stops when the
    /// pending list is exhausted or a page produces no stale candidates.
    pub async fn reclaim_pass(&self) -> Result<ReclaimSummary> {
        let mut summary = ReclaimSummary::default();

        debug!(
            "[{}] Starting stale entry check (consumer '{}', idle > {}ms)",
            self.processor.name(),
            self.settings.consumer_name,
            self.settings.stale_after_ms
        );

        loop {
            let page = self
                .broker
                .pending(
                    &self.settings.input_stream,
                    &self.settings.group,
                    PENDING_PAGE_SIZE,
                )
                .await?;

            if page.is_empty() {
                break;
            }

            let stale: Vec<String> = page
                .iter()
                .filter(|p| p.idle_ms > self.settings.stale_after_ms)
                .map(|p| p.id.clone())
                .collect();

            if stale.is_empty() {
                debug!(
                    "[{}] No entries exceeding idle threshold in pending page of {}",
                    self.processor.name(),
                    page.len()
                );
                break;
            }

            info!(
                "[{}] Found {} stale entries to claim: {:?}",
                self.processor.name(),
                stale.len(),
                stale
            );

            let claimed = self
                .broker
                .claim(
                    &self.settings.input_stream,
                    &self.settings.group,
                    &self.settings.consumer_name,
                    self.settings.stale_after_ms,
                    &stale,
                )
                .await?;
            summary.claimed += claimed.len();

            for entry in &claimed {
                summary.processed += 1;
                if self.processor.process(entry).await {
                    match self
                        .broker
                        .ack(
                            &self.settings.input_stream,
                            &self.settings.group,
                            std::slice::from_ref(&entry.id),
                        )
                        .await
                    {
                        Ok(_) => summary.acked += 1,
                        Err(e) => {
                            error!(
                                "[{}] Failed to acknowledge reclaimed entry {}: {}",
                                self.processor.name(),
                                entry.id,
                                e
                            );
                            summary.errors += 1;
                        }
                    }
                } else {
                    warn!(
                        "[{}] Processing failed for reclaimed entry {}. Not acknowledging.",
                        self.processor.name(),
                        entry.id
                    );
                    summary.errors += 1;
                }
            }

            if page.len() < PENDING_PAGE_SIZE {
                break;
            }
        }

        debug!(
            "[{}] Stale entry check finished: claimed {}, processed {}, acked {}, errors {}",
            self.processor.name(),
            summary.claimed,
            summary.processed,
            summary.acked,
            summary.errors
        );
        Ok(summary)
    }

    /// Periodic reclaim loop. A broker error aborts the current sweep and
    /// waits for the next tick.
    pub async fn run_reclaim(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "[{}] Reclaim loop started (every {:?})",
            self.processor.name(),
            self.settings.reclaim_interval
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.settings.reclaim_interval) => {}
            }
            if *shutdown.borrow() {
                break;
            }

            match self.reclaim_pass().await {
                Ok(summary) if summary.claimed > 0 => info!(
                    "[{}] Reclaim sweep: claimed {}, acked {}, errors {}",
                    self.processor.name(),
                    summary.claimed,
                    summary.acked,
                    summary.errors
                ),
                Ok(_) => {}
                Err(e) => error!(
                    "[{}] Broker error during reclaim sweep: {}",
                    self.processor.name(),
                    e
                ),
            }
        }

        info!("[{}] Reclaim loop stopped", self.processor.name());
    }
}
