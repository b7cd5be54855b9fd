// SPDX-License-Identifier: Apache-2.0

//! Per-deployment ingestion: fetch logs in block ranges, decode them and hand
//! them to the store strictly in (block, log index) order.
//!
//! One pipeline owns one [`ChainScope`]. It is the only writer of that scope's
//! events and checkpoint, so events of one escrow are never applied
//! concurrently. Pipelines of different scopes share nothing but the store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::error::SourceError;
use crate::events::EventDecoder;
use crate::feed::{ProjectionUpdate, UpdateFeed};
use crate::metrics::IndexerMetrics;
use crate::retry_with_max_elapsed_time;
use crate::store::{EscrowStore, IngestOutcome};
use crate::types::{ChainLog, ChainScope, Checkpoint};

mod source;

pub use source::{EthLogSource, LogSource};

#[cfg(test)]
mod tests;

const RETRY_INITIAL_INTERVAL: Duration = Duration::from_millis(400);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    /// The scanned range ended below the chain head.
    MoreBlocks,
    CaughtUp,
    Cancelled,
}

pub struct IngestionPipeline {
    name: String,
    config: PipelineConfig,
    decoder: EventDecoder,
    source: Arc<dyn LogSource>,
    store: Arc<dyn EscrowStore>,
    metrics: Arc<IndexerMetrics>,
    feed: UpdateFeed,
}

impl IngestionPipeline {
    pub fn new(
        config: PipelineConfig,
        source: Arc<dyn LogSource>,
        store: Arc<dyn EscrowStore>,
        metrics: Arc<IndexerMetrics>,
        feed: UpdateFeed,
    ) -> Self {
        Self {
            name: config.name(),
            decoder: EventDecoder::new(config.scope()),
            config,
            source,
            store,
            metrics,
            feed,
        }
    }

    pub fn scope(&self) -> ChainScope {
        self.decoder.scope()
    }

    /// Poll until `cancel` fires. Failures are logged and retried on the next
    /// round, starting again from the stored checkpoint.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            "[Pipeline {}] Starting for {} from block {}",
            self.name,
            self.scope(),
            self.config.start_block
        );
        loop {
            if cancel.is_cancelled() {
                break;
            }
            match self.sync_once(&cancel).await {
                Ok(Progress::MoreBlocks) => continue,
                Ok(Progress::CaughtUp) => {}
                Ok(Progress::Cancelled) => break,
                Err(e) => error!("[Pipeline {}] Sync round failed: {:?}", self.name, e),
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }
        info!("[Pipeline {}] Stopped", self.name);
    }

    /// Scan one block range past the checkpoint.
    async fn sync_once(&self, cancel: &CancellationToken) -> anyhow::Result<Progress> {
        let scope = self.scope();
        let checkpoint = self
            .store
            .checkpoint(scope)
            .await
            .context("reading checkpoint")?;
        let from = checkpoint
            .map(|c| c.resume_block())
            .unwrap_or(0)
            .max(self.config.start_block);

        let latest = self.fetch(|| self.source.latest_block()).await?;
        let head = latest.saturating_sub(self.config.confirmations);
        if head < from {
            debug!(
                "[Pipeline {}] Head {} below next block {}, waiting",
                self.name, head, from
            );
            return Ok(Progress::CaughtUp);
        }
        let to = head.min(from + self.config.max_block_range - 1);

        let mut logs = self
            .fetch(|| self.source.fetch_logs(scope.contract, from, to))
            .await?;
        logs.sort_by_key(|log| log.position());
        debug!(
            "[Pipeline {}] Fetched {} logs in blocks {}-{}",
            self.name,
            logs.len(),
            from,
            to
        );

        for log in logs {
            if cancel.is_cancelled() {
                info!(
                    "[Pipeline {}] Cancelled before block {} log {}",
                    self.name, log.block_number, log.log_index
                );
                return Ok(Progress::Cancelled);
            }
            if checkpoint.is_some_and(|c| c.covers(log.position())) {
                continue;
            }
            self.process(log).await?;
        }

        self.store
            .advance_checkpoint(scope, Checkpoint::end_of_block(to))
            .await
            .context("advancing checkpoint")?;
        self.metrics
            .checkpoint_block
            .with_label_values(&[&self.name])
            .set(to as i64);

        Ok(if to < head {
            Progress::MoreBlocks
        } else {
            Progress::CaughtUp
        })
    }

    async fn process(&self, log: ChainLog) -> anyhow::Result<()> {
        let scope = self.scope();
        let chain = scope.chain_id.to_string();
        let position = log.position();

        let event = match self.decoder.decode(&log) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    "[Pipeline {}] Skipping undecodable log at block {} index {} (tx {:?}): {}",
                    self.name, position.block_number, position.log_index, log.tx_hash, e
                );
                self.metrics
                    .decode_errors
                    .with_label_values(&[&chain, e.error_type()])
                    .inc();
                self.store
                    .advance_checkpoint(scope, Checkpoint::at_entry(position))
                    .await?;
                return Ok(());
            }
        };

        let kind = event.kind();
        let outcome = self.store.ingest(&event).await?;
        match outcome {
            IngestOutcome::Duplicate => {
                debug!(
                    "[Pipeline {}] Already ingested {} in tx {:?}",
                    self.name, kind, event.tx_hash
                );
                self.metrics
                    .events_duplicate
                    .with_label_values(&[&chain])
                    .inc();
                return Ok(());
            }
            IngestOutcome::Applied(key) => {
                debug!("[Pipeline {}] Applied {} to escrow {}", self.name, kind, key);
                self.feed.publish(ProjectionUpdate {
                    key,
                    kind,
                    position,
                });
            }
            IngestOutcome::Orphaned(key) => {
                warn!(
                    "[Pipeline {}] {} for escrow {} which was never created (tx {:?})",
                    self.name, kind, key, event.tx_hash
                );
                self.metrics
                    .orphaned_events
                    .with_label_values(&[&chain, kind.as_str()])
                    .inc();
            }
            IngestOutcome::Stale(key) => {
                debug!(
                    "[Pipeline {}] {} does not change escrow {}",
                    self.name, kind, key
                );
            }
            IngestOutcome::Recorded => {}
        }
        self.metrics
            .events_ingested
            .with_label_values(&[&chain, kind.as_str()])
            .inc();
        Ok(())
    }

    /// One source call, bounded by the reconnect timeout and retried with
    /// backoff until the retry budget is spent.
    async fn fetch<T, F, C>(&self, call: C) -> anyhow::Result<T>
    where
        C: Fn() -> F,
        F: Future<Output = Result<T, SourceError>>,
    {
        let reconnect_timeout = self.config.reconnect_timeout();
        let result = retry_with_max_elapsed_time!(
            with_timeout(reconnect_timeout, call()),
            self.config.max_retry_duration(),
            RETRY_INITIAL_INTERVAL
        );
        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) | Err(e) => {
                self.metrics
                    .source_errors
                    .with_label_values(&[&self.scope().chain_id.to_string(), e.error_type()])
                    .inc();
                Err(e).context("chain source unavailable")
            }
        }
    }
}

async fn with_timeout<T>(
    timeout: Duration,
    call: impl Future<Output = Result<T, SourceError>>,
) -> Result<T, SourceError> {
    tokio::time::timeout(timeout, call)
        .await
        .unwrap_or_else(|_| Err(SourceError::Timeout(format!("no response in {:?}", timeout))))
}

/// Spawn every pipeline on its own task.
pub fn run_pipelines(
    pipelines: Vec<IngestionPipeline>,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    pipelines
        .into_iter()
        .map(|pipeline| {
            let cancel = cancel.clone();
            tokio::spawn(async move { pipeline.run(cancel).await })
        })
        .collect()
}
