// SPDX-License-Identifier: Apache-2.0

//! Read side. Statuses are derived at query time from the stored flags and
//! the clock, never cached, since expiry depends on the current time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use ethers::types::{Address, U256};
use tokio::sync::broadcast;
use tracing::warn;

use crate::error::QueryError;
use crate::feed::{ProjectionUpdate, UpdateFeed};
use crate::fees::{FeeQuote, FeeSchedule};
use crate::metrics::IndexerMetrics;
use crate::status::{project, EscrowStatus, TimelineStep};
use crate::store::EscrowStore;
use crate::types::{ChainScope, Checkpoint, EscrowKey, EscrowRecord};

/// Source of "now", in seconds since the epoch.
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
    }
}

/// Settable clock for tests and replays.
#[derive(Debug, Default)]
pub struct FixedClock(AtomicU64);

impl FixedClock {
    pub fn new(now: u64) -> Self {
        Self(AtomicU64::new(now))
    }

    pub fn set(&self, now: u64) {
        self.0.store(now, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// A record with its status and timeline as of `evaluated_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowView {
    pub record: EscrowRecord,
    pub status: EscrowStatus,
    pub timeline: Vec<TimelineStep>,
    pub is_native: bool,
    pub evaluated_at: u64,
}

pub struct QueryService {
    store: Arc<dyn EscrowStore>,
    fees: FeeSchedule,
    clock: Arc<dyn Clock>,
    feed: UpdateFeed,
    metrics: Arc<IndexerMetrics>,
}

impl QueryService {
    pub fn new(
        store: Arc<dyn EscrowStore>,
        fees: FeeSchedule,
        feed: UpdateFeed,
        metrics: Arc<IndexerMetrics>,
    ) -> Self {
        Self {
            store,
            fees,
            clock: Arc::new(SystemClock),
            feed,
            metrics,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Detail view of one escrow. Only its depositor and receiver may see it.
    pub async fn get_by_id(
        &self,
        key: &EscrowKey,
        viewer: &Address,
    ) -> Result<EscrowView, QueryError> {
        let record = self.store.get(key).await?.ok_or(QueryError::NotFound)?;
        if !record.is_participant(viewer) {
            return Err(QueryError::Forbidden);
        }
        Ok(self.view(record, self.clock.now()))
    }

    /// Every escrow where `address` is depositor or receiver, in key order.
    /// Only `address` itself may list them.
    pub async fn list_by_participant(
        &self,
        address: &Address,
        viewer: &Address,
    ) -> Result<Vec<EscrowView>, QueryError> {
        if address != viewer {
            return Err(QueryError::Forbidden);
        }
        self.participant_views(address).await
    }

    async fn participant_views(&self, address: &Address) -> Result<Vec<EscrowView>, QueryError> {
        let mut records = self.store.list_by_participant(address).await?;
        records.sort_by_key(|r| r.key);
        let now = self.clock.now();
        Ok(records.into_iter().map(|r| self.view(r, now)).collect())
    }

    /// Filter the viewer's escrows by `text` against id and title (case
    /// insensitive, empty text matches everything) and optionally by status.
    pub async fn search(
        &self,
        viewer: &Address,
        text: &str,
        status: Option<EscrowStatus>,
    ) -> Result<Vec<EscrowView>, QueryError> {
        let needle = text.trim().to_lowercase();
        let views = self.participant_views(viewer).await?;
        Ok(views
            .into_iter()
            .filter(|view| status.map_or(true, |status| view.status == status))
            .filter(|view| {
                needle.is_empty()
                    || view.record.key.escrow_id.to_string().contains(&needle)
                    || view.record.title.to_lowercase().contains(&needle)
            })
            .collect())
    }

    pub fn quote(&self, amount: U256) -> Result<FeeQuote, QueryError> {
        Ok(self.fees.quote(amount)?)
    }

    pub fn fees(&self) -> FeeSchedule {
        self.fees
    }

    /// Change notifications. Consumers re-query on their own schedule.
    pub fn subscribe(&self) -> broadcast::Receiver<ProjectionUpdate> {
        self.feed.subscribe()
    }

    pub async fn checkpoints(&self) -> Result<Vec<(ChainScope, Checkpoint)>, QueryError> {
        let mut checkpoints = self.store.checkpoints().await?;
        checkpoints.sort_by_key(|(scope, _)| *scope);
        Ok(checkpoints)
    }

    fn view(&self, record: EscrowRecord, now: u64) -> EscrowView {
        let projected = project(record.flags, record.expiry_date, now);
        if projected.status == EscrowStatus::Unknown {
            warn!(
                "[Query] Escrow {} has an impossible flag combination {:?}",
                record.key, record.flags
            );
            self.metrics.unknown_status.inc();
        }
        EscrowView {
            is_native: record.is_native(),
            status: projected.status,
            timeline: projected.timeline,
            evaluated_at: now,
            record,
        }
    }
}
