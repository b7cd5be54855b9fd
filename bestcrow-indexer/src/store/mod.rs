// SPDX-License-Identifier: Apache-2.0

//! Durable storage for the raw event log and the escrow projection.

use async_trait::async_trait;
use ethers::types::Address;
use tracing::info;

use crate::error::StoreError;
use crate::projection::replay;
use crate::types::{ChainScope, Checkpoint, EscrowKey, EscrowRecord, LogPosition, RawEvent};

mod memory;
mod pg;

pub use memory::InMemoryEscrowStore;
pub use pg::PgEscrowStore;

/// What [`EscrowStore::ingest`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Appended and projected onto the escrow record.
    Applied(EscrowKey),
    /// Dedup key already present. Nothing was written.
    Duplicate,
    /// Appended, but the escrow has no Created event yet, so no record was touched.
    Orphaned(EscrowKey),
    /// Appended, but the event no longer changes the record.
    Stale(EscrowKey),
    /// Appended. The event has no escrow record (contract-level event).
    Recorded,
}

#[async_trait]
pub trait EscrowStore: Send + Sync {
    /// Deduplicate, append, project and advance the scope checkpoint to the
    /// event's position, all in one atomic step.
    async fn ingest(&self, event: &RawEvent) -> Result<IngestOutcome, StoreError>;

    /// Move the scope checkpoint forward. Never moves it backwards.
    async fn advance_checkpoint(
        &self,
        scope: ChainScope,
        checkpoint: Checkpoint,
    ) -> Result<(), StoreError>;

    async fn checkpoint(&self, scope: ChainScope) -> Result<Option<Checkpoint>, StoreError>;

    async fn checkpoints(&self) -> Result<Vec<(ChainScope, Checkpoint)>, StoreError>;

    async fn get(&self, key: &EscrowKey) -> Result<Option<EscrowRecord>, StoreError>;

    /// Records where `address` is depositor or receiver, across all scopes.
    async fn list_by_participant(&self, address: &Address)
        -> Result<Vec<EscrowRecord>, StoreError>;

    /// The scope's raw event log in chain order.
    async fn events(&self, scope: ChainScope) -> Result<Vec<RawEvent>, StoreError>;

    /// Overwrite one record, bypassing the event fold, only while the stored
    /// record still ends at `expected` (`None`: nothing stored for the key).
    /// Checked under the same lock or transaction as `ingest`, so an event
    /// applied in the meantime is never overwritten. Returns whether it wrote.
    async fn replace_record(
        &self,
        record: &EscrowRecord,
        expected: Option<LogPosition>,
    ) -> Result<bool, StoreError>;

    /// Drop every record of the scope and store `records` in their place.
    async fn replace_projection(
        &self,
        scope: ChainScope,
        records: Vec<EscrowRecord>,
    ) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildReport {
    pub events: usize,
    pub records: usize,
    pub skipped: usize,
}

/// Re-derive the scope's projection from its event log.
pub async fn rebuild(
    store: &dyn EscrowStore,
    scope: ChainScope,
) -> Result<RebuildReport, StoreError> {
    let events = store.events(scope).await?;
    let (records, skipped) = replay(&events);
    let report = RebuildReport {
        events: events.len(),
        records: records.len(),
        skipped,
    };
    store
        .replace_projection(scope, records.into_values().collect())
        .await?;
    info!(
        "[Store] Rebuilt projection for {}: {} events, {} records, {} skipped",
        scope, report.events, report.records, report.skipped
    );
    Ok(report)
}
