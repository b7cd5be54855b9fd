// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use ethers::types::Address;
use tokio::sync::RwLock;
use tracing::debug;

use super::{EscrowStore, IngestOutcome};
use crate::error::StoreError;
use crate::projection::{apply_event, ProjectionOutcome};
use crate::types::{
    ChainScope, Checkpoint, DedupKey, EscrowKey, EscrowRecord, LogPosition, RawEvent,
};

#[derive(Default)]
struct Inner {
    seen: HashSet<DedupKey>,
    events: BTreeMap<ChainScope, Vec<RawEvent>>,
    records: BTreeMap<EscrowKey, EscrowRecord>,
    checkpoints: BTreeMap<ChainScope, Checkpoint>,
}

impl Inner {
    fn advance(&mut self, scope: ChainScope, checkpoint: Checkpoint) {
        let entry = self.checkpoints.entry(scope).or_insert(checkpoint);
        if checkpoint > *entry {
            *entry = checkpoint;
        }
    }
}

/// Process-local store. One lock guards all maps, so every ingest is atomic
/// and readers see a consistent snapshot.
#[derive(Default)]
pub struct InMemoryEscrowStore {
    inner: RwLock<Inner>,
}

impl InMemoryEscrowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EscrowStore for InMemoryEscrowStore {
    async fn ingest(&self, event: &RawEvent) -> Result<IngestOutcome, StoreError> {
        let mut inner = self.inner.write().await;
        let checkpoint = Checkpoint::at_entry(event.position);

        if !inner.seen.insert(event.dedup_key()) {
            debug!(
                "[Store] Duplicate {} in tx {:?}, ignoring",
                event.kind(),
                event.tx_hash
            );
            inner.advance(event.scope, checkpoint);
            return Ok(IngestOutcome::Duplicate);
        }
        inner
            .events
            .entry(event.scope)
            .or_default()
            .push(event.clone());

        let current = event.escrow_key().and_then(|key| inner.records.get(&key));
        let outcome = match apply_event(current, event) {
            ProjectionOutcome::Applied(record) => {
                let key = record.key;
                inner.records.insert(key, record);
                IngestOutcome::Applied(key)
            }
            ProjectionOutcome::Orphaned(key) => IngestOutcome::Orphaned(key),
            ProjectionOutcome::Stale(key) => IngestOutcome::Stale(key),
            ProjectionOutcome::NoProjection => IngestOutcome::Recorded,
        };
        inner.advance(event.scope, checkpoint);
        Ok(outcome)
    }

    async fn advance_checkpoint(
        &self,
        scope: ChainScope,
        checkpoint: Checkpoint,
    ) -> Result<(), StoreError> {
        self.inner.write().await.advance(scope, checkpoint);
        Ok(())
    }

    async fn checkpoint(&self, scope: ChainScope) -> Result<Option<Checkpoint>, StoreError> {
        Ok(self.inner.read().await.checkpoints.get(&scope).copied())
    }

    async fn checkpoints(&self) -> Result<Vec<(ChainScope, Checkpoint)>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .checkpoints
            .iter()
            .map(|(scope, cp)| (*scope, *cp))
            .collect())
    }

    async fn get(&self, key: &EscrowKey) -> Result<Option<EscrowRecord>, StoreError> {
        Ok(self.inner.read().await.records.get(key).cloned())
    }

    async fn list_by_participant(
        &self,
        address: &Address,
    ) -> Result<Vec<EscrowRecord>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .records
            .values()
            .filter(|record| record.is_participant(address))
            .cloned()
            .collect())
    }

    async fn events(&self, scope: ChainScope) -> Result<Vec<RawEvent>, StoreError> {
        let mut events = self
            .inner
            .read()
            .await
            .events
            .get(&scope)
            .cloned()
            .unwrap_or_default();
        events.sort_by_key(|event| event.position);
        Ok(events)
    }

    async fn replace_record(
        &self,
        record: &EscrowRecord,
        expected: Option<LogPosition>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let stored = inner.records.get(&record.key).map(|r| r.last_position);
        if stored != expected {
            return Ok(false);
        }
        inner.records.insert(record.key, record.clone());
        Ok(true)
    }

    async fn replace_projection(
        &self,
        scope: ChainScope,
        records: Vec<EscrowRecord>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.records.retain(|key, _| key.scope != scope);
        for record in records {
            inner.records.insert(record.key, record);
        }
        Ok(())
    }
}
