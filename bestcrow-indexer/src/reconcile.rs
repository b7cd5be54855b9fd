// SPDX-License-Identifier: Apache-2.0

//! Backfill and repair of the projection from the contract's own view of
//! each escrow. Contract state wins over whatever the event fold produced.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::providers::{Http, Provider};
use ethers::types::{Address, U256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::SourceError;
use crate::events::{Bestcrow, MAX_STORED_INTEGER};
use crate::metrics::IndexerMetrics;
use crate::retry_with_max_elapsed_time;
use crate::store::EscrowStore;
use crate::types::{ChainScope, EscrowFlags, EscrowKey, EscrowRecord, LogPosition, Settlement};

/// Fields the contract reports for one escrow id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowDetails {
    pub depositor: Address,
    pub receiver: Address,
    pub token: Address,
    pub amount: U256,
    pub expiry_date: u64,
    pub created_at: u64,
    pub flags: EscrowFlags,
    pub is_native: bool,
    pub title: String,
    pub description: String,
}

impl EscrowDetails {
    /// Unused ids read back as zeroed storage.
    pub fn exists(&self) -> bool {
        self.depositor != Address::zero()
    }
}

/// Read-only view functions of a deployment.
#[async_trait]
pub trait EscrowReader: Send + Sync {
    /// The contract's escrow counter. Ids start at 1 and every id up to and
    /// including the counter may be in use; unused slots read back empty.
    async fn next_escrow_id(&self) -> Result<u64, SourceError>;

    async fn escrow_details(&self, escrow_id: u64) -> Result<EscrowDetails, SourceError>;
}

pub struct ContractEscrowReader {
    contract: Bestcrow<Provider<Http>>,
}

impl ContractEscrowReader {
    pub fn new(address: Address, provider: Arc<Provider<Http>>) -> Self {
        Self {
            contract: Bestcrow::new(address, provider),
        }
    }
}

fn stored_integer(field: &str, value: U256) -> Result<u64, SourceError> {
    if value > U256::from(MAX_STORED_INTEGER) {
        return Err(SourceError::InvalidResponse(format!(
            "{} {} out of range",
            field, value
        )));
    }
    Ok(value.as_u64())
}

#[async_trait]
impl EscrowReader for ContractEscrowReader {
    async fn next_escrow_id(&self) -> Result<u64, SourceError> {
        let next = self
            .contract
            .next_escrow_id()
            .call()
            .await
            .map_err(|e| SourceError::Rpc(e.to_string()))?;
        stored_integer("nextEscrowId", next)
    }

    async fn escrow_details(&self, escrow_id: u64) -> Result<EscrowDetails, SourceError> {
        let (
            depositor,
            receiver,
            token,
            amount,
            expiry_date,
            created_at,
            is_active,
            is_completed,
            is_eth,
            release_requested,
            title,
            description,
        ) = self
            .contract
            .escrow_details(U256::from(escrow_id))
            .call()
            .await
            .map_err(|e| SourceError::Rpc(e.to_string()))?;
        Ok(EscrowDetails {
            depositor,
            receiver,
            token,
            amount,
            expiry_date: stored_integer("expiryDate", expiry_date)?,
            created_at: stored_integer("createdAt", created_at)?,
            flags: EscrowFlags {
                is_active,
                is_completed,
                release_requested,
            },
            is_native: is_eth,
            title,
            description,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub checked: u64,
    pub backfilled: u64,
    pub corrected: u64,
    pub unchanged: u64,
    /// Left alone because the pipeline moved the record during the check.
    pub skipped: u64,
}

pub struct Reconciler {
    reader: Arc<dyn EscrowReader>,
    store: Arc<dyn EscrowStore>,
    metrics: Arc<IndexerMetrics>,
    max_retry_duration: Duration,
}

impl Reconciler {
    pub fn new(
        reader: Arc<dyn EscrowReader>,
        store: Arc<dyn EscrowStore>,
        metrics: Arc<IndexerMetrics>,
    ) -> Self {
        Self {
            reader,
            store,
            metrics,
            max_retry_duration: Duration::from_secs(60),
        }
    }

    pub fn with_max_retry_duration(mut self, max_retry_duration: Duration) -> Self {
        self.max_retry_duration = max_retry_duration;
        self
    }

    /// Compare every escrow id of `scope` against the contract.
    pub async fn run(&self, scope: ChainScope) -> anyhow::Result<ReconcileReport> {
        let next = match retry_with_max_elapsed_time!(
            self.reader.next_escrow_id(),
            self.max_retry_duration
        ) {
            Ok(Ok(next)) => next,
            Ok(Err(e)) | Err(e) => return Err(e.into()),
        };

        let mut report = ReconcileReport::default();
        for escrow_id in 1..=next {
            // Snapshot before the contract read, so any event applied after it
            // shows up as a moved position and the write below backs off.
            let key = EscrowKey::new(scope, escrow_id);
            let current = self.store.get(&key).await?;
            let details = match retry_with_max_elapsed_time!(
                self.reader.escrow_details(escrow_id),
                self.max_retry_duration
            ) {
                Ok(Ok(details)) => details,
                Ok(Err(e)) | Err(e) => return Err(e.into()),
            };
            report.checked += 1;
            if !details.exists() {
                warn!(
                    "[Reconcile] Escrow {} of {} reads back empty",
                    escrow_id, scope
                );
                continue;
            }

            match reconcile_record(key, current.as_ref(), details) {
                None => report.unchanged += 1,
                Some(record) => {
                    let expected = current.as_ref().map(|r| r.last_position);
                    if !self.store.replace_record(&record, expected).await? {
                        debug!(
                            "[Reconcile] Escrow {} moved on during the check, leaving it",
                            key
                        );
                        report.skipped += 1;
                        continue;
                    }
                    if current.is_some() {
                        warn!(
                            "[Reconcile] Escrow {} diverged from contract state, flags {:?} -> {:?}",
                            key,
                            current.as_ref().map(|r| r.flags),
                            record.flags
                        );
                        report.corrected += 1;
                    } else {
                        info!("[Reconcile] Backfilled escrow {}", key);
                        report.backfilled += 1;
                    }
                    self.metrics
                        .reconcile_corrections
                        .with_label_values(&[&scope.chain_id.to_string()])
                        .inc();
                }
            }
        }

        info!(
            "[Reconcile] {}: checked {}, backfilled {}, corrected {}, unchanged {}, skipped {}",
            scope,
            report.checked,
            report.backfilled,
            report.corrected,
            report.unchanged,
            report.skipped
        );
        Ok(report)
    }

    /// Reconcile `scope` every `interval` until cancelled.
    pub async fn run_periodically(
        self,
        scope: ChainScope,
        interval: Duration,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            if let Err(e) = self.run(scope).await {
                error!("[Reconcile] {} failed: {:?}", scope, e);
            }
        }
    }
}

/// The record to store for `details`, or `None` when `current` already agrees.
fn reconcile_record(
    key: EscrowKey,
    current: Option<&EscrowRecord>,
    details: EscrowDetails,
) -> Option<EscrowRecord> {
    let settlement = settlement_for(details.flags, current.and_then(|r| r.settlement));
    let record = EscrowRecord {
        key,
        depositor: details.depositor,
        receiver: details.receiver,
        token: details.token,
        amount: details.amount,
        expiry_date: details.expiry_date,
        created_at: details.created_at,
        title: details.title,
        description: details.description,
        flags: details.flags,
        settlement,
        last_position: current
            .map(|r| r.last_position)
            .unwrap_or(LogPosition::new(0, 0)),
    };
    match current {
        Some(current) if *current == record => None,
        _ => Some(record),
    }
}

// Flags alone cannot tell a rejection from a refund, so a known rejection is kept.
fn settlement_for(flags: EscrowFlags, known: Option<Settlement>) -> Option<Settlement> {
    match (flags.is_completed, flags.release_requested) {
        (false, _) => None,
        (true, true) => Some(Settlement::Released),
        (true, false) => match known {
            Some(Settlement::Rejected) => Some(Settlement::Rejected),
            _ => Some(Settlement::Refunded),
        },
    }
}
