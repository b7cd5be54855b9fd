// SPDX-License-Identifier: Apache-2.0

//! Postgres backend. Each event kind has its own append-only table whose
//! primary key is the dedup key; the `escrows` table holds the projection.

use async_trait::async_trait;
use bestcrow_pg_db::{Connection, Db};
use bestcrow_schema::models::{
    EscrowAcceptedRow, EscrowCompletedRow, EscrowCreatedRow, EscrowRefundedRow,
    EscrowRejectedRow, EscrowRow, FeesWithdrawnRow, ReleaseRequestedRow,
};
use bestcrow_schema::schema::{
    escrow_accepted_events, escrow_completed_events, escrow_created_events,
    escrow_refunded_events, escrow_rejected_events, escrows, fees_withdrawn_events,
    pipeline_checkpoints, release_requested_events,
};
use diesel::{
    BoolExpressionMethods, ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper,
};
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use ethers::types::{Address, H256, U256};
use tracing::debug;

use super::{EscrowStore, IngestOutcome};
use crate::error::StoreError;
use crate::projection::{apply_event, ProjectionOutcome};
use crate::types::{
    ChainScope, Checkpoint, EscrowEvent, EscrowFlags, EscrowKey, EscrowRecord, LogPosition,
    RawEvent,
};

const INSERT_CHUNK: usize = 1_000;

#[derive(Clone)]
pub struct PgEscrowStore {
    db: Db,
}

impl PgEscrowStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    async fn connect(&self) -> Result<Connection<'_>, StoreError> {
        self.db
            .connect()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }
}

#[async_trait]
impl EscrowStore for PgEscrowStore {
    async fn ingest(&self, event: &RawEvent) -> Result<IngestOutcome, StoreError> {
        let mut conn = self.connect().await?;
        conn.as_pg()
            .transaction::<_, StoreError, _>(|conn| {
                async move {
                    let checkpoint = Checkpoint::at_entry(event.position);
                    if insert_event(conn, event).await? == 0 {
                        debug!(
                            "[Store] Duplicate {} in tx {:?}, ignoring",
                            event.kind(),
                            event.tx_hash
                        );
                        store_checkpoint(conn, event.scope, checkpoint).await?;
                        return Ok(IngestOutcome::Duplicate);
                    }

                    let outcome = match event.escrow_key() {
                        Some(key) => {
                            let current = lock_record(conn, &key).await?;
                            match apply_event(current.as_ref(), event) {
                                ProjectionOutcome::Applied(record) => {
                                    upsert_record(conn, &record).await?;
                                    IngestOutcome::Applied(key)
                                }
                                ProjectionOutcome::Orphaned(key) => IngestOutcome::Orphaned(key),
                                ProjectionOutcome::Stale(key) => IngestOutcome::Stale(key),
                                ProjectionOutcome::NoProjection => IngestOutcome::Recorded,
                            }
                        }
                        None => IngestOutcome::Recorded,
                    };
                    store_checkpoint(conn, event.scope, checkpoint).await?;
                    Ok(outcome)
                }
                .scope_boxed()
            })
            .await
    }

    async fn advance_checkpoint(
        &self,
        scope: ChainScope,
        checkpoint: Checkpoint,
    ) -> Result<(), StoreError> {
        let mut conn = self.connect().await?;
        conn.as_pg()
            .transaction::<_, StoreError, _>(|conn| {
                async move { store_checkpoint(conn, scope, checkpoint).await }.scope_boxed()
            })
            .await
    }

    async fn checkpoint(&self, scope: ChainScope) -> Result<Option<Checkpoint>, StoreError> {
        let mut conn = self.connect().await?;
        load_checkpoint(conn.as_pg(), scope).await
    }

    async fn checkpoints(&self) -> Result<Vec<(ChainScope, Checkpoint)>, StoreError> {
        use pipeline_checkpoints::dsl;

        let mut conn = self.connect().await?;
        let rows: Vec<(i64, Vec<u8>, i64, Option<i64>)> = dsl::pipeline_checkpoints
            .select((
                dsl::chain_id,
                dsl::contract_address,
                dsl::block_number,
                dsl::log_index,
            ))
            .order((dsl::chain_id, dsl::contract_address))
            .load(conn.as_pg())
            .await?;

        rows.into_iter()
            .map(|(chain_id, contract, block_number, log_index)| {
                let table = "pipeline_checkpoints";
                let scope = ChainScope::new(
                    from_i64(chain_id, table, "chain_id")?,
                    address_from(&contract, table)?,
                );
                Ok::<_, StoreError>((scope, checkpoint_from(block_number, log_index)?))
            })
            .collect()
    }

    async fn get(&self, key: &EscrowKey) -> Result<Option<EscrowRecord>, StoreError> {
        let mut conn = self.connect().await?;
        load_record(conn.as_pg(), key).await
    }

    async fn list_by_participant(
        &self,
        address: &Address,
    ) -> Result<Vec<EscrowRecord>, StoreError> {
        let mut conn = self.connect().await?;
        let bytes = address.as_bytes().to_vec();
        let rows: Vec<EscrowRow> = escrows::table
            .filter(
                escrows::depositor
                    .eq(bytes.clone())
                    .or(escrows::receiver.eq(bytes)),
            )
            .order((
                escrows::chain_id,
                escrows::contract_address,
                escrows::escrow_id,
            ))
            .select(EscrowRow::as_select())
            .load(conn.as_pg())
            .await?;
        rows.into_iter().map(record_from_row).collect()
    }

    async fn events(&self, scope: ChainScope) -> Result<Vec<RawEvent>, StoreError> {
        let mut conn = self.connect().await?;
        load_events(conn.as_pg(), scope).await
    }

    async fn replace_record(
        &self,
        record: &EscrowRecord,
        expected: Option<LogPosition>,
    ) -> Result<bool, StoreError> {
        let row = row_from_record(record)?;
        let key = record.key;
        let mut conn = self.connect().await?;
        conn.as_pg()
            .transaction::<_, StoreError, _>(|conn| {
                async move {
                    let Some(expected) = expected else {
                        let inserted = diesel::insert_into(escrows::table)
                            .values(&row)
                            .on_conflict_do_nothing()
                            .execute(conn)
                            .await?;
                        return Ok(inserted == 1);
                    };
                    let stored = lock_record(conn, &key).await?;
                    if stored.map(|r| r.last_position) != Some(expected) {
                        return Ok(false);
                    }
                    upsert_record(conn, record).await?;
                    Ok(true)
                }
                .scope_boxed()
            })
            .await
    }

    async fn replace_projection(
        &self,
        scope: ChainScope,
        records: Vec<EscrowRecord>,
    ) -> Result<(), StoreError> {
        let rows = records
            .iter()
            .map(row_from_record)
            .collect::<Result<Vec<_>, _>>()?;
        let chain_id = to_i64(scope.chain_id, "chain_id")?;
        let contract = scope.contract.as_bytes().to_vec();

        let mut conn = self.connect().await?;
        conn.as_pg()
            .transaction::<_, StoreError, _>(|conn| {
                async move {
                    diesel::delete(
                        escrows::table
                            .filter(escrows::chain_id.eq(chain_id))
                            .filter(escrows::contract_address.eq(contract)),
                    )
                    .execute(conn)
                    .await?;
                    for chunk in rows.chunks(INSERT_CHUNK) {
                        diesel::insert_into(escrows::table)
                            .values(chunk)
                            .execute(conn)
                            .await?;
                    }
                    Ok(())
                }
                .scope_boxed()
            })
            .await
    }
}

async fn load_checkpoint(
    conn: &mut AsyncPgConnection,
    scope: ChainScope,
) -> Result<Option<Checkpoint>, StoreError> {
    use pipeline_checkpoints::dsl;

    let row: Option<(i64, Option<i64>)> = dsl::pipeline_checkpoints
        .filter(dsl::chain_id.eq(to_i64(scope.chain_id, "chain_id")?))
        .filter(dsl::contract_address.eq(scope.contract.as_bytes().to_vec()))
        .select((dsl::block_number, dsl::log_index))
        .first(conn)
        .await
        .optional()?;

    row.map(|(block_number, log_index)| checkpoint_from(block_number, log_index))
        .transpose()
}

/// Upsert the checkpoint unless the stored one is already at or past it.
async fn store_checkpoint(
    conn: &mut AsyncPgConnection,
    scope: ChainScope,
    checkpoint: Checkpoint,
) -> Result<(), StoreError> {
    use diesel::dsl::now;
    use pipeline_checkpoints::dsl;

    if load_checkpoint(conn, scope)
        .await?
        .is_some_and(|current| current >= checkpoint)
    {
        return Ok(());
    }

    let block_number = to_i64(checkpoint.block_number, "block_number")?;
    let log_index = checkpoint
        .log_index
        .map(|index| to_i64(index, "log_index"))
        .transpose()?;

    diesel::insert_into(dsl::pipeline_checkpoints)
        .values((
            dsl::chain_id.eq(to_i64(scope.chain_id, "chain_id")?),
            dsl::contract_address.eq(scope.contract.as_bytes().to_vec()),
            dsl::block_number.eq(block_number),
            dsl::log_index.eq(log_index),
            dsl::updated_at.eq(now),
        ))
        .on_conflict((dsl::chain_id, dsl::contract_address))
        .do_update()
        .set((
            dsl::block_number.eq(block_number),
            dsl::log_index.eq(log_index),
            dsl::updated_at.eq(now),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

async fn load_record(
    conn: &mut AsyncPgConnection,
    key: &EscrowKey,
) -> Result<Option<EscrowRecord>, StoreError> {
    let row: Option<EscrowRow> = escrows::table
        .filter(escrows::chain_id.eq(to_i64(key.scope.chain_id, "chain_id")?))
        .filter(escrows::contract_address.eq(key.scope.contract.as_bytes().to_vec()))
        .filter(escrows::escrow_id.eq(to_i64(key.escrow_id, "escrow_id")?))
        .select(EscrowRow::as_select())
        .first(conn)
        .await
        .optional()?;
    row.map(record_from_row).transpose()
}

/// Like `load_record`, holding the row lock until the transaction ends.
async fn lock_record(
    conn: &mut AsyncPgConnection,
    key: &EscrowKey,
) -> Result<Option<EscrowRecord>, StoreError> {
    let row: Option<EscrowRow> = escrows::table
        .filter(escrows::chain_id.eq(to_i64(key.scope.chain_id, "chain_id")?))
        .filter(escrows::contract_address.eq(key.scope.contract.as_bytes().to_vec()))
        .filter(escrows::escrow_id.eq(to_i64(key.escrow_id, "escrow_id")?))
        .select(EscrowRow::as_select())
        .for_update()
        .first(conn)
        .await
        .optional()?;
    row.map(record_from_row).transpose()
}

async fn upsert_record(
    conn: &mut AsyncPgConnection,
    record: &EscrowRecord,
) -> Result<(), StoreError> {
    let row = row_from_record(record)?;
    diesel::insert_into(escrows::table)
        .values(&row)
        .on_conflict((
            escrows::chain_id,
            escrows::contract_address,
            escrows::escrow_id,
        ))
        .do_update()
        .set(&row)
        .execute(conn)
        .await?;
    Ok(())
}

/// Columns shared by every event table.
struct EventColumns {
    chain_id: i64,
    contract_address: Vec<u8>,
    txn_hash: Vec<u8>,
    block_number: i64,
    log_index: i64,
}

impl EventColumns {
    fn of(event: &RawEvent) -> Result<Self, StoreError> {
        Ok(Self {
            chain_id: to_i64(event.scope.chain_id, "chain_id")?,
            contract_address: event.scope.contract.as_bytes().to_vec(),
            txn_hash: event.tx_hash.as_bytes().to_vec(),
            block_number: to_i64(event.position.block_number, "block_number")?,
            log_index: to_i64(event.position.log_index, "log_index")?,
        })
    }
}

/// Returns the number of inserted rows; zero means the dedup key already existed.
async fn insert_event(
    conn: &mut AsyncPgConnection,
    event: &RawEvent,
) -> Result<usize, StoreError> {
    let c = EventColumns::of(event)?;
    let inserted = match &event.event {
        EscrowEvent::Created {
            escrow_id,
            depositor,
            receiver,
            token,
            amount,
            expiry_date,
            created_at,
            title,
            description,
        } => {
            let row = EscrowCreatedRow {
                chain_id: c.chain_id,
                contract_address: c.contract_address,
                txn_hash: c.txn_hash,
                block_number: c.block_number,
                log_index: c.log_index,
                escrow_id: to_i64(*escrow_id, "escrow_id")?,
                depositor: depositor.as_bytes().to_vec(),
                receiver: receiver.as_bytes().to_vec(),
                token: token.as_bytes().to_vec(),
                amount: amount.to_string(),
                expiry_date: to_i64(*expiry_date, "expiry_date")?,
                created_at: to_i64(*created_at, "created_at")?,
                title: title.clone(),
                description: description.clone(),
            };
            diesel::insert_into(escrow_created_events::table)
                .values(&row)
                .on_conflict_do_nothing()
                .execute(conn)
                .await?
        }
        EscrowEvent::Accepted {
            escrow_id,
            receiver,
        } => {
            let row = EscrowAcceptedRow {
                chain_id: c.chain_id,
                contract_address: c.contract_address,
                txn_hash: c.txn_hash,
                block_number: c.block_number,
                log_index: c.log_index,
                escrow_id: to_i64(*escrow_id, "escrow_id")?,
                receiver: receiver.as_bytes().to_vec(),
            };
            diesel::insert_into(escrow_accepted_events::table)
                .values(&row)
                .on_conflict_do_nothing()
                .execute(conn)
                .await?
        }
        EscrowEvent::Rejected {
            escrow_id,
            receiver,
        } => {
            let row = EscrowRejectedRow {
                chain_id: c.chain_id,
                contract_address: c.contract_address,
                txn_hash: c.txn_hash,
                block_number: c.block_number,
                log_index: c.log_index,
                escrow_id: to_i64(*escrow_id, "escrow_id")?,
                receiver: receiver.as_bytes().to_vec(),
            };
            diesel::insert_into(escrow_rejected_events::table)
                .values(&row)
                .on_conflict_do_nothing()
                .execute(conn)
                .await?
        }
        EscrowEvent::ReleaseRequested { escrow_id } => {
            let row = ReleaseRequestedRow {
                chain_id: c.chain_id,
                contract_address: c.contract_address,
                txn_hash: c.txn_hash,
                block_number: c.block_number,
                log_index: c.log_index,
                escrow_id: to_i64(*escrow_id, "escrow_id")?,
            };
            diesel::insert_into(release_requested_events::table)
                .values(&row)
                .on_conflict_do_nothing()
                .execute(conn)
                .await?
        }
        EscrowEvent::Completed {
            escrow_id,
            receiver,
            amount,
        } => {
            let row = EscrowCompletedRow {
                chain_id: c.chain_id,
                contract_address: c.contract_address,
                txn_hash: c.txn_hash,
                block_number: c.block_number,
                log_index: c.log_index,
                escrow_id: to_i64(*escrow_id, "escrow_id")?,
                receiver: receiver.as_bytes().to_vec(),
                amount: amount.to_string(),
            };
            diesel::insert_into(escrow_completed_events::table)
                .values(&row)
                .on_conflict_do_nothing()
                .execute(conn)
                .await?
        }
        EscrowEvent::Refunded {
            escrow_id,
            depositor,
        } => {
            let row = EscrowRefundedRow {
                chain_id: c.chain_id,
                contract_address: c.contract_address,
                txn_hash: c.txn_hash,
                block_number: c.block_number,
                log_index: c.log_index,
                escrow_id: to_i64(*escrow_id, "escrow_id")?,
                depositor: depositor.as_bytes().to_vec(),
            };
            diesel::insert_into(escrow_refunded_events::table)
                .values(&row)
                .on_conflict_do_nothing()
                .execute(conn)
                .await?
        }
        EscrowEvent::FeesWithdrawn { token, amount } => {
            let row = FeesWithdrawnRow {
                chain_id: c.chain_id,
                contract_address: c.contract_address,
                txn_hash: c.txn_hash,
                block_number: c.block_number,
                log_index: c.log_index,
                token: token.as_bytes().to_vec(),
                amount: amount.to_string(),
            };
            diesel::insert_into(fees_withdrawn_events::table)
                .values(&row)
                .on_conflict_do_nothing()
                .execute(conn)
                .await?
        }
    };
    Ok(inserted)
}

async fn load_events(
    conn: &mut AsyncPgConnection,
    scope: ChainScope,
) -> Result<Vec<RawEvent>, StoreError> {
    let chain_id = to_i64(scope.chain_id, "chain_id")?;
    let contract = scope.contract.as_bytes().to_vec();
    let mut events = Vec::new();

    let rows: Vec<EscrowCreatedRow> = escrow_created_events::table
        .filter(escrow_created_events::chain_id.eq(chain_id))
        .filter(escrow_created_events::contract_address.eq(contract.clone()))
        .select(EscrowCreatedRow::as_select())
        .load(conn)
        .await?;
    for row in rows {
        let table = "escrow_created_events";
        let event = EscrowEvent::Created {
            escrow_id: from_i64(row.escrow_id, table, "escrow_id")?,
            depositor: address_from(&row.depositor, table)?,
            receiver: address_from(&row.receiver, table)?,
            token: address_from(&row.token, table)?,
            amount: amount_from(&row.amount, table)?,
            expiry_date: from_i64(row.expiry_date, table, "expiry_date")?,
            created_at: from_i64(row.created_at, table, "created_at")?,
            title: row.title,
            description: row.description,
        };
        events.push(raw_event(
            scope,
            &row.txn_hash,
            row.block_number,
            row.log_index,
            table,
            event,
        )?);
    }

    let rows: Vec<EscrowAcceptedRow> = escrow_accepted_events::table
        .filter(escrow_accepted_events::chain_id.eq(chain_id))
        .filter(escrow_accepted_events::contract_address.eq(contract.clone()))
        .select(EscrowAcceptedRow::as_select())
        .load(conn)
        .await?;
    for row in rows {
        let table = "escrow_accepted_events";
        let event = EscrowEvent::Accepted {
            escrow_id: from_i64(row.escrow_id, table, "escrow_id")?,
            receiver: address_from(&row.receiver, table)?,
        };
        events.push(raw_event(
            scope,
            &row.txn_hash,
            row.block_number,
            row.log_index,
            table,
            event,
        )?);
    }

    let rows: Vec<EscrowRejectedRow> = escrow_rejected_events::table
        .filter(escrow_rejected_events::chain_id.eq(chain_id))
        .filter(escrow_rejected_events::contract_address.eq(contract.clone()))
        .select(EscrowRejectedRow::as_select())
        .load(conn)
        .await?;
    for row in rows {
        let table = "escrow_rejected_events";
        let event = EscrowEvent::Rejected {
            escrow_id: from_i64(row.escrow_id, table, "escrow_id")?,
            receiver: address_from(&row.receiver, table)?,
        };
        events.push(raw_event(
            scope,
            &row.txn_hash,
            row.block_number,
            row.log_index,
            table,
            event,
        )?);
    }

    let rows: Vec<ReleaseRequestedRow> = release_requested_events::table
        .filter(release_requested_events::chain_id.eq(chain_id))
        .filter(release_requested_events::contract_address.eq(contract.clone()))
        .select(ReleaseRequestedRow::as_select())
        .load(conn)
        .await?;
    for row in rows {
        let table = "release_requested_events";
        let event = EscrowEvent::ReleaseRequested {
            escrow_id: from_i64(row.escrow_id, table, "escrow_id")?,
        };
        events.push(raw_event(
            scope,
            &row.txn_hash,
            row.block_number,
            row.log_index,
            table,
            event,
        )?);
    }

    let rows: Vec<EscrowCompletedRow> = escrow_completed_events::table
        .filter(escrow_completed_events::chain_id.eq(chain_id))
        .filter(escrow_completed_events::contract_address.eq(contract.clone()))
        .select(EscrowCompletedRow::as_select())
        .load(conn)
        .await?;
    for row in rows {
        let table = "escrow_completed_events";
        let event = EscrowEvent::Completed {
            escrow_id: from_i64(row.escrow_id, table, "escrow_id")?,
            receiver: address_from(&row.receiver, table)?,
            amount: amount_from(&row.amount, table)?,
        };
        events.push(raw_event(
            scope,
            &row.txn_hash,
            row.block_number,
            row.log_index,
            table,
            event,
        )?);
    }

    let rows: Vec<EscrowRefundedRow> = escrow_refunded_events::table
        .filter(escrow_refunded_events::chain_id.eq(chain_id))
        .filter(escrow_refunded_events::contract_address.eq(contract.clone()))
        .select(EscrowRefundedRow::as_select())
        .load(conn)
        .await?;
    for row in rows {
        let table = "escrow_refunded_events";
        let event = EscrowEvent::Refunded {
            escrow_id: from_i64(row.escrow_id, table, "escrow_id")?,
            depositor: address_from(&row.depositor, table)?,
        };
        events.push(raw_event(
            scope,
            &row.txn_hash,
            row.block_number,
            row.log_index,
            table,
            event,
        )?);
    }

    let rows: Vec<FeesWithdrawnRow> = fees_withdrawn_events::table
        .filter(fees_withdrawn_events::chain_id.eq(chain_id))
        .filter(fees_withdrawn_events::contract_address.eq(contract))
        .select(FeesWithdrawnRow::as_select())
        .load(conn)
        .await?;
    for row in rows {
        let table = "fees_withdrawn_events";
        let event = EscrowEvent::FeesWithdrawn {
            token: address_from(&row.token, table)?,
            amount: amount_from(&row.amount, table)?,
        };
        events.push(raw_event(
            scope,
            &row.txn_hash,
            row.block_number,
            row.log_index,
            table,
            event,
        )?);
    }

    events.sort_by_key(|event| event.position);
    Ok(events)
}

fn raw_event(
    scope: ChainScope,
    txn_hash: &[u8],
    block_number: i64,
    log_index: i64,
    table: &'static str,
    event: EscrowEvent,
) -> Result<RawEvent, StoreError> {
    Ok(RawEvent {
        scope,
        tx_hash: h256_from(txn_hash, table)?,
        position: LogPosition::new(
            from_i64(block_number, table, "block_number")?,
            from_i64(log_index, table, "log_index")?,
        ),
        event,
    })
}

fn row_from_record(record: &EscrowRecord) -> Result<EscrowRow, StoreError> {
    Ok(EscrowRow {
        chain_id: to_i64(record.key.scope.chain_id, "chain_id")?,
        contract_address: record.key.scope.contract.as_bytes().to_vec(),
        escrow_id: to_i64(record.key.escrow_id, "escrow_id")?,
        depositor: record.depositor.as_bytes().to_vec(),
        receiver: record.receiver.as_bytes().to_vec(),
        token: record.token.as_bytes().to_vec(),
        amount: record.amount.to_string(),
        expiry_date: to_i64(record.expiry_date, "expiry_date")?,
        created_at: to_i64(record.created_at, "created_at")?,
        title: record.title.clone(),
        description: record.description.clone(),
        is_active: record.flags.is_active,
        is_completed: record.flags.is_completed,
        release_requested: record.flags.release_requested,
        settlement: record.settlement.map(|s| s.as_str().to_string()),
        last_block: to_i64(record.last_position.block_number, "last_block")?,
        last_log_index: to_i64(record.last_position.log_index, "last_log_index")?,
    })
}

fn record_from_row(row: EscrowRow) -> Result<EscrowRecord, StoreError> {
    let table = "escrows";
    let scope = ChainScope::new(
        from_i64(row.chain_id, table, "chain_id")?,
        address_from(&row.contract_address, table)?,
    );
    let settlement = row
        .settlement
        .as_deref()
        .map(str::parse::<crate::types::Settlement>)
        .transpose()
        .map_err(|reason| StoreError::Corrupt { table, reason })?;
    Ok(EscrowRecord {
        key: EscrowKey::new(scope, from_i64(row.escrow_id, table, "escrow_id")?),
        depositor: address_from(&row.depositor, table)?,
        receiver: address_from(&row.receiver, table)?,
        token: address_from(&row.token, table)?,
        amount: amount_from(&row.amount, table)?,
        expiry_date: from_i64(row.expiry_date, table, "expiry_date")?,
        created_at: from_i64(row.created_at, table, "created_at")?,
        title: row.title,
        description: row.description,
        flags: EscrowFlags {
            is_active: row.is_active,
            is_completed: row.is_completed,
            release_requested: row.release_requested,
        },
        settlement,
        last_position: LogPosition::new(
            from_i64(row.last_block, table, "last_block")?,
            from_i64(row.last_log_index, table, "last_log_index")?,
        ),
    })
}

fn checkpoint_from(block_number: i64, log_index: Option<i64>) -> Result<Checkpoint, StoreError> {
    let table = "pipeline_checkpoints";
    Ok(Checkpoint {
        block_number: from_i64(block_number, table, "block_number")?,
        log_index: log_index
            .map(|index| from_i64(index, table, "log_index"))
            .transpose()?,
    })
}

fn to_i64(value: u64, column: &'static str) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::OutOfRange(column))
}

fn from_i64(value: i64, table: &'static str, column: &str) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Corrupt {
        table,
        reason: format!("negative {}: {}", column, value),
    })
}

fn address_from(bytes: &[u8], table: &'static str) -> Result<Address, StoreError> {
    if bytes.len() != Address::len_bytes() {
        return Err(StoreError::Corrupt {
            table,
            reason: format!("address of {} bytes", bytes.len()),
        });
    }
    Ok(Address::from_slice(bytes))
}

fn h256_from(bytes: &[u8], table: &'static str) -> Result<H256, StoreError> {
    if bytes.len() != H256::len_bytes() {
        return Err(StoreError::Corrupt {
            table,
            reason: format!("hash of {} bytes", bytes.len()),
        });
    }
    Ok(H256::from_slice(bytes))
}

fn amount_from(text: &str, table: &'static str) -> Result<U256, StoreError> {
    U256::from_dec_str(text).map_err(|e| StoreError::Corrupt {
        table,
        reason: format!("amount {:?}: {:?}", text, e),
    })
}
