// SPDX-License-Identifier: Apache-2.0

//! Row types for the escrow event log and projection tables.
//!
//! Addresses and hashes are stored as raw bytes, token amounts as decimal
//! text so that full 256-bit values survive the round trip.

use diesel::{AsChangeset, Insertable, Queryable, Selectable};

use crate::schema::{
    escrow_accepted_events, escrow_completed_events, escrow_created_events,
    escrow_refunded_events, escrow_rejected_events, escrows, fees_withdrawn_events,
    release_requested_events,
};

#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = escrow_created_events)]
pub struct EscrowCreatedRow {
    pub chain_id: i64,
    pub contract_address: Vec<u8>,
    pub txn_hash: Vec<u8>,
    pub block_number: i64,
    pub log_index: i64,
    pub escrow_id: i64,
    pub depositor: Vec<u8>,
    pub receiver: Vec<u8>,
    pub token: Vec<u8>,
    pub amount: String,
    pub expiry_date: i64,
    pub created_at: i64,
    pub title: String,
    pub description: String,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = escrow_accepted_events)]
pub struct EscrowAcceptedRow {
    pub chain_id: i64,
    pub contract_address: Vec<u8>,
    pub txn_hash: Vec<u8>,
    pub block_number: i64,
    pub log_index: i64,
    pub escrow_id: i64,
    pub receiver: Vec<u8>,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = escrow_rejected_events)]
pub struct EscrowRejectedRow {
    pub chain_id: i64,
    pub contract_address: Vec<u8>,
    pub txn_hash: Vec<u8>,
    pub block_number: i64,
    pub log_index: i64,
    pub escrow_id: i64,
    pub receiver: Vec<u8>,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = release_requested_events)]
pub struct ReleaseRequestedRow {
    pub chain_id: i64,
    pub contract_address: Vec<u8>,
    pub txn_hash: Vec<u8>,
    pub block_number: i64,
    pub log_index: i64,
    pub escrow_id: i64,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = escrow_completed_events)]
pub struct EscrowCompletedRow {
    pub chain_id: i64,
    pub contract_address: Vec<u8>,
    pub txn_hash: Vec<u8>,
    pub block_number: i64,
    pub log_index: i64,
    pub escrow_id: i64,
    pub receiver: Vec<u8>,
    pub amount: String,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = escrow_refunded_events)]
pub struct EscrowRefundedRow {
    pub chain_id: i64,
    pub contract_address: Vec<u8>,
    pub txn_hash: Vec<u8>,
    pub block_number: i64,
    pub log_index: i64,
    pub escrow_id: i64,
    pub depositor: Vec<u8>,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = fees_withdrawn_events)]
pub struct FeesWithdrawnRow {
    pub chain_id: i64,
    pub contract_address: Vec<u8>,
    pub txn_hash: Vec<u8>,
    pub block_number: i64,
    pub log_index: i64,
    pub token: Vec<u8>,
    pub amount: String,
}

/// Materialized escrow state. `last_block`/`last_log_index` point at the
/// event that produced this version of the row.
#[derive(Queryable, Selectable, Insertable, AsChangeset, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = escrows, primary_key(chain_id, contract_address, escrow_id))]
#[diesel(treat_none_as_null = true)]
pub struct EscrowRow {
    pub chain_id: i64,
    pub contract_address: Vec<u8>,
    pub escrow_id: i64,
    pub depositor: Vec<u8>,
    pub receiver: Vec<u8>,
    pub token: Vec<u8>,
    pub amount: String,
    pub expiry_date: i64,
    pub created_at: i64,
    pub title: String,
    pub description: String,
    pub is_active: bool,
    pub is_completed: bool,
    pub release_requested: bool,
    pub settlement: Option<String>,
    pub last_block: i64,
    pub last_log_index: i64,
}
