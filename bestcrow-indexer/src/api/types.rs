// SPDX-License-Identifier: Apache-2.0

//! API request and response types. Amounts are decimal strings so that
//! 256-bit values survive JSON clients.

use serde::{Deserialize, Serialize};

use crate::fees::{FeeQuote, FeeSchedule};
use crate::query::EscrowView;
use crate::status::{EscrowStatus, TimelineStep};
use crate::types::{ChainScope, Checkpoint};

/// Escrow detail with its status as of `evaluated_at`
#[derive(Debug, Clone, Serialize)]
pub struct EscrowResponse {
    pub chain_id: u64,
    /// Contract address (hex encoded)
    pub contract: String,
    pub escrow_id: u64,
    pub depositor: String,
    pub receiver: String,
    /// Token address, zero for the native asset
    pub token: String,
    pub is_native: bool,
    /// Amount in the token's smallest unit
    pub amount: String,
    pub expiry_date: u64,
    pub created_at: u64,
    pub title: String,
    pub description: String,
    pub is_active: bool,
    pub is_completed: bool,
    pub release_requested: bool,
    /// released, refunded or rejected once settled
    pub settlement: Option<String>,
    pub status: EscrowStatus,
    pub timeline: Vec<TimelineStep>,
    pub last_block: u64,
    pub last_log_index: u64,
    pub evaluated_at: u64,
}

impl From<EscrowView> for EscrowResponse {
    fn from(view: EscrowView) -> Self {
        let record = view.record;
        Self {
            chain_id: record.key.scope.chain_id,
            contract: format!("{:?}", record.key.scope.contract),
            escrow_id: record.key.escrow_id,
            depositor: format!("{:?}", record.depositor),
            receiver: format!("{:?}", record.receiver),
            token: format!("{:?}", record.token),
            is_native: view.is_native,
            amount: record.amount.to_string(),
            expiry_date: record.expiry_date,
            created_at: record.created_at,
            title: record.title,
            description: record.description,
            is_active: record.flags.is_active,
            is_completed: record.flags.is_completed,
            release_requested: record.flags.release_requested,
            settlement: record.settlement.map(|s| s.as_str().to_string()),
            status: view.status,
            timeline: view.timeline,
            last_block: record.last_position.block_number,
            last_log_index: record.last_position.log_index,
            evaluated_at: view.evaluated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EscrowListResponse {
    pub escrows: Vec<EscrowResponse>,
    pub total: usize,
}

impl From<Vec<EscrowView>> for EscrowListResponse {
    fn from(views: Vec<EscrowView>) -> Self {
        let escrows: Vec<EscrowResponse> = views.into_iter().map(Into::into).collect();
        Self {
            total: escrows.len(),
            escrows,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ViewerQuery {
    pub viewer: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchQuery {
    pub viewer: String,
    /// Matched against escrow id and title
    #[serde(default)]
    pub q: String,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuoteQuery {
    pub amount: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeeQuoteResponse {
    pub amount: String,
    pub fee: String,
    pub collateral: String,
    pub creation_total: String,
    pub acceptance_total: String,
    pub fee_bps: u32,
    pub collateral_bps: u32,
}

impl FeeQuoteResponse {
    pub fn new(quote: FeeQuote, schedule: FeeSchedule) -> Self {
        Self {
            amount: quote.amount.to_string(),
            fee: quote.fee.to_string(),
            collateral: quote.collateral.to_string(),
            creation_total: quote.creation_total.to_string(),
            acceptance_total: quote.acceptance_total.to_string(),
            fee_bps: schedule.fee_bps,
            collateral_bps: schedule.collateral_bps,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckpointResponse {
    pub chain_id: u64,
    pub contract: String,
    pub block_number: u64,
    /// Absent when the whole block is processed
    pub log_index: Option<u64>,
}

impl From<(ChainScope, Checkpoint)> for CheckpointResponse {
    fn from((scope, checkpoint): (ChainScope, Checkpoint)) -> Self {
        Self {
            chain_id: scope.chain_id,
            contract: format!("{:?}", scope.contract),
            block_number: checkpoint.block_number,
            log_index: checkpoint.log_index,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckpointListResponse {
    pub checkpoints: Vec<CheckpointResponse>,
}

/// API error response
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub error: String,
    pub message: String,
}
