// SPDX-License-Identifier: Apache-2.0

//! Domain types shared by the decoder, the pipelines, the stores and the query layer.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};

/// One contract deployment on one chain. Escrow ids, dedup keys and checkpoints
/// are only meaningful inside a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChainScope {
    pub chain_id: u64,
    pub contract: Address,
}

impl ChainScope {
    pub fn new(chain_id: u64, contract: Address) -> Self {
        Self { chain_id, contract }
    }
}

impl fmt::Display for ChainScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:?}", self.chain_id, self.contract)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EscrowKey {
    pub scope: ChainScope,
    pub escrow_id: u64,
}

impl EscrowKey {
    pub fn new(scope: ChainScope, escrow_id: u64) -> Self {
        Self { scope, escrow_id }
    }
}

impl fmt::Display for EscrowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.scope, self.escrow_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Accepted,
    Rejected,
    ReleaseRequested,
    Completed,
    Refunded,
    FeesWithdrawn,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        EventKind::Created,
        EventKind::Accepted,
        EventKind::Rejected,
        EventKind::ReleaseRequested,
        EventKind::Completed,
        EventKind::Refunded,
        EventKind::FeesWithdrawn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Accepted => "accepted",
            EventKind::Rejected => "rejected",
            EventKind::ReleaseRequested => "release_requested",
            EventKind::Completed => "completed",
            EventKind::Refunded => "refunded",
            EventKind::FeesWithdrawn => "fees_withdrawn",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of a log entry in its chain: block height, then index inside the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogPosition {
    pub block_number: u64,
    pub log_index: u64,
}

impl LogPosition {
    pub fn new(block_number: u64, log_index: u64) -> Self {
        Self {
            block_number,
            log_index,
        }
    }
}

/// Last position a pipeline has fully processed.
///
/// `log_index == None` means every entry of `block_number` has been handled,
/// which is what an empty range scan records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub block_number: u64,
    pub log_index: Option<u64>,
}

impl Checkpoint {
    pub fn at_entry(position: LogPosition) -> Self {
        Self {
            block_number: position.block_number,
            log_index: Some(position.log_index),
        }
    }

    pub fn end_of_block(block_number: u64) -> Self {
        Self {
            block_number,
            log_index: None,
        }
    }

    /// Whether an entry at `position` was already handled.
    pub fn covers(&self, position: LogPosition) -> bool {
        match position.block_number.cmp(&self.block_number) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => match self.log_index {
                None => true,
                Some(index) => position.log_index <= index,
            },
        }
    }

    /// First block a resumed scan has to look at. A partially processed block
    /// is scanned again; its handled entries are skipped.
    pub fn resume_block(&self) -> u64 {
        match self.log_index {
            None => self.block_number.saturating_add(1),
            Some(_) => self.block_number,
        }
    }

    fn sort_key(&self) -> (u64, bool, u64) {
        match self.log_index {
            None => (self.block_number, true, 0),
            Some(index) => (self.block_number, false, index),
        }
    }
}

impl PartialOrd for Checkpoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Checkpoint {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

/// Idempotency key of a raw event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey {
    pub scope: ChainScope,
    pub tx_hash: H256,
    pub kind: EventKind,
}

/// A log entry as delivered by the chain, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLog {
    pub address: Address,
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: H256,
    pub topics: Vec<H256>,
    pub data: Bytes,
}

impl ChainLog {
    pub fn position(&self) -> LogPosition {
        LogPosition::new(self.block_number, self.log_index)
    }
}

/// Typed contract event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscrowEvent {
    Created {
        escrow_id: u64,
        depositor: Address,
        receiver: Address,
        token: Address,
        amount: U256,
        expiry_date: u64,
        created_at: u64,
        title: String,
        description: String,
    },
    Accepted {
        escrow_id: u64,
        receiver: Address,
    },
    Rejected {
        escrow_id: u64,
        receiver: Address,
    },
    ReleaseRequested {
        escrow_id: u64,
    },
    Completed {
        escrow_id: u64,
        receiver: Address,
        amount: U256,
    },
    Refunded {
        escrow_id: u64,
        depositor: Address,
    },
    FeesWithdrawn {
        token: Address,
        amount: U256,
    },
}

impl EscrowEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            EscrowEvent::Created { .. } => EventKind::Created,
            EscrowEvent::Accepted { .. } => EventKind::Accepted,
            EscrowEvent::Rejected { .. } => EventKind::Rejected,
            EscrowEvent::ReleaseRequested { .. } => EventKind::ReleaseRequested,
            EscrowEvent::Completed { .. } => EventKind::Completed,
            EscrowEvent::Refunded { .. } => EventKind::Refunded,
            EscrowEvent::FeesWithdrawn { .. } => EventKind::FeesWithdrawn,
        }
    }

    /// The escrow this event belongs to. Contract-level events have none.
    pub fn escrow_id(&self) -> Option<u64> {
        match self {
            EscrowEvent::Created { escrow_id, .. }
            | EscrowEvent::Accepted { escrow_id, .. }
            | EscrowEvent::Rejected { escrow_id, .. }
            | EscrowEvent::ReleaseRequested { escrow_id }
            | EscrowEvent::Completed { escrow_id, .. }
            | EscrowEvent::Refunded { escrow_id, .. } => Some(*escrow_id),
            EscrowEvent::FeesWithdrawn { .. } => None,
        }
    }
}

/// One on-chain occurrence, as appended to the event log. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub scope: ChainScope,
    pub tx_hash: H256,
    pub position: LogPosition,
    pub event: EscrowEvent,
}

impl RawEvent {
    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            scope: self.scope,
            tx_hash: self.tx_hash,
            kind: self.kind(),
        }
    }

    pub fn escrow_key(&self) -> Option<EscrowKey> {
        self.event
            .escrow_id()
            .map(|escrow_id| EscrowKey::new(self.scope, escrow_id))
    }
}

/// The three independent flags the contract keeps per escrow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EscrowFlags {
    pub is_active: bool,
    pub is_completed: bool,
    pub release_requested: bool,
}

/// How a finished escrow was settled. Kept for history; status derivation
/// only looks at the flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Settlement {
    Released,
    Refunded,
    Rejected,
}

impl Settlement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Settlement::Released => "released",
            Settlement::Refunded => "refunded",
            Settlement::Rejected => "rejected",
        }
    }
}

impl FromStr for Settlement {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "released" => Ok(Settlement::Released),
            "refunded" => Ok(Settlement::Refunded),
            "rejected" => Ok(Settlement::Rejected),
            other => Err(format!("unknown settlement: {}", other)),
        }
    }
}

/// Materialized state of one escrow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowRecord {
    pub key: EscrowKey,
    pub depositor: Address,
    pub receiver: Address,
    pub token: Address,
    pub amount: U256,
    pub expiry_date: u64,
    pub created_at: u64,
    pub title: String,
    pub description: String,
    pub flags: EscrowFlags,
    pub settlement: Option<Settlement>,
    /// Position of the event that produced this version of the record.
    pub last_position: LogPosition,
}

impl EscrowRecord {
    /// The zero address stands for the chain's native asset.
    pub fn is_native(&self) -> bool {
        self.token == Address::zero()
    }

    pub fn is_participant(&self, address: &Address) -> bool {
        self.depositor == *address || self.receiver == *address
    }

    pub fn is_settled(&self) -> bool {
        self.settlement.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_position_order() {
        let mut positions = vec![
            LogPosition::new(10, 3),
            LogPosition::new(9, 7),
            LogPosition::new(10, 0),
        ];
        positions.sort();
        assert_eq!(
            positions,
            vec![
                LogPosition::new(9, 7),
                LogPosition::new(10, 0),
                LogPosition::new(10, 3)
            ]
        );
    }

    #[test]
    fn test_checkpoint_covers() {
        let cp = Checkpoint::at_entry(LogPosition::new(100, 2));
        assert!(cp.covers(LogPosition::new(99, 50)));
        assert!(cp.covers(LogPosition::new(100, 2)));
        assert!(!cp.covers(LogPosition::new(100, 3)));
        assert!(!cp.covers(LogPosition::new(101, 0)));

        let full = Checkpoint::end_of_block(100);
        assert!(full.covers(LogPosition::new(100, 999)));
        assert!(!full.covers(LogPosition::new(101, 0)));
    }

    #[test]
    fn test_checkpoint_resume_block() {
        assert_eq!(
            Checkpoint::at_entry(LogPosition::new(100, 2)).resume_block(),
            100
        );
        assert_eq!(Checkpoint::end_of_block(100).resume_block(), 101);
    }

    #[test]
    fn test_checkpoint_order_end_of_block_is_last() {
        let entry = Checkpoint::at_entry(LogPosition::new(100, u64::MAX));
        let end = Checkpoint::end_of_block(100);
        let next = Checkpoint::at_entry(LogPosition::new(101, 0));
        assert!(entry < end);
        assert!(end < next);
    }

    #[test]
    fn test_dedup_key_ignores_position() {
        let scope = ChainScope::new(17000, Address::repeat_byte(0xaa));
        let event = RawEvent {
            scope,
            tx_hash: H256::repeat_byte(1),
            position: LogPosition::new(5, 0),
            event: EscrowEvent::ReleaseRequested { escrow_id: 4 },
        };
        let redelivered = RawEvent {
            position: LogPosition::new(5, 9),
            ..event.clone()
        };
        assert_eq!(event.dedup_key(), redelivered.dedup_key());
        assert_eq!(event.escrow_key(), Some(EscrowKey::new(scope, 4)));
    }

    #[test]
    fn test_settlement_from_str() {
        for settlement in [
            Settlement::Released,
            Settlement::Refunded,
            Settlement::Rejected,
        ] {
            assert_eq!(settlement.as_str().parse::<Settlement>(), Ok(settlement));
        }
        assert!("expired".parse::<Settlement>().is_err());
    }
}
