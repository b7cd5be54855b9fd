// SPDX-License-Identifier: Apache-2.0

//! Contract bindings and the log decoder.

use ethers::abi::RawLog;
use ethers::contract::{abigen, EthEvent, EthLogDecode};
use ethers::types::{H256, U256};

use crate::error::DecodeError;
use crate::types::{ChainLog, ChainScope, EscrowEvent, EventKind, RawEvent};

abigen!(
    Bestcrow,
    r#"[
        event EscrowCreated(uint256 indexed escrowId, address indexed depositor, address indexed receiver, address token, uint256 amount, uint256 expiryDate, uint256 createdAt, string title, string description)
        event EscrowAccepted(uint256 indexed escrowId, address indexed receiver)
        event EscrowRejected(uint256 indexed escrowId, address indexed receiver)
        event ReleaseRequested(uint256 indexed escrowId)
        event EscrowCompleted(uint256 indexed escrowId, address indexed receiver, uint256 amount)
        event EscrowRefunded(uint256 indexed escrowId, address indexed depositor)
        event FeesWithdrawn(address indexed token, uint256 amount)
        function nextEscrowId() external view returns (uint256)
        function escrowDetails(uint256 escrowId) external view returns (address depositor, address receiver, address token, uint256 amount, uint256 expiryDate, uint256 createdAt, bool isActive, bool isCompleted, bool isEth, bool releaseRequested, string title, string description)
    ]"#
);

/// Escrow ids and timestamps land in signed 64-bit columns.
pub const MAX_STORED_INTEGER: u64 = i64::MAX as u64;

/// Event kind for a topic-0 hash, if it belongs to the escrow contract.
pub fn kind_for_topic(topic: &H256) -> Option<EventKind> {
    let pairs = [
        (EscrowCreatedFilter::signature(), EventKind::Created),
        (EscrowAcceptedFilter::signature(), EventKind::Accepted),
        (EscrowRejectedFilter::signature(), EventKind::Rejected),
        (ReleaseRequestedFilter::signature(), EventKind::ReleaseRequested),
        (EscrowCompletedFilter::signature(), EventKind::Completed),
        (EscrowRefundedFilter::signature(), EventKind::Refunded),
        (FeesWithdrawnFilter::signature(), EventKind::FeesWithdrawn),
    ];
    pairs
        .into_iter()
        .find(|(signature, _)| signature == topic)
        .map(|(_, kind)| kind)
}

/// Topic-0 hashes of every event the indexer understands, for log filters.
pub fn event_signatures() -> Vec<H256> {
    vec![
        EscrowCreatedFilter::signature(),
        EscrowAcceptedFilter::signature(),
        EscrowRejectedFilter::signature(),
        ReleaseRequestedFilter::signature(),
        EscrowCompletedFilter::signature(),
        EscrowRefundedFilter::signature(),
        FeesWithdrawnFilter::signature(),
    ]
}

/// Maps raw logs of one deployment to typed events. Holds no state besides
/// the scope it decodes for.
#[derive(Debug, Clone, Copy)]
pub struct EventDecoder {
    scope: ChainScope,
}

impl EventDecoder {
    pub fn new(scope: ChainScope) -> Self {
        Self { scope }
    }

    pub fn scope(&self) -> ChainScope {
        self.scope
    }

    pub fn decode(&self, log: &ChainLog) -> Result<RawEvent, DecodeError> {
        if log.address != self.scope.contract {
            return Err(DecodeError::UnexpectedEmitter(log.address));
        }
        let topic = log.topics.first().ok_or(DecodeError::MissingTopic)?;
        let kind = kind_for_topic(topic).ok_or(DecodeError::UnknownTopic(*topic))?;

        let raw = RawLog {
            topics: log.topics.clone(),
            data: log.data.to_vec(),
        };
        let decoded = BestcrowEvents::decode_log(&raw).map_err(|e| malformed(kind, e))?;
        let event = to_domain(decoded)?;

        Ok(RawEvent {
            scope: self.scope,
            tx_hash: log.tx_hash,
            position: log.position(),
            event,
        })
    }
}

fn malformed(kind: EventKind, reason: impl ToString) -> DecodeError {
    DecodeError::MalformedPayload {
        kind: kind.as_str(),
        reason: reason.to_string(),
    }
}

/// Escrow ids start at 1 and must fit a stored integer.
pub fn escrow_id_from(value: U256) -> Result<u64, DecodeError> {
    if value.is_zero() || value > U256::from(MAX_STORED_INTEGER) {
        return Err(DecodeError::EscrowIdOutOfRange(value.to_string()));
    }
    Ok(value.as_u64())
}

fn timestamp_from(kind: EventKind, field: &str, value: U256) -> Result<u64, DecodeError> {
    if value > U256::from(MAX_STORED_INTEGER) {
        return Err(malformed(kind, format!("{} {} out of range", field, value)));
    }
    Ok(value.as_u64())
}

fn to_domain(event: BestcrowEvents) -> Result<EscrowEvent, DecodeError> {
    let event = match event {
        BestcrowEvents::EscrowCreatedFilter(e) => EscrowEvent::Created {
            escrow_id: escrow_id_from(e.escrow_id)?,
            depositor: e.depositor,
            receiver: e.receiver,
            token: e.token,
            amount: e.amount,
            expiry_date: timestamp_from(EventKind::Created, "expiryDate", e.expiry_date)?,
            created_at: timestamp_from(EventKind::Created, "createdAt", e.created_at)?,
            title: e.title,
            description: e.description,
        },
        BestcrowEvents::EscrowAcceptedFilter(e) => EscrowEvent::Accepted {
            escrow_id: escrow_id_from(e.escrow_id)?,
            receiver: e.receiver,
        },
        BestcrowEvents::EscrowRejectedFilter(e) => EscrowEvent::Rejected {
            escrow_id: escrow_id_from(e.escrow_id)?,
            receiver: e.receiver,
        },
        BestcrowEvents::ReleaseRequestedFilter(e) => EscrowEvent::ReleaseRequested {
            escrow_id: escrow_id_from(e.escrow_id)?,
        },
        BestcrowEvents::EscrowCompletedFilter(e) => EscrowEvent::Completed {
            escrow_id: escrow_id_from(e.escrow_id)?,
            receiver: e.receiver,
            amount: e.amount,
        },
        BestcrowEvents::EscrowRefundedFilter(e) => EscrowEvent::Refunded {
            escrow_id: escrow_id_from(e.escrow_id)?,
            depositor: e.depositor,
        },
        BestcrowEvents::FeesWithdrawnFilter(e) => EscrowEvent::FeesWithdrawn {
            token: e.token,
            amount: e.amount,
        },
    };
    Ok(event)
}
