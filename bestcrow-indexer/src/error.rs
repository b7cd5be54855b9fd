// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy of the escrow indexer.
//!
//! Each enum maps to one failure domain. Transport errors are retried, decode
//! errors are skipped, store errors stop the current pipeline iteration and
//! query errors are returned to the caller. Duplicate deliveries and impossible
//! flag combinations are not errors at all.

use ethers::types::H256;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("log has no topics")]
    MissingTopic,

    #[error("unrecognized event topic {0:?}")]
    UnknownTopic(H256),

    #[error("malformed {kind} payload: {reason}")]
    MalformedPayload { kind: &'static str, reason: String },

    #[error("escrow id {0} out of range")]
    EscrowIdOutOfRange(String),

    #[error("log emitted by {0:?}, not the indexed contract")]
    UnexpectedEmitter(ethers::types::Address),
}

impl DecodeError {
    /// Returns a short string identifying the error type for metrics labels
    pub fn error_type(&self) -> &'static str {
        match self {
            DecodeError::MissingTopic => "missing_topic",
            DecodeError::UnknownTopic(_) => "unknown_topic",
            DecodeError::MalformedPayload { .. } => "malformed_payload",
            DecodeError::EscrowIdOutOfRange(_) => "escrow_id_out_of_range",
            DecodeError::UnexpectedEmitter(_) => "unexpected_emitter",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("corrupt row in {table}: {reason}")]
    Corrupt { table: &'static str, reason: String },

    #[error("value out of range for column {0}")]
    OutOfRange(&'static str),
}

impl StoreError {
    pub fn error_type(&self) -> &'static str {
        match self {
            StoreError::Database(_) => "database",
            StoreError::Connection(_) => "connection",
            StoreError::Corrupt { .. } => "corrupt_row",
            StoreError::OutOfRange(_) => "out_of_range",
        }
    }
}

/// Failure talking to the chain collaborator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl SourceError {
    /// Whether this error is recoverable (should retry)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SourceError::Rpc(_) | SourceError::Timeout(_))
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            SourceError::Rpc(_) => "rpc",
            SourceError::Timeout(_) => "timeout",
            SourceError::InvalidResponse(_) => "invalid_response",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("escrow not found")]
    NotFound,

    #[error("address is not a participant of this escrow")]
    Forbidden,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Fee(#[from] FeeError),
}

impl QueryError {
    pub fn error_type(&self) -> &'static str {
        match self {
            QueryError::NotFound => "not_found",
            QueryError::Forbidden => "forbidden",
            QueryError::InvalidInput(_) => "invalid_input",
            QueryError::Store(e) => e.error_type(),
            QueryError::Fee(e) => e.error_type(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeeError {
    #[error("basis points {0} exceed the 10000 denominator")]
    InvalidBasisPoints(u32),

    #[error("total overflows 256 bits")]
    Overflow,
}

impl FeeError {
    pub fn error_type(&self) -> &'static str {
        match self {
            FeeError::InvalidBasisPoints(_) => "invalid_basis_points",
            FeeError::Overflow => "overflow",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_type_labels() {
        let cases: Vec<(&'static str, &'static str)> = vec![
            (DecodeError::MissingTopic.error_type(), "missing_topic"),
            (
                DecodeError::UnknownTopic(H256::zero()).error_type(),
                "unknown_topic",
            ),
            (
                DecodeError::EscrowIdOutOfRange("0".into()).error_type(),
                "escrow_id_out_of_range",
            ),
            (StoreError::OutOfRange("amount").error_type(), "out_of_range"),
            (SourceError::Timeout("x".into()).error_type(), "timeout"),
            (QueryError::Forbidden.error_type(), "forbidden"),
            (
                QueryError::Fee(FeeError::Overflow).error_type(),
                "overflow",
            ),
        ];
        for (actual, expected) in cases {
            assert_eq!(actual, expected);
        }
    }

    #[test]
    fn test_source_error_recoverable() {
        assert!(SourceError::Rpc("reset".into()).is_recoverable());
        assert!(SourceError::Timeout("10s".into()).is_recoverable());
        assert!(!SourceError::InvalidResponse("bad".into()).is_recoverable());
    }
}
