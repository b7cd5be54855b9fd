// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{Address, Filter, Log, ValueOrArray};
use tap::TapFallible;

use crate::error::SourceError;
use crate::events::event_signatures;
use crate::types::ChainLog;

/// Ordered log delivery for one chain. Implementations may return logs of a
/// range in any order; the pipeline sorts them.
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn latest_block(&self) -> Result<u64, SourceError>;

    /// Logs emitted by `contract` in blocks `from..=to`.
    async fn fetch_logs(
        &self,
        contract: Address,
        from: u64,
        to: u64,
    ) -> Result<Vec<ChainLog>, SourceError>;
}

pub struct EthLogSource {
    provider: Arc<Provider<Http>>,
}

impl EthLogSource {
    pub fn new(rpc_url: &str) -> anyhow::Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)?;
        Ok(Self {
            provider: Arc::new(provider),
        })
    }

    pub fn provider(&self) -> Arc<Provider<Http>> {
        self.provider.clone()
    }
}

#[async_trait]
impl LogSource for EthLogSource {
    async fn latest_block(&self) -> Result<u64, SourceError> {
        self.provider
            .get_block_number()
            .await
            .map(|n| n.as_u64())
            .map_err(|e| SourceError::Rpc(e.to_string()))
    }

    // Callers keep the range small enough for the provider.
    async fn fetch_logs(
        &self,
        contract: Address,
        from: u64,
        to: u64,
    ) -> Result<Vec<ChainLog>, SourceError> {
        let topics = event_signatures().into_iter().map(Some).collect();
        let filter = Filter::new()
            .from_block(from)
            .to_block(to)
            .address(contract)
            .topic0(ValueOrArray::Array(topics));
        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| SourceError::Rpc(e.to_string()))
            .tap_err(|e| {
                tracing::error!(
                    "fetch_logs failed. Filter: {:?}. Error {:?}",
                    filter,
                    e
                )
            })?;

        // Safeguard check that all logs are emitted from the requested contract
        if let Some(log) = logs.iter().find(|log| log.address != contract) {
            return Err(SourceError::InvalidResponse(format!(
                "provider returned a log of {:?} for contract {:?}",
                log.address, contract
            )));
        }
        logs.into_iter().map(chain_log_from).collect()
    }
}

fn chain_log_from(log: Log) -> Result<ChainLog, SourceError> {
    let missing = |field: &str| SourceError::InvalidResponse(format!("log without {}", field));
    let block_number = log.block_number.ok_or_else(|| missing("block number"))?;
    let log_index = log.log_index.ok_or_else(|| missing("log index"))?;
    let tx_hash = log.transaction_hash.ok_or_else(|| missing("transaction hash"))?;
    Ok(ChainLog {
        address: log.address,
        block_number: block_number.as_u64(),
        log_index: log_index.low_u64(),
        tx_hash,
        topics: log.topics,
        data: log.data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{H256, U256, U64};

    #[test]
    fn test_chain_log_from_mined_log() {
        let log = Log {
            address: Address::repeat_byte(7),
            topics: vec![H256::repeat_byte(1)],
            block_number: Some(U64::from(120)),
            log_index: Some(U256::from(3)),
            transaction_hash: Some(H256::repeat_byte(9)),
            ..Default::default()
        };
        let chain_log = chain_log_from(log).unwrap();
        assert_eq!(chain_log.block_number, 120);
        assert_eq!(chain_log.log_index, 3);
        assert_eq!(chain_log.tx_hash, H256::repeat_byte(9));
    }

    #[test]
    fn test_pending_log_is_rejected() {
        let log = Log {
            address: Address::repeat_byte(7),
            log_index: Some(U256::from(3)),
            ..Default::default()
        };
        assert!(matches!(
            chain_log_from(log),
            Err(SourceError::InvalidResponse(_))
        ));
    }
}
