// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use ethers::types::Address;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::ConfigError;
use crate::fees::FeeSchedule;
use crate::types::ChainScope;

/// Files ending in `.yaml`/`.yml` are read as YAML, anything else as JSON.
pub trait Config: Serialize + DeserializeOwned {
    fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let extension = path.extension().and_then(|s| s.to_str());
        if matches!(extension, Some("yaml") | Some("yml")) {
            serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct IndexerConfig {
    // Postgres connection string. The in-memory store is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    // Address for the query API and metrics endpoint.
    #[serde(default = "default_api_address")]
    pub api_address: SocketAddr,
    #[serde(default)]
    pub fees: FeeSchedule,
    // Seconds between reconciliation passes. Disabled when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconcile_interval_secs: Option<u64>,
    pub pipelines: Vec<PipelineConfig>,
}

impl Config for IndexerConfig {}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PipelineConfig {
    // Label used in logs and metrics. Defaults to "<chain-id>:<contract>".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub chain_id: u64,
    pub rpc_url: String,
    pub contract_address: Address,
    // First block to scan when the pipeline has no checkpoint yet.
    pub start_block: u64,
    #[serde(default = "default_max_block_range")]
    pub max_block_range: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    // Upper bound on a single RPC call before it counts as a stalled connection.
    #[serde(default = "default_reconnect_timeout_ms")]
    pub reconnect_timeout_ms: u64,
    // Retry budget for one RPC call, across reconnects.
    #[serde(default = "default_max_retry_secs")]
    pub max_retry_secs: u64,
    // Blocks to stay behind the chain head.
    #[serde(default)]
    pub confirmations: u64,
}

fn default_api_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9184))
}

fn default_max_block_range() -> u64 {
    1_000
}

fn default_poll_interval_ms() -> u64 {
    4_000
}

fn default_reconnect_timeout_ms() -> u64 {
    30_000
}

fn default_max_retry_secs() -> u64 {
    120
}

impl PipelineConfig {
    pub fn scope(&self) -> ChainScope {
        ChainScope::new(self.chain_id, self.contract_address)
    }

    pub fn name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.scope().to_string())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.reconnect_timeout_ms)
    }

    pub fn max_retry_duration(&self) -> Duration {
        Duration::from_secs(self.max_retry_secs)
    }
}

impl IndexerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipelines.is_empty() {
            return Err(ConfigError::Invalid("no pipelines configured".into()));
        }
        self.fees
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let mut scopes = HashSet::new();
        for pipeline in &self.pipelines {
            if !scopes.insert(pipeline.scope()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate pipeline for {}",
                    pipeline.scope()
                )));
            }
            if pipeline.max_block_range == 0 {
                return Err(ConfigError::Invalid(format!(
                    "max-block-range of {} must be positive",
                    pipeline.name()
                )));
            }
        }
        Ok(())
    }

    pub fn pipeline(&self, scope: ChainScope) -> Option<&PipelineConfig> {
        self.pipelines.iter().find(|p| p.scope() == scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
api-address: "127.0.0.1:8080"
fees:
  fee-bps: 50
pipelines:
  - name: holesky
    chain-id: 17000
    rpc-url: "http://localhost:8545"
    contract-address: "0x77C385fD50164Fde71A6c29732F9F7763AAC6753"
    start-block: 3081000
"#;

    fn write_temp(name: &str, content: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("{}-{}", std::process::id(), name));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_yaml_with_defaults() {
        let path = write_temp("indexer.yaml", YAML);
        let config = IndexerConfig::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.database_url, None);
        assert_eq!(config.fees, FeeSchedule::default());
        let pipeline = &config.pipelines[0];
        assert_eq!(pipeline.name(), "holesky");
        assert_eq!(pipeline.chain_id, 17000);
        assert_eq!(pipeline.start_block, 3_081_000);
        assert_eq!(pipeline.max_block_range, 1_000);
        assert_eq!(pipeline.poll_interval(), Duration::from_secs(4));
        assert_eq!(pipeline.reconnect_timeout(), Duration::from_secs(30));
        assert_eq!(pipeline.confirmations, 0);
        config.validate().unwrap();
    }

    #[test]
    fn test_load_json() {
        let json = r#"{
            "database-url": "postgres://localhost/bestcrow",
            "pipelines": [{
                "chain-id": 1,
                "rpc-url": "http://localhost:8545",
                "contract-address": "0x0000000000000000000000000000000000000001",
                "start-block": 0,
                "confirmations": 12
            }]
        }"#;
        let path = write_temp("indexer.json", json);
        let config = IndexerConfig::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/bestcrow")
        );
        assert_eq!(config.api_address, default_api_address());
        assert_eq!(config.pipelines[0].confirmations, 12);
        assert!(config.pipelines[0].name().starts_with("1:"));
    }

    #[test]
    fn test_validate_rejects_bad_configs() {
        let path = write_temp("dup.yaml", YAML);
        let mut config = IndexerConfig::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let mut duplicated = config.clone();
        duplicated.pipelines.push(config.pipelines[0].clone());
        assert!(duplicated.validate().is_err());

        let mut zero_range = config.clone();
        zero_range.pipelines[0].max_block_range = 0;
        assert!(zero_range.validate().is_err());

        config.fees.collateral_bps = 10_001;
        assert!(config.validate().is_err());

        config.pipelines.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            IndexerConfig::load("/nonexistent/indexer.yaml"),
            Err(ConfigError::Io { .. })
        ));
    }
}
