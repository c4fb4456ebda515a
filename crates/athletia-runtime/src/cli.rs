//! Command-line and environment configuration.

use anyhow::{Context, Result};
use athletia_sync::{
    parse_address, SyncConfig, DEFAULT_CALL_TIMEOUT_MS, DEFAULT_NARROW_LOOKBACK,
    DEFAULT_WIDE_LOOKBACK,
};
use clap::Parser;
use primitive_types::H160;
use std::time::Duration;

/// Athletia on-chain state reconciliation.
#[derive(Debug, Parser)]
#[command(name = "athletia-runtime", version, about)]
pub struct Args {
    /// JSON-RPC endpoint of the node.
    #[arg(long, env = "ATHLETIA_RPC_URL", default_value = "http://127.0.0.1:8545")]
    pub rpc_url: String,

    /// Issuance (reputation NFT) contract address.
    #[arg(long, env = "REPUTATION_CONTRACT_ADDRESS", value_parser = address)]
    pub issuance_contract: Option<H160>,

    /// Merkle tree contract address.
    #[arg(long, env = "MERKLE_TREE_CONTRACT_ADDRESS", value_parser = address)]
    pub merkle_contract: Option<H160>,

    /// Head polling interval for live feeds.
    #[arg(long, default_value_t = 2_000)]
    pub poll_interval_ms: u64,

    /// Deadline for every remote call.
    #[arg(long, default_value_t = DEFAULT_CALL_TIMEOUT_MS)]
    pub call_timeout_ms: u64,

    /// Lookback window in blocks, narrowest first. Repeatable.
    #[arg(long = "lookback", default_values_t = [DEFAULT_NARROW_LOOKBACK, DEFAULT_WIDE_LOOKBACK])]
    pub lookback: Vec<u64>,

    /// Submit one mint to this recipient after attaching.
    #[arg(long, value_parser = address)]
    pub mint_to: Option<H160>,

    /// Node-managed account that sends the mint transaction.
    #[arg(long, env = "ATHLETIA_MINTER", value_parser = address)]
    pub minter: Option<H160>,
}

fn address(input: &str) -> Result<H160, String> {
    parse_address(input).map_err(|e| e.to_string())
}

impl Args {
    /// Engine configuration. Missing contract addresses are rejected here.
    pub fn sync_config(&self) -> Result<SyncConfig> {
        let config = SyncConfig {
            issuance_contract: self.issuance_contract,
            merkle_contract: self.merkle_contract,
            lookback_windows: self.lookback.clone(),
            call_timeout_ms: self.call_timeout_ms,
            ..SyncConfig::default()
        };
        config.validate().context("invalid configuration")?;
        Ok(config)
    }

    /// Polling interval for live feeds.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}
