//! # Sync Configuration
//!
//! Configuration for the reconciliation engine.

use crate::domain::{
    invariant_lookback_windows, SyncError, DEFAULT_CALL_TIMEOUT_MS, DEFAULT_NARROW_LOOKBACK,
    DEFAULT_SIGNAL_CAPACITY, DEFAULT_WIDE_LOOKBACK,
};
use primitive_types::H160;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconciliation engine configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Issuance (NFT) contract: `totalSupply()`, `maxSupply()`, `safeMint(address)`.
    pub issuance_contract: Option<H160>,

    /// Merkle tree contract emitting `RootChanged(string,string)`.
    pub merkle_contract: Option<H160>,

    /// Lookback distances for the latest root-change search, narrowest first.
    pub lookback_windows: Vec<u64>,

    /// Deadline for every remote call, in milliseconds.
    pub call_timeout_ms: u64,

    /// Recoverable-failure signals buffered per subscriber.
    pub signal_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            issuance_contract: None,
            merkle_contract: None,
            lookback_windows: vec![DEFAULT_NARROW_LOOKBACK, DEFAULT_WIDE_LOOKBACK],
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            signal_capacity: DEFAULT_SIGNAL_CAPACITY,
        }
    }
}

/// Validated addresses of the two watched contracts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WatchedContracts {
    /// Issuance contract.
    pub issuance: H160,
    /// Merkle tree contract.
    pub merkle: H160,
}

impl SyncConfig {
    /// Create a config for testing (small windows, short deadline).
    pub fn for_testing(issuance: H160, merkle: H160) -> Self {
        Self {
            issuance_contract: Some(issuance),
            merkle_contract: Some(merkle),
            lookback_windows: vec![10, 1_000],
            call_timeout_ms: 1_000,
            signal_capacity: 16,
        }
    }

    /// Deadline for every remote call.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Validate and extract the watched contracts.
    ///
    /// A missing address is a configuration error: bootstrap must not run.
    pub fn validate(&self) -> Result<WatchedContracts, SyncError> {
        let issuance = self.issuance_contract.ok_or_else(|| {
            SyncError::Config("issuance contract address is not set".to_string())
        })?;
        let merkle = self
            .merkle_contract
            .ok_or_else(|| SyncError::Config("merkle contract address is not set".to_string()))?;

        invariant_lookback_windows(&self.lookback_windows)?;

        if self.call_timeout_ms == 0 {
            return Err(SyncError::Config(
                "call timeout must be non-zero".to_string(),
            ));
        }
        if self.signal_capacity == 0 {
            return Err(SyncError::Config(
                "signal capacity must be non-zero".to_string(),
            ));
        }

        Ok(WatchedContracts { issuance, merkle })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.lookback_windows, vec![1_000, 100_000]);
        assert_eq!(config.call_timeout(), Duration::from_secs(10));
        assert!(config.issuance_contract.is_none());
    }

    #[test]
    fn test_missing_addresses_rejected() {
        let config = SyncConfig::default();
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));

        let config = SyncConfig {
            issuance_contract: Some(H160::repeat_byte(1)),
            ..SyncConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("merkle"));
    }

    #[test]
    fn test_testing_config_validates() {
        let config = SyncConfig::for_testing(H160::repeat_byte(1), H160::repeat_byte(2));
        let contracts = config.validate().unwrap();
        assert_eq!(contracts.issuance, H160::repeat_byte(1));
        assert_eq!(contracts.merkle, H160::repeat_byte(2));
    }

    #[test]
    fn test_bad_windows_rejected() {
        let mut config = SyncConfig::for_testing(H160::repeat_byte(1), H160::repeat_byte(2));
        config.lookback_windows = vec![1_000, 10];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_roundtrips_through_json() {
        let config = SyncConfig::for_testing(H160::repeat_byte(1), H160::repeat_byte(2));
        let json = serde_json::to_string(&config).unwrap();
        let back: SyncConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.merkle_contract, config.merkle_contract);
        assert_eq!(back.lookback_windows, config.lookback_windows);
    }
}
