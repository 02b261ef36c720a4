//! Wallet configuration.
//!
//! [`WalletConfig`] has working defaults for a local regtest node and can be
//! loaded from an optional TOML file layered under `BROOK_`-prefixed
//! environment variables (`BROOK_GAP_LIMIT=50`, `BROOK_RETRY__MAX_ATTEMPTS=3`).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use brook_core::address::AddressType;
use brook_core::constants::{
    DEFAULT_DUST_THRESHOLD, DEFAULT_GAP_LIMIT, DEFAULT_MAX_REORG_DEPTH, DEFAULT_MIN_FEE_RATE,
    MAX_GAP_LIMIT,
};
use brook_core::network::Network;

use crate::error::WalletError;

/// Retry policy for idempotent ledger reads.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, first try included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 200,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (0-based): doubling from the base
    /// delay, capped at the maximum.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms))
    }
}

/// Configuration of a wallet instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Network the wallet operates on.
    pub network: Network,
    /// Root directory for persistent data.
    pub data_dir: PathBuf,
    /// Ledger node JSON-RPC endpoint.
    pub rpc_endpoint: String,
    /// Unused addresses kept derived ahead of the highest used index.
    pub gap_limit: u32,
    /// Default address type for new addresses.
    pub address_type: AddressType,
    /// Minimum fee rate, in minor units per 1000 virtual bytes.
    pub min_fee_rate: u64,
    /// Outputs below this amount are not relayed.
    pub dust_threshold: u64,
    /// Height sync and resync start from.
    pub birth_height: u64,
    /// Deepest reorg that can be rolled back locally.
    pub max_reorg_depth: u64,
    /// Minimum confirmations for coins picked by funding.
    pub min_conf_for_funding: u64,
    /// Retry policy for ledger reads.
    pub retry: RetryConfig,
    /// Keep all state in memory; no database is opened.
    pub in_memory: bool,
}

impl Default for WalletConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("brook");

        Self {
            network: Network::Regtest,
            data_dir,
            rpc_endpoint: "http://127.0.0.1:18443".to_string(),
            gap_limit: DEFAULT_GAP_LIMIT,
            address_type: AddressType::P2wpkh,
            min_fee_rate: DEFAULT_MIN_FEE_RATE,
            dust_threshold: DEFAULT_DUST_THRESHOLD,
            birth_height: 0,
            max_reorg_depth: DEFAULT_MAX_REORG_DEPTH,
            min_conf_for_funding: 1,
            retry: RetryConfig::default(),
            in_memory: false,
        }
    }
}

impl WalletConfig {
    /// Load from an optional TOML file, then `BROOK_*` environment overrides.
    pub fn load(file: Option<&Path>) -> Result<Self, WalletError> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let cfg: Self = builder
            .add_source(
                config::Environment::with_prefix("BROOK")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| WalletError::InvalidConfiguration(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), WalletError> {
        validate_gap_limit(self.gap_limit)?;
        if self.address_type.is_script() {
            return Err(WalletError::InvalidConfiguration(format!(
                "default address type must be a key type, got {}",
                self.address_type
            )));
        }
        if self.max_reorg_depth == 0 {
            return Err(WalletError::InvalidConfiguration(
                "max_reorg_depth must be at least 1".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(WalletError::InvalidConfiguration(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(WalletError::InvalidConfiguration(
                "retry.base_delay_ms exceeds retry.max_delay_ms".into(),
            ));
        }
        Ok(())
    }

    /// Path to the RocksDB directory of `account`.
    pub fn db_path(&self, account: &str) -> PathBuf {
        self.data_dir
            .join(self.network.name())
            .join("wallets")
            .join(account)
    }
}

/// Gap limits outside `1..=MAX_GAP_LIMIT` are rejected.
pub fn validate_gap_limit(gap_limit: u32) -> Result<(), WalletError> {
    if gap_limit == 0 || gap_limit > MAX_GAP_LIMIT {
        return Err(WalletError::InvalidConfiguration(format!(
            "gap limit must be in 1..={MAX_GAP_LIMIT}, got {gap_limit}"
        )));
    }
    Ok(())
}
