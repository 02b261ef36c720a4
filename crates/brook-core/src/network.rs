//! Networks and ledger kinds.
//!
//! The ledger kind is decided once from the configured network and drives
//! every format-dependent dispatch (transaction codec, fee output, blinding).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::{AssetId, Hash256};

/// The two supported ledger families.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerKind {
    /// Plain UTXO ledger with a single implicit asset.
    Bitcoin,
    /// Asset-extended ledger with optional confidential outputs.
    Elements,
}

impl LedgerKind {
    /// Whether outputs may be blinded and carry asset tags.
    pub fn is_confidential(&self) -> bool {
        matches!(self, Self::Elements)
    }
}

/// Network the wallet operates on.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default,
    bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Production plain ledger.
    Mainnet,
    /// Public test network.
    Testnet,
    /// Local regression-test network.
    #[default]
    Regtest,
    /// Production asset-extended ledger.
    LiquidV1,
    /// Local asset-extended regression-test network.
    LiquidRegtest,
}

/// Policy asset of the production asset-extended ledger.
const LIQUID_V1_POLICY_ASSET: &str =
    "6f0279e9ed041c3d710a9f57d0c02928416460c4b722ae3457a11eec381c526d";

/// Default policy asset of an asset-extended regtest chain.
const LIQUID_REGTEST_POLICY_ASSET: &str =
    "5ac9f65c0efcc4775e0baec4ec03abdde22473cd3cf33c0419ca290e0751b225";

impl Network {
    /// Ledger family of this network.
    pub fn ledger_kind(&self) -> LedgerKind {
        match self {
            Self::Mainnet | Self::Testnet | Self::Regtest => LedgerKind::Bitcoin,
            Self::LiquidV1 | Self::LiquidRegtest => LedgerKind::Elements,
        }
    }

    /// The asset fees are paid in.
    pub fn policy_asset(&self) -> AssetId {
        let hex = match self {
            Self::Mainnet | Self::Testnet | Self::Regtest => return AssetId::DEFAULT,
            Self::LiquidV1 => LIQUID_V1_POLICY_ASSET,
            Self::LiquidRegtest => LIQUID_REGTEST_POLICY_ASSET,
        };
        Hash256::from_hex(hex).map(AssetId).unwrap_or_default()
    }

    /// Coin type used in derivation paths.
    pub fn coin_type(&self) -> u32 {
        match self {
            Self::Mainnet => 0,
            Self::LiquidV1 => 1776,
            Self::Testnet | Self::Regtest | Self::LiquidRegtest => 1,
        }
    }

    /// Version byte prefixed to encoded addresses.
    pub fn address_prefix(&self) -> u8 {
        match self {
            Self::Mainnet => 0x00,
            Self::Testnet => 0x6f,
            Self::Regtest => 0x6e,
            Self::LiquidV1 => 0x39,
            Self::LiquidRegtest => 0xeb,
        }
    }

    /// Canonical lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Regtest => "regtest",
            Self::LiquidV1 => "liquidv1",
            Self::LiquidRegtest => "liquidregtest",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unrecognized network name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown network: {0}")]
pub struct UnknownNetwork(pub String);

impl FromStr for Network {
    type Err = UnknownNetwork;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" | "bitcoin" => Ok(Self::Mainnet),
            "testnet" | "test" => Ok(Self::Testnet),
            "regtest" => Ok(Self::Regtest),
            "liquidv1" => Ok(Self::LiquidV1),
            "liquidregtest" | "elementsregtest" => Ok(Self::LiquidRegtest),
            other => Err(UnknownNetwork(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_kind_dispatch() {
        assert_eq!(Network::Mainnet.ledger_kind(), LedgerKind::Bitcoin);
        assert_eq!(Network::Regtest.ledger_kind(), LedgerKind::Bitcoin);
        assert_eq!(Network::LiquidV1.ledger_kind(), LedgerKind::Elements);
        assert!(Network::LiquidRegtest.ledger_kind().is_confidential());
    }

    #[test]
    fn policy_asset_default_on_plain_ledger() {
        assert_eq!(Network::Testnet.policy_asset(), AssetId::DEFAULT);
        assert_ne!(Network::LiquidV1.policy_asset(), AssetId::DEFAULT);
        assert_ne!(
            Network::LiquidV1.policy_asset(),
            Network::LiquidRegtest.policy_asset()
        );
    }

    #[test]
    fn parse_names() {
        for net in [
            Network::Mainnet,
            Network::Testnet,
            Network::Regtest,
            Network::LiquidV1,
            Network::LiquidRegtest,
        ] {
            assert_eq!(net.name().parse::<Network>().unwrap(), net);
        }
        assert!("signet2".parse::<Network>().is_err());
    }

    #[test]
    fn prefixes_are_distinct() {
        let mut seen = std::collections::HashSet::new();
        for net in [
            Network::Mainnet,
            Network::Testnet,
            Network::Regtest,
            Network::LiquidV1,
            Network::LiquidRegtest,
        ] {
            assert!(seen.insert(net.address_prefix()));
        }
    }
}
