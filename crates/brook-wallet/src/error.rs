//! Wallet error types.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use brook_core::error::{CryptoError, RpcError};
use brook_core::types::{AssetId, OutPoint};

use crate::builder::BuildId;

/// A per-input failure reported by signing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorOutPoint {
    /// The input's outpoint.
    pub outpoint: OutPoint,
    /// Why it could not be signed.
    pub error: String,
}

impl fmt::Display for ErrorOutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.outpoint, self.error)
    }
}

fn join_errors(errors: &[ErrorOutPoint]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors that can occur in wallet operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// The outpoint is not tracked by the wallet.
    #[error("unknown outpoint: {0}")]
    UnknownOutpoint(OutPoint),

    /// Available coins cannot cover outputs plus fee.
    #[error("insufficient funds in asset {asset}: have {have}, need {need}")]
    InsufficientFunds {
        /// Asset that ran short.
        asset: AssetId,
        /// Selectable amount.
        have: u64,
        /// Required amount, fee included for the fee asset.
        need: u64,
    },

    /// A requested output is below the relay dust threshold.
    #[error("output {index} amount {amount} is below the dust threshold {threshold}")]
    DustOutput {
        /// Output position.
        index: usize,
        /// Requested amount.
        amount: u64,
        /// Minimum relayable amount.
        threshold: u64,
    },

    /// The address type request cannot be satisfied.
    #[error("unsupported address type: {0}")]
    UnsupportedAddressType(String),

    /// The ledger node could not be reached.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// Signing aborted.
    #[error("signing failed: {}", join_errors(.0))]
    SigningFailed(Vec<ErrorOutPoint>),

    /// Local state cannot be reconciled with the ledger; a full resync is required.
    #[error("reorg rollback failed: {0}")]
    ReorgRollbackFailed(String),

    /// Bad configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The outpoint is reserved by another build.
    #[error("outpoint locked: {0}")]
    OutpointLocked(OutPoint),

    /// The outpoint is already spent.
    #[error("outpoint spent: {0}")]
    OutpointSpent(OutPoint),

    /// The address is not known to the wallet.
    #[error("unknown address: {0}")]
    UnknownAddress(String),

    /// No pending build with this id.
    #[error("unknown build: {0}")]
    UnknownBuild(BuildId),

    /// The build is not in a state that allows the operation.
    #[error("invalid build: {0}")]
    InvalidBuild(String),

    /// Invalid monetary amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Broadcast failed after signing. The signed transaction is kept, with
    /// its inputs still locked, so it can be resubmitted or discarded.
    #[error("broadcast failed: {cause}")]
    BroadcastFailed {
        /// The signed transaction.
        hex: String,
        /// The pending build holding the input locks, if any.
        build_id: Option<BuildId>,
        /// `TransportUnavailable` when the node may never have seen the
        /// transaction, `Rpc` when it answered with a rejection.
        cause: Box<WalletError>,
    },

    /// The node answered with an error.
    #[error("ledger rpc: {0}")]
    Rpc(RpcError),

    /// Persistence failure.
    #[error("storage: {0}")]
    Storage(String),

    /// Crypto capability failure.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl WalletError {
    /// Whether the failure happened on the transport, so a write may or may
    /// not have reached the node.
    pub fn is_transport(&self) -> bool {
        match self {
            Self::TransportUnavailable(_) => true,
            Self::BroadcastFailed { cause, .. } => cause.is_transport(),
            _ => false,
        }
    }
}

impl From<RpcError> for WalletError {
    fn from(e: RpcError) -> Self {
        match e {
            RpcError::Transport(msg) => Self::TransportUnavailable(msg),
            other => Self::Rpc(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brook_core::types::Hash256;

    #[test]
    fn display_insufficient_funds() {
        let e = WalletError::InsufficientFunds {
            asset: AssetId::DEFAULT,
            have: 100,
            need: 200,
        };
        assert_eq!(
            e.to_string(),
            format!("insufficient funds in asset {}: have 100, need 200", AssetId::DEFAULT)
        );
    }

    #[test]
    fn display_signing_failed_lists_outpoints() {
        let op = OutPoint::new(Hash256([1; 32]), 3);
        let e = WalletError::SigningFailed(vec![ErrorOutPoint {
            outpoint: op,
            error: "no key".into(),
        }]);
        assert_eq!(e.to_string(), format!("signing failed: {op}: no key"));
    }

    #[test]
    fn transport_rpc_error_maps_to_unavailable() {
        let e: WalletError = RpcError::Transport("connection refused".into()).into();
        assert_eq!(e, WalletError::TransportUnavailable("connection refused".into()));
        let e: WalletError = RpcError::Rejected("missing inputs".into()).into();
        assert_eq!(e, WalletError::Rpc(RpcError::Rejected("missing inputs".into())));
    }

    #[test]
    fn broadcast_failure_keeps_transport_cause() {
        let lost = WalletError::BroadcastFailed {
            hex: "00".into(),
            build_id: None,
            cause: Box::new(RpcError::Transport("connection reset".into()).into()),
        };
        assert!(lost.is_transport());
        assert_eq!(lost.to_string(), "broadcast failed: transport unavailable: connection reset");

        let refused = WalletError::BroadcastFailed {
            hex: "00".into(),
            build_id: None,
            cause: Box::new(RpcError::Rejected("dust".into()).into()),
        };
        assert!(!refused.is_transport());
    }

    #[test]
    fn from_crypto_error() {
        let wallet: WalletError = CryptoError::NotReady.into();
        assert_eq!(wallet, WalletError::Crypto(CryptoError::NotReady));
    }

    #[test]
    fn clone_and_eq() {
        let e1 = WalletError::InvalidAmount("zero".into());
        assert_eq!(e1.clone(), e1);
    }
}
