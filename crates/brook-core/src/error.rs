//! Error types for the capability boundaries.
use thiserror::Error;

/// Failures of the crypto capability.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The capability was requested before it finished initializing.
    #[error("crypto capability not initialized")]
    NotReady,

    /// Key derivation failure.
    #[error("key derivation: {0}")]
    KeyDerivation(String),

    /// Locking script could not be built or parsed.
    #[error("script: {0}")]
    Script(String),

    /// Invalid address string.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Signing failure.
    #[error("signing: {0}")]
    Signing(String),

    /// Transaction encoding failure.
    #[error("encode: {0}")]
    Encode(String),

    /// Transaction decoding failure.
    #[error("decode: {0}")]
    Decode(String),

    /// Output blinding failure.
    #[error("blinding: {0}")]
    Blinding(String),

    /// Output unblinding failure.
    #[error("unblinding: {0}")]
    Unblinding(String),
}

/// Failures of the ledger RPC capability.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// The request may not have reached the node.
    #[error("transport: {0}")]
    Transport(String),

    /// The node refused the request.
    #[error("rejected by node: {0}")]
    Rejected(String),

    /// The requested block or transaction does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The node answered with something unparseable.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl RpcError {
    /// Whether the failure is on the transport (the request may not have
    /// reached the node). Only these are retried, and only for reads.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
