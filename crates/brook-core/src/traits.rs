//! Capability interfaces consumed by the wallet engine:
//! - [`CryptoProvider`]: key derivation, scripts, signing, blinding, codec
//! - [`LedgerRpc`]: block / mempool queries and raw broadcast against a node
//!
//! Both are opaque to the engine; brook-crypto ships a software
//! `CryptoProvider` and brook-wallet a JSON-RPC `LedgerRpc`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::address::{AddressType, DerivationPath};
use crate::error::{CryptoError, RpcError};
use crate::network::{LedgerKind, Network};
use crate::records::{Blinders, UtxoRecord};
use crate::types::{AssetId, Hash256, RawBlock, Transaction, TxOut};

/// Signature hash mode.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SighashType {
    /// Commit to all inputs and outputs.
    #[default]
    All,
    /// Commit to all inputs, no outputs.
    None,
    /// Commit to all inputs and the output at the same index.
    Single,
    /// `All`, committing only to the signed input.
    AllAnyoneCanPay,
    /// `None`, committing only to the signed input.
    NoneAnyoneCanPay,
    /// `Single`, committing only to the signed input.
    SingleAnyoneCanPay,
}

impl SighashType {
    /// Consensus byte appended to signatures.
    pub fn to_byte(&self) -> u8 {
        match self {
            Self::All => 0x01,
            Self::None => 0x02,
            Self::Single => 0x03,
            Self::AllAnyoneCanPay => 0x81,
            Self::NoneAnyoneCanPay => 0x82,
            Self::SingleAnyoneCanPay => 0x83,
        }
    }

    /// Whether only the signed input is committed to.
    pub fn anyone_can_pay(&self) -> bool {
        self.to_byte() & 0x80 != 0
    }

    /// Canonical name, e.g. `all|anyonecanpay`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::None => "none",
            Self::Single => "single",
            Self::AllAnyoneCanPay => "all|anyonecanpay",
            Self::NoneAnyoneCanPay => "none|anyonecanpay",
            Self::SingleAnyoneCanPay => "single|anyonecanpay",
        }
    }
}

impl fmt::Display for SighashType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SighashType {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.to_ascii_lowercase().replace('_', "|");
        [
            Self::All,
            Self::None,
            Self::Single,
            Self::AllAnyoneCanPay,
            Self::NoneAnyoneCanPay,
            Self::SingleAnyoneCanPay,
        ]
        .into_iter()
        .find(|t| t.name() == normalized || (normalized.is_empty() && *t == Self::All))
        .ok_or_else(|| CryptoError::Signing(format!("unknown sighash type: {s}")))
    }
}

/// Public half of a derived key. Private material never leaves the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedKey {
    /// Derivation path.
    pub path: DerivationPath,
    /// Public key bytes.
    pub pubkey: Vec<u8>,
}

/// What to lock to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSpec {
    /// A single public key.
    Pubkey {
        address_type: AddressType,
        pubkey: Vec<u8>,
    },
    /// An `m`-of-`n` multisig.
    Multisig {
        address_type: AddressType,
        required: u32,
        pubkeys: Vec<Vec<u8>>,
    },
    /// An arbitrary redeem / witness script.
    Script {
        address_type: AddressType,
        script: Vec<u8>,
    },
}

/// Result of building a locking script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptInfo {
    /// Encoded address.
    pub address: String,
    /// Locking script.
    pub locking_script: Vec<u8>,
    /// Redeem / witness script, for script types and nested witness keys.
    pub redeem_script: Option<Vec<u8>>,
    /// Output descriptor.
    pub descriptor: String,
}

/// A decoded destination address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAddress {
    /// Concrete type.
    pub address_type: AddressType,
    /// Locking script paying to the address.
    pub locking_script: Vec<u8>,
    /// Blinding public key for confidential addresses.
    pub blinding_pubkey: Option<Vec<u8>>,
}

/// A single input signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSignature {
    /// Public key that produced the signature.
    pub pubkey: Vec<u8>,
    /// Signature bytes, sighash byte appended.
    pub signature: Vec<u8>,
    /// Sighash mode used.
    pub sighash: SighashType,
}

/// An output recovered with the wallet's blinding key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnblindedOutput {
    /// Clear amount.
    pub amount: u64,
    /// Clear asset.
    pub asset: AssetId,
    /// Blinding factors.
    pub blinders: Blinders,
}

/// The crypto capability.
///
/// All operations are synchronous; readiness is handled once by
/// [`CryptoHandle`](crate::capability::CryptoHandle) before any call.
pub trait CryptoProvider: Send + Sync {
    /// Derive the key at `path` and return its public half.
    fn derive_key(&self, path: &DerivationPath) -> Result<DerivedKey, CryptoError>;

    /// Build the locking script, address and descriptor for `spec`.
    fn build_script(&self, spec: &ScriptSpec, network: Network) -> Result<ScriptInfo, CryptoError>;

    /// Decode an address (plain or confidential) for `network`.
    fn parse_address(&self, address: &str, network: Network) -> Result<ParsedAddress, CryptoError>;

    /// Blinding public key the wallet publishes for `locking_script`.
    fn blinding_pubkey(&self, locking_script: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Encode the confidential form of `address`.
    fn confidential_address(
        &self,
        address: &str,
        blinding_pubkey: &[u8],
        network: Network,
    ) -> Result<String, CryptoError>;

    /// Estimated virtual size of an input spending `utxo`, including its
    /// unlocking script and witness.
    fn estimate_input_size(&self, utxo: &UtxoRecord) -> u64;

    /// Sign input `index` of `tx`, which spends `prevout`, with the key at
    /// `path`.
    fn sign_input(
        &self,
        tx: &Transaction,
        index: usize,
        path: &DerivationPath,
        prevout: &UtxoRecord,
        sighash: SighashType,
    ) -> Result<InputSignature, CryptoError>;

    /// Place `signature` into the unlocking data of input `index`.
    fn apply_signature(
        &self,
        tx: &mut Transaction,
        index: usize,
        prevout: &UtxoRecord,
        signature: &InputSignature,
    ) -> Result<(), CryptoError>;

    /// Blind every output whose entry in `blinding_pubkeys` is `Some`.
    fn blind_outputs(
        &self,
        tx: &Transaction,
        blinding_pubkeys: &[Option<Vec<u8>>],
    ) -> Result<Transaction, CryptoError>;

    /// Recover a blinded output paying to `locking_script`.
    fn unblind_output(&self, output: &TxOut, locking_script: &[u8]) -> Result<UnblindedOutput, CryptoError>;

    /// Serialize `tx` for `ledger` as hex.
    fn encode_transaction(&self, tx: &Transaction, ledger: LedgerKind) -> Result<String, CryptoError>;

    /// Parse a hex transaction serialized for `ledger`.
    fn decode_transaction(&self, hex: &str, ledger: LedgerKind) -> Result<Transaction, CryptoError>;
}

/// The ledger RPC capability.
///
/// Reads are idempotent and may be retried by the caller; broadcast is not.
#[async_trait::async_trait]
pub trait LedgerRpc: Send + Sync {
    /// Height of the node's best chain.
    async fn get_block_count(&self) -> Result<u64, RpcError>;

    /// Hash of the best-chain block at `height`.
    async fn get_block_hash(&self, height: u64) -> Result<Hash256, RpcError>;

    /// A block by hash, with hex-encoded transactions.
    async fn get_block(&self, hash: &Hash256) -> Result<RawBlock, RpcError>;

    /// Transaction IDs currently in the node's mempool.
    async fn get_raw_mempool(&self) -> Result<Vec<Hash256>, RpcError>;

    /// Submit a signed transaction. Returns its transaction ID.
    async fn send_raw_transaction(&self, hex: &str) -> Result<Hash256, RpcError>;
}
