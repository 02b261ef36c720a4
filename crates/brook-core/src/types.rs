//! Ledger types: hashes, outpoints, transactions, blocks.
//!
//! All monetary values are integer minor units. The same [`Transaction`]
//! shape covers both ledger kinds; on the plain ledger every output carries
//! an explicit default asset and an explicit value.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 32-byte hash value, rendered as lowercase hex.
///
/// Used for transaction IDs, block hashes and asset identifiers.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash (32 zero bytes).
    pub const ZERO: Self = Self([0u8; 32]);

    /// Wrap 32 raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// All-zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Parse a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, ParseHashError> {
        let bytes = hex::decode(s).map_err(|_| ParseHashError(s.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ParseHashError(s.to_string()))?;
        Ok(Self(arr))
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for Hash256 {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A string that is not a valid 32-byte hex hash.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid hash: {0}")]
pub struct ParseHashError(pub String);

/// Identifier of an asset on the asset-extended ledger.
///
/// The plain ledger has a single implicit asset, [`AssetId::DEFAULT`].
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct AssetId(pub Hash256);

impl AssetId {
    /// The implicit asset of the plain ledger.
    pub const DEFAULT: Self = Self(Hash256::ZERO);
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for AssetId {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hash256::from_hex(s).map(Self)
    }
}

/// A transaction output, named by txid and output index.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
pub struct OutPoint {
    /// Txid of the transaction that created the output.
    pub txid: Hash256,
    /// Output position (`vout`).
    pub vout: u32,
}

impl OutPoint {
    /// Create an outpoint.
    pub fn new(txid: Hash256, vout: u32) -> Self {
        Self { txid, vout }
    }

    /// The null outpoint, used by coinbase inputs.
    pub fn null() -> Self {
        Self {
            txid: Hash256::ZERO,
            vout: u32::MAX,
        }
    }

    /// The all-zero, `u32::MAX` outpoint used by coinbase inputs.
    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.vout == u32::MAX
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

impl FromStr for OutPoint {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (txid, vout) = s
            .split_once(':')
            .ok_or_else(|| ParseHashError(s.to_string()))?;
        let vout = vout.parse().map_err(|_| ParseHashError(s.to_string()))?;
        Ok(Self {
            txid: Hash256::from_hex(txid)?,
            vout,
        })
    }
}

/// An output value, either in the clear or blinded.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum Value {
    /// Explicit amount in minor units.
    Explicit(u64),
    /// Blinded amount; opaque bytes produced by the crypto capability.
    Confidential(Vec<u8>),
}

impl Value {
    /// The explicit amount, if not blinded.
    pub fn explicit(&self) -> Option<u64> {
        match self {
            Self::Explicit(v) => Some(*v),
            Self::Confidential(_) => None,
        }
    }
}

/// An output asset tag, either in the clear or blinded.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum Asset {
    /// Explicit asset identifier.
    Explicit(AssetId),
    /// Blinded asset; opaque bytes produced by the crypto capability.
    Confidential(Vec<u8>),
}

impl Asset {
    /// The explicit asset, if not blinded.
    pub fn explicit(&self) -> Option<AssetId> {
        match self {
            Self::Explicit(a) => Some(*a),
            Self::Confidential(_) => None,
        }
    }
}

/// A transaction input.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TxIn {
    /// The outpoint being spent.
    pub previous_output: OutPoint,
    /// Unlocking script (legacy and nested-witness spends).
    pub script_sig: Vec<u8>,
    /// Witness stack. Excluded from the transaction ID.
    pub witness: Vec<Vec<u8>>,
    /// Sequence number.
    pub sequence: u32,
}

impl TxIn {
    /// An unsigned input spending `previous_output`.
    pub fn unsigned(previous_output: OutPoint, sequence: u32) -> Self {
        Self {
            previous_output,
            script_sig: Vec::new(),
            witness: Vec::new(),
            sequence,
        }
    }

    /// Whether any unlocking data is present.
    pub fn is_signed(&self) -> bool {
        !self.script_sig.is_empty() || !self.witness.is_empty()
    }
}

/// A transaction output.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TxOut {
    /// Asset tag. Always [`AssetId::DEFAULT`] on the plain ledger.
    pub asset: Asset,
    /// Output value.
    pub value: Value,
    /// Blinding nonce (ephemeral public key); empty when unblinded.
    pub nonce: Vec<u8>,
    /// Locking script. Empty for the explicit fee output.
    pub script_pubkey: Vec<u8>,
}

impl TxOut {
    /// An explicit output.
    pub fn explicit(asset: AssetId, amount: u64, script_pubkey: Vec<u8>) -> Self {
        Self {
            asset: Asset::Explicit(asset),
            value: Value::Explicit(amount),
            nonce: Vec::new(),
            script_pubkey,
        }
    }

    /// The explicit fee output of the asset-extended ledger.
    pub fn fee(asset: AssetId, amount: u64) -> Self {
        Self::explicit(asset, amount, Vec::new())
    }

    /// Whether this is a fee output (empty locking script).
    pub fn is_fee(&self) -> bool {
        self.script_pubkey.is_empty()
    }

    /// Whether either the value or the asset is blinded.
    pub fn is_confidential(&self) -> bool {
        matches!(self.value, Value::Confidential(_)) || matches!(self.asset, Asset::Confidential(_))
    }
}

/// A transaction.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    /// Transaction version.
    pub version: u32,
    /// Lock time.
    pub lock_time: u32,
    /// Inputs, in order.
    pub inputs: Vec<TxIn>,
    /// Outputs, in order.
    pub outputs: Vec<TxOut>,
}

impl Transaction {
    /// Compute the transaction ID.
    ///
    /// BLAKE3 over every field except witnesses, so adding witness data
    /// during signing never changes the ID.
    pub fn txid(&self) -> Hash256 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.version.to_le_bytes());
        hasher.update(&self.lock_time.to_le_bytes());
        hasher.update(&(self.inputs.len() as u64).to_le_bytes());
        for input in &self.inputs {
            hasher.update(input.previous_output.txid.as_bytes());
            hasher.update(&input.previous_output.vout.to_le_bytes());
            hash_bytes(&mut hasher, &input.script_sig);
            hasher.update(&input.sequence.to_le_bytes());
        }
        hasher.update(&(self.outputs.len() as u64).to_le_bytes());
        for output in &self.outputs {
            match &output.asset {
                Asset::Explicit(a) => {
                    hasher.update(&[0x01]);
                    hasher.update(a.0.as_bytes());
                }
                Asset::Confidential(c) => {
                    hasher.update(&[0x0a]);
                    hash_bytes(&mut hasher, c);
                }
            }
            match &output.value {
                Value::Explicit(v) => {
                    hasher.update(&[0x01]);
                    hasher.update(&v.to_le_bytes());
                }
                Value::Confidential(c) => {
                    hasher.update(&[0x08]);
                    hash_bytes(&mut hasher, c);
                }
            }
            hash_bytes(&mut hasher, &output.nonce);
            hash_bytes(&mut hasher, &output.script_pubkey);
        }
        Hash256(*hasher.finalize().as_bytes())
    }

    /// Whether this is a coinbase transaction (single null-outpoint input).
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous_output.is_null()
    }

    /// Outpoints spent by this transaction, in input order.
    pub fn spent_outpoints(&self) -> impl Iterator<Item = &OutPoint> {
        self.inputs.iter().map(|i| &i.previous_output)
    }
}

fn hash_bytes(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// A block as delivered to the sync engine: decoded transactions plus
/// chain linkage.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BlockData {
    /// Block hash.
    pub hash: Hash256,
    /// Block height.
    pub height: u64,
    /// Hash of the parent block.
    pub prev_hash: Hash256,
    /// Decoded transactions, in block order.
    pub transactions: Vec<Transaction>,
}

/// A block as returned by the ledger RPC: transactions still hex-encoded.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RawBlock {
    /// Block hash.
    pub hash: Hash256,
    /// Block height.
    pub height: u64,
    /// Hash of the parent block.
    pub prev_hash: Hash256,
    /// Hex-encoded transactions, in block order.
    pub tx_hex: Vec<String>,
}
