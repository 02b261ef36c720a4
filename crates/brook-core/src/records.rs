//! Wallet records persisted by the engine.
//!
//! [`UtxoRecord`] lifecycle is owned by the UTXO store and [`AddressRecord`]
//! creation by the address book; everything else only reads them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::address::{AddressType, DerivationPath};
use crate::constants::COINBASE_MATURITY;
use crate::types::{AssetId, Hash256, OutPoint};

/// Free-form extension metadata. Never interpreted by the engine.
pub type Extension = BTreeMap<String, Vec<String>>;

/// Blinding factors recovered when a confidential output was unblinded.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct Blinders {
    /// Asset blinding factor.
    pub asset_blinder: Hash256,
    /// Amount blinding factor.
    pub amount_blinder: Hash256,
}

/// Which transaction spent a record, and where it was seen.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct SpendRef {
    /// Spending transaction.
    pub txid: Hash256,
    /// Height of the block containing the spend; `None` while in the mempool.
    pub height: Option<u64>,
}

/// A known output owned (or watched) by the wallet.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct UtxoRecord {
    /// Identity of the output.
    pub outpoint: OutPoint,
    /// Owning address.
    pub address: String,
    /// Amount in minor units (unblinded).
    pub amount: u64,
    /// Asset; [`AssetId::DEFAULT`] on the plain ledger.
    pub asset: AssetId,
    /// Blinding factors for outputs that arrived blinded.
    pub blinders: Option<Blinders>,
    /// Confirming block hash; `None` while unconfirmed.
    pub block_hash: Option<Hash256>,
    /// Confirming block height; `None` while unconfirmed.
    pub block_height: Option<u64>,
    /// Created by a coinbase transaction.
    pub coinbase: bool,
    /// Spent. Terminal except for reorg rollback and mempool eviction.
    pub spent: bool,
    /// Reserved by an in-flight build.
    pub locked: bool,
    /// The wallet holds signing material for this output.
    pub solvable: bool,
    /// Output descriptor of the owning address.
    pub descriptor: String,
    /// Locking script.
    pub locking_script: Vec<u8>,
    /// Derivation path of the owning address, when HD-derived.
    pub path: Option<DerivationPath>,
    /// Address type of the owning address.
    pub address_type: AddressType,
    /// Opaque metadata.
    pub extend: Extension,
    /// Height at which the record was first inserted; `None` if first
    /// seen in the mempool.
    pub first_seen_height: Option<u64>,
    /// Spend attribution, set together with `spent`.
    pub spent_by: Option<SpendRef>,
    /// Monotonic insertion sequence, used as the "seen" order for
    /// coin selection.
    pub seen_seq: u64,
}

impl UtxoRecord {
    /// Whether the record is in a block.
    pub fn is_confirmed(&self) -> bool {
        self.block_height.is_some()
    }

    /// Confirmations at `tip_height`: `tip - height + 1`, or 0 if
    /// unconfirmed or above the tip.
    pub fn confirmations(&self, tip_height: u64) -> u64 {
        match self.block_height {
            Some(h) if h <= tip_height => tip_height - h + 1,
            _ => 0,
        }
    }

    /// Coinbase outputs are immature until [`COINBASE_MATURITY`] confirmations.
    pub fn is_mature(&self, tip_height: u64) -> bool {
        !self.coinbase || self.confirmations(tip_height) >= COINBASE_MATURITY
    }
}

/// Multisig parameters of a script address.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct MultisigInfo {
    /// Required signatures.
    pub required: u32,
    /// Participant public keys, in script order.
    pub pubkeys: Vec<Vec<u8>>,
}

/// An address known to the wallet.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct AddressRecord {
    /// Encoded (unconfidential) address.
    pub address: String,
    /// Confidential form, on the asset-extended ledger.
    pub confidential_address: Option<String>,
    /// Concrete type.
    pub address_type: AddressType,
    /// Derivation path; `None` for imported and script addresses.
    pub path: Option<DerivationPath>,
    /// Public key for single-key addresses.
    pub pubkey: Option<Vec<u8>>,
    /// Multisig participants for multisig addresses.
    pub multisig: Option<MultisigInfo>,
    /// Locking script.
    pub locking_script: Vec<u8>,
    /// Redeem / witness script for script addresses.
    pub redeem_script: Option<Vec<u8>>,
    /// Blinding public key, on the asset-extended ledger.
    pub blinding_pubkey: Option<Vec<u8>>,
    /// User label.
    pub label: String,
    /// Output descriptor.
    pub descriptor: String,
    /// Opaque metadata.
    pub extra: Extension,
}

impl AddressRecord {
    /// Whether the wallet can sign for this address.
    pub fn is_solvable(&self) -> bool {
        self.path.is_some()
    }
}
