//! Input signing with per-outpoint partial results.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use brook_core::records::UtxoRecord;
use brook_core::traits::{CryptoProvider, InputSignature, SighashType};
use brook_core::types::{AssetId, Hash256, OutPoint, Transaction};

use crate::address_book::AddressBook;
use crate::error::{ErrorOutPoint, WalletError};
use crate::utxo_store::UtxoStore;

/// A previous output supplied by the caller for an input the wallet does
/// not track.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PrevTx {
    /// Outpoint being spent.
    pub outpoint: OutPoint,
    /// Its locking script.
    pub locking_script: Vec<u8>,
    /// Its amount.
    pub amount: u64,
    /// Its asset.
    pub asset: AssetId,
}

/// Signing options.
#[derive(Debug, Clone, Default)]
pub struct SignOptions {
    /// Collect per-input failures instead of aborting on the first.
    pub ignore_errors: bool,
    /// Previous outputs for untracked inputs.
    pub prev_txs: Vec<PrevTx>,
    /// Sighash mode.
    pub sighash: SighashType,
}

/// Result returned to callers of `sign`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SignResponse {
    /// Transaction hex, with every signature that could be produced.
    pub hex: String,
    /// Whether every input is signed.
    pub complete: bool,
    /// Inputs that could not be signed.
    pub errors: Vec<ErrorOutPoint>,
}

/// A raw input signature.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SignatureData {
    /// Spent transaction.
    pub txid: Hash256,
    /// Spent output index.
    pub vout: u32,
    /// Public key, hex.
    pub pubkey: String,
    /// Signature, hex.
    pub signature: String,
    /// Sighash mode.
    pub sighash: SighashType,
}

/// Outcome of signing a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignOutcome {
    /// The transaction with the produced signatures applied.
    pub tx: Transaction,
    /// Whether every input is signed.
    pub complete: bool,
    /// Inputs that could not be signed.
    pub errors: Vec<ErrorOutPoint>,
}

/// Signs the inputs of one account.
pub struct SigningCoordinator<'a> {
    store: &'a UtxoStore,
    book: &'a AddressBook,
    crypto: &'a dyn CryptoProvider,
}

impl<'a> SigningCoordinator<'a> {
    /// Sign against `store` and `book` with `crypto`.
    pub fn new(store: &'a UtxoStore, book: &'a AddressBook, crypto: &'a dyn CryptoProvider) -> Self {
        Self { store, book, crypto }
    }

    /// Find the previous output of `outpoint` and check the wallet can sign it.
    fn resolve(&self, outpoint: &OutPoint, prev_txs: &[PrevTx]) -> Result<UtxoRecord, String> {
        if let Some(record) = self.store.get(outpoint) {
            if !record.solvable || record.path.is_none() {
                return Err("no signing key for this output".into());
            }
            return Ok(record.clone());
        }
        let prev = prev_txs
            .iter()
            .find(|p| &p.outpoint == outpoint)
            .ok_or_else(|| "previous output unknown".to_string())?;
        let owner = self
            .book
            .classify(&prev.locking_script)
            .ok_or_else(|| "locking script is not owned by the wallet".to_string())?;
        if !owner.is_solvable() {
            return Err("no signing key for this output".into());
        }
        Ok(UtxoRecord {
            outpoint: *outpoint,
            address: owner.address.clone(),
            amount: prev.amount,
            asset: prev.asset,
            blinders: None,
            block_hash: None,
            block_height: None,
            coinbase: false,
            spent: false,
            locked: false,
            solvable: true,
            descriptor: owner.descriptor.clone(),
            locking_script: prev.locking_script.clone(),
            path: owner.path,
            address_type: owner.address_type,
            extend: Default::default(),
            first_seen_height: None,
            spent_by: None,
            seen_seq: 0,
        })
    }

    /// Signature for input `index`, or the per-input error.
    fn sign_one(
        &self,
        tx: &Transaction,
        index: usize,
        options: &SignOptions,
    ) -> Result<(UtxoRecord, InputSignature), ErrorOutPoint> {
        let outpoint = tx.inputs[index].previous_output;
        let fail = |error: String| ErrorOutPoint { outpoint, error };
        let prevout = self.resolve(&outpoint, &options.prev_txs).map_err(fail)?;
        let Some(path) = prevout.path else {
            return Err(fail("no signing key for this output".into()));
        };
        let signature = self
            .crypto
            .sign_input(tx, index, &path, &prevout, options.sighash)
            .map_err(|e| fail(e.to_string()))?;
        Ok((prevout, signature))
    }

    /// Sign every input the wallet can sign.
    ///
    /// Inputs that already carry unlocking data are left as they are and
    /// count as signed. With `ignore_errors` unset the first failure aborts
    /// with [`WalletError::SigningFailed`] and nothing is returned.
    pub fn sign(&self, tx: &Transaction, options: &SignOptions) -> Result<SignOutcome, WalletError> {
        let mut signed = tx.clone();
        let mut errors = Vec::new();
        for index in 0..tx.inputs.len() {
            if tx.inputs[index].is_signed() {
                continue;
            }
            match self.sign_one(tx, index, options) {
                Ok((prevout, signature)) => {
                    if let Err(e) = self.crypto.apply_signature(&mut signed, index, &prevout, &signature) {
                        let error = ErrorOutPoint {
                            outpoint: prevout.outpoint,
                            error: e.to_string(),
                        };
                        if !options.ignore_errors {
                            return Err(WalletError::SigningFailed(vec![error]));
                        }
                        errors.push(error);
                    }
                }
                Err(error) if !options.ignore_errors => {
                    warn!(outpoint = %error.outpoint, error = %error.error, "signing aborted");
                    return Err(WalletError::SigningFailed(vec![error]));
                }
                Err(error) => errors.push(error),
            }
        }
        let complete = errors.is_empty();
        debug!(inputs = tx.inputs.len(), failed = errors.len(), complete, "signed transaction");
        Ok(SignOutcome {
            tx: signed,
            complete,
            errors,
        })
    }

    /// Per-input signatures without assembling the transaction.
    pub fn get_signatures(
        &self,
        tx: &Transaction,
        options: &SignOptions,
    ) -> Result<(Vec<SignatureData>, Vec<ErrorOutPoint>), WalletError> {
        let mut signatures = Vec::new();
        let mut errors = Vec::new();
        for index in 0..tx.inputs.len() {
            match self.sign_one(tx, index, options) {
                Ok((prevout, sig)) => signatures.push(SignatureData {
                    txid: prevout.outpoint.txid,
                    vout: prevout.outpoint.vout,
                    pubkey: hex::encode(&sig.pubkey),
                    signature: hex::encode(&sig.signature),
                    sighash: sig.sighash,
                }),
                Err(error) if !options.ignore_errors => {
                    return Err(WalletError::SigningFailed(vec![error]));
                }
                Err(error) => errors.push(error),
            }
        }
        Ok((signatures, errors))
    }
}
