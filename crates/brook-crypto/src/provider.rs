//! [`SoftwareCrypto`]: the in-process crypto capability.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

use brook_core::address::{AddressType, DerivationPath};
use brook_core::error::CryptoError;
use brook_core::network::{LedgerKind, Network};
use brook_core::records::UtxoRecord;
use brook_core::traits::{
    CryptoProvider, DerivedKey, InputSignature, ParsedAddress, ScriptInfo, ScriptSpec, SighashType,
    UnblindedOutput,
};
use brook_core::types::{Transaction, TxOut};

use crate::keys::{self, Seed};
use crate::{blinding, codec, script, sighash};

/// Outpoint (36) + sequence (4) + script length (1).
const INPUT_BASE_VSIZE: u64 = 41;

/// Push of a signature with its sighash flag.
const SIG_PUSH: u64 = 1 + sighash::SIGNATURE_LEN as u64 + 1;

/// Push of a 32-byte public key.
const PUBKEY_PUSH: u64 = 1 + 32;

/// Push of a nested witness program.
const PROGRAM_PUSH: u64 = 1 + script::LOCKING_SCRIPT_LEN as u64;

/// Witness stack count byte.
const WITNESS_COUNT: u64 = 1;

/// Allowance for a script spend the wallet does not sign itself: a 2-of-3
/// multisig redeem script with two signatures.
const SCRIPT_SPEND_ALLOWANCE: u64 = 2 * SIG_PUSH + 1 + 3 * PUBKEY_PUSH + 3;

/// Software implementation of [`CryptoProvider`] over a master [`Seed`].
pub struct SoftwareCrypto {
    seed: Seed,
    /// Derived signing keys by path.
    cache: Mutex<HashMap<DerivationPath, ed25519_dalek::SigningKey>>,
}

impl SoftwareCrypto {
    /// Create a provider from a seed.
    pub fn new(seed: Seed) -> Self {
        Self {
            seed,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Create a provider with a freshly generated seed.
    pub fn generate() -> Self {
        Self::new(Seed::generate())
    }

    /// The master seed. Handle with care.
    pub fn seed(&self) -> &Seed {
        &self.seed
    }

    fn signing_key(&self, path: &DerivationPath) -> ed25519_dalek::SigningKey {
        self.cache
            .lock()
            .entry(*path)
            .or_insert_with(|| keys::derive_signing_key(&self.seed, path))
            .clone()
    }

    /// Verify the unlocking data of input `index` against `prevout`.
    ///
    /// Only single-key spends are understood.
    pub fn verify_input(&self, tx: &Transaction, index: usize, prevout: &UtxoRecord) -> Result<(), CryptoError> {
        let input = tx
            .inputs
            .get(index)
            .ok_or_else(|| CryptoError::Signing(format!("no input {index}")))?;
        let (sig, pubkey) = match prevout.address_type {
            AddressType::P2pkh => {
                let pushes = script::read_pushes(&input.script_sig)?;
                match pushes.as_slice() {
                    [sig, pk] => (sig.clone(), pk.clone()),
                    _ => return Err(CryptoError::Signing("expected <sig> <pubkey>".into())),
                }
            }
            AddressType::P2wpkh | AddressType::P2shP2wpkh => match input.witness.as_slice() {
                [sig, pk] => (sig.clone(), pk.clone()),
                _ => return Err(CryptoError::Signing("expected witness [sig, pubkey]".into())),
            },
            other => return Err(CryptoError::Signing(format!("cannot verify {other} spends"))),
        };
        if script::key_locking_script(prevout.address_type, &pubkey)? != prevout.locking_script {
            return Err(CryptoError::Signing("public key does not match locking script".into()));
        }
        sighash::verify(&pubkey, &sig, tx, index, prevout)
    }
}

impl fmt::Debug for SoftwareCrypto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareCrypto")
            .field("seed", &self.seed)
            .field("cached_keys", &self.cache.lock().len())
            .finish()
    }
}

impl CryptoProvider for SoftwareCrypto {
    fn derive_key(&self, path: &DerivationPath) -> Result<DerivedKey, CryptoError> {
        let key = self.signing_key(path);
        Ok(DerivedKey {
            path: *path,
            pubkey: key.verifying_key().to_bytes().to_vec(),
        })
    }

    fn build_script(&self, spec: &ScriptSpec, network: Network) -> Result<ScriptInfo, CryptoError> {
        script::build(spec, network)
    }

    fn parse_address(&self, address: &str, network: Network) -> Result<ParsedAddress, CryptoError> {
        script::decode_address(network, address)
    }

    fn blinding_pubkey(&self, locking_script: &[u8]) -> Result<Vec<u8>, CryptoError> {
        script::parse_locking_script(locking_script)?;
        let secret = keys::derive_blinding_secret(&self.seed, locking_script);
        Ok(keys::blinding_public(secret).to_vec())
    }

    fn confidential_address(
        &self,
        address: &str,
        blinding_pubkey: &[u8],
        network: Network,
    ) -> Result<String, CryptoError> {
        script::encode_confidential(network, address, blinding_pubkey)
    }

    fn estimate_input_size(&self, utxo: &UtxoRecord) -> u64 {
        // Witness bytes count a quarter.
        let witness = |stack: u64| (WITNESS_COUNT + stack).div_ceil(4);
        match utxo.address_type {
            AddressType::P2pkh => INPUT_BASE_VSIZE + SIG_PUSH + PUBKEY_PUSH,
            AddressType::P2wpkh => INPUT_BASE_VSIZE + witness(SIG_PUSH + PUBKEY_PUSH),
            AddressType::P2shP2wpkh => {
                INPUT_BASE_VSIZE + PROGRAM_PUSH + witness(SIG_PUSH + PUBKEY_PUSH)
            }
            AddressType::P2sh => INPUT_BASE_VSIZE + SCRIPT_SPEND_ALLOWANCE,
            AddressType::P2wsh => INPUT_BASE_VSIZE + witness(SCRIPT_SPEND_ALLOWANCE),
            AddressType::P2shP2wsh => {
                INPUT_BASE_VSIZE + PROGRAM_PUSH + witness(SCRIPT_SPEND_ALLOWANCE)
            }
        }
    }

    fn sign_input(
        &self,
        tx: &Transaction,
        index: usize,
        path: &DerivationPath,
        prevout: &UtxoRecord,
        sighash: SighashType,
    ) -> Result<InputSignature, CryptoError> {
        let key = self.signing_key(path);
        let pubkey = key.verifying_key().to_bytes().to_vec();
        let locking = script::key_locking_script(prevout.address_type, &pubkey)
            .map_err(|e| CryptoError::Signing(e.to_string()))?;
        if locking != prevout.locking_script {
            return Err(CryptoError::Signing(format!(
                "key at {path} does not unlock {}",
                prevout.outpoint
            )));
        }
        let signature = sighash::sign(&key, tx, index, prevout, sighash)?;
        debug!(outpoint = %prevout.outpoint, index, %sighash, "signed input");
        Ok(InputSignature {
            pubkey,
            signature,
            sighash,
        })
    }

    fn apply_signature(
        &self,
        tx: &mut Transaction,
        index: usize,
        prevout: &UtxoRecord,
        signature: &InputSignature,
    ) -> Result<(), CryptoError> {
        let input = tx
            .inputs
            .get_mut(index)
            .ok_or_else(|| CryptoError::Signing(format!("no input {index}")))?;
        match prevout.address_type {
            AddressType::P2pkh => {
                let mut script_sig = Vec::new();
                script::push_data(&mut script_sig, &signature.signature);
                script::push_data(&mut script_sig, &signature.pubkey);
                input.script_sig = script_sig;
                input.witness.clear();
            }
            AddressType::P2wpkh => {
                input.script_sig.clear();
                input.witness = vec![signature.signature.clone(), signature.pubkey.clone()];
            }
            AddressType::P2shP2wpkh => {
                let program = script::nested_program(AddressType::P2wpkh, &signature.pubkey);
                let mut script_sig = Vec::new();
                script::push_data(&mut script_sig, &program);
                input.script_sig = script_sig;
                input.witness = vec![signature.signature.clone(), signature.pubkey.clone()];
            }
            other => {
                return Err(CryptoError::Script(format!(
                    "cannot assemble unlocking data for {other}"
                )));
            }
        }
        Ok(())
    }

    fn blind_outputs(
        &self,
        tx: &Transaction,
        blinding_pubkeys: &[Option<Vec<u8>>],
    ) -> Result<Transaction, CryptoError> {
        blinding::blind_outputs(&self.seed, tx, blinding_pubkeys)
    }

    fn unblind_output(&self, output: &TxOut, locking_script: &[u8]) -> Result<UnblindedOutput, CryptoError> {
        blinding::unblind_output(&self.seed, output, locking_script)
    }

    fn encode_transaction(&self, tx: &Transaction, ledger: LedgerKind) -> Result<String, CryptoError> {
        codec::encode(tx, ledger)
    }

    fn decode_transaction(&self, hex: &str, ledger: LedgerKind) -> Result<Transaction, CryptoError> {
        codec::decode(hex, ledger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brook_core::address::Chain;
    use brook_core::records::Extension;
    use brook_core::types::{AssetId, Hash256, OutPoint, TxIn};

    fn provider() -> SoftwareCrypto {
        SoftwareCrypto::new(Seed::from_bytes([11; 32]))
    }

    fn path(purpose: u32, index: u32) -> DerivationPath {
        DerivationPath {
            purpose,
            coin_type: 1,
            account: 0,
            chain: Chain::Receive,
            index,
        }
    }

    fn owned_utxo(crypto: &SoftwareCrypto, address_type: AddressType, path: DerivationPath, vout: u32) -> UtxoRecord {
        let key = crypto.derive_key(&path).unwrap();
        let info = crypto
            .build_script(&ScriptSpec::Pubkey { address_type, pubkey: key.pubkey }, Network::Regtest)
            .unwrap();
        UtxoRecord {
            outpoint: OutPoint::new(Hash256([5; 32]), vout),
            address: info.address,
            amount: 50_000,
            asset: AssetId::DEFAULT,
            blinders: None,
            block_hash: None,
            block_height: None,
            coinbase: false,
            spent: false,
            locked: false,
            solvable: true,
            descriptor: info.descriptor,
            locking_script: info.locking_script,
            path: Some(path),
            address_type,
            extend: Extension::new(),
            first_seen_height: None,
            spent_by: None,
            seen_seq: 0,
        }
    }

    fn spend(utxos: &[&UtxoRecord]) -> Transaction {
        Transaction {
            version: 2,
            lock_time: 0,
            inputs: utxos.iter().map(|u| TxIn::unsigned(u.outpoint, u32::MAX)).collect(),
            outputs: vec![TxOut::explicit(AssetId::DEFAULT, 40_000, vec![0x03; 33])],
        }
    }

    #[test]
    fn derive_key_is_cached_and_deterministic() {
        let c = provider();
        let a = c.derive_key(&path(84, 0)).unwrap();
        let b = c.derive_key(&path(84, 0)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.pubkey.len(), 32);
        assert_ne!(a.pubkey, c.derive_key(&path(84, 1)).unwrap().pubkey);
    }

    #[test]
    fn sign_and_verify_each_key_type() {
        let c = provider();
        for (i, (t, purpose)) in [
            (AddressType::P2pkh, 44),
            (AddressType::P2wpkh, 84),
            (AddressType::P2shP2wpkh, 49),
        ]
        .into_iter()
        .enumerate()
        {
            let utxo = owned_utxo(&c, t, path(purpose, i as u32), 0);
            let mut tx = spend(&[&utxo]);
            let sig = c.sign_input(&tx, 0, &path(purpose, i as u32), &utxo, SighashType::All).unwrap();
            c.apply_signature(&mut tx, 0, &utxo, &sig).unwrap();
            assert!(tx.inputs[0].is_signed());
            c.verify_input(&tx, 0, &utxo).unwrap();
        }
    }

    #[test]
    fn wrong_path_fails_to_sign() {
        let c = provider();
        let utxo = owned_utxo(&c, AddressType::P2wpkh, path(84, 0), 0);
        let tx = spend(&[&utxo]);
        let err = c.sign_input(&tx, 0, &path(84, 1), &utxo, SighashType::All);
        assert!(matches!(err, Err(CryptoError::Signing(_))));
    }

    #[test]
    fn script_spend_cannot_be_assembled() {
        let c = provider();
        let mut utxo = owned_utxo(&c, AddressType::P2wpkh, path(84, 0), 0);
        utxo.address_type = AddressType::P2wsh;
        let mut tx = spend(&[&utxo]);
        let sig = InputSignature {
            pubkey: vec![1; 32],
            signature: vec![2; 65],
            sighash: SighashType::All,
        };
        assert!(c.apply_signature(&mut tx, 0, &utxo, &sig).is_err());
    }

    #[test]
    fn witness_inputs_are_cheaper() {
        let c = provider();
        let legacy = owned_utxo(&c, AddressType::P2pkh, path(44, 0), 0);
        let nested = owned_utxo(&c, AddressType::P2shP2wpkh, path(49, 0), 0);
        let native = owned_utxo(&c, AddressType::P2wpkh, path(84, 0), 0);
        let (l, n, w) = (
            c.estimate_input_size(&legacy),
            c.estimate_input_size(&nested),
            c.estimate_input_size(&native),
        );
        assert!(w < n && n < l, "native {w} nested {n} legacy {l}");
    }

    #[test]
    fn blinding_pubkey_requires_locking_script() {
        let c = provider();
        assert!(c.blinding_pubkey(b"junk").is_err());
        let utxo = owned_utxo(&c, AddressType::P2wpkh, path(84, 0), 0);
        assert_eq!(c.blinding_pubkey(&utxo.locking_script).unwrap().len(), 32);
    }
}
