//! Signature hashing, signing and verification of transaction inputs.
//!
//! # Signing scheme
//!
//! The sighash of input `i` commits to:
//! - Transaction version and lock_time
//! - Input outpoints and sequences: all of them, or only input `i` under
//!   ANYONECANPAY
//! - Outputs: all (ALL), none (NONE), or only output `i` (SINGLE)
//! - The locking script and amount of the output being spent
//! - The index of the input being signed and the sighash byte
//!
//! Unlocking data is excluded, so inputs can be signed in any order.

use ed25519_dalek::{Signer, Verifier};

use brook_core::error::CryptoError;
use brook_core::records::UtxoRecord;
use brook_core::traits::SighashType;
use brook_core::types::{Asset, Hash256, Transaction, TxOut, Value};

/// Domain separator for the sighash.
const SIGHASH_DOMAIN: &[u8] = b"brook-sighash-v1";

/// Ed25519 signature length.
pub const SIGNATURE_LEN: usize = 64;

fn update_bytes(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

fn update_output(hasher: &mut blake3::Hasher, output: &TxOut) {
    match &output.asset {
        Asset::Explicit(a) => {
            hasher.update(&[0x01]);
            hasher.update(a.0.as_bytes());
        }
        Asset::Confidential(c) => {
            hasher.update(&[0x0a]);
            update_bytes(hasher, c);
        }
    }
    match &output.value {
        Value::Explicit(v) => {
            hasher.update(&[0x01]);
            hasher.update(&v.to_le_bytes());
        }
        Value::Confidential(c) => {
            hasher.update(&[0x08]);
            update_bytes(hasher, c);
        }
    }
    update_bytes(hasher, &output.nonce);
    update_bytes(hasher, &output.script_pubkey);
}

/// Compute the signing hash of input `index` spending `prevout`.
pub fn signing_hash(
    tx: &Transaction,
    index: usize,
    prevout: &UtxoRecord,
    sighash: SighashType,
) -> Result<Hash256, CryptoError> {
    if index >= tx.inputs.len() {
        return Err(CryptoError::Signing(format!(
            "input index out of bounds: {index} >= {}",
            tx.inputs.len()
        )));
    }
    if tx.inputs[index].previous_output != prevout.outpoint {
        return Err(CryptoError::Signing(format!(
            "input {index} spends {}, not {}",
            tx.inputs[index].previous_output, prevout.outpoint
        )));
    }

    let mut hasher = blake3::Hasher::new();
    hasher.update(SIGHASH_DOMAIN);
    hasher.update(&tx.version.to_le_bytes());
    hasher.update(&tx.lock_time.to_le_bytes());

    let inputs: Vec<_> = if sighash.anyone_can_pay() {
        vec![&tx.inputs[index]]
    } else {
        tx.inputs.iter().collect()
    };
    hasher.update(&(inputs.len() as u64).to_le_bytes());
    for input in inputs {
        hasher.update(input.previous_output.txid.as_bytes());
        hasher.update(&input.previous_output.vout.to_le_bytes());
        hasher.update(&input.sequence.to_le_bytes());
    }

    match sighash {
        SighashType::All | SighashType::AllAnyoneCanPay => {
            hasher.update(&(tx.outputs.len() as u64).to_le_bytes());
            for output in &tx.outputs {
                update_output(&mut hasher, output);
            }
        }
        SighashType::None | SighashType::NoneAnyoneCanPay => {
            hasher.update(&0u64.to_le_bytes());
        }
        SighashType::Single | SighashType::SingleAnyoneCanPay => {
            let output = tx.outputs.get(index).ok_or_else(|| {
                CryptoError::Signing(format!("SINGLE: no output at index {index}"))
            })?;
            hasher.update(&1u64.to_le_bytes());
            update_output(&mut hasher, output);
        }
    }

    update_bytes(&mut hasher, &prevout.locking_script);
    hasher.update(&prevout.amount.to_le_bytes());
    hasher.update(prevout.asset.0.as_bytes());
    hasher.update(&(index as u64).to_le_bytes());
    hasher.update(&[sighash.to_byte()]);
    Ok(Hash256(*hasher.finalize().as_bytes()))
}

/// Sign input `index`, returning the signature with the sighash byte appended.
pub fn sign(
    key: &ed25519_dalek::SigningKey,
    tx: &Transaction,
    index: usize,
    prevout: &UtxoRecord,
    sighash: SighashType,
) -> Result<Vec<u8>, CryptoError> {
    let msg = signing_hash(tx, index, prevout, sighash)?;
    let mut sig = key.sign(msg.as_bytes()).to_bytes().to_vec();
    sig.push(sighash.to_byte());
    Ok(sig)
}

/// Verify a signature produced by [`sign`] against `pubkey`.
pub fn verify(
    pubkey: &[u8],
    signature: &[u8],
    tx: &Transaction,
    index: usize,
    prevout: &UtxoRecord,
) -> Result<(), CryptoError> {
    let pk: [u8; 32] = pubkey
        .try_into()
        .map_err(|_| CryptoError::Signing("public key must be 32 bytes".into()))?;
    let vk = ed25519_dalek::VerifyingKey::from_bytes(&pk)
        .map_err(|_| CryptoError::Signing("invalid public key".into()))?;
    let (flag, sig) = signature
        .split_last()
        .ok_or_else(|| CryptoError::Signing("empty signature".into()))?;
    let sig: [u8; SIGNATURE_LEN] = sig
        .try_into()
        .map_err(|_| CryptoError::Signing("signature must be 64 bytes plus flag".into()))?;
    let sighash = [
        SighashType::All,
        SighashType::None,
        SighashType::Single,
        SighashType::AllAnyoneCanPay,
        SighashType::NoneAnyoneCanPay,
        SighashType::SingleAnyoneCanPay,
    ]
    .into_iter()
    .find(|t| t.to_byte() == *flag)
    .ok_or_else(|| CryptoError::Signing(format!("unknown sighash flag {flag:#04x}")))?;
    let msg = signing_hash(tx, index, prevout, sighash)?;
    vk.verify(msg.as_bytes(), &ed25519_dalek::Signature::from_bytes(&sig))
        .map_err(|_| CryptoError::Signing("signature verification failed".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use brook_core::address::AddressType;
    use brook_core::records::Extension;
    use brook_core::types::{AssetId, OutPoint, TxIn};

    fn prevout(vout: u32, amount: u64) -> UtxoRecord {
        UtxoRecord {
            outpoint: OutPoint::new(Hash256([1; 32]), vout),
            address: "a".into(),
            amount,
            asset: AssetId::DEFAULT,
            blinders: None,
            block_hash: None,
            block_height: None,
            coinbase: false,
            spent: false,
            locked: false,
            solvable: true,
            descriptor: String::new(),
            locking_script: vec![0x03; 33],
            path: None,
            address_type: AddressType::P2wpkh,
            extend: Extension::new(),
            first_seen_height: None,
            spent_by: None,
            seen_seq: 0,
        }
    }

    fn tx() -> Transaction {
        Transaction {
            version: 2,
            lock_time: 0,
            inputs: vec![
                TxIn::unsigned(OutPoint::new(Hash256([1; 32]), 0), u32::MAX),
                TxIn::unsigned(OutPoint::new(Hash256([1; 32]), 1), u32::MAX),
            ],
            outputs: vec![
                TxOut::explicit(AssetId::DEFAULT, 700, vec![0x03; 33]),
                TxOut::explicit(AssetId::DEFAULT, 200, vec![0x01; 33]),
            ],
        }
    }

    fn key() -> ed25519_dalek::SigningKey {
        ed25519_dalek::SigningKey::from_bytes(&[7u8; 32])
    }

    #[test]
    fn sign_verify_roundtrip() {
        let tx = tx();
        let prev = prevout(0, 1_000);
        let sig = sign(&key(), &tx, 0, &prev, SighashType::All).unwrap();
        assert_eq!(sig.len(), SIGNATURE_LEN + 1);
        assert_eq!(*sig.last().unwrap(), 0x01);
        let pk = key().verifying_key().to_bytes();
        verify(&pk, &sig, &tx, 0, &prev).unwrap();
    }

    #[test]
    fn sighash_commits_to_prevout_amount() {
        let tx = tx();
        let a = signing_hash(&tx, 0, &prevout(0, 1_000), SighashType::All).unwrap();
        let b = signing_hash(&tx, 0, &prevout(0, 1_001), SighashType::All).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn sighash_all_commits_to_outputs_none_does_not() {
        let tx1 = tx();
        let mut tx2 = tx();
        tx2.outputs[1].value = Value::Explicit(201);
        let prev = prevout(0, 1_000);
        assert_ne!(
            signing_hash(&tx1, 0, &prev, SighashType::All).unwrap(),
            signing_hash(&tx2, 0, &prev, SighashType::All).unwrap()
        );
        assert_eq!(
            signing_hash(&tx1, 0, &prev, SighashType::None).unwrap(),
            signing_hash(&tx2, 0, &prev, SighashType::None).unwrap()
        );
        // SINGLE on input 0 ignores output 1.
        assert_eq!(
            signing_hash(&tx1, 0, &prev, SighashType::Single).unwrap(),
            signing_hash(&tx2, 0, &prev, SighashType::Single).unwrap()
        );
    }

    #[test]
    fn anyone_can_pay_ignores_other_inputs() {
        let tx1 = tx();
        let mut tx2 = tx();
        tx2.inputs[1].sequence = 5;
        let prev = prevout(0, 1_000);
        assert_eq!(
            signing_hash(&tx1, 0, &prev, SighashType::AllAnyoneCanPay).unwrap(),
            signing_hash(&tx2, 0, &prev, SighashType::AllAnyoneCanPay).unwrap()
        );
        assert_ne!(
            signing_hash(&tx1, 0, &prev, SighashType::All).unwrap(),
            signing_hash(&tx2, 0, &prev, SighashType::All).unwrap()
        );
    }

    #[test]
    fn signature_independent_of_unlocking_data() {
        let mut tx = tx();
        let prev = prevout(0, 1_000);
        let before = signing_hash(&tx, 0, &prev, SighashType::All).unwrap();
        tx.inputs[1].witness = vec![vec![1, 2, 3]];
        tx.inputs[1].script_sig = vec![4, 5];
        assert_eq!(before, signing_hash(&tx, 0, &prev, SighashType::All).unwrap());
    }

    #[test]
    fn rejects_mismatched_prevout_and_bad_index() {
        let tx = tx();
        assert!(signing_hash(&tx, 0, &prevout(1, 1_000), SighashType::All).is_err());
        assert!(signing_hash(&tx, 5, &prevout(0, 1_000), SighashType::All).is_err());
        let mut single = tx.clone();
        single.outputs.truncate(1);
        assert!(signing_hash(&single, 1, &prevout(1, 1_000), SighashType::Single).is_err());
    }

    #[test]
    fn verify_rejects_tampered_tx() {
        let tx1 = tx();
        let prev = prevout(0, 1_000);
        let sig = sign(&key(), &tx1, 0, &prev, SighashType::All).unwrap();
        let mut tx2 = tx1.clone();
        tx2.outputs[0].value = Value::Explicit(701);
        let pk = key().verifying_key().to_bytes();
        assert!(verify(&pk, &sig, &tx2, 0, &prev).is_err());
        let other = ed25519_dalek::SigningKey::from_bytes(&[8u8; 32]).verifying_key().to_bytes();
        assert!(verify(&other, &sig, &tx1, 0, &prev).is_err());
    }
}
