//! Output blinding for the asset-extended ledger.
//!
//! Blinding an output to a receiver's X25519 blinding key:
//! 1. Derive an ephemeral secret from the wallet seed, the unblinded
//!    transaction ID and the output index; its public point becomes the
//!    output nonce.
//! 2. ECDH with the receiver key yields a shared secret; a BLAKE3 keystream
//!    keyed on it encrypts the amount (8 bytes) and asset (32 bytes).
//! 3. A keyed check tag over the plaintext is appended to the blinded value,
//!    so a non-matching key is detected instead of yielding garbage.
//!
//! Blinding factors are derived from the shared secret, so the receiver
//! recovers them without extra payload.

use zeroize::Zeroize;

use brook_core::error::CryptoError;
use brook_core::records::Blinders;
use brook_core::traits::UnblindedOutput;
use brook_core::types::{Asset, AssetId, Hash256, Transaction, TxOut, Value};

use crate::keys::{self, Seed};

/// KDF context for ephemeral blinding secrets.
const EPHEMERAL_KDF_CONTEXT: &str = "brook-crypto ephemeral blinding v1";

/// Length of the check tag appended to blinded values.
const CHECK_TAG_LEN: usize = 8;

/// Blinded value length: amount plus check tag.
pub const BLINDED_VALUE_LEN: usize = 8 + CHECK_TAG_LEN;

/// Blinded asset length.
pub const BLINDED_ASSET_LEN: usize = 32;

fn keystream(shared: &[u8; 32]) -> [u8; 40] {
    let mut hasher = blake3::Hasher::new_keyed(shared);
    hasher.update(b"keystream");
    let mut out = [0u8; 40];
    hasher.finalize_xof().fill(&mut out);
    out
}

fn check_tag(shared: &[u8; 32], amount: u64, asset: &AssetId) -> [u8; CHECK_TAG_LEN] {
    let mut hasher = blake3::Hasher::new_keyed(shared);
    hasher.update(b"check");
    hasher.update(&amount.to_le_bytes());
    hasher.update(asset.0.as_bytes());
    let mut out = [0u8; CHECK_TAG_LEN];
    out.copy_from_slice(&hasher.finalize().as_bytes()[..CHECK_TAG_LEN]);
    out
}

fn blinders(shared: &[u8; 32]) -> Blinders {
    let derive = |label: &[u8]| {
        let mut hasher = blake3::Hasher::new_keyed(shared);
        hasher.update(label);
        Hash256(*hasher.finalize().as_bytes())
    };
    Blinders {
        asset_blinder: derive(b"asset-blinder"),
        amount_blinder: derive(b"amount-blinder"),
    }
}

fn ephemeral_secret(seed: &Seed, txid: &Hash256, index: usize) -> [u8; 32] {
    let mut ikm = Vec::with_capacity(72);
    ikm.extend_from_slice(seed.as_bytes());
    ikm.extend_from_slice(txid.as_bytes());
    ikm.extend_from_slice(&(index as u64).to_le_bytes());
    let secret = blake3::derive_key(EPHEMERAL_KDF_CONTEXT, &ikm);
    ikm.zeroize();
    secret
}

/// Blind every output whose entry in `blinding_pubkeys` is `Some`.
pub fn blind_outputs(
    seed: &Seed,
    tx: &Transaction,
    blinding_pubkeys: &[Option<Vec<u8>>],
) -> Result<Transaction, CryptoError> {
    if blinding_pubkeys.len() != tx.outputs.len() {
        return Err(CryptoError::Blinding(format!(
            "{} blinding keys for {} outputs",
            blinding_pubkeys.len(),
            tx.outputs.len()
        )));
    }
    let txid = tx.txid();
    let mut blinded = tx.clone();
    for (index, (output, key)) in blinded.outputs.iter_mut().zip(blinding_pubkeys).enumerate() {
        let Some(key) = key else { continue };
        let receiver: [u8; 32] = key.as_slice().try_into().map_err(|_| {
            CryptoError::Blinding(format!("output {index}: blinding key must be 32 bytes"))
        })?;
        if output.is_fee() {
            return Err(CryptoError::Blinding(format!("output {index}: fee outputs stay explicit")));
        }
        let (Value::Explicit(amount), Asset::Explicit(asset)) = (&output.value, &output.asset) else {
            return Err(CryptoError::Blinding(format!("output {index}: already blinded")));
        };
        let (amount, asset) = (*amount, *asset);

        let mut eph = ephemeral_secret(seed, &txid, index);
        let nonce = keys::blinding_public(eph);
        let mut shared = keys::shared_secret(eph, &receiver);
        eph.zeroize();

        let ks = keystream(&shared);
        let mut value = amount.to_le_bytes().to_vec();
        value.iter_mut().zip(&ks[..8]).for_each(|(b, k)| *b ^= k);
        value.extend_from_slice(&check_tag(&shared, amount, &asset));
        let mut asset_ct = asset.0.as_bytes().to_vec();
        asset_ct.iter_mut().zip(&ks[8..]).for_each(|(b, k)| *b ^= k);
        shared.zeroize();

        output.value = Value::Confidential(value);
        output.asset = Asset::Confidential(asset_ct);
        output.nonce = nonce.to_vec();
    }
    Ok(blinded)
}

/// Recover a blinded output paying to `locking_script`.
pub fn unblind_output(
    seed: &Seed,
    output: &TxOut,
    locking_script: &[u8],
) -> Result<UnblindedOutput, CryptoError> {
    let (Value::Confidential(value), Asset::Confidential(asset_ct)) = (&output.value, &output.asset) else {
        return Err(CryptoError::Unblinding("output is not blinded".into()));
    };
    if value.len() != BLINDED_VALUE_LEN || asset_ct.len() != BLINDED_ASSET_LEN {
        return Err(CryptoError::Unblinding("malformed blinded output".into()));
    }
    let nonce: [u8; 32] = output
        .nonce
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::Unblinding("nonce must be 32 bytes".into()))?;

    let mut secret = keys::derive_blinding_secret(seed, locking_script);
    let mut shared = keys::shared_secret(secret, &nonce);
    secret.zeroize();

    let ks = keystream(&shared);
    let mut amount = [0u8; 8];
    amount.iter_mut().zip(value[..8].iter().zip(&ks[..8])).for_each(|(o, (b, k))| *o = b ^ k);
    let amount = u64::from_le_bytes(amount);
    let mut asset = [0u8; 32];
    asset.iter_mut().zip(asset_ct.iter().zip(&ks[8..])).for_each(|(o, (b, k))| *o = b ^ k);
    let asset = AssetId(Hash256(asset));

    if check_tag(&shared, amount, &asset)[..] != value[8..] {
        shared.zeroize();
        return Err(CryptoError::Unblinding("output is not blinded to this wallet".into()));
    }
    let blinders = blinders(&shared);
    shared.zeroize();
    Ok(UnblindedOutput { amount, asset, blinders })
}
