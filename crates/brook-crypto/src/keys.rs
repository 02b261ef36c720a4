//! Seed management and deterministic key derivation.
//!
//! Signing keys are Ed25519 keys derived from a 32-byte master seed with
//! BLAKE3's KDF, keyed on the full derivation path. Blinding keys are X25519
//! scalars derived from the same seed, keyed on the locking script they
//! protect, so every address gets its own blinding key without extra state.

use curve25519_dalek::montgomery::MontgomeryPoint;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use brook_core::address::DerivationPath;
use brook_core::error::CryptoError;

/// BLAKE3 KDF context for signing key derivation.
const SIGNING_KDF_CONTEXT: &str = "brook-crypto signing-key derivation v1";

/// BLAKE3 KDF context for per-script blinding key derivation.
const BLINDING_KDF_CONTEXT: &str = "brook-crypto blinding-key derivation v1";

/// X25519 base point (u = 9).
const BASEPOINT: MontgomeryPoint = curve25519_dalek::constants::X25519_BASEPOINT;

/// The wallet master seed. Every signing and blinding key is a function
/// of these 32 bytes. Wiped on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Seed {
    bytes: [u8; 32],
}

impl Seed {
    /// Fresh seed from `OsRng`.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Wrap existing seed bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Parse a seed from 64 hex characters.
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let mut raw = hex::decode(s.trim())
            .map_err(|e| CryptoError::KeyDerivation(format!("seed hex: {e}")))?;
        let bytes: [u8; 32] = raw
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::KeyDerivation(format!("seed must be 32 bytes, got {}", raw.len())))?;
        raw.zeroize();
        Ok(Self { bytes })
    }

    /// Raw seed bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Hex form of the seed, for backup.
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }
}

impl Clone for Seed {
    fn clone(&self) -> Self {
        Self { bytes: self.bytes }
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Seed(<hidden>)")
    }
}

/// Derive the Ed25519 signing key at `path`.
pub fn derive_signing_key(seed: &Seed, path: &DerivationPath) -> ed25519_dalek::SigningKey {
    let mut ikm = Vec::with_capacity(52);
    ikm.extend_from_slice(seed.as_bytes());
    ikm.extend_from_slice(&path.purpose.to_le_bytes());
    ikm.extend_from_slice(&path.coin_type.to_le_bytes());
    ikm.extend_from_slice(&path.account.to_le_bytes());
    ikm.extend_from_slice(&path.chain.index().to_le_bytes());
    ikm.extend_from_slice(&path.index.to_le_bytes());
    let mut secret = blake3::derive_key(SIGNING_KDF_CONTEXT, &ikm);
    ikm.zeroize();
    let key = ed25519_dalek::SigningKey::from_bytes(&secret);
    secret.zeroize();
    key
}

/// Derive the X25519 blinding secret for outputs paying to `locking_script`.
pub fn derive_blinding_secret(seed: &Seed, locking_script: &[u8]) -> [u8; 32] {
    let mut ikm = Vec::with_capacity(32 + locking_script.len());
    ikm.extend_from_slice(seed.as_bytes());
    ikm.extend_from_slice(locking_script);
    let secret = blake3::derive_key(BLINDING_KDF_CONTEXT, &ikm);
    ikm.zeroize();
    secret
}

/// Public X25519 point of a blinding secret.
pub fn blinding_public(secret: [u8; 32]) -> [u8; 32] {
    BASEPOINT.mul_clamped(secret).to_bytes()
}

/// X25519 shared secret between `secret` and the peer point `public`.
pub fn shared_secret(secret: [u8; 32], public: &[u8; 32]) -> [u8; 32] {
    MontgomeryPoint(*public).mul_clamped(secret).to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use brook_core::address::Chain;

    fn path(chain: Chain, index: u32) -> DerivationPath {
        DerivationPath {
            purpose: 84,
            coin_type: 1,
            account: 0,
            chain,
            index,
        }
    }

    #[test]
    fn generated_seeds_differ() {
        assert_ne!(Seed::generate().to_hex(), Seed::generate().to_hex());
    }

    #[test]
    fn seed_hex_roundtrip() {
        let seed = Seed::from_bytes([0x5a; 32]);
        let restored = Seed::from_hex(&seed.to_hex()).unwrap();
        assert_eq!(seed.as_bytes(), restored.as_bytes());
        assert!(Seed::from_hex("abcd").is_err());
        assert!(Seed::from_hex("not hex").is_err());
    }

    #[test]
    fn debug_output_is_opaque() {
        let seed = Seed::from_bytes([0xcd; 32]);
        assert_eq!(format!("{seed:?}"), "Seed(<hidden>)");
    }

    #[test]
    fn same_path_same_key() {
        let seed = Seed::from_bytes([1u8; 32]);
        let first = derive_signing_key(&seed, &path(Chain::Receive, 7)).verifying_key();
        let again = derive_signing_key(&seed.clone(), &path(Chain::Receive, 7)).verifying_key();
        assert_eq!(first, again);
    }

    #[test]
    fn every_path_component_changes_the_key() {
        let seed = Seed::from_bytes([1u8; 32]);
        let base = derive_signing_key(&seed, &path(Chain::Receive, 0)).verifying_key();
        let other_index = derive_signing_key(&seed, &path(Chain::Receive, 1)).verifying_key();
        let other_chain = derive_signing_key(&seed, &path(Chain::Change, 0)).verifying_key();
        let mut other_purpose = path(Chain::Receive, 0);
        other_purpose.purpose = 44;
        let other_purpose = derive_signing_key(&seed, &other_purpose).verifying_key();
        assert_ne!(base, other_index);
        assert_ne!(base, other_chain);
        assert_ne!(base, other_purpose);
    }

    #[test]
    fn other_seed_other_key() {
        let at = path(Chain::Change, 3);
        let a = derive_signing_key(&Seed::from_bytes([1u8; 32]), &at).verifying_key();
        let b = derive_signing_key(&Seed::from_bytes([2u8; 32]), &at).verifying_key();
        assert_ne!(a, b);
    }

    #[test]
    fn blinding_ecdh_agrees() {
        let seed = Seed::from_bytes([3u8; 32]);
        let a = derive_blinding_secret(&seed, b"script-a");
        let b = derive_blinding_secret(&seed, b"script-b");
        assert_ne!(a, b);
        let ab = shared_secret(a, &blinding_public(b));
        let ba = shared_secret(b, &blinding_public(a));
        assert_eq!(ab, ba);
    }
}
