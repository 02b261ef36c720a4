//! # brook-crypto: software crypto capability for Brook.
//!
//! Implements [`brook_core::traits::CryptoProvider`] in process: Ed25519
//! keys derived from a master seed, tagged locking scripts and Base58
//! addresses, per-input sighash signing, X25519 output blinding and a typed
//! wire codec per ledger kind.
//!
//! # Modules
//!
//! - [`keys`]: Seed, BLAKE3-based signing and blinding key derivation
//! - [`script`]: locking scripts, multisig, addresses, descriptors
//! - [`sighash`]: signing hash, sign / verify
//! - [`blinding`]: blind and unblind outputs
//! - [`codec`]: per-ledger transaction wire format
//! - [`provider`]: `SoftwareCrypto`

pub mod blinding;
pub mod codec;
pub mod keys;
pub mod provider;
pub mod script;
pub mod sighash;

pub use keys::Seed;
pub use provider::SoftwareCrypto;
