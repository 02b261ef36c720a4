//! # brook-core
//! Foundation types and capability traits for the Brook wallet engine.
//!
//! - [`types`]: hashes, outpoints, transactions, blocks
//! - [`records`]: persisted wallet records (`UtxoRecord`, `AddressRecord`)
//! - [`address`]: address types, abstract address requests, derivation paths
//! - [`network`]: networks and ledger kinds
//! - [`traits`]: the crypto and ledger RPC capabilities
//! - [`capability`]: readiness handle for the crypto capability
//! - [`error`]: capability error enums
//! - [`constants`]: policy constants

pub mod address;
pub mod capability;
pub mod constants;
pub mod error;
pub mod network;
pub mod records;
pub mod traits;
pub mod types;
