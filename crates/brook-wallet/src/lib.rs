//! # brook-wallet: UTXO wallet state engine.
//!
//! Tracks the outputs a wallet owns on a Bitcoin-like or confidential
//! asset-extended ledger, follows the chain through reorgs, and builds,
//! funds and signs transactions. Key material and consensus encoding stay
//! behind the [`CryptoProvider`](brook_core::traits::CryptoProvider)
//! capability; chain access goes through
//! [`LedgerRpc`](brook_core::traits::LedgerRpc).
//!
//! # Modules
//!
//! - [`error`]: `WalletError` enum
//! - [`config`]: layered configuration
//! - [`address_book`]: HD address derivation, gap limit, classification
//! - [`utxo_store`]: owned outputs, locks and spend state
//! - [`sync`]: block application and reorg handling
//! - [`balance`]: per-asset balance aggregation
//! - [`coin_selection`]: fee-aware, multi-asset coin selection
//! - [`builder`]: create and fund pending builds
//! - [`signing`]: per-input signing with error collection
//! - [`storage`]: RocksDB persistence
//! - [`retry`]: ledger reads with bounded backoff
//! - [`rpc`]: JSON-RPC ledger client
//! - [`wallet`]: per-account service lane
//! - [`manager`]: registry of open accounts

pub mod account;
pub mod address_book;
pub mod balance;
pub mod builder;
pub mod coin_selection;
pub mod config;
pub mod error;
pub mod manager;
pub mod retry;
pub mod rpc;
pub mod signing;
pub mod storage;
pub mod sync;
pub mod utxo_store;
pub mod wallet;

// Re-exports for convenient access
pub use address_book::AddressBook;
pub use balance::BalanceQuery;
pub use builder::{BuildId, CreateRequest, FundOptions, InputSpec, Recipient, TransactionBuilder};
pub use config::WalletConfig;
pub use error::{ErrorOutPoint, WalletError};
pub use manager::WalletManager;
pub use rpc::JsonRpcLedger;
pub use signing::{PrevTx, SignOptions, SignResponse, SigningCoordinator};
pub use sync::{BlockSyncEngine, SyncReport, SyncState, TipUpdate};
pub use utxo_store::UtxoStore;
pub use wallet::{FundResult, ListUnspentQuery, SendRequest, WalletService};
