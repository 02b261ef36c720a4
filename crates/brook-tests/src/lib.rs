//! Integration test suite for the Brook wallet engine.
//!
//! Drives `WalletService` end to end against an in-process ledger:
//! funding, signing and broadcast, reorgs, persistence across restarts,
//! transport failures and concurrent builds on one account.

pub mod helpers;
