//! Mutable state of one account, guarded as a unit by the service lane.

use brook_core::traits::CryptoProvider;

use crate::address_book::AddressBook;
use crate::builder::{BuildContext, TransactionBuilder};
use crate::config::WalletConfig;
use crate::error::WalletError;
use crate::storage::{AccountMeta, Snapshot};
use crate::sync::{BlockSyncEngine, SyncContext};
use crate::utxo_store::UtxoStore;

/// Everything an account mutates. Only ever touched under the account lane.
#[derive(Debug)]
pub struct AccountState {
    pub book: AddressBook,
    pub utxos: UtxoStore,
    pub sync: BlockSyncEngine,
    pub builds: TransactionBuilder,
    pub min_fee_rate: u64,
    pub dust_threshold: u64,
    pub min_conf_for_funding: u64,
}

impl AccountState {
    /// A fresh account from configuration.
    pub fn new(config: &WalletConfig, account: u32) -> Result<Self, WalletError> {
        Ok(Self {
            book: AddressBook::new(config.network, account, config.gap_limit, config.address_type)?,
            utxos: UtxoStore::new(),
            sync: BlockSyncEngine::new(config.max_reorg_depth, config.birth_height),
            builds: TransactionBuilder::new(),
            min_fee_rate: config.min_fee_rate,
            dust_threshold: config.dust_threshold,
            min_conf_for_funding: config.min_conf_for_funding,
        })
    }

    /// Rebuild an account from a persisted snapshot.
    pub fn from_snapshot(config: &WalletConfig, account: u32, snapshot: Snapshot) -> Result<Self, WalletError> {
        let mut sync = BlockSyncEngine::new(config.max_reorg_depth, config.birth_height);
        sync.restore(snapshot.meta.tracked);
        Ok(Self {
            book: AddressBook::restore(config.network, account, snapshot.meta.book, snapshot.addresses)?,
            utxos: UtxoStore::restore(snapshot.utxos),
            sync,
            builds: TransactionBuilder::new(),
            min_fee_rate: snapshot.meta.min_fee_rate,
            dust_threshold: config.dust_threshold,
            min_conf_for_funding: config.min_conf_for_funding,
        })
    }

    /// Metadata row for persistence.
    pub fn meta(&self) -> AccountMeta {
        AccountMeta {
            book: self.book.state(),
            tracked: self.sync.tracked(),
            min_fee_rate: self.min_fee_rate,
        }
    }

    /// Current tip height.
    pub fn tip_height(&self) -> u64 {
        self.sync.tip_height()
    }

    /// Split the state into the engine and the context a sync pass needs.
    pub fn sync_parts<'a>(
        &'a mut self,
        crypto: &'a dyn CryptoProvider,
    ) -> (&'a mut BlockSyncEngine, SyncContext<'a>) {
        (
            &mut self.sync,
            SyncContext {
                book: &mut self.book,
                store: &mut self.utxos,
                crypto,
            },
        )
    }

    /// Split the state into the builder and the context a build step needs.
    pub fn build_parts<'a>(
        &'a mut self,
        crypto: &'a dyn CryptoProvider,
    ) -> (&'a mut TransactionBuilder, BuildContext<'a>) {
        let tip_height = self.sync.tip_height();
        (
            &mut self.builds,
            BuildContext {
                store: &mut self.utxos,
                book: &mut self.book,
                crypto,
                tip_height,
                min_fee_rate: self.min_fee_rate,
                dust_threshold: self.dust_threshold,
                min_conf: self.min_conf_for_funding,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brook_core::types::Hash256;
    use brook_crypto::{Seed, SoftwareCrypto};

    fn make_config() -> WalletConfig {
        WalletConfig {
            gap_limit: 3,
            birth_height: 10,
            min_fee_rate: 1_500,
            in_memory: true,
            ..Default::default()
        }
    }

    #[test]
    fn fresh_account_starts_below_birth() {
        let state = AccountState::new(&make_config(), 0).unwrap();
        assert_eq!(state.tip_height(), 9);
        assert_eq!(state.min_fee_rate, 1_500);
    }

    #[test]
    fn snapshot_round_trip_keeps_meta() {
        let config = make_config();
        let crypto = SoftwareCrypto::new(Seed::from_bytes([1; 32]));
        let mut state = AccountState::new(&config, 0).unwrap();
        state.book.top_up(&crypto).unwrap();
        state.sync.restore([(10, Hash256([10; 32])), (11, Hash256([11; 32]))]);
        state.min_fee_rate = 4_000;

        let snapshot = Snapshot {
            meta: state.meta(),
            addresses: state.book.records().cloned().collect(),
            utxos: state.utxos.iter().cloned().collect(),
        };
        let back = AccountState::from_snapshot(&config, 0, snapshot).unwrap();
        assert_eq!(back.meta(), state.meta());
        assert_eq!(back.tip_height(), 11);
        assert_eq!(back.book.records().count(), state.book.records().count());
    }
}
