//! Registry of open wallet accounts.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::task::JoinSet;
use tracing::warn;

use crate::error::WalletError;
use crate::sync::{SyncReport, TipUpdate};
use crate::wallet::WalletService;

/// Named wallet accounts. Each account runs on its own lane, so fan-out
/// operations proceed in parallel across accounts.
#[derive(Debug, Default)]
pub struct WalletManager {
    wallets: RwLock<BTreeMap<String, Arc<WalletService>>>,
}

impl WalletManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a wallet under its name. Fails if the name is taken.
    pub fn add(&self, wallet: WalletService) -> Result<Arc<WalletService>, WalletError> {
        let mut wallets = self.wallets.write();
        if wallets.contains_key(wallet.name()) {
            return Err(WalletError::InvalidConfiguration(format!(
                "wallet {} already open",
                wallet.name()
            )));
        }
        let wallet = Arc::new(wallet);
        wallets.insert(wallet.name().to_string(), wallet.clone());
        Ok(wallet)
    }

    pub fn get(&self, name: &str) -> Option<Arc<WalletService>> {
        self.wallets.read().get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> Option<Arc<WalletService>> {
        self.wallets.write().remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.wallets.read().keys().cloned().collect()
    }

    /// Deliver a tip update to every wallet concurrently. One account's
    /// failure does not hold back the others.
    pub async fn on_new_tip(&self, update: TipUpdate) -> BTreeMap<String, Result<SyncReport, WalletError>> {
        let wallets: Vec<_> = self.wallets.read().values().cloned().collect();
        let mut tasks = JoinSet::new();
        for wallet in wallets {
            let update = update.clone();
            tasks.spawn(async move {
                let result = wallet.on_new_tip(update).await;
                (wallet.name().to_string(), result)
            });
        }

        let mut results = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, result)) => {
                    if let Err(e) = &result {
                        warn!(wallet = %name, error = %e, "tip update failed");
                    }
                    results.insert(name, result);
                }
                Err(e) => warn!(error = %e, "sync task panicked"),
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WalletConfig;
    use brook_core::address::AddressRequest;
    use brook_core::capability::CryptoHandle;
    use brook_core::error::RpcError;
    use brook_core::traits::LedgerRpc;
    use brook_core::types::{AssetId, BlockData, Hash256, OutPoint, RawBlock, Transaction, TxIn, TxOut};
    use brook_crypto::{Seed, SoftwareCrypto};

    struct NoLedger;

    #[async_trait::async_trait]
    impl LedgerRpc for NoLedger {
        async fn get_block_count(&self) -> Result<u64, RpcError> {
            Err(RpcError::Transport("offline".into()))
        }
        async fn get_block_hash(&self, _: u64) -> Result<Hash256, RpcError> {
            Err(RpcError::Transport("offline".into()))
        }
        async fn get_block(&self, _: &Hash256) -> Result<RawBlock, RpcError> {
            Err(RpcError::Transport("offline".into()))
        }
        async fn get_raw_mempool(&self) -> Result<Vec<Hash256>, RpcError> {
            Ok(vec![])
        }
        async fn send_raw_transaction(&self, _: &str) -> Result<Hash256, RpcError> {
            Err(RpcError::Transport("offline".into()))
        }
    }

    fn make_wallet(name: &str, seed: u8) -> WalletService {
        let config = WalletConfig {
            in_memory: true,
            gap_limit: 2,
            ..Default::default()
        };
        let crypto = Arc::new(SoftwareCrypto::new(Seed::from_bytes([seed; 32])));
        WalletService::open(name, 0, &config, CryptoHandle::ready(crypto), Arc::new(NoLedger)).unwrap()
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let manager = WalletManager::new();
        manager.add(make_wallet("alice", 1)).unwrap();
        assert!(matches!(
            manager.add(make_wallet("alice", 2)),
            Err(WalletError::InvalidConfiguration(_))
        ));
        manager.add(make_wallet("bob", 2)).unwrap();
        assert_eq!(manager.names(), vec!["alice".to_string(), "bob".to_string()]);
        assert!(manager.remove("alice").is_some());
        assert!(manager.get("alice").is_none());
    }

    #[tokio::test]
    async fn tip_update_reaches_every_wallet() {
        let manager = WalletManager::new();
        let alice = manager.add(make_wallet("alice", 1)).unwrap();
        let bob = manager.add(make_wallet("bob", 2)).unwrap();
        let a = alice.get_new_address(AddressRequest::Default, "").await.unwrap();
        let b = bob.get_new_address(AddressRequest::Default, "").await.unwrap();

        let tx = Transaction {
            version: 2,
            lock_time: 0,
            inputs: vec![TxIn::unsigned(OutPoint::new(Hash256([0xee; 32]), 0), 0)],
            outputs: vec![
                TxOut::explicit(AssetId::DEFAULT, 10_000, a.locking_script),
                TxOut::explicit(AssetId::DEFAULT, 20_000, b.locking_script),
            ],
        };
        let update = TipUpdate {
            height: 1,
            blocks: vec![BlockData {
                hash: Hash256([1; 32]),
                height: 1,
                prev_hash: Hash256::ZERO,
                transactions: vec![tx],
            }],
        };
        let results = manager.on_new_tip(update).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results["alice"].as_ref().unwrap().received, 1);
        assert_eq!(results["bob"].as_ref().unwrap().received, 1);
        let bal = bob.get_balance(&Default::default()).await;
        assert_eq!(bal[&AssetId::DEFAULT], 20_000);
    }
}
