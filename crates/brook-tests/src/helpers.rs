//! Shared helpers: an in-process ledger and wallet fixtures.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;

use brook_core::address::{AddressRequest, AddressType, Chain};
use brook_core::capability::CryptoHandle;
use brook_core::error::RpcError;
use brook_core::network::{LedgerKind, Network};
use brook_core::records::UtxoRecord;
use brook_core::traits::LedgerRpc;
use brook_core::types::{AssetId, BlockData, Hash256, OutPoint, RawBlock, Transaction, TxIn, TxOut};
use brook_crypto::{Seed, SoftwareCrypto, codec};
use brook_wallet::address_book::AddressBook;
use brook_wallet::config::RetryConfig;
use brook_wallet::{WalletConfig, WalletService};

/// An in-process ledger node: a single best chain plus a mempool.
pub struct MockLedger {
    kind: LedgerKind,
    chain: Mutex<Vec<BlockData>>,
    mempool: Mutex<Vec<Transaction>>,
    nonce: AtomicU64,
    transport_failures: AtomicU32,
    reject_broadcasts: AtomicBool,
}

impl MockLedger {
    /// A chain holding only an empty genesis block.
    pub fn new(kind: LedgerKind) -> Self {
        let ledger = Self {
            kind,
            chain: Mutex::new(Vec::new()),
            mempool: Mutex::new(Vec::new()),
            nonce: AtomicU64::new(1),
            transport_failures: AtomicU32::new(0),
            reject_broadcasts: AtomicBool::new(false),
        };
        ledger.mine(Vec::new());
        ledger
    }

    fn next_hash(&self) -> Hash256 {
        let n = self.nonce.fetch_add(1, Ordering::Relaxed);
        let mut bytes = [0xb1; 32];
        bytes[..8].copy_from_slice(&n.to_le_bytes());
        Hash256(bytes)
    }

    /// Append a block with `txs` on top of the best chain.
    pub fn mine(&self, txs: Vec<Transaction>) -> BlockData {
        let mut chain = self.chain.lock();
        let (height, prev_hash) = match chain.last() {
            Some(tip) => (tip.height + 1, tip.hash),
            None => (0, Hash256::ZERO),
        };
        let block = BlockData {
            hash: self.next_hash(),
            height,
            prev_hash,
            transactions: txs,
        };
        chain.push(block.clone());
        block
    }

    /// Mine `n` empty blocks.
    pub fn mine_empty(&self, n: u64) {
        for _ in 0..n {
            self.mine(Vec::new());
        }
    }

    /// Mine every mempool transaction into one block.
    pub fn mine_mempool(&self) -> BlockData {
        let txs = std::mem::take(&mut *self.mempool.lock());
        self.mine(txs)
    }

    /// Drop the top `depth` blocks. Their transactions do not return to
    /// the mempool.
    pub fn disconnect(&self, depth: usize) {
        let mut chain = self.chain.lock();
        let keep = chain.len().saturating_sub(depth).max(1);
        chain.truncate(keep);
    }

    /// Forget the mempool, as after a node restart.
    pub fn clear_mempool(&self) {
        self.mempool.lock().clear();
    }

    pub fn mempool_transactions(&self) -> Vec<Transaction> {
        self.mempool.lock().clone()
    }

    pub fn mempool_txids(&self) -> Vec<Hash256> {
        self.mempool.lock().iter().map(Transaction::txid).collect()
    }

    pub fn tip_height(&self) -> u64 {
        self.chain.lock().last().map_or(0, |b| b.height)
    }

    /// Fail the next `n` calls with a transport error.
    pub fn fail_next(&self, n: u32) {
        self.transport_failures.store(n, Ordering::SeqCst);
    }

    pub fn reject_broadcasts(&self, reject: bool) {
        self.reject_broadcasts.store(reject, Ordering::SeqCst);
    }

    fn check_transport(&self) -> Result<(), RpcError> {
        let failing = self
            .transport_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RpcError::Transport("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl LedgerRpc for MockLedger {
    async fn get_block_count(&self) -> Result<u64, RpcError> {
        self.check_transport()?;
        Ok(self.tip_height())
    }

    async fn get_block_hash(&self, height: u64) -> Result<Hash256, RpcError> {
        self.check_transport()?;
        self.chain
            .lock()
            .get(height as usize)
            .map(|b| b.hash)
            .ok_or_else(|| RpcError::NotFound(format!("block height {height} out of range")))
    }

    async fn get_block(&self, hash: &Hash256) -> Result<RawBlock, RpcError> {
        self.check_transport()?;
        let block = self
            .chain
            .lock()
            .iter()
            .find(|b| b.hash == *hash)
            .cloned()
            .ok_or_else(|| RpcError::NotFound(format!("block {hash} not found")))?;
        let tx_hex = block
            .transactions
            .iter()
            .map(|tx| codec::encode(tx, self.kind))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| RpcError::InvalidResponse(e.to_string()))?;
        Ok(RawBlock {
            hash: block.hash,
            height: block.height,
            prev_hash: block.prev_hash,
            tx_hex,
        })
    }

    async fn get_raw_mempool(&self) -> Result<Vec<Hash256>, RpcError> {
        self.check_transport()?;
        Ok(self.mempool_txids())
    }

    async fn send_raw_transaction(&self, hex: &str) -> Result<Hash256, RpcError> {
        self.check_transport()?;
        if self.reject_broadcasts.load(Ordering::SeqCst) {
            return Err(RpcError::Rejected("insufficient fee".into()));
        }
        let tx = codec::decode(hex, self.kind).map_err(|e| RpcError::Rejected(e.to_string()))?;
        let txid = tx.txid();
        self.mempool.lock().push(tx);
        Ok(txid)
    }
}

// --- Wallet fixtures ---

/// Test configuration: in-memory, regtest, fast retries.
pub fn test_config() -> WalletConfig {
    WalletConfig {
        in_memory: true,
        gap_limit: 5,
        retry: RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
        },
        ..Default::default()
    }
}

pub fn make_crypto(seed: u8) -> Arc<SoftwareCrypto> {
    Arc::new(SoftwareCrypto::new(Seed::from_bytes([seed; 32])))
}

/// Open a wallet named `name` over `ledger`.
pub fn make_wallet(name: &str, seed: u8, config: &WalletConfig, ledger: Arc<MockLedger>) -> WalletService {
    WalletService::open(name, 0, config, CryptoHandle::ready(make_crypto(seed)), ledger)
        .unwrap_or_else(|e| panic!("open wallet {name}: {e}"))
}

/// An address owned by nobody under test; the confidential form on the
/// asset-extended ledger.
pub fn external_address(network: Network) -> String {
    let crypto = make_crypto(0xee);
    let mut book = AddressBook::new(network, 0, 1, AddressType::P2wpkh)
        .unwrap_or_else(|e| panic!("address book: {e}"));
    let record = book
        .derive_next(crypto.as_ref(), AddressRequest::Default, Chain::Receive, "")
        .unwrap_or_else(|e| panic!("derive: {e}"));
    record.confidential_address.unwrap_or(record.address)
}

/// A transaction from a foreign input paying each `(script, amount)`.
/// `salt` makes the txid unique.
pub fn pay_to(outputs: &[(Vec<u8>, u64)], salt: u8) -> Transaction {
    Transaction {
        version: 2,
        lock_time: 0,
        inputs: vec![TxIn::unsigned(OutPoint::new(Hash256([salt; 32]), 0), 0xffff_fffd)],
        outputs: outputs
            .iter()
            .map(|(script, amount)| TxOut::explicit(AssetId::DEFAULT, *amount, script.clone()))
            .collect(),
    }
}

/// A bare UTXO record for store-level tests.
pub fn utxo_record(n: u32, amount: u64, height: Option<u64>) -> UtxoRecord {
    let mut txid = [0u8; 32];
    txid[..4].copy_from_slice(&n.to_le_bytes());
    UtxoRecord {
        outpoint: OutPoint::new(Hash256(txid), n % 4),
        address: format!("addr{}", n % 3),
        amount,
        asset: AssetId::DEFAULT,
        blinders: None,
        block_hash: height.map(|h| Hash256([h as u8; 32])),
        block_height: height,
        coinbase: false,
        spent: false,
        locked: false,
        solvable: true,
        descriptor: String::new(),
        locking_script: vec![0x00, 0x14],
        path: None,
        address_type: AddressType::P2wpkh,
        extend: Default::default(),
        first_seen_height: height,
        spent_by: None,
        seen_seq: 0,
    }
}
