//! Block ingestion and reorg handling.
//!
//! The engine keeps the hashes of the last `max_reorg_depth` applied blocks.
//! A block connects if its parent is the tracked block one height below.
//! Otherwise its ancestors are fetched from the ledger until a tracked hash
//! is found; if that common ancestor is below the tip, the store is rolled
//! back to it before the new branch is applied. Running out of tracked
//! history is fatal until [`BlockSyncEngine::force_resync`].

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use brook_core::records::{SpendRef, UtxoRecord};
use brook_core::traits::CryptoProvider;
use brook_core::types::{BlockData, Hash256, OutPoint, RawBlock, Transaction};

use crate::address_book::AddressBook;
use crate::error::WalletError;
use crate::retry::LedgerClient;
use crate::utxo_store::{Upsert, UtxoStore};

/// Blocks fetched and decoded per step of a pull-mode sync.
const DEFAULT_SYNC_BATCH: u64 = 100;

/// Sync state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    /// Waiting for notifications.
    #[default]
    Idle,
    /// Applying blocks.
    Syncing,
    /// The new chain does not extend the tracked tip.
    ReorgDetected {
        /// Height of the last block shared by both chains.
        common_ancestor: u64,
    },
    /// Reverting the store to the common ancestor.
    RollingBack {
        /// Rollback target height.
        to: u64,
    },
    /// Local state cannot be reconciled; only a forced resync recovers.
    NeedsResync,
}

/// A best-chain notification: the new tip height and the blocks leading
/// to it, in any order.
#[derive(Debug, Clone, Default)]
pub struct TipUpdate {
    /// New tip height.
    pub height: u64,
    /// New blocks.
    pub blocks: Vec<BlockData>,
}

/// What a sync pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Blocks applied.
    pub applied: usize,
    /// Already-applied blocks skipped.
    pub skipped: usize,
    /// Common ancestor height, if a reorg was handled.
    pub reorg: Option<u64>,
    /// Wallet outputs inserted or updated.
    pub received: usize,
    /// Wallet outputs marked spent.
    pub spent: usize,
}

impl SyncReport {
    fn merge(&mut self, other: SyncReport) {
        self.applied += other.applied;
        self.skipped += other.skipped;
        self.reorg = self.reorg.or(other.reorg);
        self.received += other.received;
        self.spent += other.spent;
    }
}

/// Mutable account state a sync pass works on.
pub struct SyncContext<'a> {
    /// Address classification and gap tracking.
    pub book: &'a mut AddressBook,
    /// Output set.
    pub store: &'a mut UtxoStore,
    /// Crypto capability, for decoding and unblinding.
    pub crypto: &'a dyn CryptoProvider,
}

/// Per-account chain follower.
#[derive(Debug)]
pub struct BlockSyncEngine {
    state: SyncState,
    tracked: BTreeMap<u64, Hash256>,
    max_depth: u64,
    birth_height: u64,
    batch: u64,
}

impl BlockSyncEngine {
    /// A fresh engine with no tracked blocks.
    pub fn new(max_depth: u64, birth_height: u64) -> Self {
        Self {
            state: SyncState::Idle,
            tracked: BTreeMap::new(),
            max_depth: max_depth.max(1),
            birth_height,
            batch: DEFAULT_SYNC_BATCH,
        }
    }

    /// Fetch at most `batch` blocks per step in pull mode.
    pub fn with_batch_size(mut self, batch: u64) -> Self {
        self.batch = batch.max(1);
        self
    }

    fn ensure_reconciled(&self) -> Result<(), WalletError> {
        if self.state == SyncState::NeedsResync {
            return Err(WalletError::ReorgRollbackFailed(
                "previous reorg could not be reconciled; resync required".into(),
            ));
        }
        Ok(())
    }

    /// Current state.
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Last applied block, if any.
    pub fn tip(&self) -> Option<(u64, Hash256)> {
        self.tracked.last_key_value().map(|(h, hash)| (*h, *hash))
    }

    /// Last applied height, or the block before the birth height.
    pub fn tip_height(&self) -> u64 {
        self.tip()
            .map_or(self.birth_height.saturating_sub(1), |(h, _)| h)
    }

    /// Tracked `(height, hash)` pairs, for persistence.
    pub fn tracked(&self) -> Vec<(u64, Hash256)> {
        self.tracked.iter().map(|(h, hash)| (*h, *hash)).collect()
    }

    /// Restore tracked blocks from persistence.
    pub fn restore(&mut self, tracked: impl IntoIterator<Item = (u64, Hash256)>) {
        self.tracked = tracked.into_iter().collect();
        self.state = SyncState::Idle;
    }

    // --- Push mode ---

    /// Apply a best-chain notification.
    pub async fn on_new_tip(
        &mut self,
        ctx: &mut SyncContext<'_>,
        ledger: &LedgerClient,
        mut update: TipUpdate,
    ) -> Result<SyncReport, WalletError> {
        self.ensure_reconciled()?;
        update.blocks.sort_by_key(|b| b.height);
        let mut report = SyncReport::default();
        for block in update.blocks {
            match self.connect(ctx, ledger, block).await {
                Ok(r) => report.merge(r),
                Err(e) => {
                    if matches!(e, WalletError::ReorgRollbackFailed(_)) {
                        self.state = SyncState::NeedsResync;
                    } else {
                        self.state = SyncState::Idle;
                    }
                    return Err(e);
                }
            }
        }
        self.state = SyncState::Idle;
        if report.applied > 0 {
            info!(
                tip = self.tip_height(),
                applied = report.applied,
                received = report.received,
                spent = report.spent,
                "synced"
            );
        }
        Ok(report)
    }

    async fn connect(
        &mut self,
        ctx: &mut SyncContext<'_>,
        ledger: &LedgerClient,
        block: BlockData,
    ) -> Result<SyncReport, WalletError> {
        if self.tracked.get(&block.height) == Some(&block.hash) {
            debug!(height = block.height, hash = %block.hash, "block already applied");
            return Ok(SyncReport {
                skipped: 1,
                ..Default::default()
            });
        }
        if block.height < self.birth_height {
            return Ok(SyncReport {
                skipped: 1,
                ..Default::default()
            });
        }

        let Some((tip, _)) = self.tip() else {
            return Ok(self.apply_block(ctx, &block));
        };
        let lowest = self.tracked.first_key_value().map_or(0, |(h, _)| *h);
        if block.height < lowest {
            debug!(height = block.height, lowest, "stale block below tracked window");
            return Ok(SyncReport {
                skipped: 1,
                ..Default::default()
            });
        }
        if block.height > tip && self.tracked.get(&(block.height - 1)) == Some(&block.prev_hash) {
            return Ok(self.apply_block(ctx, &block));
        }

        let (ancestor, branch) = self.find_fork(ctx, ledger, block).await?;
        let mut report = SyncReport::default();
        if ancestor < tip {
            self.state = SyncState::ReorgDetected {
                common_ancestor: ancestor,
            };
            warn!(tip, common_ancestor = ancestor, "reorg detected");
            self.rollback(ctx, ancestor);
            report.reorg = Some(ancestor);
        }
        for b in &branch {
            report.merge(self.apply_block(ctx, b));
        }
        Ok(report)
    }

    /// Walk back from `block` through the ledger to the highest tracked
    /// ancestor. Returns its height and the blocks above it, ascending.
    async fn find_fork(
        &self,
        ctx: &SyncContext<'_>,
        ledger: &LedgerClient,
        block: BlockData,
    ) -> Result<(u64, Vec<BlockData>), WalletError> {
        let lowest = self.tracked.first_key_value().map_or(0, |(h, _)| *h);
        let mut height = block.height;
        let mut parent = block.prev_hash;
        let mut branch = vec![block];
        loop {
            if height == 0 || height - 1 < lowest {
                return Err(WalletError::ReorgRollbackFailed(format!(
                    "no common ancestor within {} tracked blocks",
                    self.tracked.len()
                )));
            }
            let below = height - 1;
            if self.tracked.get(&below) == Some(&parent) {
                branch.reverse();
                return Ok((below, branch));
            }
            let raw = ledger.get_block(&parent).await?;
            let fetched = decode_block(ctx.crypto, ctx.book, raw)?;
            if fetched.height != below {
                return Err(WalletError::ReorgRollbackFailed(format!(
                    "ledger returned block {} at height {}, expected {below}",
                    fetched.hash, fetched.height
                )));
            }
            parent = fetched.prev_hash;
            height = below;
            branch.push(fetched);
        }
    }

    fn rollback(&mut self, ctx: &mut SyncContext<'_>, to: u64) {
        self.state = SyncState::RollingBack { to };
        let (removed, unspent) = ctx.store.rollback_to_height(to);
        self.tracked.split_off(&(to + 1));
        info!(to, removed, unspent, "rolled back");
        self.state = SyncState::Syncing;
    }

    /// Apply one block, transactions in block order.
    fn apply_block(&mut self, ctx: &mut SyncContext<'_>, block: &BlockData) -> SyncReport {
        self.state = SyncState::Syncing;
        let mut report = SyncReport {
            applied: 1,
            ..Default::default()
        };
        for tx in &block.transactions {
            let (received, spent) = apply_transaction(ctx, tx, Some((block.height, block.hash)));
            report.received += received;
            report.spent += spent;
        }
        self.tracked.insert(block.height, block.hash);
        while self.tracked.len() as u64 > self.max_depth {
            self.tracked.pop_first();
        }
        debug!(height = block.height, hash = %block.hash, received = report.received, spent = report.spent, "applied block");
        report
    }

    // --- Pull mode ---

    /// Fetch and apply every block between the tracked tip and the ledger's
    /// best chain, a bounded batch at a time. A replaced tip block is
    /// detected and handled as a reorg. Batches applied before a failure
    /// stay applied.
    pub async fn sync_from_ledger(
        &mut self,
        ctx: &mut SyncContext<'_>,
        ledger: &LedgerClient,
    ) -> Result<SyncReport, WalletError> {
        self.ensure_reconciled()?;
        let best = ledger.get_block_count().await?;
        let start = match self.tip() {
            None => self.birth_height,
            Some((tip, hash)) => {
                let replaced = tip <= best && ledger.get_block_hash(tip).await? != hash;
                if replaced { tip } else { tip + 1 }
            }
        };
        let mut report = SyncReport::default();
        let mut from = start;
        while from <= best {
            let to = best.min(from.saturating_add(self.batch - 1));
            let mut blocks = Vec::with_capacity((to - from + 1) as usize);
            for height in from..=to {
                let hash = ledger.get_block_hash(height).await?;
                let raw = ledger.get_block(&hash).await?;
                blocks.push(decode_block(ctx.crypto, ctx.book, raw)?);
            }
            report.merge(self.on_new_tip(ctx, ledger, TipUpdate { height: to, blocks }).await?);
            from = to + 1;
        }
        Ok(report)
    }

    /// Discard all local chain state and rescan from the birth height.
    pub async fn force_resync(
        &mut self,
        ctx: &mut SyncContext<'_>,
        ledger: &LedgerClient,
    ) -> Result<SyncReport, WalletError> {
        info!(birth_height = self.birth_height, "forced resync");
        ctx.store.clear();
        self.tracked.clear();
        self.state = SyncState::Idle;
        let report = self.sync_from_ledger(ctx, ledger).await?;
        info!(tip = self.tip_height(), received = report.received, "resync finished");
        Ok(report)
    }
}

/// Apply one transaction: spends of tracked outputs first, then outputs
/// paying to known scripts. `block` is `None` for a mempool transaction,
/// whose spends and outputs stay unconfirmed. Returns `(received, spent)`.
pub fn apply_transaction(
    ctx: &mut SyncContext<'_>,
    tx: &Transaction,
    block: Option<(u64, Hash256)>,
) -> (usize, usize) {
    let txid = tx.txid();
    let coinbase = tx.is_coinbase();
    let height = block.map(|(h, _)| h);
    let (mut received, mut spent) = (0, 0);
    if !coinbase {
        for op in tx.spent_outpoints() {
            let by = SpendRef { txid, height };
            if ctx.store.get(op).is_some() && matches!(ctx.store.mark_spent(op, by), Ok(true)) {
                spent += 1;
            }
        }
    }
    for (vout, output) in tx.outputs.iter().enumerate() {
        if output.is_fee() {
            continue;
        }
        let Some(address) = ctx.book.classify(&output.script_pubkey).cloned() else {
            continue;
        };
        let (amount, asset, blinders) = match (output.value.explicit(), output.asset.explicit()) {
            (Some(amount), Some(asset)) => (amount, asset, None),
            _ => match ctx.crypto.unblind_output(output, &address.locking_script) {
                Ok(u) => (u.amount, u.asset, Some(u.blinders)),
                Err(e) => {
                    warn!(%txid, vout, error = %e, "cannot unblind wallet output");
                    continue;
                }
            },
        };
        let record = UtxoRecord {
            outpoint: OutPoint::new(txid, vout as u32),
            address: address.address.clone(),
            amount,
            asset,
            blinders,
            block_hash: block.map(|(_, hash)| hash),
            block_height: height,
            coinbase,
            spent: false,
            locked: false,
            solvable: address.is_solvable(),
            descriptor: address.descriptor.clone(),
            locking_script: address.locking_script.clone(),
            path: address.path,
            address_type: address.address_type,
            extend: Default::default(),
            first_seen_height: None,
            spent_by: None,
            seen_seq: 0,
        };
        if ctx.store.upsert(record) != Upsert::Unchanged {
            received += 1;
        }
        if let Err(e) = ctx.book.mark_used(ctx.crypto, &address.address) {
            warn!(address = %address.address, error = %e, "gap top-up failed");
        }
    }
    (received, spent)
}

/// Decode a ledger block with the account's ledger kind.
pub fn decode_block(
    crypto: &dyn CryptoProvider,
    book: &AddressBook,
    raw: RawBlock,
) -> Result<BlockData, WalletError> {
    let kind = book.network().ledger_kind();
    let transactions = raw
        .tx_hex
        .iter()
        .map(|hex| crypto.decode_transaction(hex, kind))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(BlockData {
        hash: raw.hash,
        height: raw.height,
        prev_hash: raw.prev_hash,
        transactions,
    })
}
