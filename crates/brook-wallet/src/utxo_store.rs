//! The account's set of known outputs and their spend / lock lifecycle.
//!
//! The store is the only writer of [`UtxoRecord`] state. Records are keyed by
//! outpoint; `spent` is terminal except through [`UtxoStore::rollback_to_height`]
//! (block spends above the rollback height) and
//! [`UtxoStore::reconcile_mempool`] (mempool spends whose transaction left
//! the mempool). Locks are in-memory reservations held by pending builds.

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use brook_core::address::DerivationPath;
use brook_core::records::{SpendRef, UtxoRecord};
use brook_core::types::{AssetId, Hash256, OutPoint};

use crate::error::WalletError;

/// Confirmation window for selection and balances.
///
/// Unconfirmed records have zero confirmations: they pass iff
/// `min_conf == 0`, and `max_conf` never excludes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationPolicy {
    /// Minimum confirmations.
    pub min_conf: u64,
    /// Maximum confirmations, if bounded.
    pub max_conf: Option<u64>,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            min_conf: 1,
            max_conf: None,
        }
    }
}

impl ConfirmationPolicy {
    /// At least `min_conf` confirmations, no upper bound.
    pub fn min(min_conf: u64) -> Self {
        Self {
            min_conf,
            max_conf: None,
        }
    }

    /// Whether `record` is eligible at `tip_height`.
    pub fn admits(&self, record: &UtxoRecord, tip_height: u64) -> bool {
        if !record.is_confirmed() {
            return self.min_conf == 0;
        }
        let conf = record.confirmations(tip_height);
        conf >= self.min_conf && self.max_conf.is_none_or(|max| conf <= max)
    }
}

/// Filters for [`UtxoStore::select`]. Unset filters do not restrict.
#[derive(Debug, Clone, Default)]
pub struct SelectCriteria {
    /// Confirmation window.
    pub policy: ConfirmationPolicy,
    /// Restrict to these owning addresses.
    pub addresses: Option<HashSet<String>>,
    /// Restrict to this derivation path.
    pub path: Option<DerivationPath>,
    /// Restrict to this asset.
    pub asset: Option<AssetId>,
    /// Also return locked records.
    pub include_locked: bool,
    /// Only records the wallet can sign for.
    pub solvable_only: bool,
}

/// Outcome of [`UtxoStore::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// New record.
    Inserted,
    /// Existing record changed.
    Updated,
    /// Identical content; nothing changed.
    Unchanged,
}

/// Outputs known to one account.
#[derive(Debug, Default)]
pub struct UtxoStore {
    records: BTreeMap<OutPoint, UtxoRecord>,
    next_seq: u64,
}

impl UtxoStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted records. Locks never survive a reload.
    pub fn restore(records: impl IntoIterator<Item = UtxoRecord>) -> Self {
        let mut store = Self::new();
        for mut record in records {
            record.locked = false;
            store.next_seq = store.next_seq.max(record.seen_seq + 1);
            store.records.insert(record.outpoint, record);
        }
        store
    }

    /// Number of records, spent included.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// A record by outpoint.
    pub fn get(&self, outpoint: &OutPoint) -> Option<&UtxoRecord> {
        self.records.get(outpoint)
    }

    /// All records in outpoint order.
    pub fn iter(&self) -> impl Iterator<Item = &UtxoRecord> {
        self.records.values()
    }

    /// Drop every record.
    pub fn clear(&mut self) {
        self.records.clear();
        self.next_seq = 0;
    }

    // --- Lifecycle ---

    /// Insert or update by outpoint.
    ///
    /// The store keeps ownership of the lifecycle fields: an update keeps
    /// the existing spend state, lock, first-seen height and seen order, and
    /// only refreshes chain position and descriptive fields.
    pub fn upsert(&mut self, mut record: UtxoRecord) -> Upsert {
        match self.records.get_mut(&record.outpoint) {
            Some(existing) => {
                record.seen_seq = existing.seen_seq;
                record.first_seen_height = existing.first_seen_height;
                record.spent = existing.spent;
                record.spent_by = existing.spent_by;
                record.locked = existing.locked;
                if *existing == record {
                    return Upsert::Unchanged;
                }
                *existing = record;
                Upsert::Updated
            }
            None => {
                record.seen_seq = self.next_seq;
                self.next_seq += 1;
                record.first_seen_height = record.block_height;
                record.spent = false;
                record.spent_by = None;
                record.locked = false;
                self.records.insert(record.outpoint, record);
                Upsert::Inserted
            }
        }
    }

    /// Mark `outpoint` spent by `by`. Returns `false` if it was already
    /// spent, except that a mempool spend is upgraded to the block spend
    /// that confirms it.
    pub fn mark_spent(&mut self, outpoint: &OutPoint, by: SpendRef) -> Result<bool, WalletError> {
        let record = self
            .records
            .get_mut(outpoint)
            .ok_or(WalletError::UnknownOutpoint(*outpoint))?;
        if record.spent {
            let from_mempool = record.spent_by.is_some_and(|s| s.height.is_none());
            if from_mempool && by.height.is_some() {
                record.spent_by = Some(by);
            }
            return Ok(false);
        }
        record.spent = true;
        record.spent_by = Some(by);
        record.locked = false;
        Ok(true)
    }

    // --- Reservation ---

    /// Reserve `outpoints` for a build, all or nothing.
    pub fn reserve(&mut self, outpoints: &[OutPoint]) -> Result<(), WalletError> {
        let mut seen = HashSet::new();
        for op in outpoints {
            let record = self.records.get(op).ok_or(WalletError::UnknownOutpoint(*op))?;
            if record.spent {
                return Err(WalletError::OutpointSpent(*op));
            }
            if record.locked || !seen.insert(*op) {
                return Err(WalletError::OutpointLocked(*op));
            }
        }
        for op in outpoints {
            if let Some(record) = self.records.get_mut(op) {
                record.locked = true;
            }
        }
        debug!(count = outpoints.len(), "reserved outpoints");
        Ok(())
    }

    /// Lock a single unspent outpoint. Idempotent.
    pub fn lock(&mut self, outpoint: &OutPoint) -> Result<(), WalletError> {
        let record = self
            .records
            .get_mut(outpoint)
            .ok_or(WalletError::UnknownOutpoint(*outpoint))?;
        if record.spent {
            return Err(WalletError::OutpointSpent(*outpoint));
        }
        record.locked = true;
        Ok(())
    }

    /// Unlock a single outpoint. Idempotent.
    pub fn unlock(&mut self, outpoint: &OutPoint) -> Result<(), WalletError> {
        let record = self
            .records
            .get_mut(outpoint)
            .ok_or(WalletError::UnknownOutpoint(*outpoint))?;
        record.locked = false;
        Ok(())
    }

    /// Unlock every outpoint in `outpoints` that is still tracked.
    pub fn release(&mut self, outpoints: &[OutPoint]) {
        for op in outpoints {
            if let Some(record) = self.records.get_mut(op) {
                record.locked = false;
            }
        }
        debug!(count = outpoints.len(), "released outpoints");
    }

    // --- Queries ---

    /// Unspent, mature records matching `criteria`, oldest first: by
    /// confirming height (unconfirmed last), then seen order.
    pub fn select(&self, criteria: &SelectCriteria, tip_height: u64) -> Vec<&UtxoRecord> {
        let mut out: Vec<&UtxoRecord> = self
            .records
            .values()
            .filter(|r| !r.spent)
            .filter(|r| criteria.include_locked || !r.locked)
            .filter(|r| !criteria.solvable_only || r.solvable)
            .filter(|r| r.is_mature(tip_height))
            .filter(|r| criteria.policy.admits(r, tip_height))
            .filter(|r| criteria.asset.is_none_or(|a| r.asset == a))
            .filter(|r| criteria.path.is_none_or(|p| r.path == Some(p)))
            .filter(|r| {
                criteria
                    .addresses
                    .as_ref()
                    .is_none_or(|set| set.contains(&r.address))
            })
            .collect();
        out.sort_by_key(|r| (r.block_height.unwrap_or(u64::MAX), r.seen_seq, r.outpoint));
        out
    }

    /// Unspent records not yet in a block.
    pub fn mempool_count(&self) -> usize {
        self.records
            .values()
            .filter(|r| !r.spent && !r.is_confirmed())
            .count()
    }

    /// Distinct confirming block hashes of unspent records, by height.
    pub fn block_ids(&self) -> Vec<Hash256> {
        let mut blocks: Vec<(u64, Hash256)> = self
            .records
            .values()
            .filter(|r| !r.spent)
            .filter_map(|r| Some((r.block_height?, r.block_hash?)))
            .collect();
        blocks.sort();
        blocks.dedup();
        blocks.into_iter().map(|(_, hash)| hash).collect()
    }

    // --- Rollback ---

    /// Undo every effect of blocks above `height`:
    /// - records first seen in such a block are removed;
    /// - records confirmed above `height` but first seen in the mempool
    ///   return to unconfirmed;
    /// - spends recorded in such a block are reverted.
    ///
    /// Returns `(removed, unspent)` counts.
    pub fn rollback_to_height(&mut self, height: u64) -> (usize, usize) {
        let before = self.records.len();
        self.records
            .retain(|_, r| r.first_seen_height.is_none_or(|h| h <= height));
        let removed = before - self.records.len();

        let mut unspent = 0;
        for record in self.records.values_mut() {
            if record.block_height.is_some_and(|h| h > height) {
                record.block_height = None;
                record.block_hash = None;
            }
            let spent_above = record
                .spent_by
                .and_then(|s| s.height)
                .is_some_and(|h| h > height);
            if spent_above {
                record.spent = false;
                record.spent_by = None;
                unspent += 1;
            }
        }
        debug!(height, removed, unspent, "rolled back utxo store");
        (removed, unspent)
    }

    /// Drop unconfirmed records and revert mempool spends whose transaction
    /// is no longer in `mempool`. Returns `(evicted, unspent)` counts.
    pub fn reconcile_mempool(&mut self, mempool: &HashSet<Hash256>) -> (usize, usize) {
        let before = self.records.len();
        self.records
            .retain(|op, r| r.is_confirmed() || mempool.contains(&op.txid));
        let evicted = before - self.records.len();

        let mut unspent = 0;
        for record in self.records.values_mut() {
            let dropped = matches!(
                record.spent_by,
                Some(SpendRef { txid, height: None }) if !mempool.contains(&txid)
            );
            if dropped {
                record.spent = false;
                record.spent_by = None;
                unspent += 1;
            }
        }
        (evicted, unspent)
    }
}
