//! Transaction construction: pending builds, input reservation and funding.
//!
//! A [`PendingBuild`] exists from `create` (or `adopt`) until it is
//! broadcast or discarded. Every tracked outpoint it spends is locked in the
//! UTXO store for that whole time, so no concurrent build can select it.
//! Funding computes the full transaction (coin selection, change, fee
//! output, blinding) before taking any new lock, so a failed fund leaves
//! the store untouched.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use brook_core::address::{AddressRequest, Chain};
use brook_core::constants::{FEE_OUTPUT_VSIZE, SEQUENCE_FINAL, SEQUENCE_RBF, TX_OVERHEAD_VSIZE};
use brook_core::network::{LedgerKind, Network};
use brook_core::records::UtxoRecord;
use brook_core::traits::CryptoProvider;
use brook_core::types::{AssetId, OutPoint, Transaction, TxIn, TxOut};

use crate::address_book::AddressBook;
use crate::coin_selection::{CoinSelector, FeeParams, SelectionRequest};
use crate::error::WalletError;
use crate::utxo_store::{ConfirmationPolicy, SelectCriteria, UtxoStore};

/// Identifier of a pending build.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BuildId(pub u64);

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A payment output.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    /// Destination address, plain or confidential.
    pub address: String,
    /// Amount in minor units.
    pub amount: u64,
    /// Asset; the network's policy asset if unset.
    pub asset: Option<AssetId>,
}

/// An explicitly chosen input.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSpec {
    /// Outpoint to spend.
    pub outpoint: OutPoint,
    /// Sequence number; derived from `replaceable` if unset.
    pub sequence: Option<u32>,
}

/// Arguments of `create`.
#[derive(Debug, Clone, Default)]
pub struct CreateRequest {
    /// Transaction version.
    pub version: u32,
    /// Lock time.
    pub lock_time: u32,
    /// Inputs; may be empty and left to funding.
    pub inputs: Vec<InputSpec>,
    /// Payment outputs.
    pub outputs: Vec<Recipient>,
    /// Signal replaceability through input sequences.
    pub replaceable: bool,
    /// Explicit fee output, asset-extended ledger only.
    pub fee: Option<(AssetId, u64)>,
}

/// Arguments of `fund`.
#[derive(Debug, Clone, Default)]
pub struct FundOptions {
    /// Asset to pay the fee in.
    pub fee_asset: Option<AssetId>,
    /// Fee rate per 1000 vbytes; raised to the account minimum.
    pub fee_rate: Option<u64>,
    /// Address type for change outputs.
    pub change_type: AddressRequest,
}

/// Outcome of `fund`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundOutcome {
    /// Fee paid.
    pub fee: u64,
    /// Fee asset.
    pub fee_asset: AssetId,
    /// Output positions of change outputs.
    pub change_positions: Vec<usize>,
    /// Estimated virtual size.
    pub vsize: u64,
}

/// An in-flight transaction candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingBuild {
    /// Build identifier.
    pub id: BuildId,
    /// Current transaction: unsigned, funded, or signed.
    pub tx: Transaction,
    /// Outpoints locked by this build.
    pub locked: Vec<OutPoint>,
    /// Per-output blinding key, for outputs to confidential destinations.
    pub blinding_keys: Vec<Option<Vec<u8>>>,
    /// Sequence for inputs added by funding.
    pub sequence: u32,
    /// Fee paid, once known.
    pub fee: Option<u64>,
    /// Fee asset.
    pub fee_asset: AssetId,
    /// Whether funding ran.
    pub funded: bool,
}

/// Account state and policy a build operation works with.
pub struct BuildContext<'a> {
    /// Output set; locks are taken here.
    pub store: &'a mut UtxoStore,
    /// Change address source.
    pub book: &'a mut AddressBook,
    /// Crypto capability.
    pub crypto: &'a dyn CryptoProvider,
    /// Current tip height.
    pub tip_height: u64,
    /// Account minimum fee rate.
    pub min_fee_rate: u64,
    /// Relay dust threshold.
    pub dust_threshold: u64,
    /// Minimum confirmations for funding candidates.
    pub min_conf: u64,
}

impl BuildContext<'_> {
    fn network(&self) -> Network {
        self.book.network()
    }

    fn ledger(&self) -> LedgerKind {
        self.network().ledger_kind()
    }
}

/// Pending builds of one account.
#[derive(Debug, Default)]
pub struct TransactionBuilder {
    pending: BTreeMap<BuildId, PendingBuild>,
    next_id: u64,
}

impl TransactionBuilder {
    /// No pending builds.
    pub fn new() -> Self {
        Self::default()
    }

    fn issue_id(&mut self) -> BuildId {
        let id = BuildId(self.next_id);
        self.next_id += 1;
        id
    }

    /// A pending build.
    pub fn get(&self, id: BuildId) -> Result<&PendingBuild, WalletError> {
        self.pending.get(&id).ok_or(WalletError::UnknownBuild(id))
    }

    /// Replace a build's transaction, keeping its locks.
    pub fn set_tx(&mut self, id: BuildId, tx: Transaction) -> Result<(), WalletError> {
        let build = self.pending.get_mut(&id).ok_or(WalletError::UnknownBuild(id))?;
        build.tx = tx;
        Ok(())
    }

    /// Number of pending builds.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no build is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// The build spending exactly `inputs`, if any.
    pub fn find_by_inputs(&self, inputs: &[OutPoint]) -> Option<BuildId> {
        let mut wanted = inputs.to_vec();
        wanted.sort();
        self.pending
            .values()
            .find(|b| {
                let mut have: Vec<OutPoint> = b.tx.spent_outpoints().copied().collect();
                have.sort();
                have == wanted
            })
            .map(|b| b.id)
    }

    // --- Create ---

    /// Assemble an unfunded transaction and lock its tracked inputs.
    ///
    /// Inputs the wallet does not track are accepted unlocked, for signing
    /// with caller-supplied previous outputs.
    pub fn create(&mut self, ctx: &mut BuildContext<'_>, request: CreateRequest) -> Result<BuildId, WalletError> {
        let network = ctx.network();
        let policy_asset = network.policy_asset();
        let confidential = network.ledger_kind().is_confidential();
        let sequence = if request.replaceable {
            SEQUENCE_RBF
        } else {
            SEQUENCE_FINAL
        };

        let mut outputs = Vec::with_capacity(request.outputs.len() + 1);
        let mut blinding_keys = Vec::with_capacity(request.outputs.len() + 1);
        for (index, recipient) in request.outputs.iter().enumerate() {
            let parsed = ctx.crypto.parse_address(&recipient.address, network)?;
            let asset = recipient.asset.unwrap_or(policy_asset);
            check_amount(index, recipient.amount, asset, policy_asset, ctx.dust_threshold)?;
            if !confidential && asset != policy_asset {
                return Err(WalletError::InvalidBuild(format!(
                    "output {index}: asset {asset} on a single-asset ledger"
                )));
            }
            outputs.push(TxOut::explicit(asset, recipient.amount, parsed.locking_script));
            blinding_keys.push(parsed.blinding_pubkey);
        }
        let fee_asset = match request.fee {
            Some((asset, amount)) if confidential => {
                outputs.push(TxOut::fee(asset, amount));
                blinding_keys.push(None);
                asset
            }
            Some(_) => {
                return Err(WalletError::InvalidBuild(
                    "an explicit fee output needs the asset-extended ledger".into(),
                ));
            }
            None => policy_asset,
        };
        if outputs.is_empty() {
            return Err(WalletError::InvalidBuild("no outputs".into()));
        }

        let inputs: Vec<TxIn> = request
            .inputs
            .iter()
            .map(|i| TxIn::unsigned(i.outpoint, i.sequence.unwrap_or(sequence)))
            .collect();
        let locked = reserve_tracked(ctx.store, inputs.iter().map(|i| i.previous_output))?;

        let id = self.issue_id();
        let tx = Transaction {
            version: request.version,
            lock_time: request.lock_time,
            inputs,
            outputs,
        };
        debug!(build = %id, inputs = tx.inputs.len(), outputs = tx.outputs.len(), locked = locked.len(), "created build");
        self.pending.insert(
            id,
            PendingBuild {
                id,
                tx,
                locked,
                blinding_keys,
                sequence,
                fee: request.fee.map(|(_, amount)| amount),
                fee_asset,
                funded: false,
            },
        );
        Ok(id)
    }

    /// Track a transaction built elsewhere. Its tracked inputs are locked.
    pub fn adopt(&mut self, store: &mut UtxoStore, tx: Transaction) -> Result<BuildId, WalletError> {
        let locked = reserve_tracked(store, tx.spent_outpoints().copied())?;
        let fee_output = tx.outputs.iter().find(|o| o.is_fee());
        let fee = fee_output.and_then(|o| o.value.explicit());
        let fee_asset = fee_output
            .and_then(|o| o.asset.explicit())
            .unwrap_or(AssetId::DEFAULT);
        let sequence = tx.inputs.first().map_or(SEQUENCE_FINAL, |i| i.sequence);
        let id = self.issue_id();
        debug!(build = %id, locked = locked.len(), "adopted transaction");
        self.pending.insert(
            id,
            PendingBuild {
                id,
                blinding_keys: vec![None; tx.outputs.len()],
                tx,
                locked,
                sequence,
                fee,
                fee_asset,
                funded: false,
            },
        );
        Ok(id)
    }

    // --- Fund ---

    /// Add inputs, change and fee so the build pays for itself.
    pub fn fund(
        &mut self,
        ctx: &mut BuildContext<'_>,
        id: BuildId,
        options: &FundOptions,
    ) -> Result<FundOutcome, WalletError> {
        let build = self.pending.get(&id).ok_or(WalletError::UnknownBuild(id))?;
        if build.funded {
            return Err(WalletError::InvalidBuild(format!("build {id} is already funded")));
        }
        if build.tx.inputs.iter().any(TxIn::is_signed) {
            return Err(WalletError::InvalidBuild(format!("build {id} is already signed")));
        }
        let network = ctx.network();
        let ledger = ctx.ledger();
        let confidential = ledger.is_confidential();
        let fee_asset = options
            .fee_asset
            .unwrap_or(if build.fee.is_some() { build.fee_asset } else { network.policy_asset() });
        if !confidential && fee_asset != network.policy_asset() {
            return Err(WalletError::InvalidBuild(format!(
                "fee asset {fee_asset} on a single-asset ledger"
            )));
        }

        // Payment outputs, without any fee output.
        let mut outputs: Vec<TxOut> = Vec::new();
        let mut keys: Vec<Option<Vec<u8>>> = Vec::new();
        for (output, key) in build.tx.outputs.iter().zip(&build.blinding_keys) {
            if !output.is_fee() {
                outputs.push(output.clone());
                keys.push(key.clone());
            }
        }
        let mut targets: BTreeMap<AssetId, u64> = BTreeMap::new();
        for (index, output) in outputs.iter().enumerate() {
            let (Some(amount), Some(asset)) = (output.value.explicit(), output.asset.explicit()) else {
                return Err(WalletError::InvalidBuild(format!("output {index} is already blinded")));
            };
            let total = targets.entry(asset).or_default();
            *total = total
                .checked_add(amount)
                .ok_or_else(|| WalletError::InvalidAmount("output total overflows".into()))?;
        }

        let mut preselected: Vec<&UtxoRecord> = Vec::new();
        for op in build.tx.spent_outpoints() {
            let record = ctx.store.get(op).ok_or_else(|| {
                WalletError::InvalidBuild(format!("input {op} is not tracked by the wallet"))
            })?;
            preselected.push(record);
        }

        let blind = confidential && keys.iter().any(Option::is_some);
        let params = FeeParams {
            fee_rate: options.fee_rate.unwrap_or(ctx.min_fee_rate).max(ctx.min_fee_rate),
            dust_threshold: ctx.dust_threshold,
            fee_asset,
            ledger,
            blind_change: blind,
        };
        let mut base_vsize = TX_OVERHEAD_VSIZE;
        for key in &keys {
            base_vsize += params.output_vsize(key.is_some());
        }
        if confidential {
            base_vsize += FEE_OUTPUT_VSIZE;
        }
        for r in &preselected {
            base_vsize += ctx.crypto.estimate_input_size(r);
        }

        let criteria = SelectCriteria {
            policy: ConfirmationPolicy::min(ctx.min_conf),
            solvable_only: true,
            ..Default::default()
        };
        let candidates = ctx.store.select(&criteria, ctx.tip_height);
        let request = SelectionRequest {
            candidates: &candidates,
            preselected: &preselected,
            targets: &targets,
            base_vsize,
        };
        let crypto = ctx.crypto;
        let selection = CoinSelector::select(&request, &params, |r| crypto.estimate_input_size(r))?;
        let new_inputs: Vec<OutPoint> = selection.selected.iter().map(|r| r.outpoint).collect();

        // Change outputs.
        let mut change_positions = Vec::new();
        for (&asset, &amount) in &selection.change {
            let change = ctx
                .book
                .derive_next(ctx.crypto, options.change_type, Chain::Change, "")?;
            change_positions.push(outputs.len());
            outputs.push(TxOut::explicit(asset, amount, change.locking_script));
            keys.push(if blind { change.blinding_pubkey } else { None });
        }
        if confidential {
            outputs.push(TxOut::fee(fee_asset, selection.fee));
            keys.push(None);
        }

        let mut tx = build.tx.clone();
        tx.inputs
            .extend(new_inputs.iter().map(|op| TxIn::unsigned(*op, build.sequence)));
        tx.outputs = outputs;
        if blind {
            tx = ctx.crypto.blind_outputs(&tx, &keys)?;
        }

        ctx.store.reserve(&new_inputs)?;
        let build = self.pending.get_mut(&id).ok_or(WalletError::UnknownBuild(id))?;
        build.tx = tx;
        build.blinding_keys = keys;
        build.locked.extend(new_inputs.iter().copied());
        build.fee = Some(selection.fee);
        build.fee_asset = fee_asset;
        build.funded = true;
        info!(
            build = %id,
            added_inputs = new_inputs.len(),
            fee = selection.fee,
            vsize = selection.vsize,
            "funded build"
        );
        Ok(FundOutcome {
            fee: selection.fee,
            fee_asset,
            change_positions,
            vsize: selection.vsize,
        })
    }

    // --- Release ---

    /// Cancel a build and release its locks.
    pub fn discard(&mut self, store: &mut UtxoStore, id: BuildId) -> Result<PendingBuild, WalletError> {
        let build = self.pending.remove(&id).ok_or(WalletError::UnknownBuild(id))?;
        store.release(&build.locked);
        info!(build = %id, released = build.locked.len(), "discarded build");
        Ok(build)
    }

    /// Retire a broadcast build. Its inputs are spent, not released.
    pub fn complete(&mut self, id: BuildId) -> Result<PendingBuild, WalletError> {
        self.pending.remove(&id).ok_or(WalletError::UnknownBuild(id))
    }

    /// Discard every build.
    pub fn discard_all(&mut self, store: &mut UtxoStore) -> usize {
        let ids: Vec<BuildId> = self.pending.keys().copied().collect();
        for id in &ids {
            if let Some(build) = self.pending.remove(id) {
                store.release(&build.locked);
            }
        }
        ids.len()
    }
}

fn check_amount(
    index: usize,
    amount: u64,
    asset: AssetId,
    policy_asset: AssetId,
    dust_threshold: u64,
) -> Result<(), WalletError> {
    if amount == 0 {
        return Err(WalletError::InvalidAmount(format!("output {index} amount is zero")));
    }
    if asset == policy_asset && amount < dust_threshold {
        return Err(WalletError::DustOutput {
            index,
            amount,
            threshold: dust_threshold,
        });
    }
    Ok(())
}

fn reserve_tracked(
    store: &mut UtxoStore,
    outpoints: impl Iterator<Item = OutPoint>,
) -> Result<Vec<OutPoint>, WalletError> {
    let tracked: Vec<OutPoint> = outpoints.filter(|op| store.get(op).is_some()).collect();
    store.reserve(&tracked)?;
    Ok(tracked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use brook_core::address::AddressType;
    use brook_core::types::Hash256;
    use brook_crypto::{Seed, SoftwareCrypto};

    struct Fixture {
        crypto: SoftwareCrypto,
        book: AddressBook,
        store: UtxoStore,
        builder: TransactionBuilder,
    }

    impl Fixture {
        fn new(network: Network) -> Self {
            let crypto = SoftwareCrypto::new(Seed::from_bytes([8; 32]));
            let mut book = AddressBook::new(network, 0, 2, AddressType::P2wpkh).unwrap();
            book.top_up(&crypto).unwrap();
            Self {
                crypto,
                book,
                store: UtxoStore::new(),
                builder: TransactionBuilder::new(),
            }
        }

        fn create(&mut self, request: CreateRequest) -> Result<BuildId, WalletError> {
            let mut ctx = BuildContext {
                store: &mut self.store,
                book: &mut self.book,
                crypto: &self.crypto,
                tip_height: 10,
                min_fee_rate: 1_000,
                dust_threshold: 546,
                min_conf: 1,
            };
            self.builder.create(&mut ctx, request)
        }

        fn fund(&mut self, id: BuildId, options: &FundOptions) -> Result<FundOutcome, WalletError> {
            let mut ctx = BuildContext {
                store: &mut self.store,
                book: &mut self.book,
                crypto: &self.crypto,
                tip_height: 10,
                min_fee_rate: 1_000,
                dust_threshold: 546,
                min_conf: 1,
            };
            self.builder.fund(&mut ctx, id, options)
        }

        fn fund_wallet(&mut self, n: u8, asset: AssetId, amount: u64) -> OutPoint {
            let addr = self
                .book
                .derive_next(&self.crypto, AddressRequest::Default, Chain::Receive, "")
                .unwrap();
            let outpoint = OutPoint::new(Hash256([n; 32]), 0);
            self.store.upsert(UtxoRecord {
                outpoint,
                address: addr.address.clone(),
                amount,
                asset,
                blinders: None,
                block_hash: Some(Hash256([1; 32])),
                block_height: Some(1),
                coinbase: false,
                spent: false,
                locked: false,
                solvable: true,
                descriptor: addr.descriptor.clone(),
                locking_script: addr.locking_script.clone(),
                path: addr.path,
                address_type: addr.address_type,
                extend: Default::default(),
                first_seen_height: None,
                spent_by: None,
                seen_seq: 0,
            });
            outpoint
        }

        fn external(&self, network: Network) -> String {
            let other = SoftwareCrypto::new(Seed::from_bytes([9; 32]));
            let mut book = AddressBook::new(network, 0, 1, AddressType::P2wpkh).unwrap();
            let r = book
                .derive_next(&other, AddressRequest::Default, Chain::Receive, "")
                .unwrap();
            r.confidential_address.unwrap_or(r.address)
        }
    }

    fn pay(address: String, amount: u64) -> CreateRequest {
        CreateRequest {
            version: 2,
            outputs: vec![Recipient {
                address,
                amount,
                asset: None,
            }],
            ..Default::default()
        }
    }

    // --- Create ---

    #[test]
    fn create_locks_explicit_inputs() {
        let mut f = Fixture::new(Network::Regtest);
        let op = f.fund_wallet(1, AssetId::DEFAULT, 10_000);
        let dest = f.external(Network::Regtest);
        let mut req = pay(dest.clone(), 5_000);
        req.inputs = vec![InputSpec {
            outpoint: op,
            sequence: None,
        }];
        let id = f.create(req.clone()).unwrap();
        assert!(f.store.get(&op).unwrap().locked);
        assert_eq!(f.builder.get(id).unwrap().locked, vec![op]);

        assert_eq!(f.create(req), Err(WalletError::OutpointLocked(op)));
    }

    #[test]
    fn create_rejects_dust_and_zero() {
        let mut f = Fixture::new(Network::Regtest);
        let dest = f.external(Network::Regtest);
        assert_eq!(
            f.create(pay(dest.clone(), 100)),
            Err(WalletError::DustOutput {
                index: 0,
                amount: 100,
                threshold: 546
            })
        );
        assert!(matches!(
            f.create(pay(dest, 0)),
            Err(WalletError::InvalidAmount(_))
        ));
        assert!(f.builder.is_empty());
    }

    #[test]
    fn foreign_inputs_are_not_locked() {
        let mut f = Fixture::new(Network::Regtest);
        let dest = f.external(Network::Regtest);
        let foreign = OutPoint::new(Hash256([0x77; 32]), 1);
        let mut req = pay(dest, 5_000);
        req.inputs = vec![InputSpec {
            outpoint: foreign,
            sequence: Some(7),
        }];
        let id = f.create(req).unwrap();
        let b = f.builder.get(id).unwrap();
        assert!(b.locked.is_empty());
        assert_eq!(b.tx.inputs[0].sequence, 7);
    }

    #[test]
    fn fee_output_only_on_asset_ledger() {
        let mut f = Fixture::new(Network::Regtest);
        let dest = f.external(Network::Regtest);
        let mut req = pay(dest, 5_000);
        req.fee = Some((AssetId::DEFAULT, 100));
        assert!(matches!(f.create(req), Err(WalletError::InvalidBuild(_))));
    }

    // --- Fund ---

    #[test]
    fn fund_selects_both_and_adds_change() {
        let mut f = Fixture::new(Network::Regtest);
        let a = f.fund_wallet(1, AssetId::DEFAULT, 50_000);
        let b = f.fund_wallet(2, AssetId::DEFAULT, 30_000);
        let dest = f.external(Network::Regtest);
        let id = f.create(pay(dest, 60_000)).unwrap();
        let out = f.fund(id, &FundOptions::default()).unwrap();

        let build = f.builder.get(id).unwrap();
        assert_eq!(build.locked, vec![a, b]);
        assert_eq!(out.change_positions, vec![1]);
        assert_eq!(build.tx.outputs[1].value.explicit(), Some(80_000 - 60_000 - out.fee));
        assert!(f.store.get(&a).unwrap().locked && f.store.get(&b).unwrap().locked);
        let change = f.book.classify(&build.tx.outputs[1].script_pubkey).unwrap();
        assert_eq!(change.path.unwrap().chain, Chain::Change);

        assert!(matches!(
            f.fund(id, &FundOptions::default()),
            Err(WalletError::InvalidBuild(_))
        ));
    }

    #[test]
    fn failed_fund_takes_no_locks() {
        let mut f = Fixture::new(Network::Regtest);
        let a = f.fund_wallet(1, AssetId::DEFAULT, 1_000);
        let dest = f.external(Network::Regtest);
        let id = f.create(pay(dest, 60_000)).unwrap();
        assert!(matches!(
            f.fund(id, &FundOptions::default()),
            Err(WalletError::InsufficientFunds { .. })
        ));
        assert!(!f.store.get(&a).unwrap().locked);
        f.builder.discard(&mut f.store, id).unwrap();
        assert_eq!(f.builder.get(id), Err(WalletError::UnknownBuild(id)));
    }

    #[test]
    fn fee_rate_never_below_minimum() {
        let mut f = Fixture::new(Network::Regtest);
        f.fund_wallet(1, AssetId::DEFAULT, 100_000);
        let dest = f.external(Network::Regtest);
        let id = f.create(pay(dest, 10_000)).unwrap();
        let options = FundOptions {
            fee_rate: Some(1),
            ..Default::default()
        };
        let out = f.fund(id, &options).unwrap();
        assert_eq!(out.fee, out.vsize);
    }

    #[test]
    fn discard_releases_locks() {
        let mut f = Fixture::new(Network::Regtest);
        let a = f.fund_wallet(1, AssetId::DEFAULT, 50_000);
        let dest = f.external(Network::Regtest);
        let id = f.create(pay(dest, 10_000)).unwrap();
        f.fund(id, &FundOptions::default()).unwrap();
        assert!(f.store.get(&a).unwrap().locked);
        f.builder.discard(&mut f.store, id).unwrap();
        assert!(!f.store.get(&a).unwrap().locked);
    }

    #[test]
    fn confidential_fund_blinds_and_appends_fee_output() {
        let network = Network::LiquidRegtest;
        let mut f = Fixture::new(network);
        f.fund_wallet(1, network.policy_asset(), 1_000_000);
        let dest = f.external(network);
        let id = f.create(pay(dest, 100_000)).unwrap();
        let out = f.fund(id, &FundOptions::default()).unwrap();
        let tx = &f.builder.get(id).unwrap().tx;
        assert_eq!(tx.outputs.len(), 3);
        assert!(tx.outputs[0].is_confidential());
        assert!(tx.outputs[1].is_confidential());
        let fee = tx.outputs.last().unwrap();
        assert!(fee.is_fee());
        assert_eq!(fee.value.explicit(), Some(out.fee));
    }

    #[test]
    fn adopt_locks_tracked_inputs_and_matches_by_inputs() {
        let mut f = Fixture::new(Network::Regtest);
        let a = f.fund_wallet(1, AssetId::DEFAULT, 50_000);
        let tx = Transaction {
            version: 2,
            lock_time: 0,
            inputs: vec![TxIn::unsigned(a, SEQUENCE_FINAL)],
            outputs: vec![TxOut::explicit(AssetId::DEFAULT, 1_000, vec![1; 33])],
        };
        let id = f.builder.adopt(&mut f.store, tx).unwrap();
        assert!(f.store.get(&a).unwrap().locked);
        assert_eq!(f.builder.find_by_inputs(&[a]), Some(id));
        f.builder.complete(id).unwrap();
        assert!(f.builder.is_empty());
    }
}
