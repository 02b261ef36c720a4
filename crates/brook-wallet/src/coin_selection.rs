//! Oldest-first coin selection with per-asset targets.
//!
//! Candidates arrive ordered oldest first (see [`UtxoStore::select`]). Each
//! non-fee asset is covered first and any surplus becomes a change output.
//! The fee asset is covered last, re-estimating the fee after every added
//! input. Its surplus becomes change only when that change, after paying
//! for its own output, is above the dust threshold; otherwise it is added
//! to the fee.
//!
//! [`UtxoStore::select`]: crate::utxo_store::UtxoStore::select

use std::collections::{BTreeMap, HashSet};

use brook_core::constants::{BLINDED_OUTPUT_VSIZE, EXPLICIT_ELEMENTS_OUTPUT_VSIZE, OUTPUT_VSIZE};
use brook_core::network::LedgerKind;
use brook_core::records::UtxoRecord;
use brook_core::types::{AssetId, OutPoint};

use crate::error::WalletError;

/// Fee and output-size parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeParams {
    /// Fee rate in minor units per 1000 virtual bytes.
    pub fee_rate: u64,
    /// Smallest change output worth creating.
    pub dust_threshold: u64,
    /// Asset the fee is paid in.
    pub fee_asset: AssetId,
    /// Ledger kind, for output sizes.
    pub ledger: LedgerKind,
    /// Whether change outputs will be blinded.
    pub blind_change: bool,
}

impl FeeParams {
    /// Fee for `vsize` virtual bytes, rounded up.
    pub fn fee_for(&self, vsize: u64) -> u64 {
        self.fee_rate.saturating_mul(vsize).div_ceil(1000)
    }

    /// Virtual size of one payment or change output.
    pub fn output_vsize(&self, blinded: bool) -> u64 {
        match (self.ledger, blinded) {
            (LedgerKind::Bitcoin, _) => OUTPUT_VSIZE,
            (LedgerKind::Elements, false) => EXPLICIT_ELEMENTS_OUTPUT_VSIZE,
            (LedgerKind::Elements, true) => BLINDED_OUTPUT_VSIZE,
        }
    }

    fn change_vsize(&self) -> u64 {
        self.output_vsize(self.blind_change)
    }
}

/// Result of coin selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinSelection {
    /// Newly selected records, in selection order.
    pub selected: Vec<UtxoRecord>,
    /// Change per asset. Fee-asset change is present only above dust.
    pub change: BTreeMap<AssetId, u64>,
    /// Fee in the fee asset.
    pub fee: u64,
    /// Estimated virtual size of the final transaction.
    pub vsize: u64,
}

/// What to select for.
pub struct SelectionRequest<'a> {
    /// Spendable candidates, oldest first.
    pub candidates: &'a [&'a UtxoRecord],
    /// Inputs already in the transaction, with their known amounts.
    pub preselected: &'a [&'a UtxoRecord],
    /// Output totals per asset, fee output excluded.
    pub targets: &'a BTreeMap<AssetId, u64>,
    /// Virtual size of everything already in the transaction: overhead,
    /// outputs, fee output and preselected inputs.
    pub base_vsize: u64,
}

/// Deterministic coin selector.
pub struct CoinSelector;

impl CoinSelector {
    /// Select inputs covering `request.targets` plus the fee.
    ///
    /// `input_vsize` estimates the spend size of a candidate. For a fixed
    /// candidate list and parameters the result is always the same.
    pub fn select(
        request: &SelectionRequest<'_>,
        params: &FeeParams,
        input_vsize: impl Fn(&UtxoRecord) -> u64,
    ) -> Result<CoinSelection, WalletError> {
        let mut have: BTreeMap<AssetId, u64> = BTreeMap::new();
        let mut used: HashSet<OutPoint> = HashSet::new();
        for r in request.preselected {
            *have.entry(r.asset).or_default() += r.amount;
            used.insert(r.outpoint);
        }

        let mut selected = Vec::new();
        let mut change = BTreeMap::new();
        let mut vsize = request.base_vsize;

        let next_of = |asset: AssetId, used: &mut HashSet<OutPoint>| -> Option<UtxoRecord> {
            let found = request
                .candidates
                .iter()
                .find(|r| r.asset == asset && !used.contains(&r.outpoint))?;
            used.insert(found.outpoint);
            Some((*found).clone())
        };

        // Non-fee assets.
        for (&asset, &target) in request.targets {
            if asset == params.fee_asset {
                continue;
            }
            loop {
                let held = have.get(&asset).copied().unwrap_or(0);
                if held >= target {
                    if held > target {
                        change.insert(asset, held - target);
                        vsize += params.change_vsize();
                    }
                    break;
                }
                let Some(record) = next_of(asset, &mut used) else {
                    return Err(WalletError::InsufficientFunds {
                        asset,
                        have: held,
                        need: target,
                    });
                };
                vsize += input_vsize(&record);
                *have.entry(asset).or_default() += record.amount;
                selected.push(record);
            }
        }

        // Fee asset.
        let fee_asset = params.fee_asset;
        let target = request.targets.get(&fee_asset).copied().unwrap_or(0);
        loop {
            let held = have.get(&fee_asset).copied().unwrap_or(0);
            let fee = params.fee_for(vsize);
            let need = target.saturating_add(fee);
            if held >= need {
                let surplus = held - need;
                let fee = if surplus == 0 {
                    fee
                } else {
                    let with_change = params.fee_for(vsize + params.change_vsize());
                    let remainder = held.saturating_sub(target.saturating_add(with_change));
                    if remainder > params.dust_threshold {
                        change.insert(fee_asset, remainder);
                        vsize += params.change_vsize();
                        with_change
                    } else {
                        fee + surplus
                    }
                };
                return Ok(CoinSelection {
                    selected,
                    change,
                    fee,
                    vsize,
                });
            }
            let Some(record) = next_of(fee_asset, &mut used) else {
                return Err(WalletError::InsufficientFunds {
                    asset: fee_asset,
                    have: held,
                    need,
                });
            };
            vsize += input_vsize(&record);
            *have.entry(fee_asset).or_default() += record.amount;
            selected.push(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brook_core::address::AddressType;
    use brook_core::types::Hash256;

    const INPUT: u64 = 68;

    fn make_utxo(n: u8, asset: AssetId, amount: u64) -> UtxoRecord {
        UtxoRecord {
            outpoint: OutPoint::new(Hash256([n; 32]), 0),
            address: "a".into(),
            amount,
            asset,
            blinders: None,
            block_hash: Some(Hash256([1; 32])),
            block_height: Some(1),
            coinbase: false,
            spent: false,
            locked: false,
            solvable: true,
            descriptor: String::new(),
            locking_script: vec![n],
            path: None,
            address_type: AddressType::P2wpkh,
            extend: Default::default(),
            first_seen_height: Some(1),
            spent_by: None,
            seen_seq: n as u64,
        }
    }

    fn bitcoin_params(fee_rate: u64) -> FeeParams {
        FeeParams {
            fee_rate,
            dust_threshold: 546,
            fee_asset: AssetId::DEFAULT,
            ledger: LedgerKind::Bitcoin,
            blind_change: false,
        }
    }

    fn run(
        utxos: &[UtxoRecord],
        targets: &BTreeMap<AssetId, u64>,
        params: &FeeParams,
    ) -> Result<CoinSelection, WalletError> {
        let candidates: Vec<&UtxoRecord> = utxos.iter().collect();
        let request = SelectionRequest {
            candidates: &candidates,
            preselected: &[],
            targets,
            base_vsize: 11 + OUTPUT_VSIZE,
        };
        CoinSelector::select(&request, params, |_| INPUT)
    }

    // --- Basic selection ---

    #[test]
    fn selects_oldest_first_until_covered() {
        let utxos = vec![
            make_utxo(1, AssetId::DEFAULT, 50_000),
            make_utxo(2, AssetId::DEFAULT, 30_000),
            make_utxo(3, AssetId::DEFAULT, 90_000),
        ];
        let targets = BTreeMap::from([(AssetId::DEFAULT, 60_000)]);
        let sel = run(&utxos, &targets, &bitcoin_params(1_000)).unwrap();
        assert_eq!(sel.selected.len(), 2);
        assert_eq!(sel.selected[0].amount, 50_000);
        assert_eq!(sel.selected[1].amount, 30_000);
        let vsize = 11 + OUTPUT_VSIZE + 2 * INPUT + OUTPUT_VSIZE;
        assert_eq!(sel.vsize, vsize);
        assert_eq!(sel.fee, vsize);
        assert_eq!(sel.change[&AssetId::DEFAULT], 80_000 - 60_000 - sel.fee);
    }

    #[test]
    fn fee_rounds_up() {
        let p = bitcoin_params(1_500);
        assert_eq!(p.fee_for(1), 2);
        assert_eq!(p.fee_for(100), 150);
        assert_eq!(bitcoin_params(0).fee_for(500), 0);
    }

    #[test]
    fn dust_change_goes_to_fee() {
        let utxos = vec![make_utxo(1, AssetId::DEFAULT, 10_300)];
        let targets = BTreeMap::from([(AssetId::DEFAULT, 10_000)]);
        let sel = run(&utxos, &targets, &bitcoin_params(1_000)).unwrap();
        assert!(sel.change.is_empty());
        assert_eq!(sel.fee, 300);
    }

    #[test]
    fn insufficient_funds_reports_shortfall() {
        let utxos = vec![make_utxo(1, AssetId::DEFAULT, 1_000)];
        let targets = BTreeMap::from([(AssetId::DEFAULT, 5_000)]);
        let err = run(&utxos, &targets, &bitcoin_params(1_000)).unwrap_err();
        let WalletError::InsufficientFunds { asset, have, need } = err else {
            panic!("unexpected {err:?}");
        };
        assert_eq!(asset, AssetId::DEFAULT);
        assert_eq!(have, 1_000);
        assert!(need > 5_000);
    }

    #[test]
    fn deterministic_for_fixed_input() {
        let utxos: Vec<_> = (1..=20).map(|n| make_utxo(n, AssetId::DEFAULT, 1_000 * n as u64)).collect();
        let targets = BTreeMap::from([(AssetId::DEFAULT, 42_000)]);
        let a = run(&utxos, &targets, &bitcoin_params(2_000)).unwrap();
        let b = run(&utxos, &targets, &bitcoin_params(2_000)).unwrap();
        assert_eq!(a, b);
    }

    // --- Multi-asset ---

    #[test]
    fn non_fee_asset_change_and_separate_fee_coins() {
        let gold = AssetId(Hash256([0xaa; 32]));
        let mut params = bitcoin_params(1_000);
        params.ledger = LedgerKind::Elements;
        let utxos = vec![
            make_utxo(1, gold, 700),
            make_utxo(2, AssetId::DEFAULT, 100_000),
            make_utxo(3, gold, 700),
        ];
        let targets = BTreeMap::from([(gold, 1_000)]);
        let sel = run(&utxos, &targets, &params).unwrap();
        assert_eq!(sel.selected.len(), 3);
        assert_eq!(sel.change[&gold], 400);
        let fee_change = sel.change[&AssetId::DEFAULT];
        assert_eq!(fee_change + sel.fee, 100_000);
    }

    #[test]
    fn missing_non_fee_asset_fails_with_that_asset() {
        let gold = AssetId(Hash256([0xaa; 32]));
        let utxos = vec![make_utxo(1, AssetId::DEFAULT, 100_000)];
        let targets = BTreeMap::from([(gold, 1)]);
        assert!(matches!(
            run(&utxos, &targets, &bitcoin_params(1_000)),
            Err(WalletError::InsufficientFunds { asset, have: 0, need: 1 }) if asset == gold
        ));
    }

    #[test]
    fn preselected_inputs_count_toward_target() {
        let pre = make_utxo(9, AssetId::DEFAULT, 70_000);
        let extra = make_utxo(1, AssetId::DEFAULT, 50_000);
        let candidates = vec![&pre, &extra];
        let targets = BTreeMap::from([(AssetId::DEFAULT, 60_000)]);
        let request = SelectionRequest {
            candidates: &candidates,
            preselected: &[&pre],
            targets: &targets,
            base_vsize: 11 + OUTPUT_VSIZE + INPUT,
        };
        let sel = CoinSelector::select(&request, &bitcoin_params(1_000), |_| INPUT).unwrap();
        assert!(sel.selected.is_empty());
        assert_eq!(sel.change[&AssetId::DEFAULT], 70_000 - 60_000 - sel.fee);
    }

    #[test]
    fn blinded_change_costs_more() {
        let utxos = vec![make_utxo(1, AssetId::DEFAULT, 100_000)];
        let targets = BTreeMap::from([(AssetId::DEFAULT, 10_000)]);
        let mut explicit = bitcoin_params(1_000);
        explicit.ledger = LedgerKind::Elements;
        let mut blinded = explicit;
        blinded.blind_change = true;
        let a = run(&utxos, &targets, &explicit).unwrap();
        let b = run(&utxos, &targets, &blinded).unwrap();
        assert_eq!(b.fee - a.fee, BLINDED_OUTPUT_VSIZE - EXPLICIT_ELEMENTS_OUTPUT_VSIZE);
    }
}
