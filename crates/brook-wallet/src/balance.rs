//! Balance projections over the UTXO store.

use std::collections::{BTreeMap, HashSet};

use brook_core::address::DerivationPath;
use brook_core::types::AssetId;

use crate::utxo_store::{ConfirmationPolicy, SelectCriteria, UtxoStore};

/// Balance filters. Unset filters do not restrict.
#[derive(Debug, Clone, Default)]
pub struct BalanceQuery {
    /// Minimum confirmations; 0 includes unconfirmed records.
    pub min_conf: u64,
    /// Only this owning address.
    pub address: Option<String>,
    /// Only this derivation path.
    pub path: Option<DerivationPath>,
    /// Only this asset.
    pub asset: Option<AssetId>,
}

impl BalanceQuery {
    fn criteria(&self) -> SelectCriteria {
        SelectCriteria {
            policy: ConfirmationPolicy::min(self.min_conf),
            addresses: self.address.clone().map(|a| HashSet::from([a])),
            path: self.path,
            asset: self.asset,
            include_locked: false,
            solvable_only: false,
        }
    }
}

/// Sum of unspent, unlocked, mature records matching `query`, per asset.
pub fn get_balance(store: &UtxoStore, tip_height: u64, query: &BalanceQuery) -> BTreeMap<AssetId, u64> {
    let mut totals = BTreeMap::new();
    for record in store.select(&query.criteria(), tip_height) {
        let total: &mut u64 = totals.entry(record.asset).or_default();
        *total = total.saturating_add(record.amount);
    }
    totals
}

/// Per-address, per-asset balances.
pub fn balances_by_address(
    store: &UtxoStore,
    tip_height: u64,
    min_conf: u64,
) -> BTreeMap<String, BTreeMap<AssetId, u64>> {
    let criteria = SelectCriteria {
        policy: ConfirmationPolicy::min(min_conf),
        ..Default::default()
    };
    let mut out: BTreeMap<String, BTreeMap<AssetId, u64>> = BTreeMap::new();
    for record in store.select(&criteria, tip_height) {
        let total = out
            .entry(record.address.clone())
            .or_default()
            .entry(record.asset)
            .or_default();
        *total = total.saturating_add(record.amount);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use brook_core::address::AddressType;
    use brook_core::records::{SpendRef, UtxoRecord};
    use brook_core::types::{Hash256, OutPoint};

    fn make_record(n: u8, address: &str, asset: AssetId, amount: u64, height: Option<u64>) -> UtxoRecord {
        UtxoRecord {
            outpoint: OutPoint::new(Hash256([n; 32]), 0),
            address: address.into(),
            amount,
            asset,
            blinders: None,
            block_hash: height.map(|_| Hash256([n; 32])),
            block_height: height,
            coinbase: false,
            spent: false,
            locked: false,
            solvable: true,
            descriptor: String::new(),
            locking_script: vec![n],
            path: None,
            address_type: AddressType::P2wpkh,
            extend: Default::default(),
            first_seen_height: None,
            spent_by: None,
            seen_seq: 0,
        }
    }

    fn make_store() -> UtxoStore {
        let gold = AssetId(Hash256([0xaa; 32]));
        let mut s = UtxoStore::new();
        s.upsert(make_record(1, "a", AssetId::DEFAULT, 100, Some(1)));
        s.upsert(make_record(2, "b", AssetId::DEFAULT, 200, Some(10)));
        s.upsert(make_record(3, "a", gold, 7, Some(1)));
        s.upsert(make_record(4, "a", AssetId::DEFAULT, 50, None));
        s.upsert(make_record(5, "b", AssetId::DEFAULT, 1_000, Some(2)));
        s.mark_spent(
            &OutPoint::new(Hash256([5; 32]), 0),
            SpendRef {
                txid: Hash256([9; 32]),
                height: Some(3),
            },
        )
        .unwrap();
        s
    }

    #[test]
    fn groups_by_asset_and_skips_spent() {
        let s = make_store();
        let all = get_balance(&s, 10, &BalanceQuery::default());
        assert_eq!(all[&AssetId::DEFAULT], 350);
        assert_eq!(all[&AssetId(Hash256([0xaa; 32]))], 7);
    }

    #[test]
    fn min_conf_excludes_shallow_and_unconfirmed() {
        let s = make_store();
        let q = BalanceQuery {
            min_conf: 1,
            ..Default::default()
        };
        assert_eq!(get_balance(&s, 10, &q)[&AssetId::DEFAULT], 300);
        let q = BalanceQuery {
            min_conf: 2,
            ..Default::default()
        };
        assert_eq!(get_balance(&s, 10, &q)[&AssetId::DEFAULT], 100);
    }

    #[test]
    fn filters_by_address_and_asset() {
        let s = make_store();
        let q = BalanceQuery {
            address: Some("a".into()),
            asset: Some(AssetId::DEFAULT),
            ..Default::default()
        };
        let b = get_balance(&s, 10, &q);
        assert_eq!(b.len(), 1);
        assert_eq!(b[&AssetId::DEFAULT], 150);
    }

    #[test]
    fn locked_records_are_excluded() {
        let mut s = make_store();
        s.lock(&OutPoint::new(Hash256([2; 32]), 0)).unwrap();
        let b = get_balance(&s, 10, &BalanceQuery::default());
        assert_eq!(b[&AssetId::DEFAULT], 150);
    }

    #[test]
    fn by_address_projection() {
        let s = make_store();
        let by = balances_by_address(&s, 10, 0);
        assert_eq!(by["a"][&AssetId::DEFAULT], 150);
        assert_eq!(by["b"][&AssetId::DEFAULT], 200);
    }
}
