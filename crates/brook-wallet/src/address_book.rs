//! HD address derivation, address-type management and script classification.
//!
//! Each `(address type, chain)` pair is a branch of the account's HD tree.
//! A branch tracks how many addresses were handed out (`next_index`), how
//! many were derived (`derived`) and the highest index that has seen
//! activity. After every derivation or activity event the branch is topped
//! up so that at least `gap_limit` derived addresses sit beyond the highest
//! used index, which lets sync recognize deposits to addresses the caller
//! has not asked for yet.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use brook_core::address::{AddressRequest, AddressType, Chain, DerivationPath};
use brook_core::network::Network;
use brook_core::records::{AddressRecord, MultisigInfo};
use brook_core::traits::{CryptoProvider, ScriptInfo, ScriptSpec};

use crate::config::validate_gap_limit;
use crate::error::WalletError;

/// Indexes at or above this are hardened and cannot be used for addresses.
const MAX_ADDRESS_INDEX: u32 = 1 << 31;

/// Derivation counters of one branch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct BranchState {
    /// Next index handed out by `derive_next`.
    pub next_index: u32,
    /// Number of addresses derived (indexes `0..derived`).
    pub derived: u32,
    /// Highest index with on-chain activity.
    pub highest_used: Option<u32>,
}

impl BranchState {
    /// First index not covered by activity.
    fn first_unused(&self) -> u32 {
        self.highest_used.map_or(0, |h| h + 1)
    }

    /// Derived addresses beyond the highest used index.
    pub fn unused_ahead(&self) -> u32 {
        self.derived.saturating_sub(self.first_unused())
    }

    fn target(&self, gap_limit: u32) -> u32 {
        self.next_index
            .max(self.first_unused())
            .saturating_add(gap_limit)
            .min(MAX_ADDRESS_INDEX)
    }
}

/// Mutable account settings owned by the book, persisted with the account.
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct AddressBookState {
    /// Gap limit.
    pub gap_limit: u32,
    /// Default address type.
    pub default_type: AddressType,
    /// Branch counters.
    pub branches: Vec<(AddressType, Chain, BranchState)>,
}

/// Addresses of one account.
#[derive(Debug)]
pub struct AddressBook {
    network: Network,
    account: u32,
    gap_limit: u32,
    default_type: AddressType,
    records: BTreeMap<String, AddressRecord>,
    by_script: HashMap<Vec<u8>, String>,
    by_path: BTreeMap<DerivationPath, String>,
    branches: BTreeMap<(AddressType, Chain), BranchState>,
}

impl AddressBook {
    /// An empty book. Call [`top_up`](Self::top_up) once the crypto
    /// capability is available to derive the lookahead window.
    pub fn new(
        network: Network,
        account: u32,
        gap_limit: u32,
        default_type: AddressType,
    ) -> Result<Self, WalletError> {
        validate_gap_limit(gap_limit)?;
        check_key_type(default_type)?;
        Ok(Self {
            network,
            account,
            gap_limit,
            default_type,
            records: BTreeMap::new(),
            by_script: HashMap::new(),
            by_path: BTreeMap::new(),
            branches: BTreeMap::new(),
        })
    }

    /// The book's network.
    pub fn network(&self) -> Network {
        self.network
    }

    /// Current gap limit.
    pub fn gap_limit(&self) -> u32 {
        self.gap_limit
    }

    /// Current default address type.
    pub fn default_type(&self) -> AddressType {
        self.default_type
    }

    /// Branch counters, if the branch exists.
    pub fn branch(&self, address_type: AddressType, chain: Chain) -> Option<BranchState> {
        self.branches.get(&(address_type, chain)).copied()
    }

    // --- Derivation ---

    /// Hand out the next address of `chain` for `request` and label it.
    pub fn derive_next(
        &mut self,
        crypto: &dyn CryptoProvider,
        request: AddressRequest,
        chain: Chain,
        label: &str,
    ) -> Result<AddressRecord, WalletError> {
        let address_type = self.convert_address_type(request, false)?;
        let branch = self.branches.entry((address_type, chain)).or_default();
        let index = branch.next_index;
        if index >= MAX_ADDRESS_INDEX {
            return Err(WalletError::InvalidConfiguration(format!(
                "{address_type} {chain:?} branch exhausted"
            )));
        }
        branch.next_index += 1;
        self.top_up_branch(crypto, address_type, chain)?;

        let address = self
            .path_for(address_type, chain, index)
            .and_then(|path| self.by_path.get(&path).cloned())
            .ok_or_else(|| WalletError::UnknownAddress(format!("{address_type} index {index}")))?;
        let record = self
            .records
            .get_mut(&address)
            .ok_or_else(|| WalletError::UnknownAddress(address.clone()))?;
        if !label.is_empty() {
            record.label = label.to_string();
        }
        debug!(address = %record.address, path = ?record.path, "issued address");
        Ok(record.clone())
    }

    /// Derive missing lookahead addresses on every branch, creating the
    /// default type's branches if needed. Returns the number derived.
    pub fn top_up(&mut self, crypto: &dyn CryptoProvider) -> Result<usize, WalletError> {
        for chain in [Chain::Receive, Chain::Change] {
            self.branches.entry((self.default_type, chain)).or_default();
        }
        let keys: Vec<_> = self.branches.keys().copied().collect();
        let mut total = 0;
        for (address_type, chain) in keys {
            total += self.top_up_branch(crypto, address_type, chain)?;
        }
        Ok(total)
    }

    fn top_up_branch(
        &mut self,
        crypto: &dyn CryptoProvider,
        address_type: AddressType,
        chain: Chain,
    ) -> Result<usize, WalletError> {
        let state = self.branches.get(&(address_type, chain)).copied().unwrap_or_default();
        let target = state.target(self.gap_limit);
        if state.derived >= target {
            return Ok(0);
        }
        for index in state.derived..target {
            let record = self.derive_at(crypto, address_type, chain, index)?;
            self.insert(record);
        }
        let branch = self.branches.entry((address_type, chain)).or_default();
        branch.derived = target;
        let count = (target - state.derived) as usize;
        debug!(%address_type, ?chain, derived = target, count, "gap top-up");
        Ok(count)
    }

    fn path_for(&self, address_type: AddressType, chain: Chain, index: u32) -> Option<DerivationPath> {
        Some(DerivationPath {
            purpose: address_type.purpose()?,
            coin_type: self.network.coin_type(),
            account: self.account,
            chain,
            index,
        })
    }

    fn derive_at(
        &self,
        crypto: &dyn CryptoProvider,
        address_type: AddressType,
        chain: Chain,
        index: u32,
    ) -> Result<AddressRecord, WalletError> {
        let path = self
            .path_for(address_type, chain, index)
            .ok_or_else(|| WalletError::UnsupportedAddressType(address_type.to_string()))?;
        let key = crypto.derive_key(&path)?;
        let info = crypto.build_script(
            &ScriptSpec::Pubkey {
                address_type,
                pubkey: key.pubkey.clone(),
            },
            self.network,
        )?;
        let mut record = self.record_from(crypto, info, address_type, String::new())?;
        record.path = Some(path);
        record.pubkey = Some(key.pubkey);
        Ok(record)
    }

    fn record_from(
        &self,
        crypto: &dyn CryptoProvider,
        info: ScriptInfo,
        address_type: AddressType,
        label: String,
    ) -> Result<AddressRecord, WalletError> {
        let (blinding_pubkey, confidential_address) = if self.network.ledger_kind().is_confidential() {
            let key = crypto.blinding_pubkey(&info.locking_script)?;
            let conf = crypto.confidential_address(&info.address, &key, self.network)?;
            (Some(key), Some(conf))
        } else {
            (None, None)
        };
        Ok(AddressRecord {
            address: info.address,
            confidential_address,
            address_type,
            path: None,
            pubkey: None,
            multisig: None,
            locking_script: info.locking_script,
            redeem_script: info.redeem_script,
            blinding_pubkey,
            label,
            descriptor: info.descriptor,
            extra: Default::default(),
        })
    }

    fn insert(&mut self, record: AddressRecord) {
        self.by_script
            .insert(record.locking_script.clone(), record.address.clone());
        if let Some(path) = record.path {
            self.by_path.insert(path, record.address.clone());
        }
        self.records.insert(record.address.clone(), record);
    }

    // --- Classification and activity ---

    /// Resolve a locking script to a known address.
    pub fn classify(&self, locking_script: &[u8]) -> Option<&AddressRecord> {
        self.by_script
            .get(locking_script)
            .and_then(|address| self.records.get(address))
    }

    /// Record activity on `address`. An HD address at or beyond the branch's
    /// issue cursor moves the cursor past it, so it is never handed out, and
    /// the branch is topped up. Returns whether the branch state changed.
    pub fn mark_used(&mut self, crypto: &dyn CryptoProvider, address: &str) -> Result<bool, WalletError> {
        let Some(record) = self.records.get(address) else {
            return Err(WalletError::UnknownAddress(address.to_string()));
        };
        let Some(path) = record.path else {
            return Ok(false);
        };
        let key = (record.address_type, path.chain);
        let branch = self.branches.entry(key).or_default();
        if branch.highest_used.is_some_and(|h| h >= path.index) {
            return Ok(false);
        }
        branch.highest_used = Some(path.index);
        branch.next_index = branch.next_index.max(path.index + 1);
        self.top_up_branch(crypto, key.0, key.1)?;
        Ok(true)
    }

    // --- Settings ---

    /// Change the gap limit and top up every branch to the new window.
    pub fn set_gap_limit(&mut self, crypto: &dyn CryptoProvider, gap_limit: u32) -> Result<(), WalletError> {
        validate_gap_limit(gap_limit)?;
        self.gap_limit = gap_limit;
        self.top_up(crypto)?;
        Ok(())
    }

    /// Change the default address type. Script types are rejected.
    pub fn set_default_address_type(
        &mut self,
        crypto: &dyn CryptoProvider,
        address_type: AddressType,
    ) -> Result<(), WalletError> {
        check_key_type(address_type)?;
        self.default_type = address_type;
        self.top_up(crypto)?;
        Ok(())
    }

    /// Resolve an address request to a concrete type, as a script wrapper
    /// when `is_script` is set.
    pub fn convert_address_type(&self, request: AddressRequest, is_script: bool) -> Result<AddressType, WalletError> {
        match request {
            AddressRequest::Default => Ok(self.default_type.kind().concrete(is_script)),
            AddressRequest::Kind(kind) => Ok(kind.concrete(is_script)),
            AddressRequest::Type(t) if t.is_script() == is_script => Ok(t),
            AddressRequest::Type(t) => Err(WalletError::UnsupportedAddressType(format!(
                "{t} cannot be used for a {} address",
                if is_script { "script" } else { "single-key" }
            ))),
        }
    }

    // --- Watch-only script addresses ---

    /// Register an `m`-of-`n` multisig address. Watch-only.
    pub fn add_multisig(
        &mut self,
        crypto: &dyn CryptoProvider,
        pubkeys: Vec<Vec<u8>>,
        required: u32,
        request: AddressRequest,
        label: &str,
    ) -> Result<AddressRecord, WalletError> {
        let address_type = self.convert_address_type(request, true)?;
        let spec = ScriptSpec::Multisig {
            address_type,
            required,
            pubkeys: pubkeys.clone(),
        };
        let info = crypto.build_script(&spec, self.network)?;
        let mut record = self.record_from(crypto, info, address_type, label.to_string())?;
        record.multisig = Some(MultisigInfo { required, pubkeys });
        Ok(self.insert_imported(record))
    }

    /// Register an arbitrary redeem / witness script address. Watch-only.
    /// `related_pubkeys` are kept as hex in the record's `extra` map.
    pub fn add_script_address(
        &mut self,
        crypto: &dyn CryptoProvider,
        script: Vec<u8>,
        request: AddressRequest,
        label: &str,
        related_pubkeys: &[Vec<u8>],
    ) -> Result<AddressRecord, WalletError> {
        let address_type = self.convert_address_type(request, true)?;
        let info = crypto.build_script(&ScriptSpec::Script { address_type, script }, self.network)?;
        let mut record = self.record_from(crypto, info, address_type, label.to_string())?;
        if !related_pubkeys.is_empty() {
            record.extra.insert(
                "related_pubkeys".to_string(),
                related_pubkeys.iter().map(hex::encode).collect(),
            );
        }
        Ok(self.insert_imported(record))
    }

    /// Importing an address twice keeps the first record and only refreshes
    /// a non-empty label.
    fn insert_imported(&mut self, record: AddressRecord) -> AddressRecord {
        if let Some(existing) = self.records.get_mut(&record.address) {
            if !record.label.is_empty() {
                existing.label = record.label;
            }
            return existing.clone();
        }
        debug!(address = %record.address, address_type = %record.address_type, "imported script address");
        self.insert(record.clone());
        record
    }

    // --- Queries ---

    fn is_visible(&self, record: &AddressRecord) -> bool {
        match record.path {
            None => true,
            Some(path) => self
                .branches
                .get(&(record.address_type, path.chain))
                .is_some_and(|b| path.index < b.next_index),
        }
    }

    /// Addresses handed out or imported, excluding the undisclosed lookahead.
    pub fn get_addresses(&self) -> Vec<&AddressRecord> {
        self.records.values().filter(|r| self.is_visible(r)).collect()
    }

    /// Visible addresses carrying `label`.
    pub fn get_addresses_by_label(&self, label: &str) -> Vec<&AddressRecord> {
        self.records
            .values()
            .filter(|r| r.label == label && self.is_visible(r))
            .collect()
    }

    /// Look up an address by its plain or confidential form.
    pub fn get_address_info(&self, address: &str) -> Result<&AddressRecord, WalletError> {
        self.records
            .get(address)
            .or_else(|| {
                self.records
                    .values()
                    .find(|r| r.confidential_address.as_deref() == Some(address))
            })
            .ok_or_else(|| WalletError::UnknownAddress(address.to_string()))
    }

    /// Address at a derivation path.
    pub fn get_by_path(&self, path: &DerivationPath) -> Option<&AddressRecord> {
        self.by_path.get(path).and_then(|a| self.records.get(a))
    }

    // --- Persistence ---

    /// All records, lookahead included.
    pub fn records(&self) -> impl Iterator<Item = &AddressRecord> {
        self.records.values()
    }

    /// Settings and counters for persistence.
    pub fn state(&self) -> AddressBookState {
        AddressBookState {
            gap_limit: self.gap_limit,
            default_type: self.default_type,
            branches: self
                .branches
                .iter()
                .map(|(&(t, c), &s)| (t, c, s))
                .collect(),
        }
    }

    /// Rebuild a book from persisted settings and records.
    pub fn restore(
        network: Network,
        account: u32,
        state: AddressBookState,
        records: impl IntoIterator<Item = AddressRecord>,
    ) -> Result<Self, WalletError> {
        let mut book = Self::new(network, account, state.gap_limit, state.default_type)?;
        book.branches = state
            .branches
            .into_iter()
            .map(|(t, c, s)| ((t, c), s))
            .collect();
        for record in records {
            book.insert(record);
        }
        Ok(book)
    }
}

fn check_key_type(address_type: AddressType) -> Result<(), WalletError> {
    if address_type.is_script() {
        return Err(WalletError::UnsupportedAddressType(format!(
            "{address_type} cannot be the default address type"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use brook_core::address::AddressKind;
    use brook_crypto::{Seed, SoftwareCrypto};

    fn crypto() -> SoftwareCrypto {
        SoftwareCrypto::new(Seed::from_bytes([3; 32]))
    }

    fn make_book(gap: u32) -> AddressBook {
        AddressBook::new(Network::Regtest, 0, gap, AddressType::P2wpkh).unwrap()
    }

    fn assert_window(book: &AddressBook, address_type: AddressType, chain: Chain) {
        let b = book.branch(address_type, chain).unwrap();
        assert!(b.unused_ahead() >= book.gap_limit(), "{b:?}");
        assert!(b.derived >= b.next_index);
    }

    // --- Derivation ---

    #[test]
    fn derive_next_is_monotonic_and_keeps_window() {
        let c = crypto();
        let mut book = make_book(5);
        let a = book.derive_next(&c, AddressRequest::Default, Chain::Receive, "first").unwrap();
        let b = book.derive_next(&c, AddressRequest::Default, Chain::Receive, "").unwrap();
        assert_eq!(a.path.unwrap().index, 0);
        assert_eq!(b.path.unwrap().index, 1);
        assert_ne!(a.address, b.address);
        assert_eq!(a.label, "first");
        assert_eq!(a.address_type, AddressType::P2wpkh);
        assert!(a.is_solvable());
        assert_window(&book, AddressType::P2wpkh, Chain::Receive);
    }

    #[test]
    fn lookahead_is_classifiable_but_hidden() {
        let c = crypto();
        let mut book = make_book(3);
        book.top_up(&c).unwrap();
        assert!(book.get_addresses().is_empty());
        let ahead = book
            .get_by_path(&DerivationPath {
                purpose: 84,
                coin_type: Network::Regtest.coin_type(),
                account: 0,
                chain: Chain::Receive,
                index: 2,
            })
            .unwrap()
            .clone();
        assert_eq!(book.classify(&ahead.locking_script), Some(&ahead));
    }

    #[test]
    fn activity_advances_window() {
        let c = crypto();
        let mut book = make_book(4);
        book.top_up(&c).unwrap();
        let far = book
            .records()
            .find(|r| r.path.is_some_and(|p| p.chain == Chain::Receive && p.index == 3))
            .unwrap()
            .address
            .clone();
        assert!(book.mark_used(&c, &far).unwrap());
        let b = book.branch(AddressType::P2wpkh, Chain::Receive).unwrap();
        assert_eq!(b.highest_used, Some(3));
        assert_eq!(b.derived, 8);
        assert_eq!(b.next_index, 4);
        assert_window(&book, AddressType::P2wpkh, Chain::Receive);

        // A used index is never handed out again.
        let next = book.derive_next(&c, AddressRequest::Default, Chain::Receive, "").unwrap();
        assert_eq!(next.path.unwrap().index, 4);
        // Activity below the high-water mark changes nothing.
        assert!(!book.mark_used(&c, &far).unwrap());
    }

    #[test]
    fn unknown_address_activity_is_an_error() {
        let c = crypto();
        let mut book = make_book(2);
        assert!(matches!(book.mark_used(&c, "nope"), Err(WalletError::UnknownAddress(_))));
    }

    // --- Settings ---

    #[test]
    fn gap_limit_change_tops_up() {
        let c = crypto();
        let mut book = make_book(2);
        book.top_up(&c).unwrap();
        book.set_gap_limit(&c, 10).unwrap();
        assert_eq!(book.branch(AddressType::P2wpkh, Chain::Change).unwrap().derived, 10);
        assert!(matches!(book.set_gap_limit(&c, 0), Err(WalletError::InvalidConfiguration(_))));
        assert_eq!(book.gap_limit(), 10);
    }

    #[test]
    fn default_type_rejects_script_types() {
        let c = crypto();
        let mut book = make_book(2);
        assert!(matches!(
            book.set_default_address_type(&c, AddressType::P2sh),
            Err(WalletError::UnsupportedAddressType(_))
        ));
        book.set_default_address_type(&c, AddressType::P2pkh).unwrap();
        let r = book.derive_next(&c, AddressRequest::Default, Chain::Receive, "").unwrap();
        assert_eq!(r.address_type, AddressType::P2pkh);
        assert_eq!(r.path.unwrap().purpose, 44);
    }

    #[test]
    fn convert_address_type_combinations() {
        let book = make_book(2);
        assert_eq!(
            book.convert_address_type(AddressRequest::Default, false).unwrap(),
            AddressType::P2wpkh
        );
        assert_eq!(
            book.convert_address_type(AddressRequest::Default, true).unwrap(),
            AddressType::P2wsh
        );
        assert_eq!(
            book.convert_address_type(AddressRequest::Kind(AddressKind::Legacy), true).unwrap(),
            AddressType::P2sh
        );
        assert_eq!(
            book.convert_address_type(AddressType::P2shP2wsh.into(), true).unwrap(),
            AddressType::P2shP2wsh
        );
        assert!(matches!(
            book.convert_address_type(AddressType::P2wsh.into(), false),
            Err(WalletError::UnsupportedAddressType(_))
        ));
        assert!(matches!(
            book.convert_address_type(AddressType::P2pkh.into(), true),
            Err(WalletError::UnsupportedAddressType(_))
        ));
    }

    // --- Script addresses ---

    #[test]
    fn multisig_is_watch_only_and_idempotent() {
        let c = crypto();
        let mut book = make_book(2);
        let keys = vec![vec![1u8; 32], vec![2u8; 32], vec![3u8; 32]];
        let ms = book
            .add_multisig(&c, keys.clone(), 2, AddressRequest::Default, "shared")
            .unwrap();
        assert_eq!(ms.address_type, AddressType::P2wsh);
        assert!(!ms.is_solvable());
        assert_eq!(ms.multisig.as_ref().unwrap().required, 2);
        assert_eq!(book.get_addresses_by_label("shared").len(), 1);

        let again = book.add_multisig(&c, keys, 2, AddressRequest::Default, "").unwrap();
        assert_eq!(again, ms);
        assert!(book.add_multisig(&c, vec![vec![1u8; 32]], 2, AddressRequest::Default, "").is_err());
    }

    #[test]
    fn script_address_keeps_related_pubkeys() {
        let c = crypto();
        let mut book = make_book(2);
        let r = book
            .add_script_address(&c, vec![0x51], AddressType::P2sh.into(), "", &[vec![0xab; 32]])
            .unwrap();
        assert_eq!(r.extra["related_pubkeys"], vec![hex::encode([0xab; 32])]);
        assert_eq!(book.get_address_info(&r.address).unwrap(), &r);
    }

    #[test]
    fn confidential_ledger_adds_blinding_keys() {
        let c = crypto();
        let mut book = AddressBook::new(Network::LiquidRegtest, 0, 2, AddressType::P2wpkh).unwrap();
        let r = book.derive_next(&c, AddressRequest::Default, Chain::Receive, "").unwrap();
        let conf = r.confidential_address.clone().unwrap();
        assert_eq!(r.blinding_pubkey.as_ref().unwrap().len(), 32);
        assert_eq!(book.get_address_info(&conf).unwrap().address, r.address);
    }

    #[test]
    fn restore_roundtrip() {
        let c = crypto();
        let mut book = make_book(3);
        book.derive_next(&c, AddressRequest::Default, Chain::Receive, "a").unwrap();
        let state = book.state();
        let records: Vec<_> = book.records().cloned().collect();
        let restored = AddressBook::restore(Network::Regtest, 0, state.clone(), records).unwrap();
        assert_eq!(restored.state(), state);
        assert_eq!(restored.get_addresses().len(), 1);
        assert_eq!(restored.records().count(), book.records().count());
    }
}
