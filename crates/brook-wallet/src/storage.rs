//! RocksDB persistence for one wallet account.
//!
//! Column families hold UTXO records keyed by outpoint, address records
//! keyed by address string, a derivation-path index and a single metadata
//! row. Every save is one atomic [`WriteBatch`] holding only the rows whose
//! encoding differs from what was last written. Locks are not persisted:
//! no pending build survives a restart.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::Mutex;
use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use tracing::debug;

use brook_core::address::DerivationPath;
use brook_core::records::{AddressRecord, UtxoRecord};
use brook_core::types::Hash256;

use crate::address_book::{AddressBook, AddressBookState};
use crate::error::WalletError;
use crate::utxo_store::UtxoStore;

// --- Column family names ---

const CF_UTXOS: &str = "utxos";
const CF_ADDRESSES: &str = "addresses";
const CF_PATH_INDEX: &str = "path_index";
const CF_METADATA: &str = "metadata";

const ALL_CFS: &[&str] = &[CF_UTXOS, CF_ADDRESSES, CF_PATH_INDEX, CF_METADATA];

const META_ACCOUNT: &[u8] = b"account";

/// The account metadata row.
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct AccountMeta {
    /// Gap limit, default type and derivation counters.
    pub book: AddressBookState,
    /// Applied `(height, hash)` pairs within the reorg window.
    pub tracked: Vec<(u64, Hash256)>,
    /// Minimum fee rate.
    pub min_fee_rate: u64,
}

/// Everything loaded from disk for one account.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Metadata row.
    pub meta: AccountMeta,
    /// Address records.
    pub addresses: Vec<AddressRecord>,
    /// UTXO records.
    pub utxos: Vec<UtxoRecord>,
}

fn storage_err(e: impl ToString) -> WalletError {
    WalletError::Storage(e.to_string())
}

fn encode<T: bincode::Encode>(value: &T) -> Result<Vec<u8>, WalletError> {
    bincode::encode_to_vec(value, bincode::config::standard()).map_err(storage_err)
}

fn decode<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T, WalletError> {
    let (value, _) = bincode::decode_from_slice(bytes, bincode::config::standard()).map_err(storage_err)?;
    Ok(value)
}

/// Encoded rows as last written, keyed like the column families.
#[derive(Default)]
struct Written {
    utxos: HashMap<Vec<u8>, Vec<u8>>,
    addresses: HashMap<String, Vec<u8>>,
    meta: Option<Vec<u8>>,
}

/// RocksDB-backed account storage.
pub struct WalletDb {
    db: DB,
    written: Mutex<Written>,
}

impl WalletDb {
    /// Open or create the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, WalletError> {
        std::fs::create_dir_all(path.as_ref()).map_err(storage_err)?;
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors).map_err(storage_err)?;
        let this = Self {
            db,
            written: Mutex::new(Written::default()),
        };
        *this.written.lock() = this.scan_written()?;
        Ok(this)
    }

    fn scan_written(&self) -> Result<Written, WalletError> {
        let mut written = Written::default();
        for item in self.db.iterator_cf(self.cf_handle(CF_UTXOS)?, IteratorMode::Start) {
            let (key, value) = item.map_err(storage_err)?;
            written.utxos.insert(key.into_vec(), value.into_vec());
        }
        for item in self.db.iterator_cf(self.cf_handle(CF_ADDRESSES)?, IteratorMode::Start) {
            let (key, value) = item.map_err(storage_err)?;
            let address = String::from_utf8(key.into_vec()).map_err(storage_err)?;
            written.addresses.insert(address, value.into_vec());
        }
        written.meta = self
            .db
            .get_cf(self.cf_handle(CF_METADATA)?, META_ACCOUNT)
            .map_err(storage_err)?;
        Ok(written)
    }

    fn cf_handle(&self, name: &str) -> Result<&rocksdb::ColumnFamily, WalletError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| WalletError::Storage(format!("missing column family: {name}")))
    }

    /// Load the account, or `None` for a fresh database.
    pub fn load(&self) -> Result<Option<Snapshot>, WalletError> {
        let cf_meta = self.cf_handle(CF_METADATA)?;
        let Some(meta_bytes) = self.db.get_cf(cf_meta, META_ACCOUNT).map_err(storage_err)? else {
            return Ok(None);
        };
        let meta: AccountMeta = decode(&meta_bytes)?;

        let mut addresses = Vec::new();
        let cf_addresses = self.cf_handle(CF_ADDRESSES)?;
        for item in self.db.iterator_cf(cf_addresses, IteratorMode::Start) {
            let (_, value) = item.map_err(storage_err)?;
            addresses.push(decode::<AddressRecord>(&value)?);
        }

        let mut utxos = Vec::new();
        let cf_utxos = self.cf_handle(CF_UTXOS)?;
        for item in self.db.iterator_cf(cf_utxos, IteratorMode::Start) {
            let (_, value) = item.map_err(storage_err)?;
            utxos.push(decode::<UtxoRecord>(&value)?);
        }

        debug!(addresses = addresses.len(), utxos = utxos.len(), "loaded wallet");
        Ok(Some(Snapshot {
            meta,
            addresses,
            utxos,
        }))
    }

    /// Bring the database in line with the account. Only rows that changed
    /// since the last save are written; UTXO rows no longer in the store are
    /// deleted. Returns the number of rows put or deleted.
    pub fn save(&self, book: &AddressBook, store: &UtxoStore, meta: &AccountMeta) -> Result<usize, WalletError> {
        let cf_utxos = self.cf_handle(CF_UTXOS)?;
        let cf_addresses = self.cf_handle(CF_ADDRESSES)?;
        let cf_path = self.cf_handle(CF_PATH_INDEX)?;
        let cf_meta = self.cf_handle(CF_METADATA)?;
        let mut written = self.written.lock();
        let mut batch = WriteBatch::default();

        let mut utxos = HashMap::with_capacity(store.len());
        for record in store.iter() {
            let key = encode(&record.outpoint)?;
            let mut stored = record.clone();
            stored.locked = false;
            let value = encode(&stored)?;
            if written.utxos.get(&key) != Some(&value) {
                batch.put_cf(cf_utxos, &key, &value);
            }
            utxos.insert(key, value);
        }
        for key in written.utxos.keys() {
            if !utxos.contains_key(key) {
                batch.delete_cf(cf_utxos, key);
            }
        }

        let mut addresses = HashMap::with_capacity(written.addresses.len());
        for record in book.records() {
            let value = encode(record)?;
            if written.addresses.get(&record.address) != Some(&value) {
                batch.put_cf(cf_addresses, record.address.as_bytes(), &value);
                if let Some(path) = &record.path {
                    batch.put_cf(cf_path, encode(path)?, record.address.as_bytes());
                }
            }
            addresses.insert(record.address.clone(), value);
        }

        let meta = encode(meta)?;
        if written.meta.as_ref() != Some(&meta) {
            batch.put_cf(cf_meta, META_ACCOUNT, &meta);
        }

        let rows = batch.len();
        if rows > 0 {
            self.db.write(batch).map_err(storage_err)?;
            debug!(rows, utxos = utxos.len(), "saved wallet");
        }
        *written = Written {
            utxos,
            addresses,
            meta: Some(meta),
        };
        Ok(rows)
    }

    /// Address stored for `path`.
    pub fn address_for_path(&self, path: &DerivationPath) -> Result<Option<String>, WalletError> {
        let cf = self.cf_handle(CF_PATH_INDEX)?;
        let Some(bytes) = self.db.get_cf(cf, encode(path)?).map_err(storage_err)? else {
            return Ok(None);
        };
        String::from_utf8(bytes).map(Some).map_err(storage_err)
    }

    /// Flush memtables to disk.
    pub fn flush(&self) -> Result<(), WalletError> {
        self.db.flush().map_err(storage_err)
    }
}

impl std::fmt::Debug for WalletDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletDb").field("path", &self.db.path()).finish()
    }
}
