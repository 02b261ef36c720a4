//! The per-account wallet service.
//!
//! Every operation runs on the account's lane: a single async mutex over
//! [`AccountState`]. Sync notifications, builds and signing for one account
//! therefore never interleave, while other accounts proceed in parallel.
//! Ledger calls are awaited while holding the lane, so a slow node stalls
//! only its own account.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use brook_core::address::{AddressRequest, AddressType, Chain};
use brook_core::capability::CryptoHandle;
use brook_core::network::Network;
use brook_core::records::{AddressRecord, UtxoRecord};
use brook_core::traits::{CryptoProvider, LedgerRpc};
use brook_core::types::{AssetId, Hash256, OutPoint, Transaction};

use crate::account::AccountState;
use crate::balance::{self, BalanceQuery};
use crate::builder::{BuildId, CreateRequest, FundOptions, Recipient};
use crate::config::WalletConfig;
use crate::error::{ErrorOutPoint, WalletError};
use crate::retry::LedgerClient;
use crate::signing::{SignOptions, SignResponse, SignatureData, SigningCoordinator};
use crate::storage::WalletDb;
use crate::sync::{SyncReport, SyncState, TipUpdate, apply_transaction};
use crate::utxo_store::{ConfirmationPolicy, SelectCriteria};

/// Filters of `list_unspent`.
#[derive(Debug, Clone)]
pub struct ListUnspentQuery {
    /// Minimum confirmations; 0 includes unconfirmed records.
    pub min_conf: u64,
    /// Maximum confirmations. Never excludes unconfirmed records.
    pub max_conf: Option<u64>,
    /// Only these owning addresses.
    pub addresses: Option<HashSet<String>>,
    /// Only this asset.
    pub asset: Option<AssetId>,
    /// Also list records reserved by pending builds.
    pub include_locked: bool,
}

impl Default for ListUnspentQuery {
    fn default() -> Self {
        Self {
            min_conf: 1,
            max_conf: None,
            addresses: None,
            asset: None,
            include_locked: false,
        }
    }
}

/// Outcome of funding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundResult {
    /// Build holding the input locks.
    pub build_id: BuildId,
    /// Funded transaction hex.
    pub hex: String,
    /// Fee paid.
    pub fee: u64,
    /// Fee asset.
    pub fee_asset: AssetId,
    /// Output positions of change outputs.
    pub change_positions: Vec<usize>,
}

/// Arguments of `send_to_address`.
#[derive(Debug, Clone)]
pub struct SendRequest {
    /// Destination.
    pub address: String,
    /// Amount in minor units.
    pub amount: u64,
    /// Asset; the policy asset if unset.
    pub asset: Option<AssetId>,
    /// Fee rate override.
    pub fee_rate: Option<u64>,
    /// Fee asset override, asset-extended ledger only.
    pub fee_asset: Option<AssetId>,
    /// Signal replaceability.
    pub replaceable: bool,
}

impl SendRequest {
    /// Pay `amount` of the policy asset to `address`.
    pub fn new(address: impl Into<String>, amount: u64) -> Self {
        Self {
            address: address.into(),
            amount,
            asset: None,
            fee_rate: None,
            fee_asset: None,
            replaceable: false,
        }
    }
}

/// Discards a build when dropped unless disarmed, so a failed or
/// cancelled multi-step operation leaves no lock behind.
struct BuildGuard<'a> {
    state: MutexGuard<'a, AccountState>,
    id: Option<BuildId>,
}

impl BuildGuard<'_> {
    fn disarm(&mut self) {
        self.id = None;
    }
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            let state = &mut *self.state;
            if let Err(e) = state.builds.discard(&mut state.utxos, id) {
                warn!(build = %id, error = %e, "failed to discard build");
            }
        }
    }
}

/// One wallet account.
pub struct WalletService {
    name: String,
    network: Network,
    lane: Mutex<AccountState>,
    crypto: CryptoHandle,
    ledger: LedgerClient,
    db: Option<WalletDb>,
}

impl WalletService {
    /// Open account `name` (HD account number `account`), loading persisted
    /// state unless the configuration is in-memory.
    pub fn open(
        name: &str,
        account: u32,
        config: &WalletConfig,
        crypto: CryptoHandle,
        rpc: Arc<dyn LedgerRpc>,
    ) -> Result<Self, WalletError> {
        config.validate()?;
        let (state, db) = if config.in_memory {
            (AccountState::new(config, account)?, None)
        } else {
            let db = WalletDb::open(config.db_path(name))?;
            let state = match db.load()? {
                Some(snapshot) => AccountState::from_snapshot(config, account, snapshot)?,
                None => AccountState::new(config, account)?,
            };
            (state, Some(db))
        };
        info!(
            wallet = name,
            network = %config.network,
            tip = state.tip_height(),
            persistent = db.is_some(),
            "opened wallet"
        );
        Ok(Self {
            name: name.to_string(),
            network: config.network,
            lane: Mutex::new(state),
            crypto,
            ledger: LedgerClient::new(rpc, config.retry.clone()),
            db,
        })
    }

    /// Account name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Network.
    pub fn network(&self) -> Network {
        self.network
    }

    /// Wait for the crypto capability, take the lane and make sure the
    /// lookahead window is derived.
    async fn enter(&self) -> Result<(MutexGuard<'_, AccountState>, &dyn CryptoProvider), WalletError> {
        let crypto = self.crypto.get().await?;
        let mut state = self.lane.lock().await;
        if state.book.top_up(crypto)? > 0 {
            self.persist(&state)?;
        }
        Ok((state, crypto))
    }

    fn persist(&self, state: &AccountState) -> Result<(), WalletError> {
        match &self.db {
            Some(db) => db.save(&state.book, &state.utxos, &state.meta()).map(|_| ()),
            None => Ok(()),
        }
    }

    // --- Sync ---

    /// Apply a best-chain notification.
    pub async fn on_new_tip(&self, update: TipUpdate) -> Result<SyncReport, WalletError> {
        let (mut state, crypto) = self.enter().await?;
        let (engine, mut ctx) = state.sync_parts(crypto);
        let result = engine.on_new_tip(&mut ctx, &self.ledger, update).await;
        self.persist(&state)?;
        result
    }

    /// Pull every missing block from the ledger.
    pub async fn sync_from_ledger(&self) -> Result<SyncReport, WalletError> {
        let (mut state, crypto) = self.enter().await?;
        let (engine, mut ctx) = state.sync_parts(crypto);
        let result = engine.sync_from_ledger(&mut ctx, &self.ledger).await;
        self.persist(&state)?;
        result
    }

    /// Drop all chain state and pending builds, then rescan from the birth
    /// height.
    pub async fn force_resync(&self) -> Result<SyncReport, WalletError> {
        let (mut state, crypto) = self.enter().await?;
        let state = &mut *state;
        let discarded = state.builds.discard_all(&mut state.utxos);
        if discarded > 0 {
            info!(wallet = %self.name, discarded, "discarded pending builds for resync");
        }
        let (engine, mut ctx) = state.sync_parts(crypto);
        let result = engine.force_resync(&mut ctx, &self.ledger).await;
        self.persist(state)?;
        result
    }

    /// Sync state.
    pub async fn sync_state(&self) -> SyncState {
        self.lane.lock().await.sync.state()
    }

    /// Last applied height.
    pub async fn tip_height(&self) -> u64 {
        self.lane.lock().await.tip_height()
    }

    /// Evict unconfirmed records and revert mempool spends whose
    /// transactions left the node's mempool. Returns `(evicted, unspent)`.
    pub async fn reconcile_mempool(&self) -> Result<(usize, usize), WalletError> {
        let (mut state, _) = self.enter().await?;
        let mempool: HashSet<Hash256> = self.ledger.get_raw_mempool().await?.into_iter().collect();
        let counts = state.utxos.reconcile_mempool(&mempool);
        if counts != (0, 0) {
            info!(wallet = %self.name, evicted = counts.0, unspent = counts.1, "reconciled mempool");
            self.persist(&state)?;
        }
        Ok(counts)
    }

    // --- Addresses ---

    /// Hand out a new receive address.
    pub async fn get_new_address(&self, request: AddressRequest, label: &str) -> Result<AddressRecord, WalletError> {
        let (mut state, crypto) = self.enter().await?;
        let record = state.book.derive_next(crypto, request, Chain::Receive, label)?;
        self.persist(&state)?;
        Ok(record)
    }

    /// Hand out a new change address.
    pub async fn get_raw_change_address(&self, request: AddressRequest) -> Result<AddressRecord, WalletError> {
        let (mut state, crypto) = self.enter().await?;
        let record = state.book.derive_next(crypto, request, Chain::Change, "")?;
        self.persist(&state)?;
        Ok(record)
    }

    /// All addresses of the account, imported ones included.
    pub async fn get_addresses(&self) -> Vec<AddressRecord> {
        let state = self.lane.lock().await;
        state.book.get_addresses().into_iter().cloned().collect()
    }

    /// Addresses carrying `label`.
    pub async fn get_addresses_by_label(&self, label: &str) -> Vec<AddressRecord> {
        let state = self.lane.lock().await;
        state
            .book
            .get_addresses_by_label(label)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Record for an address, plain or confidential.
    pub async fn get_address_info(&self, address: &str) -> Result<AddressRecord, WalletError> {
        let state = self.lane.lock().await;
        state.book.get_address_info(address).cloned()
    }

    /// Register a watch-only multisig address.
    pub async fn add_multisig_address(
        &self,
        pubkeys: Vec<Vec<u8>>,
        required: u32,
        request: AddressRequest,
        label: &str,
    ) -> Result<AddressRecord, WalletError> {
        let (mut state, crypto) = self.enter().await?;
        let record = state.book.add_multisig(crypto, pubkeys, required, request, label)?;
        self.persist(&state)?;
        Ok(record)
    }

    /// Register a watch-only script address.
    pub async fn get_script_address(
        &self,
        script: Vec<u8>,
        request: AddressRequest,
        label: &str,
        related_pubkeys: &[Vec<u8>],
    ) -> Result<AddressRecord, WalletError> {
        let (mut state, crypto) = self.enter().await?;
        let record = state
            .book
            .add_script_address(crypto, script, request, label, related_pubkeys)?;
        self.persist(&state)?;
        Ok(record)
    }

    /// Change the gap limit and top up every branch.
    pub async fn set_gap_limit(&self, gap_limit: u32) -> Result<(), WalletError> {
        let (mut state, crypto) = self.enter().await?;
        state.book.set_gap_limit(crypto, gap_limit)?;
        self.persist(&state)
    }

    /// Change the type handed out for `AddressRequest::Default`.
    pub async fn set_default_address_type(&self, address_type: AddressType) -> Result<(), WalletError> {
        let (mut state, crypto) = self.enter().await?;
        state.book.set_default_address_type(crypto, address_type)?;
        self.persist(&state)
    }

    /// Resolve an abstract address request to a concrete type.
    pub async fn convert_address_type(&self, request: AddressRequest, is_script: bool) -> Result<AddressType, WalletError> {
        self.lane.lock().await.book.convert_address_type(request, is_script)
    }

    // --- Balances and outputs ---

    /// Unspent, unlocked totals per asset matching `query`.
    pub async fn get_balance(&self, query: &BalanceQuery) -> BTreeMap<AssetId, u64> {
        let state = self.lane.lock().await;
        balance::get_balance(&state.utxos, state.tip_height(), query)
    }

    /// Unspent, unlocked totals per address and asset with at least `min_conf` confirmations.
    pub async fn get_balances_by_address(&self, min_conf: u64) -> BTreeMap<String, BTreeMap<AssetId, u64>> {
        let state = self.lane.lock().await;
        balance::balances_by_address(&state.utxos, state.tip_height(), min_conf)
    }

    /// Unspent records, oldest first.
    pub async fn list_unspent(&self, query: &ListUnspentQuery) -> Vec<UtxoRecord> {
        let state = self.lane.lock().await;
        let criteria = SelectCriteria {
            policy: ConfirmationPolicy {
                min_conf: query.min_conf,
                max_conf: query.max_conf,
            },
            addresses: query.addresses.clone(),
            path: None,
            asset: query.asset,
            include_locked: query.include_locked,
            solvable_only: false,
        };
        state
            .utxos
            .select(&criteria, state.tip_height())
            .into_iter()
            .cloned()
            .collect()
    }

    /// Number of unconfirmed wallet outputs.
    pub async fn get_mempool_utxo_count(&self) -> usize {
        self.lane.lock().await.utxos.mempool_count()
    }

    /// Hashes of the blocks holding wallet outputs.
    pub async fn get_utxo_block_ids(&self) -> Vec<Hash256> {
        self.lane.lock().await.utxos.block_ids()
    }

    /// The stored record for `txid:vout`, spent or locked included.
    pub async fn get_wallet_tx_data(&self, txid: Hash256, vout: u32) -> Result<UtxoRecord, WalletError> {
        let outpoint = OutPoint::new(txid, vout);
        let state = self.lane.lock().await;
        state
            .utxos
            .get(&outpoint)
            .cloned()
            .ok_or(WalletError::UnknownOutpoint(outpoint))
    }

    /// Set the floor applied to every requested fee rate. Zero is rejected.
    pub async fn set_minimum_fee_rate(&self, rate: u64) -> Result<(), WalletError> {
        if rate == 0 {
            return Err(WalletError::InvalidConfiguration("minimum fee rate must be positive".into()));
        }
        let mut state = self.lane.lock().await;
        state.min_fee_rate = rate;
        info!(wallet = %self.name, rate, "set minimum fee rate");
        self.persist(&state)
    }

    // --- Transactions ---

    /// Decode a transaction serialized for this account's ledger.
    pub async fn decode_raw_transaction(&self, hex: &str) -> Result<Transaction, WalletError> {
        let crypto = self.crypto.get().await?;
        Ok(crypto.decode_transaction(hex, self.network.ledger_kind())?)
    }

    fn encode(&self, crypto: &dyn CryptoProvider, tx: &Transaction) -> Result<String, WalletError> {
        Ok(crypto.encode_transaction(tx, self.network.ledger_kind())?)
    }

    /// Build an unfunded transaction, locking its tracked inputs.
    pub async fn create_raw_transaction(&self, request: CreateRequest) -> Result<(BuildId, String), WalletError> {
        let (mut state, crypto) = self.enter().await?;
        let (builder, mut ctx) = state.build_parts(crypto);
        let id = builder.create(&mut ctx, request)?;
        let tx = state.builds.get(id)?.tx.clone();
        match self.encode(crypto, &tx) {
            Ok(hex) => Ok((id, hex)),
            Err(e) => {
                let state = &mut *state;
                state.builds.discard(&mut state.utxos, id)?;
                Err(e)
            }
        }
    }

    /// Fund a pending build.
    pub async fn fund_build(&self, id: BuildId, options: &FundOptions) -> Result<FundResult, WalletError> {
        let (mut state, crypto) = self.enter().await?;
        let (builder, mut ctx) = state.build_parts(crypto);
        let outcome = builder.fund(&mut ctx, id, options)?;
        let tx = state.builds.get(id)?.tx.clone();
        self.persist(&state)?;
        Ok(FundResult {
            build_id: id,
            hex: self.encode(crypto, &tx)?,
            fee: outcome.fee,
            fee_asset: outcome.fee_asset,
            change_positions: outcome.change_positions,
        })
    }

    /// Fund a transaction given as hex. It becomes a pending build; on
    /// failure nothing stays locked.
    pub async fn fund_raw_transaction(&self, hex: &str, options: &FundOptions) -> Result<FundResult, WalletError> {
        let (state, crypto) = self.enter().await?;
        let tx = crypto.decode_transaction(hex, self.network.ledger_kind())?;
        let mut guard = BuildGuard { state, id: None };
        let state = &mut *guard.state;
        let id = state.builds.adopt(&mut state.utxos, tx)?;
        guard.id = Some(id);

        let (builder, mut ctx) = guard.state.build_parts(crypto);
        let outcome = builder.fund(&mut ctx, id, options)?;
        let tx = guard.state.builds.get(id)?.tx.clone();
        let hex = self.encode(crypto, &tx)?;
        self.persist(&guard.state)?;
        guard.disarm();
        Ok(FundResult {
            build_id: id,
            hex,
            fee: outcome.fee,
            fee_asset: outcome.fee_asset,
            change_positions: outcome.change_positions,
        })
    }

    /// Sign a pending build in place. Its locks stay until broadcast or
    /// discard.
    pub async fn sign_build(&self, id: BuildId, options: &SignOptions) -> Result<SignResponse, WalletError> {
        let (mut state, crypto) = self.enter().await?;
        let tx = state.builds.get(id)?.tx.clone();
        let outcome = SigningCoordinator::new(&state.utxos, &state.book, crypto).sign(&tx, options)?;
        let hex = self.encode(crypto, &outcome.tx)?;
        state.builds.set_tx(id, outcome.tx)?;
        Ok(SignResponse {
            hex,
            complete: outcome.complete,
            errors: outcome.errors,
        })
    }

    /// Sign a transaction given as hex. A pending build spending the same
    /// inputs is updated with the signatures.
    pub async fn sign_raw_transaction_with_wallet(
        &self,
        hex: &str,
        options: &SignOptions,
    ) -> Result<SignResponse, WalletError> {
        let (mut state, crypto) = self.enter().await?;
        let tx = crypto.decode_transaction(hex, self.network.ledger_kind())?;
        let outcome = SigningCoordinator::new(&state.utxos, &state.book, crypto).sign(&tx, options)?;
        let signed_hex = self.encode(crypto, &outcome.tx)?;
        let inputs: Vec<OutPoint> = tx.spent_outpoints().copied().collect();
        if let Some(id) = state.builds.find_by_inputs(&inputs) {
            state.builds.set_tx(id, outcome.tx)?;
        }
        Ok(SignResponse {
            hex: signed_hex,
            complete: outcome.complete,
            errors: outcome.errors,
        })
    }

    /// Per-input signatures for a transaction given as hex.
    pub async fn get_signatures(
        &self,
        hex: &str,
        options: &SignOptions,
    ) -> Result<(Vec<SignatureData>, Vec<ErrorOutPoint>), WalletError> {
        let (state, crypto) = self.enter().await?;
        let tx = crypto.decode_transaction(hex, self.network.ledger_kind())?;
        SigningCoordinator::new(&state.utxos, &state.book, crypto).get_signatures(&tx, options)
    }

    /// Cancel a pending build and release its locks.
    pub async fn discard(&self, id: BuildId) -> Result<(), WalletError> {
        let mut state = self.lane.lock().await;
        let state = &mut *state;
        state.builds.discard(&mut state.utxos, id)?;
        Ok(())
    }

    /// Number of pending builds.
    pub async fn pending_builds(&self) -> usize {
        self.lane.lock().await.builds.len()
    }

    /// Broadcast a signed transaction. Never retried.
    ///
    /// On success its tracked inputs become mempool-spent, its wallet
    /// outputs are recorded as unconfirmed and the matching build retires.
    /// On failure the build is kept with its locks.
    pub async fn send_raw_transaction(&self, hex: &str) -> Result<Hash256, WalletError> {
        let (mut state, crypto) = self.enter().await?;
        let tx = crypto.decode_transaction(hex, self.network.ledger_kind())?;
        let inputs: Vec<OutPoint> = tx.spent_outpoints().copied().collect();
        let build_id = state.builds.find_by_inputs(&inputs);
        self.broadcast(&mut state, crypto, hex, &tx, build_id).await
    }

    async fn broadcast(
        &self,
        state: &mut AccountState,
        crypto: &dyn CryptoProvider,
        hex: &str,
        tx: &Transaction,
        build_id: Option<BuildId>,
    ) -> Result<Hash256, WalletError> {
        let txid = match self.ledger.send_raw_transaction(hex).await {
            Ok(txid) => txid,
            Err(e) => {
                warn!(wallet = %self.name, build = ?build_id, error = %e, "broadcast failed");
                return Err(WalletError::BroadcastFailed {
                    hex: hex.to_string(),
                    build_id,
                    cause: Box::new(e.into()),
                });
            }
        };
        let (_, mut ctx) = state.sync_parts(crypto);
        let (received, spent) = apply_transaction(&mut ctx, tx, None);
        if let Some(id) = build_id {
            state.builds.complete(id)?;
        }
        info!(wallet = %self.name, %txid, spent, received, "broadcast transaction");
        self.persist(state)?;
        Ok(txid)
    }

    /// Pay `request.amount` to `request.address`: create, fund, sign and
    /// broadcast as one unit. Any failure before broadcast releases every
    /// lock taken; a failed broadcast keeps the signed build.
    pub async fn send_to_address(&self, request: &SendRequest) -> Result<Hash256, WalletError> {
        let (state, crypto) = self.enter().await?;
        let mut guard = BuildGuard { state, id: None };

        let create = CreateRequest {
            version: 2,
            lock_time: 0,
            inputs: Vec::new(),
            outputs: vec![Recipient {
                address: request.address.clone(),
                amount: request.amount,
                asset: request.asset,
            }],
            replaceable: request.replaceable,
            fee: None,
        };
        let (builder, mut ctx) = guard.state.build_parts(crypto);
        let id = builder.create(&mut ctx, create)?;
        guard.id = Some(id);

        let options = FundOptions {
            fee_asset: request.fee_asset,
            fee_rate: request.fee_rate,
            change_type: AddressRequest::Default,
        };
        let (builder, mut ctx) = guard.state.build_parts(crypto);
        builder.fund(&mut ctx, id, &options)?;

        let tx = guard.state.builds.get(id)?.tx.clone();
        let signed = SigningCoordinator::new(&guard.state.utxos, &guard.state.book, crypto)
            .sign(&tx, &SignOptions::default())?;
        if !signed.complete {
            return Err(WalletError::SigningFailed(signed.errors));
        }
        let hex = self.encode(crypto, &signed.tx)?;
        guard.state.builds.set_tx(id, signed.tx.clone())?;

        guard.disarm();
        self.broadcast(&mut guard.state, crypto, &hex, &signed.tx, Some(id)).await
    }
}

impl std::fmt::Debug for WalletService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletService")
            .field("name", &self.name)
            .field("network", &self.network)
            .finish()
    }
}
