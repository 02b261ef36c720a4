//! Ledger client with bounded retry on idempotent reads.
//!
//! Reads (`get_block_count`, `get_block_hash`, `get_block`,
//! `get_raw_mempool`) are retried on transport failure with exponential
//! backoff; node rejections are returned immediately. Broadcast is never
//! retried.

use std::future::Future;
use std::sync::Arc;

use tracing::warn;

use brook_core::error::RpcError;
use brook_core::traits::LedgerRpc;
use brook_core::types::{Hash256, RawBlock};

use crate::config::RetryConfig;
use crate::error::WalletError;

/// A [`LedgerRpc`] wrapped with the wallet's retry policy.
#[derive(Clone)]
pub struct LedgerClient {
    rpc: Arc<dyn LedgerRpc>,
    retry: RetryConfig,
}

impl LedgerClient {
    /// Wrap `rpc` with `retry`.
    pub fn new(rpc: Arc<dyn LedgerRpc>, retry: RetryConfig) -> Self {
        Self { rpc, retry }
    }

    /// The underlying capability.
    pub fn rpc(&self) -> &Arc<dyn LedgerRpc> {
        &self.rpc
    }

    async fn with_retry<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T, WalletError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transport() && attempt + 1 < attempts => {
                    let delay = self.retry.delay(attempt);
                    warn!(op, attempt = attempt + 1, ?delay, error = %e, "ledger read failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Best-chain height.
    pub async fn get_block_count(&self) -> Result<u64, WalletError> {
        self.with_retry("getblockcount", || self.rpc.get_block_count()).await
    }

    /// Best-chain block hash at `height`.
    pub async fn get_block_hash(&self, height: u64) -> Result<Hash256, WalletError> {
        self.with_retry("getblockhash", || self.rpc.get_block_hash(height)).await
    }

    /// Block by hash.
    pub async fn get_block(&self, hash: &Hash256) -> Result<RawBlock, WalletError> {
        self.with_retry("getblock", || self.rpc.get_block(hash)).await
    }

    /// Mempool transaction IDs.
    pub async fn get_raw_mempool(&self) -> Result<Vec<Hash256>, WalletError> {
        self.with_retry("getrawmempool", || self.rpc.get_raw_mempool()).await
    }

    /// Submit a signed transaction. Not retried: a transport error here
    /// leaves it unknown whether the node accepted the transaction.
    pub async fn send_raw_transaction(&self, hex: &str) -> Result<Hash256, RpcError> {
        self.rpc.send_raw_transaction(hex).await
    }
}

impl std::fmt::Debug for LedgerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerClient")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
