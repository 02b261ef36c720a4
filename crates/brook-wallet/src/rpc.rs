//! JSON-RPC ledger client over HTTP.
//!
//! Speaks the node's wallet-independent methods: `getblockcount`,
//! `getblockhash`, `getblock` (verbosity 2), `getrawmempool` and
//! `sendrawtransaction`.

use jsonrpsee::core::client::{ClientT, Error as ClientError};
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde::Deserialize;

use brook_core::error::RpcError;
use brook_core::traits::LedgerRpc;
use brook_core::types::{Hash256, RawBlock};

/// Node error code for an unknown block or transaction.
const RPC_INVALID_ADDRESS_OR_KEY: i32 = -5;

#[derive(Debug, Deserialize)]
struct BlockJson {
    hash: String,
    height: u64,
    #[serde(rename = "previousblockhash")]
    previous_block_hash: Option<String>,
    tx: Vec<TxJson>,
}

#[derive(Debug, Deserialize)]
struct TxJson {
    hex: String,
}

fn parse_hash(s: &str) -> Result<Hash256, RpcError> {
    Hash256::from_hex(s).map_err(|e| RpcError::InvalidResponse(e.to_string()))
}

fn map_error(e: ClientError) -> RpcError {
    match e {
        ClientError::Call(obj) if obj.code() == RPC_INVALID_ADDRESS_OR_KEY => {
            RpcError::NotFound(obj.message().to_string())
        }
        ClientError::Call(obj) => RpcError::Rejected(format!("{} ({})", obj.message(), obj.code())),
        ClientError::ParseError(e) => RpcError::InvalidResponse(e.to_string()),
        other => RpcError::Transport(other.to_string()),
    }
}

impl TryFrom<BlockJson> for RawBlock {
    type Error = RpcError;

    fn try_from(block: BlockJson) -> Result<Self, RpcError> {
        Ok(RawBlock {
            hash: parse_hash(&block.hash)?,
            height: block.height,
            prev_hash: match block.previous_block_hash {
                Some(h) => parse_hash(&h)?,
                None => Hash256::ZERO,
            },
            tx_hex: block.tx.into_iter().map(|t| t.hex).collect(),
        })
    }
}

/// [`LedgerRpc`] over a node's JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct JsonRpcLedger {
    client: HttpClient,
}

impl JsonRpcLedger {
    /// Connect to `endpoint`.
    pub fn new(endpoint: &str) -> Result<Self, RpcError> {
        let client = HttpClientBuilder::default()
            .build(endpoint)
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl LedgerRpc for JsonRpcLedger {
    async fn get_block_count(&self) -> Result<u64, RpcError> {
        self.client
            .request("getblockcount", rpc_params![])
            .await
            .map_err(map_error)
    }

    async fn get_block_hash(&self, height: u64) -> Result<Hash256, RpcError> {
        let hash: String = self
            .client
            .request("getblockhash", rpc_params![height])
            .await
            .map_err(map_error)?;
        parse_hash(&hash)
    }

    async fn get_block(&self, hash: &Hash256) -> Result<RawBlock, RpcError> {
        let block: BlockJson = self
            .client
            .request("getblock", rpc_params![hash.to_string(), 2])
            .await
            .map_err(map_error)?;
        block.try_into()
    }

    async fn get_raw_mempool(&self) -> Result<Vec<Hash256>, RpcError> {
        let txids: Vec<String> = self
            .client
            .request("getrawmempool", rpc_params![])
            .await
            .map_err(map_error)?;
        txids.iter().map(|t| parse_hash(t)).collect()
    }

    async fn send_raw_transaction(&self, hex: &str) -> Result<Hash256, RpcError> {
        let txid: String = self
            .client
            .request("sendrawtransaction", rpc_params![hex])
            .await
            .map_err(map_error)?;
        parse_hash(&txid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonrpsee::types::ErrorObjectOwned;

    fn hex32(b: u8) -> String {
        hex::encode([b; 32])
    }

    #[test]
    fn block_json_to_raw_block() {
        let json = serde_json::json!({
            "hash": hex32(2),
            "height": 7,
            "previousblockhash": hex32(1),
            "tx": [{"hex": "aa"}, {"hex": "bb"}],
            "confirmations": 1,
        });
        let block: BlockJson = serde_json::from_value(json).unwrap();
        let raw = RawBlock::try_from(block).unwrap();
        assert_eq!(raw.hash, Hash256([2; 32]));
        assert_eq!(raw.prev_hash, Hash256([1; 32]));
        assert_eq!(raw.height, 7);
        assert_eq!(raw.tx_hex, vec!["aa".to_string(), "bb".to_string()]);
    }

    #[test]
    fn genesis_has_zero_parent() {
        let json = serde_json::json!({"hash": hex32(3), "height": 0, "tx": []});
        let block: BlockJson = serde_json::from_value(json).unwrap();
        assert_eq!(RawBlock::try_from(block).unwrap().prev_hash, Hash256::ZERO);
    }

    #[test]
    fn bad_hash_is_invalid_response() {
        let json = serde_json::json!({"hash": "zz", "height": 0, "tx": []});
        let block: BlockJson = serde_json::from_value(json).unwrap();
        assert!(matches!(RawBlock::try_from(block), Err(RpcError::InvalidResponse(_))));
    }

    #[test]
    fn error_mapping() {
        let not_found = ClientError::Call(ErrorObjectOwned::owned(-5, "Block not found", None::<()>));
        assert_eq!(map_error(not_found), RpcError::NotFound("Block not found".into()));

        let rejected = ClientError::Call(ErrorObjectOwned::owned(-26, "min relay fee not met", None::<()>));
        assert!(matches!(map_error(rejected), RpcError::Rejected(_)));

        assert!(map_error(ClientError::RequestTimeout).is_transport());
    }

    #[test]
    fn connect_builds_client() {
        assert!(JsonRpcLedger::new("http://127.0.0.1:18443").is_ok());
        assert!(matches!(JsonRpcLedger::new("not a url"), Err(RpcError::Transport(_))));
    }
}
