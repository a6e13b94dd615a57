//! # Wallet RPC boundary
//!
//! The connector never talks to the daemon's RPC surface directly. It goes
//! through the [`WalletRpc`] trait, which makes the supervisor usable with the
//! real [`JsonRpcClient`](crate::client::JsonRpcClient) as well as with test doubles.

use crate::events::StatusSnapshot;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

/// Failures of a single RPC call.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("RPC request timed out")]
    Timeout,

    #[error("RPC transport error: {0}")]
    Transport(String),

    #[error("RPC endpoint returned HTTP status {0}")]
    HttpStatus(u16),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("RPC reply carried neither a result nor an error")]
    EmptyResponse,

    #[error("Malformed RPC reply: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
}

/// An asynchronous call-by-name interface to the wallet daemon.
///
/// Implementations issue exactly one named call per invocation and resolve
/// with the raw JSON `result`, amounts already scaled to human units.
#[async_trait]
pub trait WalletRpc: Send + Sync {
    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError>;
}

/// One block's worth of wallet transactions as returned by `getTransactions`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockTransactions {
    #[serde(default)]
    pub block_hash: String,
    #[serde(default)]
    pub transactions: Vec<DaemonTransaction>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonTransaction {
    pub transaction_hash: String,
    pub block_index: u64,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub is_base: bool,
    #[serde(default)]
    pub unlock_time: u64,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub fee: f64,
    #[serde(default)]
    pub payment_id: String,
    #[serde(default)]
    pub transfers: Vec<DaemonTransfer>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonTransfer {
    #[serde(default)]
    pub address: String,
    pub amount: f64,
}

#[derive(Debug, Deserialize)]
struct AddressesReply {
    addresses: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TransactionsReply {
    #[serde(default)]
    items: Vec<BlockTransactions>,
}

fn typed<T: DeserializeOwned>(value: Value) -> Result<T, RpcError> {
    serde_json::from_value(value).map_err(RpcError::from)
}

/// Typed helpers for the calls the connector itself depends on.
impl dyn WalletRpc {
    pub async fn get_status(&self) -> Result<StatusSnapshot, RpcError> {
        typed(self.call("getStatus", json!({})).await?)
    }

    pub async fn save(&self) -> Result<(), RpcError> {
        self.call("save", json!({})).await.map(|_| ())
    }

    pub async fn get_addresses(&self) -> Result<Vec<String>, RpcError> {
        let reply: AddressesReply = typed(self.call("getAddresses", json!({})).await?)?;
        Ok(reply.addresses)
    }

    pub async fn get_transactions(
        &self,
        first_block_index: u64,
        block_count: u64,
    ) -> Result<Vec<BlockTransactions>, RpcError> {
        let params = json!({
            "firstBlockIndex": first_block_index,
            "blockCount": block_count,
        });
        let reply: TransactionsReply = typed(self.call("getTransactions", params).await?)?;
        Ok(reply.items)
    }
}
