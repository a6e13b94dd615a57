//! # JSON-RPC client
//!
//! [`JsonRpcClient`] is the production implementation of [`WalletRpc`]. It posts
//! JSON-RPC 2.0 requests to the daemon's `/json_rpc` endpoint and converts
//! amounts between the daemon's atomic units and human units, so nothing above
//! this layer ever rescales a value.

use crate::config::{DaemonConfig, RpcConfig};
use crate::rpc::{RpcError, WalletRpc};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    #[serde(default)]
    code: i64,
    message: String,
}

/// A typed JSON-RPC client for the wallet daemon.
#[derive(Debug)]
pub struct JsonRpcClient {
    inner: Client,
    url: String,
    password: Option<String>,
    divisor: f64,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    /// Builds a client for the daemon described by `daemon`.
    pub fn new(daemon: &DaemonConfig, rpc: &RpcConfig) -> Result<Self, RpcError> {
        let host = match daemon.bind_address.as_str() {
            "0.0.0.0" => "127.0.0.1",
            other => other,
        };
        let url = format!("http://{}:{}/json_rpc", host, daemon.bind_port);
        Self::with_url(url, daemon.rpc_password.clone(), rpc)
    }

    /// Builds a client for an explicit endpoint URL.
    pub fn with_url(
        url: impl Into<String>,
        password: Option<String>,
        rpc: &RpcConfig,
    ) -> Result<Self, RpcError> {
        let inner = Client::builder()
            .timeout(rpc.timeout())
            .build()
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        Ok(Self {
            inner,
            url: url.into(),
            password,
            divisor: rpc.decimal_divisor.max(1) as f64,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl WalletRpc for JsonRpcClient {
    async fn call(&self, method: &str, mut params: Value) -> Result<Value, RpcError> {
        scale_params(method, &mut params, self.divisor);

        let payload = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
            password: self.password.as_deref(),
        };

        let response = self
            .inner
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(RpcError::HttpStatus(response.status().as_u16()));
        }

        let response: JsonRpcResponse = response.json().await.map_err(transport_error)?;
        if let Some(error) = response.error {
            return Err(RpcError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        let mut result = response.result.ok_or(RpcError::EmptyResponse)?;
        scale_reply(method, &mut result, self.divisor);
        Ok(result)
    }
}

fn transport_error(err: reqwest::Error) -> RpcError {
    if err.is_timeout() {
        RpcError::Timeout
    } else {
        RpcError::Transport(err.to_string())
    }
}

/// Converts human-unit amounts in outgoing parameters to atomic units.
pub(crate) fn scale_params(method: &str, params: &mut Value, divisor: f64) {
    match method {
        "sendTransaction" | "createDelayedTransaction" => {
            if let Some(transfers) = params.get_mut("transfers").and_then(Value::as_array_mut) {
                for transfer in transfers {
                    to_atomic(transfer, "amount", divisor);
                }
            }
            to_atomic(params, "fee", divisor);
        }
        "sendFusionTransaction" | "estimateFusion" => to_atomic(params, "threshold", divisor),
        _ => {}
    }
}

/// Converts atomic-unit amounts in a reply to human units.
pub(crate) fn scale_reply(method: &str, result: &mut Value, divisor: f64) {
    match method {
        "getBalance" => {
            to_human(result, "availableBalance", divisor);
            to_human(result, "lockedAmount", divisor);
        }
        "getNodeFeeInfo" => to_human(result, "amount", divisor),
        "getTransactions" => {
            if let Some(items) = result.get_mut("items").and_then(Value::as_array_mut) {
                for item in items {
                    if let Some(txs) = item.get_mut("transactions").and_then(Value::as_array_mut) {
                        txs.iter_mut().for_each(|tx| scale_transaction(tx, divisor));
                    }
                }
            }
        }
        "getTransaction" => {
            if let Some(tx) = result.get_mut("transaction") {
                scale_transaction(tx, divisor);
            }
        }
        _ => {}
    }
}

fn scale_transaction(tx: &mut Value, divisor: f64) {
    to_human(tx, "amount", divisor);
    to_human(tx, "fee", divisor);
    if let Some(transfers) = tx.get_mut("transfers").and_then(Value::as_array_mut) {
        for transfer in transfers {
            to_human(transfer, "amount", divisor);
        }
    }
}

fn to_human(value: &mut Value, key: &str, divisor: f64) {
    if let Some(slot) = value.get_mut(key) {
        if let Some(atomic) = slot.as_f64() {
            *slot = Value::from(atomic / divisor);
        }
    }
}

fn to_atomic(value: &mut Value, key: &str, divisor: f64) {
    if let Some(slot) = value.get_mut(key) {
        if let Some(human) = slot.as_f64() {
            *slot = Value::from((human * divisor).round() as i64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn balances_are_divided() {
        let mut reply = json!({ "availableBalance": 12345, "lockedAmount": 50 });
        scale_reply("getBalance", &mut reply, 100.0);
        assert_eq!(reply, json!({ "availableBalance": 123.45, "lockedAmount": 0.5 }));
    }

    #[test]
    fn transaction_legs_are_divided() {
        let mut reply = json!({
            "items": [{ "transactions": [{
                "amount": -1000, "fee": 10,
                "transfers": [{ "address": "A", "amount": -1010 }]
            }]}]
        });
        scale_reply("getTransactions", &mut reply, 100.0);
        let tx = &reply["items"][0]["transactions"][0];
        assert_eq!(tx["amount"], json!(-10.0));
        assert_eq!(tx["fee"], json!(0.1));
        assert_eq!(tx["transfers"][0]["amount"], json!(-10.1));
    }

    #[test]
    fn outgoing_transfers_are_multiplied() {
        let mut params = json!({
            "transfers": [{ "address": "A", "amount": 1.25 }],
            "fee": 0.1,
            "anonymity": 3
        });
        scale_params("sendTransaction", &mut params, 100.0);
        assert_eq!(params["transfers"][0]["amount"], json!(125));
        assert_eq!(params["fee"], json!(10));
        assert_eq!(params["anonymity"], json!(3));
    }

    #[test]
    fn other_methods_are_untouched() {
        let mut params = json!({ "amount": 5 });
        scale_params("getStatus", &mut params, 100.0);
        assert_eq!(params, json!({ "amount": 5 }));
    }

    #[test]
    fn endpoint_rewrites_wildcard_bind() {
        let daemon = DaemonConfig {
            bind_address: "0.0.0.0".into(),
            ..DaemonConfig::default()
        };
        let client = JsonRpcClient::new(&daemon, &RpcConfig::default()).unwrap();
        assert_eq!(client.endpoint(), "http://127.0.0.1:8070/json_rpc");
    }
}
