//! # Command table
//!
//! The complete, enumerated set of requests a remote client may issue. Every
//! command maps 1:1 onto a daemon RPC method of the same name, except
//! `newTransfer`, which is answered locally.

use crate::error::CommandTableError;
use crate::rpc::{RpcError, WalletRpc};
use serde_json::{json, Value};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    GetStatus,
    GetNodeFeeInfo,
    GetViewKey,
    GetSpendKeys,
    GetMnemonicSeed,
    GetAddresses,
    CreateAddress,
    DeleteAddress,
    GetBalance,
    GetBlockHashes,
    GetTransactionHashes,
    GetTransactions,
    GetUnconfirmedTransactionHashes,
    GetTransaction,
    Save,
    Reset,
    NewTransfer,
    SendTransaction,
    CreateDelayedTransaction,
    GetDelayedTransactionHashes,
    DeleteDelayedTransaction,
    SendDelayedTransaction,
    SendFusionTransaction,
    EstimateFusion,
}

impl Command {
    pub const ALL: [Command; 24] = [
        Command::GetStatus,
        Command::GetNodeFeeInfo,
        Command::GetViewKey,
        Command::GetSpendKeys,
        Command::GetMnemonicSeed,
        Command::GetAddresses,
        Command::CreateAddress,
        Command::DeleteAddress,
        Command::GetBalance,
        Command::GetBlockHashes,
        Command::GetTransactionHashes,
        Command::GetTransactions,
        Command::GetUnconfirmedTransactionHashes,
        Command::GetTransaction,
        Command::Save,
        Command::Reset,
        Command::NewTransfer,
        Command::SendTransaction,
        Command::CreateDelayedTransaction,
        Command::GetDelayedTransactionHashes,
        Command::DeleteDelayedTransaction,
        Command::SendDelayedTransaction,
        Command::SendFusionTransaction,
        Command::EstimateFusion,
    ];

    /// The wire name, which is also the daemon RPC method name.
    pub fn name(self) -> &'static str {
        match self {
            Command::GetStatus => "getStatus",
            Command::GetNodeFeeInfo => "getNodeFeeInfo",
            Command::GetViewKey => "getViewKey",
            Command::GetSpendKeys => "getSpendKeys",
            Command::GetMnemonicSeed => "getMnemonicSeed",
            Command::GetAddresses => "getAddresses",
            Command::CreateAddress => "createAddress",
            Command::DeleteAddress => "deleteAddress",
            Command::GetBalance => "getBalance",
            Command::GetBlockHashes => "getBlockHashes",
            Command::GetTransactionHashes => "getTransactionHashes",
            Command::GetTransactions => "getTransactions",
            Command::GetUnconfirmedTransactionHashes => "getUnconfirmedTransactionHashes",
            Command::GetTransaction => "getTransaction",
            Command::Save => "save",
            Command::Reset => "reset",
            Command::NewTransfer => "newTransfer",
            Command::SendTransaction => "sendTransaction",
            Command::CreateDelayedTransaction => "createDelayedTransaction",
            Command::GetDelayedTransactionHashes => "getDelayedTransactionHashes",
            Command::DeleteDelayedTransaction => "deleteDelayedTransaction",
            Command::SendDelayedTransaction => "sendDelayedTransaction",
            Command::SendFusionTransaction => "sendFusionTransaction",
            Command::EstimateFusion => "estimateFusion",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.name() == name)
    }

    /// Whether the command is answered without calling the daemon.
    pub fn is_local(self) -> bool {
        matches!(self, Command::NewTransfer)
    }

    /// Checks that every wire name is unique and resolves back to its command.
    pub fn validate_table() -> Result<(), CommandTableError> {
        let mut seen = HashSet::new();
        for command in Self::ALL {
            if !seen.insert(command.name()) {
                return Err(CommandTableError::DuplicateName(command.name()));
            }
            if Self::from_name(command.name()) != Some(command) {
                return Err(CommandTableError::Unresolved(command.name()));
            }
        }
        Ok(())
    }

    /// Executes the command against the daemon (or locally for `newTransfer`).
    pub async fn execute(self, rpc: &dyn WalletRpc, params: Value) -> Result<Value, RpcError> {
        if self.is_local() {
            return new_transfer(&params);
        }
        rpc.call(self.name(), params).await
    }
}

/// Builds a transfer object suitable for the `transfers` list of `sendTransaction`.
fn new_transfer(params: &Value) -> Result<Value, RpcError> {
    let address = params
        .get("address")
        .and_then(Value::as_str)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| RpcError::InvalidParams("'address' must be a non-empty string".into()))?;
    let amount = params
        .get("amount")
        .and_then(Value::as_f64)
        .filter(|a| *a > 0.0)
        .ok_or_else(|| RpcError::InvalidParams("'amount' must be a positive number".into()))?;
    Ok(json!({ "address": address, "amount": amount }))
}
