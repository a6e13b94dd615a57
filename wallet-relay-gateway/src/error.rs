use thiserror::Error;
use wallet_relay_connector::RpcError;

/// Defines the primary error types for the websocket gateway.
///
/// Request errors are rendered into the `error` field of the reply sent to the
/// requesting connection and never leave it.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Malformed frame: {0}")]
    BadFrame(#[from] serde_json::Error),

    #[error("Unknown command '{0}'")]
    UnknownCommand(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("No gateway secret configured; set gateway.secret")]
    MissingSecret,
}
