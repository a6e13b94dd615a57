//! Wire format of the gateway: every websocket text message is one JSON
//! [`Frame`], `{"event": <name>, "data": <payload>}`, with `data` omitted for
//! bare signals.

use crate::error::GatewayError;
use constant_time_eq::constant_time_eq;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Sent by the server on connect, answered by the client with its secret hash.
pub const CHALLENGE: &str = "challenge";
/// The server's verdict on a challenge reply.
pub const AUTH: &str = "auth";
/// Sent by an authenticated client to leave and disconnect.
pub const LOGOUT: &str = "logout";
/// Correlation token field of requests and replies.
pub const NONCE: &str = "nonce";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Frame {
    /// A frame carrying `data`. A `null` payload is omitted on the wire.
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data: (!data.is_null()).then_some(data),
        }
    }

    pub fn signal(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: None,
        }
    }

    pub fn parse(text: &str) -> Result<Self, GatewayError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, GatewayError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Lowercase hex SHA-256 of `secret`, the value a client must send in reply to
/// the challenge.
pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Compares an offered hash against the expected one in constant time.
pub fn secret_matches(expected_hash: &str, offered: &str) -> bool {
    let offered = offered.trim().to_ascii_lowercase();
    constant_time_eq(expected_hash.as_bytes(), offered.as_bytes())
}
