//! The per-connection state machine:
//! unauthenticated → authenticated → closed.
//!
//! A session only sees two channels, frames in and frames out, so it runs the
//! same over a websocket or an in-memory pair. Returning from
//! [`Hub::serve_connection`] closes the connection.

use super::hub::{GatewayEvent, Hub};
use super::protocol::{secret_matches, Frame, AUTH, CHALLENGE, LOGOUT, NONCE};
use crate::error::GatewayError;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::timeout;
use uuid::Uuid;
use wallet_relay_connector::Command;

impl Hub {
    pub async fn serve_connection(
        self: Arc<Self>,
        mut inbound: mpsc::Receiver<Frame>,
        outbound: mpsc::Sender<Frame>,
    ) {
        let connection = Uuid::new_v4();
        tracing::debug!(connection = %connection, "Connection opened");

        if outbound.send(Frame::signal(CHALLENGE)).await.is_err() {
            return;
        }

        match timeout(
            self.options.auth_timeout,
            self.authenticate(connection, &mut inbound, &outbound),
        )
        .await
        {
            Ok(true) => {}
            Ok(false) => return,
            Err(_) => {
                tracing::info!(connection = %connection, "Authentication timed out; disconnecting");
                return;
            }
        }

        self.sessions.insert(connection, outbound.clone());
        self.emit(GatewayEvent::AuthSuccess { connection });
        if self.service.state().health.is_alive() {
            let _ = outbound.send(Frame::signal("alive")).await;
        }

        while let Some(frame) = inbound.recv().await {
            match frame.event.as_str() {
                LOGOUT => {
                    tracing::info!(connection = %connection, "Connection logged out");
                    break;
                }
                CHALLENGE => {
                    tracing::debug!(connection = %connection, "Ignoring repeated challenge reply")
                }
                _ => {
                    let hub = self.clone();
                    let outbound = outbound.clone();
                    tokio::spawn(async move { hub.handle_request(frame, outbound).await });
                }
            }
        }

        self.sessions.remove(&connection);
        tracing::debug!(connection = %connection, "Connection closed");
    }

    /// Waits for the challenge reply. Anything else sent before it is ignored.
    async fn authenticate(
        &self,
        connection: Uuid,
        inbound: &mut mpsc::Receiver<Frame>,
        outbound: &mpsc::Sender<Frame>,
    ) -> bool {
        while let Some(frame) = inbound.recv().await {
            if frame.event != CHALLENGE {
                tracing::debug!(
                    connection = %connection,
                    event = %frame.event,
                    "Ignoring frame from unauthenticated connection"
                );
                continue;
            }

            let offered = frame.data.as_ref().and_then(Value::as_str).unwrap_or_default();
            let accepted = secret_matches(&self.secret_hash, offered);
            let _ = outbound.send(Frame::new(AUTH, Value::Bool(accepted))).await;
            if !accepted {
                self.emit(GatewayEvent::AuthFailure { connection });
            }
            return accepted;
        }
        false
    }

    /// Runs one request and sends its reply under the request's event name.
    async fn handle_request(&self, frame: Frame, outbound: mpsc::Sender<Frame>) {
        let Frame { event, data } = frame;
        let (nonce, params) = take_nonce(data);

        let result = match params {
            Ok(params) => self.execute(&event, params).await,
            Err(e) => Err(e),
        };
        let reply = match result {
            Ok(data) => json!({ NONCE: nonce, "data": data }),
            Err(e) => {
                tracing::debug!(command = %event, nonce = %nonce, "Request failed: {}", e);
                json!({ NONCE: nonce, "error": e.to_string() })
            }
        };

        if outbound.send(Frame::new(event, reply)).await.is_err() {
            tracing::debug!(nonce = %nonce, "Connection closed before the reply was sent");
        }
    }

    async fn execute(&self, event: &str, params: Map<String, Value>) -> Result<Value, GatewayError> {
        let command =
            Command::from_name(event).ok_or_else(|| GatewayError::UnknownCommand(event.to_string()))?;
        let rpc = self.service.rpc();
        Ok(command.execute(rpc.as_ref(), Value::Object(params)).await?)
    }
}

/// Splits the correlation token off a request payload, generating one when the
/// client sent none.
fn take_nonce(data: Option<Value>) -> (Value, Result<Map<String, Value>, GatewayError>) {
    match data {
        None | Some(Value::Null) => (random_nonce(), Ok(Map::new())),
        Some(Value::Object(mut params)) => {
            let nonce = params
                .remove(NONCE)
                .filter(|nonce| !nonce.is_null())
                .unwrap_or_else(random_nonce);
            (nonce, Ok(params))
        }
        Some(other) => (
            random_nonce(),
            Err(GatewayError::InvalidParams(format!(
                "request data must be an object, got {}",
                other
            ))),
        ),
    }
}

fn random_nonce() -> Value {
    Value::from(rand::random::<u32>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_is_removed_from_params() {
        let (nonce, params) = take_nonce(Some(json!({ "nonce": 111, "address": "A" })));
        assert_eq!(nonce, json!(111));
        let params = params.unwrap();
        assert!(!params.contains_key(NONCE));
        assert_eq!(params["address"], json!("A"));
    }

    #[test]
    fn missing_nonce_is_generated() {
        let (nonce, params) = take_nonce(None);
        assert!(nonce.is_u64());
        assert!(params.unwrap().is_empty());

        let (nonce, _) = take_nonce(Some(json!({ "nonce": null })));
        assert!(nonce.is_u64());
    }

    #[test]
    fn non_object_data_is_rejected() {
        let (_, params) = take_nonce(Some(json!([1, 2])));
        assert!(matches!(params, Err(GatewayError::InvalidParams(_))));
    }
}
