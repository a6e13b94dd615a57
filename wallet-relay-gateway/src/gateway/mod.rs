//! # WebSocket Gateway
//!
//! Exposes the wallet service to remote clients over a websocket at
//! `ws://<host>:<port>/`.
//!
//! ### Protocol
//!
//! - On connect the server sends `challenge`. The client answers with
//!   `challenge` carrying the hex SHA-256 of the shared secret and receives
//!   `auth: true` or `auth: false`. A wrong answer, or none within the auth
//!   timeout, closes the connection.
//! - Authenticated connections receive every public service event and may send
//!   any command of the [`Command`](wallet_relay_connector::Command) table. The
//!   reply reuses the command's event name and carries `{nonce, data}` or
//!   `{nonce, error}`.
//! - `logout` leaves the authenticated set and closes the connection.

mod hub;
pub mod protocol;
mod session;
mod ws;

pub use hub::{GatewayEvent, Hub, HubOptions};

use crate::config::GatewaySettings;
use anyhow::{Context, Result};
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use wallet_relay_connector::WalletServiceHandle;

/// A running gateway. Dropping it leaves the server running; call
/// [`GatewayServer::stop`] to tear it down.
pub struct GatewayServer {
    local_addr: SocketAddr,
    hub: Arc<Hub>,
    tasks: Vec<JoinHandle<()>>,
}

impl GatewayServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    pub fn stop(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

/// The main entry point to initialize and start the websocket server.
pub async fn start(settings: &GatewaySettings, service: WalletServiceHandle) -> Result<GatewayServer> {
    let secret_hash = settings.secret_hash()?;
    let events = service.subscribe();
    let hub = Arc::new(Hub::new(
        service,
        secret_hash,
        HubOptions {
            auth_timeout: settings.auth_timeout(),
            outbound_buffer: settings.outbound_buffer,
        },
    ));

    let addr = format!("{}:{}", settings.ws.host, settings.ws.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind gateway to {}", addr))?;
    let local_addr = listener.local_addr()?;

    let app = Router::new()
        .route("/", get(ws::websocket_handler))
        .with_state(hub.clone());

    tracing::info!("WebSocket gateway listening on ws://{}/", local_addr);

    let relay = tokio::spawn(hub.clone().relay(events));
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Gateway server failed: {}", e);
        }
    });

    Ok(GatewayServer {
        local_addr,
        hub,
        tasks: vec![relay, server],
    })
}
