use super::protocol::Frame;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;
use wallet_relay_connector::{ServiceEvent, WalletServiceHandle};

/// Gateway-internal events. Logged and available to local subscribers, never
/// sent to remote connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    AuthSuccess { connection: Uuid },
    AuthFailure { connection: Uuid },
    Error { message: String },
}

impl GatewayEvent {
    pub fn name(&self) -> &'static str {
        match self {
            GatewayEvent::AuthSuccess { .. } => "auth.success",
            GatewayEvent::AuthFailure { .. } => "auth.failure",
            GatewayEvent::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HubOptions {
    pub auth_timeout: Duration,
    pub outbound_buffer: usize,
}

/// Shared state of the gateway: the authenticated connection set and the
/// handle to the wallet service requests are dispatched to.
pub struct Hub {
    pub(super) service: WalletServiceHandle,
    pub(super) secret_hash: String,
    pub(super) options: HubOptions,
    /// Outbound queues of authenticated connections only.
    pub(super) sessions: DashMap<Uuid, mpsc::Sender<Frame>>,
    events: broadcast::Sender<GatewayEvent>,
}

impl Hub {
    pub fn new(service: WalletServiceHandle, secret_hash: String, options: HubOptions) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            service,
            secret_hash,
            options,
            sessions: DashMap::new(),
            events,
        }
    }

    pub fn options(&self) -> &HubOptions {
        &self.options
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }

    pub fn authenticated_count(&self) -> usize {
        self.sessions.len()
    }

    pub(super) fn emit(&self, event: GatewayEvent) {
        match &event {
            GatewayEvent::AuthSuccess { connection } => {
                tracing::info!(connection = %connection, "Connection authenticated")
            }
            GatewayEvent::AuthFailure { connection } => {
                tracing::warn!(connection = %connection, "Connection failed authentication")
            }
            GatewayEvent::Error { message } => tracing::warn!("{}", message),
        }
        let _ = self.events.send(event);
    }

    /// Queues `frame` on every authenticated connection without waiting.
    /// A connection whose queue is full or closed misses the frame.
    pub fn broadcast(&self, frame: &Frame) {
        let targets: Vec<(Uuid, mpsc::Sender<Frame>)> = self
            .sessions
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        for (connection, tx) in targets {
            let reason = match tx.try_send(frame.clone()) {
                Ok(()) => continue,
                Err(TrySendError::Full(_)) => "outbound queue is full",
                Err(TrySendError::Closed(_)) => "connection is closed",
            };
            self.emit(GatewayEvent::Error {
                message: format!(
                    "Failed to deliver '{}' to connection {}: {}",
                    frame.event, connection, reason
                ),
            });
        }
    }

    /// Forwards every public service event to all authenticated connections.
    pub async fn relay(self: Arc<Self>, mut events: broadcast::Receiver<ServiceEvent>) {
        loop {
            match events.recv().await {
                Ok(event) if event.is_public() => {
                    self.broadcast(&Frame::new(event.name(), event.payload()))
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Gateway fell behind the event bus")
                }
                Err(RecvError::Closed) => break,
            }
        }
        tracing::info!("Event bus closed; gateway relay stopped.");
    }
}
