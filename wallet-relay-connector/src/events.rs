//! # Event Bus
//!
//! Every state change the connector observes is published as a [`ServiceEvent`]
//! on a single [`EventBus`]. Local listeners and the gateway subscribe to the
//! bus instead of to the supervisor itself, so any number of independent
//! consumers can follow the daemon's lifecycle.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;

/// One reply of the daemon's `getStatus` call. Produced fresh on every poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub block_count: u64,
    pub known_block_count: u64,
    #[serde(default)]
    pub last_block_hash: String,
    #[serde(default)]
    pub peer_count: u64,
}

/// A single wallet-owned transfer leg of a daemon transaction.
///
/// Amounts are in human units (already divided by the configured divisor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub transaction_hash: String,
    pub block_hash: String,
    pub block_index: u64,
    pub amount: f64,
    pub fee: f64,
    pub address: String,
    pub payment_id: String,
    pub unlock_time: u64,
    pub timestamp: u64,
    pub inbound: bool,
    pub is_base: bool,
}

/// All events the connector can publish.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceEvent {
    /// The daemon was spawned with the given command line. Not forwarded to remote clients.
    Start { command_line: String },
    Alive,
    /// The daemon exited. `expected` is set when the exit was requested through
    /// `stop`, `restart` or `shutdown`; it is not part of the wire payload.
    Close {
        exit_code: Option<i32>,
        expected: bool,
    },
    /// A raw line of daemon console output.
    Data(String),
    Down,
    Error(String),
    Info(String),
    Save,
    Scan { from: u64, to: u64 },
    Status(StatusSnapshot),
    Synced,
    Transaction(TransactionRecord),
    Warning(String),
}

impl ServiceEvent {
    /// The event name used on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            ServiceEvent::Start { .. } => "start",
            ServiceEvent::Alive => "alive",
            ServiceEvent::Close { .. } => "close",
            ServiceEvent::Data(_) => "data",
            ServiceEvent::Down => "down",
            ServiceEvent::Error(_) => "error",
            ServiceEvent::Info(_) => "info",
            ServiceEvent::Save => "save",
            ServiceEvent::Scan { .. } => "scan",
            ServiceEvent::Status(_) => "status",
            ServiceEvent::Synced => "synced",
            ServiceEvent::Transaction(_) => "transaction",
            ServiceEvent::Warning(_) => "warning",
        }
    }

    /// The JSON payload sent alongside the event name.
    pub fn payload(&self) -> Value {
        match self {
            ServiceEvent::Start { command_line } => Value::String(command_line.clone()),
            ServiceEvent::Alive | ServiceEvent::Down | ServiceEvent::Save | ServiceEvent::Synced => {
                Value::Null
            }
            ServiceEvent::Close { exit_code, .. } => json!(exit_code),
            ServiceEvent::Data(text)
            | ServiceEvent::Error(text)
            | ServiceEvent::Info(text)
            | ServiceEvent::Warning(text) => Value::String(text.clone()),
            ServiceEvent::Scan { from, to } => json!({ "from": from, "to": to }),
            ServiceEvent::Status(snapshot) => json!(snapshot),
            ServiceEvent::Transaction(record) => json!(record),
        }
    }

    /// Whether the event is relayed to authenticated remote connections.
    pub fn is_public(&self) -> bool {
        !matches!(self, ServiceEvent::Start { .. })
    }
}

/// A clonable publisher/subscriber handle over a broadcast channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ServiceEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event. Having no subscribers is not an error.
    pub fn emit(&self, event: ServiceEvent) {
        match &event {
            ServiceEvent::Error(message) => tracing::error!(event = "error", "{}", message),
            ServiceEvent::Warning(message) => tracing::warn!(event = "warning", "{}", message),
            ServiceEvent::Data(line) => tracing::trace!(event = "data", "{}", line),
            other => tracing::debug!(event = other.name(), payload = %other.payload()),
        }
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
