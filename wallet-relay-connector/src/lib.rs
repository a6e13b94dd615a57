//! A core Rust library for supervising a wallet daemon process.
//!
//! This crate provides the building blocks for services that run a wallet
//! daemon on behalf of remote clients. It spawns and watches the daemon,
//! tracks its health and sync state over JSON-RPC, scans new blocks for
//! wallet-owned transfers and publishes everything it observes as events.
//!
//! # Key Components
//!
//! *   [`service::WalletService`]: The supervisor actor. Owns the daemon process,
//!     the polling, saving and scanning timers, and the process state. Driven
//!     through a clonable [`service::WalletServiceHandle`].
//! *   [`events::EventBus`]: A broadcast bus of [`events::ServiceEvent`]s any
//!     number of consumers can subscribe to.
//! *   [`rpc::WalletRpc`]: The call-by-name RPC boundary, implemented for the real
//!     daemon by [`client::JsonRpcClient`].
//! *   [`commands::Command`]: The fixed table of commands a remote client may issue.
//! *   [`storage::CursorStore`]: Persistence for the scan cursor.

/// JSON-RPC 2.0 client with amount scaling.
pub mod client;
/// The enumerated remote command table.
pub mod commands;
/// Defines configuration structures for the connector.
pub mod config;
pub mod error;
/// Lifecycle events and the broadcast bus.
pub mod events;
/// The pure health and sync state machine.
pub mod monitor;
/// Spawning the daemon and reading its console.
pub mod process;
pub mod rpc;
/// Block range planning and transfer decomposition.
pub mod scanner;
/// Cancellable repeating and one-shot timers.
pub mod scheduler;
/// The supervisor actor.
pub mod service;
/// A trait for persisting the scan cursor.
pub mod storage;

pub use client::JsonRpcClient;
pub use commands::Command;
pub use config::ConnectorConfig;
pub use error::{CommandTableError, ConfigError, ServiceError};
pub use events::{EventBus, ServiceEvent, StatusSnapshot, TransactionRecord};
pub use monitor::{Health, ProcessState};
pub use rpc::{RpcError, WalletRpc};
pub use service::{WalletService, WalletServiceHandle};
pub use storage::CursorStore;
