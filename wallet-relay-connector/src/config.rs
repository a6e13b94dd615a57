use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// The top-level configuration for the `wallet-relay-connector` library.
///
/// This struct aggregates everything the supervisor needs: how to launch the
/// wallet daemon, how to reach its RPC surface, and how often to poll, save and
/// scan. It is typically deserialized from a configuration file and passed to
/// the [`WalletService`](crate::service::WalletService) upon initialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConnectorConfig {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub channels: ChannelConfig,
}

/// Launch settings for the supervised wallet daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DaemonConfig {
    /// Path (or name on `$PATH`) of the daemon executable.
    pub binary: PathBuf,
    /// Address the daemon's RPC server binds to.
    pub bind_address: String,
    pub bind_port: u16,
    /// RPC password. Mutually exclusive with `rpc_legacy_security`.
    pub rpc_password: Option<String>,
    /// Run the RPC server without a password.
    pub rpc_legacy_security: bool,
    pub container_file: Option<PathBuf>,
    pub container_password: Option<String>,
    pub log_file: Option<PathBuf>,
    pub log_level: u8,
    pub sync_from_zero: bool,
    /// Address of the node the daemon syncs from.
    pub daemon_address: String,
    pub daemon_port: u16,
}

/// Settings for talking to the daemon's JSON-RPC endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RpcConfig {
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Atomic units per human unit. Amounts above the RPC client are human units.
    pub decimal_divisor: u64,
}

/// Timers driving the health and sync monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct MonitorConfig {
    pub polling_interval_secs: u64,
    pub save_interval_secs: u64,
    pub max_polling_failures: u32,
}

/// Behavior of the transaction scan loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ScannerConfig {
    pub scan_interval_secs: u64,
    /// Namespace of the persisted scan cursor.
    pub app_name: String,
}

/// Defines capacities for the channels used within the connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ChannelConfig {
    /// The buffer capacity of the event bus broadcast channel.
    pub event_bus_capacity: usize,
    /// The buffer capacity of the command channel to the service actor.
    pub command_buffer: usize,
}

impl RpcConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl MonitorConfig {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_secs)
    }

    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_secs)
    }

    /// How long polls may keep failing before the daemon is declared down.
    pub fn down_debounce(&self) -> Duration {
        Duration::from_secs(
            self.polling_interval_secs
                .saturating_mul(u64::from(self.max_polling_failures)),
        )
    }
}

impl ScannerConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("wallet-service"),
            bind_address: "127.0.0.1".to_string(),
            bind_port: 8070,
            rpc_password: None,
            rpc_legacy_security: false,
            container_file: None,
            container_password: None,
            log_file: None,
            log_level: 4,
            sync_from_zero: false,
            daemon_address: "127.0.0.1".to_string(),
            daemon_port: 11898,
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2000,
            decimal_divisor: 100,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            polling_interval_secs: 10,
            save_interval_secs: 10,
            max_polling_failures: 3,
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 5,
            app_name: "wallet-relay".to_string(),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            event_bus_capacity: 1024,
            command_buffer: 64,
        }
    }
}
