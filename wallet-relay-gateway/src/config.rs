use crate::error::GatewayError;
use crate::gateway::protocol::hash_secret;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;
use wallet_relay_connector::config::ConnectorConfig;
use wallet_relay_logger::LogConfig;

/// Prefix of environment overrides, e.g. `WALLET_RELAY__GATEWAY__SECRET`.
const ENV_PREFIX: &str = "WALLET_RELAY";

/// The top-level configuration for the wallet relay application.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct RelayConfig {
    #[serde(default)]
    pub connector: ConnectorConfig,
    #[serde(default)]
    pub gateway: GatewaySettings,
}

/// Contains settings that are unique to the relay binary.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct GatewaySettings {
    /// Directory of the sled database holding the scan cursor.
    pub db_path: String,
    pub ws: WsConfig,
    /// Shared secret clients prove knowledge of during the handshake.
    pub secret: String,
    /// Seconds an unauthenticated connection may stay open.
    pub auth_timeout_secs: u64,
    /// Frames queued per connection before broadcasts to it start failing.
    pub outbound_buffer: usize,
    /// Start the daemon again after it exits on its own.
    pub auto_restart: bool,
    pub restart_delay_secs: u64,
    pub log: LogConfig,
}

/// Websocket listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct WsConfig {
    pub host: String,
    pub port: u16,
}

impl GatewaySettings {
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }

    /// The hex digest of the configured secret.
    pub fn secret_hash(&self) -> Result<String, GatewayError> {
        if self.secret.is_empty() {
            return Err(GatewayError::MissingSecret);
        }
        Ok(hash_secret(&self.secret))
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            db_path: "./wallet_relay.db".to_string(),
            ws: WsConfig::default(),
            secret: String::new(),
            auth_timeout_secs: 10,
            outbound_buffer: 256,
            auto_restart: true,
            restart_delay_secs: 5,
            log: LogConfig::default(),
        }
    }
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8071,
        }
    }
}

/// Loads the relay configuration from an optional TOML file plus environment
/// overrides.
///
/// Without a file, every value not set through the environment takes its
/// default.
pub fn load_config(path: Option<&str>) -> Result<RelayConfig> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::with_name(path));
    }
    builder = builder.add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"));

    let source = path.unwrap_or("environment");
    let settings: RelayConfig = builder
        .build()
        .context(format!("Failed to build configuration from '{}'", source))?
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    Ok(settings)
}
