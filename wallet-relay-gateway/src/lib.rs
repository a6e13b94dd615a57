pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod restart;
pub mod storage;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use config::{load_config, RelayConfig};
use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinError;
use wallet_relay_connector::{Command, JsonRpcClient, ServiceError, WalletService};

use crate::gateway::protocol::hash_secret;
use crate::storage::SledCursorStore;

/// The main entry point for running the relay application logic.
/// This function handles CLI parsing, configuration, and service startup.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(run_cmd) => {
            let config = load_config_from_cli(run_cmd)?;
            wallet_relay_logger::init(&config.gateway.log)?;
            tracing::info!(
                daemon = %config.connector.daemon.binary.display(),
                ws_port = config.gateway.ws.port,
                "Configuration loaded"
            );
            run_relay(config).await
        }
        Commands::HashSecret(cmd) => {
            println!("{}", hash_secret(&cmd.secret));
            Ok(())
        }
    }
}

/// Loads the relay configuration based on the provided CLI command.
fn load_config_from_cli(run_cmd: cli::RunCmd) -> Result<RelayConfig> {
    match run_cmd.config.as_deref() {
        Some(config_path) => println!("Loading configuration from '{}'", config_path),
        None => println!("No config file provided, using default settings."),
    }
    load_config(run_cmd.config.as_deref())
}

/// Starts the wallet service and the gateway, then waits for Ctrl+C or for
/// the service to end on its own.
async fn run_relay(config: RelayConfig) -> Result<()> {
    Command::validate_table().context("Invalid command table")?;

    let db = sled::open(&config.gateway.db_path)
        .with_context(|| format!("Failed to open database at '{}'", config.gateway.db_path))?;
    let store = Arc::new(SledCursorStore::new(db));
    let rpc = Arc::new(JsonRpcClient::new(
        &config.connector.daemon,
        &config.connector.rpc,
    )?);
    tracing::info!("Wallet RPC endpoint: {}", rpc.endpoint());

    let (service, handle) = WalletService::new(Arc::new(config.connector.clone()), rpc, store);
    let mut service_task = tokio::spawn(service.run());

    let gateway = gateway::start(&config.gateway, handle.clone()).await?;

    if config.gateway.auto_restart {
        tokio::spawn(restart::restart_on_close(
            handle.clone(),
            config.gateway.restart_delay(),
        ));
    }
    handle.start().await;

    let outcome = tokio::select! {
        result = &mut service_task => result,
        signal = signal::ctrl_c() => {
            match signal {
                Ok(()) => tracing::info!("Received Ctrl+C, initiating graceful shutdown..."),
                Err(err) => tracing::error!(error = %err, "Failed to listen for shutdown signal."),
            }
            handle.shutdown().await;
            service_task.await
        }
    };

    gateway.stop();
    service_outcome(outcome)?;
    tracing::info!("Shutdown complete.");
    Ok(())
}

fn service_outcome(outcome: Result<Result<(), ServiceError>, JoinError>) -> Result<()> {
    outcome
        .context("Wallet service task failed")?
        .context("Wallet service stopped with an unrecoverable error")
}
