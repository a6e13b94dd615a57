use std::path::PathBuf;
use thiserror::Error;

/// Configuration problems detected before the daemon is spawned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Either an RPC password or legacy RPC security must be configured")]
    MissingRpcCredential,

    #[error("An RPC password and legacy RPC security are mutually exclusive")]
    ConflictingRpcCredential,

    #[error("No wallet container file configured")]
    MissingContainerFile,

    #[error("Wallet container file '{0}' does not exist")]
    ContainerFileNotFound(PathBuf),
}

/// An inconsistency in the static command table.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandTableError {
    #[error("Duplicate command name '{0}'")]
    DuplicateName(&'static str),

    #[error("Command '{0}' does not resolve back to itself")]
    Unresolved(&'static str),
}

/// Errors that end the service run-loop.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("The wallet container password is wrong")]
    WrongPassword,

    #[error("Failed to spawn the wallet daemon: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Failed to set up the wallet daemon's terminal: {0:#}")]
    Terminal(anyhow::Error),
}
