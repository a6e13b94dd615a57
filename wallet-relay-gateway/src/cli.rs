use clap::{Parser, Subcommand};

/// The main CLI structure for the wallet relay.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the wallet relay.
    /// This spawns and supervises the wallet daemon and serves the websocket gateway.
    Run(RunCmd),
    /// Print the digest a client must answer the gateway challenge with.
    HashSecret(HashSecretCmd),
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunCmd {
    /// Path to the relay configuration TOML file.
    /// If not provided, default values and environment overrides are used.
    #[arg(short, long)]
    pub config: Option<String>,
}

#[derive(Parser, Debug)]
pub struct HashSecretCmd {
    /// The shared secret configured as `gateway.secret`.
    pub secret: String,
}
