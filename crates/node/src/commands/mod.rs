//! CLI commands.

use clap::Subcommand;
use thiserror::Error;

mod balance;
mod chain;
mod contract;
mod mine;
mod serve;
mod stake;
mod tx;
mod wallet;

/// CLI failure classes and their process exit codes: 1 usage, 2 validation,
/// 3 network.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Network(String),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Usage(_) => 1,
            CliError::Validation(_) => 2,
            CliError::Network(_) => 3,
        }
    }
}

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Subcommand)]
pub enum Commands {
    /// Run a node: HTTP API, P2P gossip, and background workers
    Serve(serve::ServeArgs),
    /// Wallet management (create keypairs, show addresses)
    Wallet(wallet::WalletArgs),
    /// Submit a signed transfer to a node
    Tx(tx::TxArgs),
    /// Inspect blocks and validate the chain
    Chain(chain::ChainArgs),
    /// Mine a block on a node
    Mine(mine::MineArgs),
    /// Query an address balance
    Balance(balance::BalanceArgs),
    /// Smart contract operations
    Contract(contract::ContractArgs),
    /// Staking operations
    Stake(stake::StakeArgs),
}

pub async fn run(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Serve(args) => serve::run(args).await,
        Commands::Wallet(args) => wallet::run(args),
        Commands::Tx(args) => tx::run(args).await,
        Commands::Chain(args) => chain::run(args).await,
        Commands::Mine(args) => mine::run(args).await,
        Commands::Balance(args) => balance::run(args).await,
        Commands::Contract(args) => contract::run(args).await,
        Commands::Stake(args) => stake::run(args).await,
    }
}

/// Shared HTTP client helpers for commands that talk to a running node.
pub(crate) mod client {
    use super::{CliError, Result};
    use serde::de::DeserializeOwned;
    use serde_json::Value;

    pub fn http() -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("reqwest client")
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| CliError::Network(format!("malformed response: {}", e)))?;

        if status.is_success() {
            serde_json::from_value(body)
                .map_err(|e| CliError::Network(format!("unexpected response shape: {}", e)))
        } else {
            let reason = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("request rejected")
                .to_string();
            Err(CliError::Validation(reason))
        }
    }

    pub async fn get<T: DeserializeOwned>(node: &str, path: &str) -> Result<T> {
        let response = http()
            .get(format!("{}{}", node, path))
            .send()
            .await
            .map_err(|e| CliError::Network(format!("node unreachable: {}", e)))?;
        decode(response).await
    }

    pub async fn post<T: DeserializeOwned>(node: &str, path: &str, body: &Value) -> Result<T> {
        let response = http()
            .post(format!("{}{}", node, path))
            .json(body)
            .send()
            .await
            .map_err(|e| CliError::Network(format!("node unreachable: {}", e)))?;
        decode(response).await
    }
}
