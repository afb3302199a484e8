//! The `serve` command: run a full node.

use super::{CliError, Result};
use crate::api::api_router;
use crate::node::{Node, NodeConfig};
use clap::Args;
use colored::Colorize;
use cryptochain_chain::ChainConfig;
use cryptochain_consensus::DifficultyConfig;
use cryptochain_network::p2p_router;
use cryptochain_staking::StakingConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Args)]
pub struct ServeArgs {
    /// Data directory holding the database and wallets
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8000")]
    listen: SocketAddr,

    /// URL advertised to peers (defaults to http://<listen>)
    #[arg(long)]
    url: Option<String>,

    /// Seed peer URL, repeatable
    #[arg(long = "seed")]
    seeds: Vec<String>,

    /// Advertise the validator flag
    #[arg(long)]
    validator: bool,

    /// Mine continuously to this address whenever transactions are pending
    #[arg(long)]
    mine_to: Option<String>,

    /// Target seconds between blocks for the difficulty controller
    #[arg(long, default_value_t = 30)]
    target_block_time: u64,
}

pub async fn run(args: ServeArgs) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let node_url = args
        .url
        .unwrap_or_else(|| format!("http://{}", args.listen));

    let config = NodeConfig {
        data_dir: args.data_dir,
        listen: args.listen,
        node_url,
        seeds: args.seeds,
        is_validator: args.validator,
        mine_to: args.mine_to,
        chain: ChainConfig {
            difficulty: DifficultyConfig {
                target_block_time: Duration::from_secs(args.target_block_time),
            },
            ..ChainConfig::default()
        },
        staking: StakingConfig::default(),
    };

    let node = Node::boot(config)
        .await
        .map_err(|e| CliError::Validation(format!("node failed to start: {}", e)))?;
    node.spawn_workers();

    let router = api_router(Arc::clone(&node)).merge(p2p_router(
        Arc::clone(&node.manager),
        Arc::clone(&node.dht),
    ));

    let listener = tokio::net::TcpListener::bind(node.config.listen)
        .await
        .map_err(|e| CliError::Network(format!("cannot bind {}: {}", node.config.listen, e)))?;

    println!(
        "{} listening on {} (height {})",
        "cryptochain".green().bold(),
        node.config.listen,
        node.chain.height()
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .map_err(|e| CliError::Network(format!("server error: {}", e)))?;

    node.shutdown()
        .map_err(|e| CliError::Validation(format!("shutdown persistence failed: {}", e)))?;
    println!("{}", "node stopped".yellow());
    Ok(())
}
