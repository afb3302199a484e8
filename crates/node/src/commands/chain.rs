//! Block inspection and chain validation commands.

use super::{client, CliError, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use cryptochain_core::Block;
use serde_json::Value;

#[derive(Args)]
pub struct ChainArgs {
    /// Node to query
    #[arg(long, default_value = "http://127.0.0.1:8000")]
    node: String,

    #[command(subcommand)]
    command: ChainCommand,
}

#[derive(Subcommand)]
enum ChainCommand {
    /// List the most recent blocks
    List {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Show one block in full
    Show { index: u64 },
    /// Re-validate the whole chain
    Validate,
    /// Show chain statistics
    Stats,
}

pub async fn run(args: ChainArgs) -> Result<()> {
    match args.command {
        ChainCommand::List { limit } => {
            let blocks: Vec<Block> =
                client::get(&args.node, &format!("/api/blocks?limit={}", limit)).await?;
            for block in blocks {
                println!(
                    "#{:<5} {} txs={:<3} difficulty={} miner={}",
                    block.index,
                    &block.hash[..16].dimmed(),
                    block.tx_count(),
                    block.difficulty,
                    block.miner
                );
            }
        }
        ChainCommand::Show { index } => {
            let block: Block = client::get(&args.node, &format!("/api/blocks/{}", index)).await?;
            let pretty = serde_json::to_string_pretty(&block)
                .map_err(|e| CliError::Validation(e.to_string()))?;
            println!("{}", pretty);
        }
        ChainCommand::Validate => {
            let reply: Value = client::get(&args.node, "/api/chain/validate").await?;
            if reply["valid"].as_bool().unwrap_or(false) {
                println!("{}", "chain is valid".green().bold());
            } else {
                println!(
                    "{}: {}",
                    "chain is broken".red().bold(),
                    reply["error"].as_str().unwrap_or("unknown")
                );
                return Err(CliError::Validation("chain validation failed".to_string()));
            }
        }
        ChainCommand::Stats => {
            let reply: Value = client::get(&args.node, "/api/stats").await?;
            let pretty = serde_json::to_string_pretty(&reply)
                .map_err(|e| CliError::Validation(e.to_string()))?;
            println!("{}", pretty);
        }
    }
    Ok(())
}
