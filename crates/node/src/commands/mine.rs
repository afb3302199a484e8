//! Mine a block on a node.

use super::{client, Result};
use clap::Args;
use colored::Colorize;
use cryptochain_core::Block;
use serde_json::json;

#[derive(Args)]
pub struct MineArgs {
    /// Node to mine on
    #[arg(long, default_value = "http://127.0.0.1:8000")]
    node: String,

    /// Address credited with the coinbase
    miner: String,
}

pub async fn run(args: MineArgs) -> Result<()> {
    let block: Block =
        client::post(&args.node, "/api/mine", &json!({ "miner": args.miner })).await?;

    println!("{}", "block mined".green().bold());
    println!("index:      {}", block.index);
    println!("hash:       {}", block.hash);
    println!("nonce:      {}", block.nonce);
    println!("difficulty: {}", block.difficulty);
    println!("txs:        {}", block.tx_count());
    Ok(())
}
