//! Query an address balance.

use super::{client, Result};
use clap::Args;
use serde_json::Value;

#[derive(Args)]
pub struct BalanceArgs {
    /// Node to query
    #[arg(long, default_value = "http://127.0.0.1:8000")]
    node: String,

    /// Address to look up
    address: String,
}

pub async fn run(args: BalanceArgs) -> Result<()> {
    let reply: Value = client::get(&args.node, &format!("/api/balance/{}", args.address)).await?;
    println!("{:.8}", reply["balance"].as_f64().unwrap_or(0.0));
    Ok(())
}
