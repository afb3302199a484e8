//! Submit a signed transfer to a node.

use super::{client, CliError, Result};
use crate::wallets::WalletDir;
use clap::Args;
use colored::Colorize;
use cryptochain_core::signed_transfer;
use serde_json::Value;
use std::path::PathBuf;

#[derive(Args)]
pub struct TxArgs {
    /// Node to submit to
    #[arg(long, default_value = "http://127.0.0.1:8000")]
    node: String,

    /// Wallet directory
    #[arg(long, default_value = "./data/wallets")]
    wallet_dir: PathBuf,

    /// Sender wallet address
    #[arg(long)]
    from: String,

    /// Recipient address
    to: String,

    /// Amount to transfer
    amount: f64,

    /// Transaction fee
    #[arg(long, default_value_t = 0.0)]
    fee: f64,
}

pub async fn run(args: TxArgs) -> Result<()> {
    let wallets = WalletDir::new(&args.wallet_dir);
    let wallet = wallets.load(&args.from).ok_or_else(|| {
        CliError::Usage(format!(
            "no wallet for {} in {}",
            args.from,
            args.wallet_dir.display()
        ))
    })?;
    let keypair = wallet
        .keypair()
        .map_err(|e| CliError::Validation(format!("wallet key unusable: {}", e)))?;

    let tx = signed_transfer(&keypair, &args.to, args.amount, args.fee)
        .map_err(|e| CliError::Validation(e.to_string()))?;

    let body = serde_json::to_value(&tx)
        .map_err(|e| CliError::Validation(format!("could not encode transaction: {}", e)))?;
    let reply: Value = client::post(&args.node, "/api/transactions", &body).await?;

    println!("{}", "transaction submitted".green().bold());
    println!("id: {}", reply["id"].as_str().unwrap_or(&tx.id));
    Ok(())
}
