//! Wallet management commands.

use super::{CliError, Result};
use crate::wallets::WalletDir;
use clap::{Args, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

#[derive(Args)]
pub struct WalletArgs {
    /// Wallet directory
    #[arg(long, default_value = "./data/wallets")]
    dir: PathBuf,

    #[command(subcommand)]
    command: WalletCommand,
}

#[derive(Subcommand)]
enum WalletCommand {
    /// Generate a new wallet
    New,
    /// Show a wallet's address and public key
    Show { address: String },
    /// List wallet addresses in the directory
    List,
}

pub fn run(args: WalletArgs) -> Result<()> {
    let wallets = WalletDir::new(&args.dir);

    match args.command {
        WalletCommand::New => {
            let wallet = wallets
                .create()
                .map_err(|e| CliError::Validation(format!("could not create wallet: {}", e)))?;
            println!("{}", "wallet created".green().bold());
            println!("address:    {}", wallet.address);
            println!("public key: {}", wallet.public_key);
            println!(
                "{}",
                format!("stored at {}", args.dir.join(format!("{}.json", wallet.address)).display())
                    .dimmed()
            );
        }
        WalletCommand::Show { address } => {
            let wallet = wallets.load(&address).ok_or_else(|| {
                CliError::Usage(format!("no wallet for {} in {}", address, args.dir.display()))
            })?;
            println!("address:    {}", wallet.address);
            println!("public key: {}", wallet.public_key);
        }
        WalletCommand::List => {
            let addresses = wallets.addresses();
            if addresses.is_empty() {
                println!("no wallets in {}", args.dir.display());
            }
            for address in addresses {
                println!("{}", address);
            }
        }
    }
    Ok(())
}
