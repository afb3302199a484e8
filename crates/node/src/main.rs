//! cryptochain node and CLI entry point.

use clap::Parser;

mod api;
mod commands;
mod node;
mod wallets;

#[derive(Parser)]
#[command(name = "cryptochain")]
#[command(about = "A proof-of-work blockchain node", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = commands::run(cli.command).await {
        eprintln!("Error: {}", err);
        std::process::exit(err.exit_code());
    }
}
