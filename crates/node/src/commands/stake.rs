//! Staking commands.

use super::{client, CliError, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use cryptochain_staking::{Stake, Validator};
use serde_json::{json, Value};

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

#[derive(Args)]
pub struct StakeArgs {
    /// Node to talk to
    #[arg(long, default_value = "http://127.0.0.1:8000")]
    node: String,

    #[command(subcommand)]
    command: StakeCommand,
}

#[derive(Subcommand)]
enum StakeCommand {
    /// Lock an amount for a number of days
    Create {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        amount: f64,
        #[arg(long)]
        days: i64,
    },
    /// Show one stake
    Show { id: String },
    /// List an owner's stakes
    List { owner: String },
    /// Claim accrued rewards
    Claim { id: String },
    /// Begin unstaking
    Unstake { id: String },
    /// Withdraw after the cooldown
    Withdraw { id: String },
    /// Register as a validator
    Register {
        #[arg(long)]
        address: String,
        #[arg(long)]
        public_key: String,
        #[arg(long)]
        amount: f64,
    },
    /// Delegate to a validator
    Delegate {
        #[arg(long)]
        delegator: String,
        #[arg(long)]
        validator: String,
        #[arg(long)]
        amount: f64,
    },
    /// List validators
    Validators,
}

pub async fn run(args: StakeArgs) -> Result<()> {
    match args.command {
        StakeCommand::Create { owner, amount, days } => {
            let body = json!({
                "owner": owner,
                "amount": amount,
                "duration": days * SECONDS_PER_DAY,
            });
            let stake: Stake = client::post(&args.node, "/api/stakes", &body).await?;
            println!("{}", "stake created".green().bold());
            println!("id:     {}", stake.id);
            println!("power:  {:.8}", stake.staking_power);
            println!("rate:   {:.4}", stake.reward_rate);
        }
        StakeCommand::Show { id } => {
            let stake: Stake = client::get(&args.node, &format!("/api/stakes/{}", id)).await?;
            let pretty = serde_json::to_string_pretty(&stake)
                .map_err(|e| CliError::Validation(e.to_string()))?;
            println!("{}", pretty);
        }
        StakeCommand::List { owner } => {
            let stakes: Vec<Stake> =
                client::get(&args.node, &format!("/api/stakes?owner={}", owner)).await?;
            for stake in stakes {
                println!(
                    "{} {:?} amount={:.8} reward={:.8}",
                    &stake.id[..16].dimmed(),
                    stake.status,
                    stake.amount,
                    stake.total_reward
                );
            }
        }
        StakeCommand::Claim { id } => {
            let reply: Value =
                client::post(&args.node, &format!("/api/stakes/{}/claim", id), &json!({})).await?;
            println!("claimed {:.8}", reply["reward"].as_f64().unwrap_or(0.0));
        }
        StakeCommand::Unstake { id } => {
            let stake: Stake =
                client::post(&args.node, &format!("/api/stakes/{}/unstake", id), &json!({}))
                    .await?;
            println!("{} ({:?})", "unstaking initiated".yellow(), stake.status);
        }
        StakeCommand::Withdraw { id } => {
            let reply: Value = client::post(
                &args.node,
                &format!("/api/stakes/{}/withdraw", id),
                &json!({}),
            )
            .await?;
            println!(
                "{}: {:.8}",
                "withdrawn".green().bold(),
                reply["returned"].as_f64().unwrap_or(0.0)
            );
        }
        StakeCommand::Register {
            address,
            public_key,
            amount,
        } => {
            let body = json!({
                "address": address,
                "publicKey": public_key,
                "amount": amount,
            });
            let validator: Validator = client::post(&args.node, "/api/validators", &body).await?;
            println!("{}", "validator registered".green().bold());
            println!("address:    {}", validator.address);
            println!("commission: {:.2}", validator.commission);
        }
        StakeCommand::Delegate {
            delegator,
            validator,
            amount,
        } => {
            let body = json!({
                "delegator": delegator,
                "validator": validator,
                "amount": amount,
            });
            let stake: Stake = client::post(&args.node, "/api/delegations", &body).await?;
            println!("{}", "delegation created".green().bold());
            println!("id:    {}", stake.id);
            println!("power: {:.8}", stake.staking_power);
        }
        StakeCommand::Validators => {
            let validators: Vec<Validator> = client::get(&args.node, "/api/validators").await?;
            for v in validators {
                let state = if v.jailed {
                    "jailed".red()
                } else if v.active {
                    "active".green()
                } else {
                    "inactive".yellow()
                };
                println!(
                    "{} {} self={:.2} total={:.2} commission={:.2} blocks={}",
                    v.address, state, v.self_staked, v.total_staked, v.commission, v.blocks_validated
                );
            }
        }
    }
    Ok(())
}
