//! Smart contract commands.

use super::{client, CliError, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use cryptochain_contracts::Contract;
use serde_json::{json, Value};

#[derive(Args)]
pub struct ContractArgs {
    /// Node to talk to
    #[arg(long, default_value = "http://127.0.0.1:8000")]
    node: String,

    #[command(subcommand)]
    command: ContractCommand,
}

#[derive(Subcommand)]
enum ContractCommand {
    /// Create a contract
    Create {
        /// TRANSFER, MULTISIG, TIMELOCK, CONDITIONAL, or ESCROW
        #[arg(long = "type")]
        contract_type: String,
        #[arg(long)]
        creator: String,
        #[arg(long)]
        recipient: String,
        #[arg(long)]
        amount: f64,
        #[arg(long, default_value_t = 0.0)]
        fee: f64,
        /// Participant address, repeatable
        #[arg(long = "participant")]
        participants: Vec<String>,
        #[arg(long, default_value_t = 0)]
        required_approvals: usize,
        #[arg(long, default_value = "")]
        data: String,
        /// Contract lifetime in seconds
        #[arg(long, default_value_t = 86400)]
        expires_in: i64,
        /// Condition as key=value, repeatable
        #[arg(long = "condition")]
        conditions: Vec<String>,
    },
    /// Show a contract
    Show { id: String },
    /// List contracts, optionally for one address
    List {
        #[arg(long)]
        address: Option<String>,
    },
    /// Approve a contract as a participant
    Approve {
        id: String,
        #[arg(long)]
        participant: String,
    },
    /// Cancel a pending contract
    Cancel {
        id: String,
        #[arg(long)]
        actor: String,
    },
    /// Execute a contract whose conditions are met
    Execute { id: String },
}

fn parse_conditions(raw: &[String]) -> Result<Value> {
    let mut out = serde_json::Map::new();
    for entry in raw {
        let (key, value) = entry.split_once('=').ok_or_else(|| {
            CliError::Usage(format!("condition `{}` is not of the form key=value", entry))
        })?;
        out.insert(key.to_string(), Value::String(value.to_string()));
    }
    Ok(Value::Object(out))
}

pub async fn run(args: ContractArgs) -> Result<()> {
    match args.command {
        ContractCommand::Create {
            contract_type,
            creator,
            recipient,
            amount,
            fee,
            participants,
            required_approvals,
            data,
            expires_in,
            conditions,
        } => {
            let body = json!({
                "type": contract_type.to_uppercase(),
                "creator": creator,
                "recipient": recipient,
                "amount": amount,
                "fee": fee,
                "participants": participants,
                "requiredApprovals": required_approvals,
                "data": data,
                "expiresIn": expires_in,
                "conditions": parse_conditions(&conditions)?,
            });
            let contract: Contract = client::post(&args.node, "/api/contracts", &body).await?;
            println!("{}", "contract created".green().bold());
            println!("id:     {}", contract.id);
            println!("status: {:?}", contract.status);
        }
        ContractCommand::Show { id } => {
            let contract: Contract =
                client::get(&args.node, &format!("/api/contracts/{}", id)).await?;
            let pretty = serde_json::to_string_pretty(&contract)
                .map_err(|e| CliError::Validation(e.to_string()))?;
            println!("{}", pretty);
        }
        ContractCommand::List { address } => {
            let path = match address {
                Some(address) => format!("/api/contracts?address={}", address),
                None => "/api/contracts".to_string(),
            };
            let contracts: Vec<Contract> = client::get(&args.node, &path).await?;
            for contract in contracts {
                println!(
                    "{} {:?} {:?} {} -> {} {:.8}",
                    &contract.id[..16].dimmed(),
                    contract.contract_type,
                    contract.status,
                    contract.created_by,
                    contract.recipient,
                    contract.amount
                );
            }
        }
        ContractCommand::Approve { id, participant } => {
            let reply: Value = client::post(
                &args.node,
                &format!("/api/contracts/{}/approve", id),
                &json!({ "participant": participant }),
            )
            .await?;
            println!(
                "approved ({}/{})",
                reply["approvals"], reply["required"]
            );
        }
        ContractCommand::Cancel { id, actor } => {
            let _: Contract = client::post(
                &args.node,
                &format!("/api/contracts/{}/cancel", id),
                &json!({ "actor": actor }),
            )
            .await?;
            println!("{}", "contract cancelled".yellow());
        }
        ContractCommand::Execute { id } => {
            let tx: Value = client::post(
                &args.node,
                &format!("/api/contracts/{}/execute", id),
                &json!({}),
            )
            .await?;
            println!("{}", "contract executed".green().bold());
            println!("transaction: {}", tx["id"].as_str().unwrap_or(""));
        }
    }
    Ok(())
}
