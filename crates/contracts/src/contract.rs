//! Contract types, lifecycle, and state log.

use crate::predicate::ConditionPredicate;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use cryptochain_core::{format_amount, sha256_hex, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Condition key consulted by timelock contracts.
pub const UNLOCK_TIME_KEY: &str = "unlock_time";

/// The kinds of contracts the state machine supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractType {
    Transfer,
    Multisig,
    Timelock,
    Conditional,
    Escrow,
}

/// Lifecycle states. Executed, cancelled, expired, and failed are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractStatus {
    Pending,
    Approved,
    Executed,
    Cancelled,
    Expired,
    Failed,
}

impl ContractStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ContractStatus::Pending | ContractStatus::Approved)
    }
}

/// One entry of the append-only audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChange {
    pub timestamp: DateTime<Utc>,
    pub old_status: ContractStatus,
    pub new_status: ContractStatus,
    pub actor: String,
    pub reason: String,
}

/// Errors raised by contract construction and lifecycle operations.
#[derive(Debug, Error)]
pub enum ContractError {
    #[error("amount must be positive")]
    NonPositiveAmount,
    #[error("fee cannot be negative")]
    NegativeFee,
    #[error("creator is required")]
    MissingCreator,
    #[error("recipient is required")]
    MissingRecipient,
    #[error("{0:?} contracts require at least 2 participants")]
    NotEnoughParticipants(ContractType),
    #[error("required approvals must be between 1 and the participant count")]
    InvalidRequiredApprovals,
    #[error("{0:?} contracts require conditions")]
    MissingConditions(ContractType),
    #[error("only designated participants may approve this contract")]
    NotParticipant,
    #[error("participant has already approved this contract")]
    AlreadyApproved,
    #[error("only the creator or a participant may cancel this contract")]
    NotAuthorized,
    #[error("operation invalid for contract status {0:?}")]
    InvalidStatus(ContractStatus),
    #[error("contract has expired")]
    Expired,
    #[error("contract conditions are not met")]
    NotExecutable,
}

pub type Result<T> = std::result::Result<T, ContractError>;

/// Inputs for creating a contract.
#[derive(Debug, Clone)]
pub struct ContractParams {
    pub contract_type: ContractType,
    pub creator: String,
    pub participants: Vec<String>,
    pub required_approvals: usize,
    pub amount: f64,
    pub fee: f64,
    pub recipient: String,
    pub data: String,
    pub expires_in: Duration,
    pub conditions: BTreeMap<String, String>,
}

/// A multi-party conditional transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    pub id: String,
    #[serde(rename = "type")]
    pub contract_type: ContractType,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub participants: Vec<String>,
    pub required_approvals: usize,
    pub approvals: HashMap<String, bool>,
    pub amount: f64,
    pub fee: f64,
    pub recipient: String,
    pub data: String,
    pub expires_at: DateTime<Utc>,
    pub status: ContractStatus,
    pub executed_at: Option<DateTime<Utc>>,
    pub tx_id: String,
    pub conditions: BTreeMap<String, String>,
    pub state_log: Vec<StateChange>,
}

/// Result of recording an approval.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ApprovalOutcome {
    pub approval_count: usize,
    pub required_approvals: usize,
}

impl Contract {
    /// Validate the parameters and create a pending contract.
    ///
    /// Transfer contracts approve their creator immediately; everything else
    /// starts with an empty approval map.
    pub fn new(params: ContractParams, now: DateTime<Utc>) -> Result<Self> {
        if params.amount <= 0.0 {
            return Err(ContractError::NonPositiveAmount);
        }
        if params.fee < 0.0 {
            return Err(ContractError::NegativeFee);
        }
        if params.creator.is_empty() {
            return Err(ContractError::MissingCreator);
        }
        if params.recipient.is_empty() {
            return Err(ContractError::MissingRecipient);
        }

        match params.contract_type {
            ContractType::Multisig | ContractType::Escrow => {
                if params.participants.len() < 2 {
                    return Err(ContractError::NotEnoughParticipants(params.contract_type));
                }
                if params.required_approvals < 1
                    || params.required_approvals > params.participants.len()
                {
                    return Err(ContractError::InvalidRequiredApprovals);
                }
                if params.contract_type == ContractType::Escrow && params.conditions.is_empty() {
                    return Err(ContractError::MissingConditions(ContractType::Escrow));
                }
            }
            ContractType::Conditional => {
                if params.conditions.is_empty() {
                    return Err(ContractError::MissingConditions(ContractType::Conditional));
                }
            }
            ContractType::Transfer | ContractType::Timelock => {}
        }

        let expires_at = now + params.expires_in;
        let mut contract = Self {
            id: String::new(),
            contract_type: params.contract_type,
            created_by: params.creator.clone(),
            created_at: now,
            participants: params.participants,
            required_approvals: params.required_approvals,
            approvals: HashMap::new(),
            amount: params.amount,
            fee: params.fee,
            recipient: params.recipient,
            data: params.data,
            expires_at,
            status: ContractStatus::Pending,
            executed_at: None,
            tx_id: String::new(),
            conditions: params.conditions,
            state_log: Vec::new(),
        };

        contract.id = contract.compute_id();
        contract.log_change(ContractStatus::Pending, &params.creator, "contract created", now);

        if contract.contract_type == ContractType::Transfer {
            contract.approvals.insert(params.creator, true);
        }

        Ok(contract)
    }

    /// Hash of the creation record. Conditions are a sorted map, so the
    /// record is deterministic.
    fn compute_id(&self) -> String {
        let conditions = self
            .conditions
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");
        let record = format!(
            "{:?}{}{}{}{}{}{}{}{}{}",
            self.contract_type,
            self.created_by,
            self.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.participants.join(","),
            self.required_approvals,
            format_amount(self.amount),
            format_amount(self.fee),
            self.recipient,
            self.data,
            conditions,
        );
        sha256_hex(record.as_bytes())
    }

    fn log_change(
        &mut self,
        old_status: ContractStatus,
        actor: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) {
        self.state_log.push(StateChange {
            timestamp: now,
            old_status,
            new_status: self.status,
            actor: actor.to_string(),
            reason: reason.to_string(),
        });
    }

    /// Number of approvals received so far.
    pub fn approval_count(&self) -> usize {
        self.approvals.values().filter(|approved| **approved).count()
    }

    /// Whether an address is a designated participant.
    pub fn is_participant(&self, address: &str) -> bool {
        self.participants.iter().any(|p| p == address)
    }

    /// Lazily expire the contract. Returns true when a transition happened.
    pub fn check_expiration(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == ContractStatus::Pending && now > self.expires_at {
            self.status = ContractStatus::Expired;
            self.log_change(
                ContractStatus::Pending,
                cryptochain_core::SYSTEM_ADDRESS,
                "contract expired",
                now,
            );
            return true;
        }
        false
    }

    /// Record a participant's approval.
    pub fn approve(&mut self, participant: &str, now: DateTime<Utc>) -> Result<ApprovalOutcome> {
        if self.check_expiration(now) {
            return Err(ContractError::Expired);
        }
        if self.status != ContractStatus::Pending {
            return Err(ContractError::InvalidStatus(self.status));
        }
        if !self.is_participant(participant) {
            return Err(ContractError::NotParticipant);
        }
        if self.approvals.get(participant).copied().unwrap_or(false) {
            return Err(ContractError::AlreadyApproved);
        }

        self.approvals.insert(participant.to_string(), true);
        self.log_change(ContractStatus::Pending, participant, "contract approved", now);

        Ok(ApprovalOutcome {
            approval_count: self.approval_count(),
            required_approvals: self.required_approvals,
        })
    }

    /// Cancel a pending contract. Only the creator or a participant may do
    /// so.
    pub fn cancel(&mut self, actor: &str, now: DateTime<Utc>) -> Result<()> {
        if self.status != ContractStatus::Pending {
            return Err(ContractError::InvalidStatus(self.status));
        }
        if actor != self.created_by && !self.is_participant(actor) {
            return Err(ContractError::NotAuthorized);
        }

        self.status = ContractStatus::Cancelled;
        self.log_change(ContractStatus::Pending, actor, "contract cancelled", now);
        Ok(())
    }

    /// Whether the contract is executable right now, per its type's rule.
    pub fn can_execute(&self, now: DateTime<Utc>, predicate: &dyn ConditionPredicate) -> bool {
        if self.status != ContractStatus::Pending || now > self.expires_at {
            return false;
        }

        let creator_approved = self
            .approvals
            .get(&self.created_by)
            .copied()
            .unwrap_or(false);

        match self.contract_type {
            ContractType::Transfer => creator_approved,
            ContractType::Multisig => self.approval_count() >= self.required_approvals,
            ContractType::Escrow => {
                self.approval_count() >= self.required_approvals
                    && predicate.evaluate(&self.conditions)
            }
            ContractType::Timelock => {
                let unlocked = self
                    .conditions
                    .get(UNLOCK_TIME_KEY)
                    .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                    .map(|unlock| now >= unlock.with_timezone(&Utc))
                    .unwrap_or(false);
                unlocked && creator_approved
            }
            // External oracle evaluation is out of scope; conditional
            // contracts execute on creator approval alone.
            ContractType::Conditional => creator_approved,
        }
    }

    /// Execute the contract, producing the value-transfer transaction.
    ///
    /// The emitted transaction carries the contract's data and its id is
    /// recorded back on the contract. Terminal states reject execution; an
    /// expired contract transitions to EXPIRED on the way out.
    pub fn execute(
        &mut self,
        now: DateTime<Utc>,
        predicate: &dyn ConditionPredicate,
    ) -> Result<Transaction> {
        if self.status != ContractStatus::Pending {
            return Err(ContractError::InvalidStatus(self.status));
        }
        if self.check_expiration(now) {
            return Err(ContractError::Expired);
        }
        if !self.can_execute(now, predicate) {
            return Err(ContractError::NotExecutable);
        }

        let mut tx = Transaction::new(&self.created_by, &self.recipient, self.amount, self.fee);
        tx.timestamp = now;
        tx.id = tx.compute_id();
        tx.data = self.data.clone();

        self.status = ContractStatus::Executed;
        self.executed_at = Some(now);
        self.tx_id = tx.id.clone();
        self.log_change(
            ContractStatus::Pending,
            cryptochain_core::SYSTEM_ADDRESS,
            "contract executed",
            now,
        );

        Ok(tx)
    }
}
