//! Stake and validator records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a stake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StakeStatus {
    Active,
    Unstaking,
    Withdrawn,
    Penalized,
}

/// Committed capital earning rewards and voting power.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stake {
    pub id: String,
    pub owner: String,
    pub amount: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Committed duration in seconds.
    pub duration: i64,
    pub status: StakeStatus,
    /// Annualized reward rate for this stake.
    pub reward_rate: f64,
    pub total_reward: f64,
    pub last_claim: DateTime<Utc>,
    pub unstake_time: Option<DateTime<Utc>>,
    pub withdraw_time: Option<DateTime<Utc>>,
    pub staking_power: f64,
    /// Proposal ids this stake voted on.
    pub votes: Vec<String>,
}

impl Stake {
    pub fn is_active(&self) -> bool {
        self.status == StakeStatus::Active
    }
}

/// A participant with a large self-stake, eligible to validate blocks and
/// accept delegations. Commission is bounded to [0, 0.5].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Validator {
    pub address: String,
    pub public_key: String,
    pub self_staked: f64,
    pub total_staked: f64,
    pub commission: f64,
    pub uptime: f64,
    pub since: DateTime<Utc>,
    pub last_validated: Option<DateTime<Utc>>,
    pub blocks_validated: u64,
    pub delegators: Vec<String>,
    pub active: bool,
    pub jailed: bool,
    pub jail_reason: String,
    pub jail_time: Option<DateTime<Utc>>,
    pub unjail_time: Option<DateTime<Utc>>,
}

impl Validator {
    /// Whether the validator may validate blocks and receive delegations.
    pub fn is_operational(&self) -> bool {
        self.active && !self.jailed
    }

    /// Stake delegated by others.
    pub fn delegated(&self) -> f64 {
        self.total_staked - self.self_staked
    }
}
