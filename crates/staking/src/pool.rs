//! The staking pool: stake lifecycle, validators, delegation, and rewards.

use crate::stake::{Stake, StakeStatus, Validator};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use cryptochain_core::{format_amount, sha256_hex};
use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;
const SECONDS_PER_YEAR: f64 = 365.0 * 24.0 * 60.0 * 60.0;

/// Errors raised by staking operations.
#[derive(Debug, Error)]
pub enum StakingError {
    #[error("stake amount must be at least {minimum:.2}")]
    AmountTooLow { minimum: f64 },

    #[error("stake duration must be between {min} and {max} seconds")]
    DurationOutOfRange { min: i64, max: i64 },

    #[error("stake not found: {0}")]
    StakeNotFound(String),

    #[error("stake is not active: {0}")]
    StakeNotActive(String),

    #[error("stake is not unstaking: {0}")]
    StakeNotUnstaking(String),

    #[error("minimum staking period has not passed")]
    MinDurationNotMet,

    #[error("unstaking cooldown has not completed")]
    CooldownActive,

    #[error("validator already registered: {0}")]
    ValidatorExists(String),

    #[error("validator not found: {0}")]
    ValidatorNotFound(String),

    #[error("validator is not active: {0}")]
    ValidatorInactive(String),

    #[error("commission must be between 0 and 0.5")]
    InvalidCommission,

    #[error("validator is not jailed: {0}")]
    NotJailed(String),

    #[error("validator is still jailed")]
    StillJailed,
}

pub type Result<T> = std::result::Result<T, StakingError>;

/// Staking parameters.
#[derive(Debug, Clone)]
pub struct StakingConfig {
    /// Baseline annual percentage yield for ordinary stakes.
    pub staking_apy: f64,
    /// Annual percentage yield for validator self-stakes.
    pub validator_apy: f64,
    pub min_stake_amount: f64,
    /// Minimum commitment in seconds (7 days).
    pub min_stake_duration: i64,
    /// Maximum commitment in seconds (365 days).
    pub max_stake_duration: i64,
    /// Cooldown between unstake and withdraw in seconds (3 days).
    pub unstaking_cooldown: i64,
    /// Pool-level daily reward rate used by the distribution sweep.
    pub daily_reward_rate: f64,
    /// Commission a freshly registered validator starts with.
    pub default_commission: f64,
}

impl Default for StakingConfig {
    fn default() -> Self {
        Self {
            staking_apy: 0.07,
            validator_apy: 0.12,
            min_stake_amount: 10.0,
            min_stake_duration: 7 * SECONDS_PER_DAY,
            max_stake_duration: 365 * SECONDS_PER_DAY,
            unstaking_cooldown: 3 * SECONDS_PER_DAY,
            daily_reward_rate: 0.0002,
            default_commission: 0.10,
        }
    }
}

struct PoolState {
    stakes: HashMap<String, Stake>,
    validators: HashMap<String, Validator>,
    total_staked: f64,
    last_reward_time: DateTime<Utc>,
}

/// Manages every stake and validator. One pool-wide writer lock; the reward
/// sweep holds it for the whole pass, bounded by the number of active
/// stakes.
pub struct StakingPool {
    config: StakingConfig,
    state: RwLock<PoolState>,
}

impl StakingPool {
    pub fn new(config: StakingConfig, now: DateTime<Utc>) -> Self {
        Self {
            config,
            state: RwLock::new(PoolState {
                stakes: HashMap::new(),
                validators: HashMap::new(),
                total_staked: 0.0,
                last_reward_time: now,
            }),
        }
    }

    pub fn config(&self) -> &StakingConfig {
        &self.config
    }

    /// Total amount across active stakes.
    pub fn total_staked(&self) -> f64 {
        self.state.read().total_staked
    }

    fn stake_id(owner: &str, amount: f64, now: DateTime<Utc>, duration: i64, tag: &str) -> String {
        let record = format!(
            "{}{}{}{}{}",
            owner,
            format_amount(amount),
            now.to_rfc3339_opts(SecondsFormat::Secs, true),
            duration,
            tag,
        );
        sha256_hex(record.as_bytes())
    }

    fn duration_factor(&self, duration: i64) -> f64 {
        duration as f64 / self.config.max_stake_duration as f64
    }

    /// Lock an amount for a duration.
    ///
    /// Longer commitments earn more: the reward rate gains up to a 50% bonus
    /// and the staking power scales as `amount * (1 + duration_factor)`.
    pub fn create_stake(
        &self,
        owner: &str,
        amount: f64,
        duration: i64,
        now: DateTime<Utc>,
    ) -> Result<Stake> {
        if amount < self.config.min_stake_amount {
            return Err(StakingError::AmountTooLow {
                minimum: self.config.min_stake_amount,
            });
        }
        if duration < self.config.min_stake_duration || duration > self.config.max_stake_duration {
            return Err(StakingError::DurationOutOfRange {
                min: self.config.min_stake_duration,
                max: self.config.max_stake_duration,
            });
        }

        let factor = self.duration_factor(duration);
        let stake = Stake {
            id: Self::stake_id(owner, amount, now, duration, "stake"),
            owner: owner.to_string(),
            amount,
            start_time: now,
            end_time: now + Duration::seconds(duration),
            duration,
            status: StakeStatus::Active,
            reward_rate: self.config.staking_apy * (1.0 + 0.5 * factor),
            total_reward: 0.0,
            last_claim: now,
            unstake_time: None,
            withdraw_time: None,
            staking_power: amount * (1.0 + factor),
            votes: Vec::new(),
        };

        let mut state = self.state.write();
        state.total_staked += amount;
        state.stakes.insert(stake.id.clone(), stake.clone());
        tracing::info!(id = %stake.id, owner, amount, "stake created");
        Ok(stake)
    }

    /// Fetch a stake by id.
    pub fn stake(&self, id: &str) -> Result<Stake> {
        self.state
            .read()
            .stakes
            .get(id)
            .cloned()
            .ok_or_else(|| StakingError::StakeNotFound(id.to_string()))
    }

    /// Every stake owned by an address.
    pub fn stakes_by_owner(&self, owner: &str) -> Vec<Stake> {
        self.state
            .read()
            .stakes
            .values()
            .filter(|s| s.owner == owner)
            .cloned()
            .collect()
    }

    fn accrued(stake: &Stake, now: DateTime<Utc>) -> f64 {
        let elapsed = (now - stake.last_claim).num_seconds().max(0) as f64;
        stake.amount * stake.reward_rate * (elapsed / SECONDS_PER_YEAR)
    }

    /// Rewards accrued since the last claim, without claiming them.
    pub fn calculate_rewards(&self, id: &str, now: DateTime<Utc>) -> Result<f64> {
        let state = self.state.read();
        let stake = state
            .stakes
            .get(id)
            .ok_or_else(|| StakingError::StakeNotFound(id.to_string()))?;
        if !stake.is_active() {
            return Err(StakingError::StakeNotActive(id.to_string()));
        }
        Ok(Self::accrued(stake, now))
    }

    /// Credit accrued rewards to the stake's running total and reset the
    /// claim clock. Returns the claimed amount.
    pub fn claim_rewards(&self, id: &str, now: DateTime<Utc>) -> Result<f64> {
        let mut state = self.state.write();
        let stake = state
            .stakes
            .get_mut(id)
            .ok_or_else(|| StakingError::StakeNotFound(id.to_string()))?;
        if !stake.is_active() {
            return Err(StakingError::StakeNotActive(id.to_string()));
        }

        let reward = Self::accrued(stake, now);
        stake.total_reward += reward;
        stake.last_claim = now;
        Ok(reward)
    }

    /// Begin unstaking. The minimum staking period must have passed; rewards
    /// accrued so far are finalized, and the stake stops counting toward the
    /// pool total.
    pub fn initiate_unstake(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write();
        let minimum = Duration::seconds(self.config.min_stake_duration);
        let stake = state
            .stakes
            .get_mut(id)
            .ok_or_else(|| StakingError::StakeNotFound(id.to_string()))?;
        if !stake.is_active() {
            return Err(StakingError::StakeNotActive(id.to_string()));
        }
        if now < stake.start_time + minimum {
            return Err(StakingError::MinDurationNotMet);
        }

        stake.total_reward += Self::accrued(stake, now);
        stake.last_claim = now;
        stake.status = StakeStatus::Unstaking;
        stake.unstake_time = Some(now);

        let amount = stake.amount;
        state.total_staked -= amount;
        Ok(())
    }

    /// Complete unstaking after the cooldown. Returns principal plus all
    /// accumulated rewards.
    pub fn withdraw(&self, id: &str, now: DateTime<Utc>) -> Result<f64> {
        let mut state = self.state.write();
        let cooldown = Duration::seconds(self.config.unstaking_cooldown);
        let stake = state
            .stakes
            .get_mut(id)
            .ok_or_else(|| StakingError::StakeNotFound(id.to_string()))?;
        if stake.status != StakeStatus::Unstaking {
            return Err(StakingError::StakeNotUnstaking(id.to_string()));
        }
        let unstaked_at = stake.unstake_time.expect("unstaking stake has unstake_time");
        if now < unstaked_at + cooldown {
            return Err(StakingError::CooldownActive);
        }

        stake.status = StakeStatus::Withdrawn;
        stake.withdraw_time = Some(now);
        Ok(stake.amount + stake.total_reward)
    }

    /// Register a validator with a self-stake of at least ten times the
    /// minimum. The bond is a one-year stake at the validator APY with
    /// double staking power.
    pub fn register_validator(
        &self,
        address: &str,
        public_key: &str,
        amount: f64,
        now: DateTime<Utc>,
    ) -> Result<Validator> {
        let minimum = self.config.min_stake_amount * 10.0;
        if amount < minimum {
            return Err(StakingError::AmountTooLow { minimum });
        }

        let mut state = self.state.write();
        if state.validators.contains_key(address) {
            return Err(StakingError::ValidatorExists(address.to_string()));
        }

        let duration = 365 * SECONDS_PER_DAY;
        let stake = Stake {
            id: Self::stake_id(address, amount, now, duration, "validator"),
            owner: address.to_string(),
            amount,
            start_time: now,
            end_time: now + Duration::seconds(duration),
            duration,
            status: StakeStatus::Active,
            reward_rate: self.config.validator_apy,
            total_reward: 0.0,
            last_claim: now,
            unstake_time: None,
            withdraw_time: None,
            staking_power: amount * 2.0,
            votes: Vec::new(),
        };

        let validator = Validator {
            address: address.to_string(),
            public_key: public_key.to_string(),
            self_staked: amount,
            total_staked: amount,
            commission: self.config.default_commission,
            uptime: 1.0,
            since: now,
            last_validated: None,
            blocks_validated: 0,
            delegators: Vec::new(),
            active: true,
            jailed: false,
            jail_reason: String::new(),
            jail_time: None,
            unjail_time: None,
        };

        state.total_staked += amount;
        state.stakes.insert(stake.id.clone(), stake);
        state
            .validators
            .insert(address.to_string(), validator.clone());
        tracing::info!(address, amount, "validator registered");
        Ok(validator)
    }

    /// Fetch a validator by address.
    pub fn validator(&self, address: &str) -> Result<Validator> {
        self.state
            .read()
            .validators
            .get(address)
            .cloned()
            .ok_or_else(|| StakingError::ValidatorNotFound(address.to_string()))
    }

    /// Every registered validator.
    pub fn validators(&self) -> Vec<Validator> {
        self.state.read().validators.values().cloned().collect()
    }

    /// Delegate to an operational validator: a 30-day stake at 1.5x the
    /// baseline APY with 1.5x power. The delegated amount counts toward the
    /// validator's total.
    pub fn delegate(
        &self,
        delegator: &str,
        validator_address: &str,
        amount: f64,
        now: DateTime<Utc>,
    ) -> Result<Stake> {
        if amount < self.config.min_stake_amount {
            return Err(StakingError::AmountTooLow {
                minimum: self.config.min_stake_amount,
            });
        }

        let mut state = self.state.write();
        let validator = state
            .validators
            .get_mut(validator_address)
            .ok_or_else(|| StakingError::ValidatorNotFound(validator_address.to_string()))?;
        if !validator.is_operational() {
            return Err(StakingError::ValidatorInactive(validator_address.to_string()));
        }

        let duration = 30 * SECONDS_PER_DAY;
        let stake = Stake {
            id: Self::stake_id(delegator, amount, now, duration, validator_address),
            owner: delegator.to_string(),
            amount,
            start_time: now,
            end_time: now + Duration::seconds(duration),
            duration,
            status: StakeStatus::Active,
            reward_rate: self.config.staking_apy * 1.5,
            total_reward: 0.0,
            last_claim: now,
            unstake_time: None,
            withdraw_time: None,
            staking_power: amount * 1.5,
            votes: Vec::new(),
        };

        validator.total_staked += amount;
        if !validator.delegators.iter().any(|d| d == delegator) {
            validator.delegators.push(delegator.to_string());
        }

        state.total_staked += amount;
        state.stakes.insert(stake.id.clone(), stake.clone());
        Ok(stake)
    }

    /// Update a validator's commission within [0, 0.5].
    pub fn set_commission(&self, address: &str, commission: f64) -> Result<()> {
        if !(0.0..=0.5).contains(&commission) {
            return Err(StakingError::InvalidCommission);
        }
        let mut state = self.state.write();
        let validator = state
            .validators
            .get_mut(address)
            .ok_or_else(|| StakingError::ValidatorNotFound(address.to_string()))?;
        validator.commission = commission;
        Ok(())
    }

    /// Record that a validator produced or validated a block.
    pub fn record_validated_block(&self, address: &str, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write();
        let validator = state
            .validators
            .get_mut(address)
            .ok_or_else(|| StakingError::ValidatorNotFound(address.to_string()))?;
        if !validator.is_operational() {
            return Err(StakingError::ValidatorInactive(address.to_string()));
        }
        validator.blocks_validated += 1;
        validator.last_validated = Some(now);
        Ok(())
    }

    /// Distribute pool rewards across active stakes, proportionally to
    /// staking power. Delegated stakes pay their validator's commission on
    /// their share. Returns the total distributed.
    pub fn distribute_rewards(&self, now: DateTime<Utc>) -> f64 {
        let mut state = self.state.write();

        let elapsed = (now - state.last_reward_time).num_seconds().max(0) as f64;
        let total_rewards =
            state.total_staked * self.config.daily_reward_rate * (elapsed / SECONDS_PER_DAY as f64);
        state.last_reward_time = now;

        if total_rewards <= 0.0 {
            return 0.0;
        }

        let total_power: f64 = state
            .stakes
            .values()
            .filter(|s| s.is_active())
            .map(|s| s.staking_power)
            .sum();
        if total_power <= 0.0 {
            return 0.0;
        }

        // Commission rate per delegator address, validator self-stakes exempt
        let mut commission_by_owner: HashMap<String, f64> = HashMap::new();
        for validator in state.validators.values() {
            for delegator in &validator.delegators {
                commission_by_owner.insert(delegator.clone(), validator.commission);
            }
        }
        let validator_addresses: Vec<String> = state.validators.keys().cloned().collect();

        let mut distributed = 0.0;
        for stake in state.stakes.values_mut().filter(|s| s.is_active()) {
            let mut reward = total_rewards * (stake.staking_power / total_power);

            let is_validator_own = validator_addresses.iter().any(|a| *a == stake.owner);
            if !is_validator_own {
                if let Some(commission) = commission_by_owner.get(&stake.owner) {
                    reward -= reward * commission;
                }
            }

            stake.total_reward += reward;
            distributed += reward;
        }

        tracing::debug!(distributed, "staking rewards distributed");
        distributed
    }

    /// Jail a validator: it stops validating and earning until released.
    pub fn jail(
        &self,
        address: &str,
        reason: &str,
        duration: i64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.write();
        let validator = state
            .validators
            .get_mut(address)
            .ok_or_else(|| StakingError::ValidatorNotFound(address.to_string()))?;

        validator.jailed = true;
        validator.active = false;
        validator.jail_reason = reason.to_string();
        validator.jail_time = Some(now);
        validator.unjail_time = Some(now + Duration::seconds(duration));
        tracing::warn!(address, reason, "validator jailed");
        Ok(())
    }

    /// Release a validator whose jail term has elapsed.
    pub fn unjail(&self, address: &str, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write();
        let validator = state
            .validators
            .get_mut(address)
            .ok_or_else(|| StakingError::ValidatorNotFound(address.to_string()))?;

        if !validator.jailed {
            return Err(StakingError::NotJailed(address.to_string()));
        }
        if let Some(until) = validator.unjail_time {
            if now < until {
                return Err(StakingError::StillJailed);
            }
        }

        validator.jailed = false;
        validator.active = true;
        validator.jail_reason.clear();
        Ok(())
    }

    /// Fold accrued rewards into the principal, scaling staking power with
    /// the grown amount.
    pub fn compound_rewards(&self, id: &str, now: DateTime<Utc>) -> Result<f64> {
        let mut state = self.state.write();
        let max_duration = self.config.max_stake_duration;
        let stake = state
            .stakes
            .get_mut(id)
            .ok_or_else(|| StakingError::StakeNotFound(id.to_string()))?;
        if !stake.is_active() {
            return Err(StakingError::StakeNotActive(id.to_string()));
        }

        let reward = Self::accrued(stake, now);
        stake.amount += reward;
        stake.last_claim = now;
        let factor = stake.duration as f64 / max_duration as f64;
        stake.staking_power = stake.amount * (1.0 + factor);

        state.total_staked += reward;
        Ok(reward)
    }

    /// Lengthen an active stake's commitment, re-deriving its rate and
    /// power.
    pub fn extend_stake(&self, id: &str, additional: i64) -> Result<()> {
        let mut state = self.state.write();
        let max_duration = self.config.max_stake_duration;
        let staking_apy = self.config.staking_apy;
        let stake = state
            .stakes
            .get_mut(id)
            .ok_or_else(|| StakingError::StakeNotFound(id.to_string()))?;
        if !stake.is_active() {
            return Err(StakingError::StakeNotActive(id.to_string()));
        }

        let new_duration = stake.duration + additional;
        if new_duration > max_duration {
            return Err(StakingError::DurationOutOfRange {
                min: self.config.min_stake_duration,
                max: max_duration,
            });
        }

        stake.duration = new_duration;
        stake.end_time = stake.start_time + Duration::seconds(new_duration);
        let factor = new_duration as f64 / max_duration as f64;
        stake.reward_rate = staking_apy * (1.0 + 0.5 * factor);
        stake.staking_power = stake.amount * (1.0 + factor);
        Ok(())
    }

    /// Auto-unstake every active stake whose end time has passed, finalizing
    /// its rewards. Returns how many stakes transitioned.
    pub fn process_expired_stakes(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.state.write();
        let mut expired = 0;
        let mut released = 0.0;

        for stake in state.stakes.values_mut() {
            if stake.is_active() && now > stake.end_time {
                stake.total_reward += Self::accrued(stake, now);
                stake.last_claim = now;
                stake.status = StakeStatus::Unstaking;
                stake.unstake_time = Some(now);
                released += stake.amount;
                expired += 1;
            }
        }

        state.total_staked -= released;
        expired
    }

    /// Pool statistics.
    pub fn stats(&self) -> StakingStats {
        let state = self.state.read();
        let active_stakes = state.stakes.values().filter(|s| s.is_active()).count();
        let active_validators = state
            .validators
            .values()
            .filter(|v| v.is_operational())
            .count();
        let total_delegated = state.validators.values().map(Validator::delegated).sum();

        StakingStats {
            total_staked: state.total_staked,
            staking_apy: self.config.staking_apy,
            validator_apy: self.config.validator_apy,
            active_stakes,
            active_validators,
            total_delegated,
            average_stake: if active_stakes > 0 {
                state.total_staked / active_stakes as f64
            } else {
                0.0
            },
        }
    }
}

/// Point-in-time pool statistics.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StakingStats {
    pub total_staked: f64,
    pub staking_apy: f64,
    pub validator_apy: f64,
    pub active_stakes: usize,
    pub active_validators: usize,
    pub total_delegated: f64,
    pub average_stake: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(now: DateTime<Utc>) -> StakingPool {
        StakingPool::new(StakingConfig::default(), now)
    }

    fn days(n: i64) -> Duration {
        Duration::seconds(n * SECONDS_PER_DAY)
    }

    #[test]
    fn test_create_stake_bounds() {
        let now = Utc::now();
        let pool = pool(now);

        assert!(matches!(
            pool.create_stake("o", 5.0, 30 * SECONDS_PER_DAY, now),
            Err(StakingError::AmountTooLow { .. })
        ));
        assert!(matches!(
            pool.create_stake("o", 100.0, SECONDS_PER_DAY, now),
            Err(StakingError::DurationOutOfRange { .. })
        ));
        assert!(matches!(
            pool.create_stake("o", 100.0, 400 * SECONDS_PER_DAY, now),
            Err(StakingError::DurationOutOfRange { .. })
        ));

        let stake = pool
            .create_stake("o", 100.0, 30 * SECONDS_PER_DAY, now)
            .unwrap();
        assert_eq!(stake.status, StakeStatus::Active);
        assert_eq!(pool.total_staked(), 100.0);
    }

    #[test]
    fn test_staking_power_formula() {
        let now = Utc::now();
        let pool = pool(now);
        let stake = pool
            .create_stake("o", 100.0, 365 * SECONDS_PER_DAY, now)
            .unwrap();

        // Full-duration stake: power = amount * 2, rate = APY * 1.5
        assert!((stake.staking_power - 200.0).abs() < 1e-9);
        assert!((stake.reward_rate - 0.07 * 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_rewards_accrue_over_time() {
        let now = Utc::now();
        let pool = pool(now);
        let stake = pool
            .create_stake("o", 100.0, 365 * SECONDS_PER_DAY, now)
            .unwrap();

        // One year at the stake's rate on a 100 principal
        let year_later = now + days(365);
        let expected = 100.0 * stake.reward_rate;
        let reward = pool.calculate_rewards(&stake.id, year_later).unwrap();
        assert!((reward - expected).abs() < 1e-6);

        let claimed = pool.claim_rewards(&stake.id, year_later).unwrap();
        assert!((claimed - expected).abs() < 1e-6);

        // Claim resets the clock
        let again = pool.calculate_rewards(&stake.id, year_later).unwrap();
        assert!(again.abs() < 1e-9);
    }

    #[test]
    fn test_stake_lifecycle() {
        let now = Utc::now();
        let pool = pool(now);
        let stake = pool
            .create_stake("owner", 100.0, 30 * SECONDS_PER_DAY, now)
            .unwrap();

        // Too early to unstake
        assert!(matches!(
            pool.initiate_unstake(&stake.id, now + days(3)),
            Err(StakingError::MinDurationNotMet)
        ));

        // At the minimum duration it goes through
        let at_min = now + days(7);
        pool.initiate_unstake(&stake.id, at_min).unwrap();
        assert_eq!(pool.stake(&stake.id).unwrap().status, StakeStatus::Unstaking);
        assert_eq!(pool.total_staked(), 0.0);

        // Withdraw before the cooldown fails
        assert!(matches!(
            pool.withdraw(&stake.id, at_min + days(1)),
            Err(StakingError::CooldownActive)
        ));

        // After the cooldown it returns principal plus rewards
        let returned = pool.withdraw(&stake.id, at_min + days(3)).unwrap();
        let finalized = pool.stake(&stake.id).unwrap();
        assert_eq!(finalized.status, StakeStatus::Withdrawn);
        assert!((returned - (100.0 + finalized.total_reward)).abs() < 1e-9);
        assert!(finalized.total_reward > 0.0);
    }

    #[test]
    fn test_double_unstake_rejected() {
        let now = Utc::now();
        let pool = pool(now);
        let stake = pool
            .create_stake("owner", 100.0, 30 * SECONDS_PER_DAY, now)
            .unwrap();
        pool.initiate_unstake(&stake.id, now + days(8)).unwrap();
        assert!(matches!(
            pool.initiate_unstake(&stake.id, now + days(9)),
            Err(StakingError::StakeNotActive(_))
        ));
    }

    #[test]
    fn test_register_validator() {
        let now = Utc::now();
        let pool = pool(now);

        assert!(matches!(
            pool.register_validator("v", "pk", 50.0, now),
            Err(StakingError::AmountTooLow { .. })
        ));

        let validator = pool.register_validator("v", "pk", 100.0, now).unwrap();
        assert_eq!(validator.self_staked, 100.0);
        assert_eq!(validator.total_staked, 100.0);
        assert!(validator.is_operational());

        // The bond is a 2x-power stake at validator APY
        let stakes = pool.stakes_by_owner("v");
        assert_eq!(stakes.len(), 1);
        assert!((stakes[0].staking_power - 200.0).abs() < 1e-9);
        assert!((stakes[0].reward_rate - 0.12).abs() < 1e-9);

        assert!(matches!(
            pool.register_validator("v", "pk", 100.0, now),
            Err(StakingError::ValidatorExists(_))
        ));
    }

    #[test]
    fn test_delegation() {
        let now = Utc::now();
        let pool = pool(now);
        pool.register_validator("v", "pk", 100.0, now).unwrap();

        let stake = pool.delegate("d", "v", 20.0, now).unwrap();
        assert!((stake.staking_power - 30.0).abs() < 1e-9);
        assert!((stake.reward_rate - 0.07 * 1.5).abs() < 1e-9);
        assert_eq!(stake.duration, 30 * SECONDS_PER_DAY);

        let validator = pool.validator("v").unwrap();
        assert_eq!(validator.total_staked, 120.0);
        assert_eq!(validator.delegators, vec!["d".to_string()]);
        assert_eq!(pool.total_staked(), 120.0);

        assert!(matches!(
            pool.delegate("d", "unknown", 20.0, now),
            Err(StakingError::ValidatorNotFound(_))
        ));
    }

    #[test]
    fn test_delegation_to_jailed_validator_rejected() {
        let now = Utc::now();
        let pool = pool(now);
        pool.register_validator("v", "pk", 100.0, now).unwrap();
        pool.jail("v", "downtime", SECONDS_PER_DAY, now).unwrap();

        assert!(matches!(
            pool.delegate("d", "v", 20.0, now),
            Err(StakingError::ValidatorInactive(_))
        ));
    }

    #[test]
    fn test_jail_and_unjail() {
        let now = Utc::now();
        let pool = pool(now);
        pool.register_validator("v", "pk", 100.0, now).unwrap();

        pool.jail("v", "double signing", SECONDS_PER_DAY, now).unwrap();
        let jailed = pool.validator("v").unwrap();
        assert!(jailed.jailed);
        assert!(!jailed.active);
        assert!(matches!(
            pool.record_validated_block("v", now),
            Err(StakingError::ValidatorInactive(_))
        ));

        // Too early
        assert!(matches!(
            pool.unjail("v", now + Duration::hours(1)),
            Err(StakingError::StillJailed)
        ));

        pool.unjail("v", now + days(2)).unwrap();
        assert!(pool.validator("v").unwrap().is_operational());
    }

    #[test]
    fn test_distribute_rewards_proportional_to_power() {
        let now = Utc::now();
        let pool = pool(now);
        let a = pool
            .create_stake("a", 100.0, 365 * SECONDS_PER_DAY, now)
            .unwrap();
        let b = pool
            .create_stake("b", 100.0, 365 * SECONDS_PER_DAY, now)
            .unwrap();

        let day_later = now + days(1);
        let distributed = pool.distribute_rewards(day_later);

        // One day at the daily rate over the whole pool
        let expected_total = 200.0 * 0.0002;
        assert!((distributed - expected_total).abs() < 1e-9);

        // Equal power, equal share
        let ra = pool.stake(&a.id).unwrap().total_reward;
        let rb = pool.stake(&b.id).unwrap().total_reward;
        assert!((ra - rb).abs() < 1e-12);
        assert!((ra - expected_total / 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_delegated_stake_pays_commission() {
        let now = Utc::now();
        let pool = pool(now);
        pool.register_validator("v", "pk", 100.0, now).unwrap();
        let delegation = pool.delegate("d", "v", 100.0, now).unwrap();

        let day_later = now + days(1);
        pool.distribute_rewards(day_later);

        let validator_stake = &pool.stakes_by_owner("v")[0];
        let delegated = pool.stake(&delegation.id).unwrap();

        let total_power = validator_stake.staking_power + delegated.staking_power;
        let total_rewards = 200.0 * 0.0002;

        let validator_share = total_rewards * (validator_stake.staking_power / total_power);
        let delegator_gross = total_rewards * (delegated.staking_power / total_power);
        let delegator_net = delegator_gross * (1.0 - 0.10);

        assert!((validator_stake.total_reward - validator_share).abs() < 1e-9);
        assert!((delegated.total_reward - delegator_net).abs() < 1e-9);
    }

    #[test]
    fn test_compound_rewards_grows_principal() {
        let now = Utc::now();
        let pool = pool(now);
        let stake = pool
            .create_stake("o", 100.0, 365 * SECONDS_PER_DAY, now)
            .unwrap();

        let year_later = now + days(365);
        let reward = pool.compound_rewards(&stake.id, year_later).unwrap();
        assert!(reward > 0.0);

        let grown = pool.stake(&stake.id).unwrap();
        assert!((grown.amount - (100.0 + reward)).abs() < 1e-9);
        assert!((grown.staking_power - grown.amount * 2.0).abs() < 1e-9);
        assert!((pool.total_staked() - grown.amount).abs() < 1e-9);
    }

    #[test]
    fn test_extend_stake() {
        let now = Utc::now();
        let pool = pool(now);
        let stake = pool
            .create_stake("o", 100.0, 30 * SECONDS_PER_DAY, now)
            .unwrap();

        pool.extend_stake(&stake.id, 335 * SECONDS_PER_DAY).unwrap();
        let extended = pool.stake(&stake.id).unwrap();
        assert_eq!(extended.duration, 365 * SECONDS_PER_DAY);
        assert!((extended.staking_power - 200.0).abs() < 1e-9);

        assert!(matches!(
            pool.extend_stake(&stake.id, SECONDS_PER_DAY),
            Err(StakingError::DurationOutOfRange { .. })
        ));
    }

    #[test]
    fn test_process_expired_stakes() {
        let now = Utc::now();
        let pool = pool(now);
        let stake = pool
            .create_stake("o", 100.0, 7 * SECONDS_PER_DAY, now)
            .unwrap();

        assert_eq!(pool.process_expired_stakes(now + days(6)), 0);

        let expired = pool.process_expired_stakes(now + days(8));
        assert_eq!(expired, 1);
        let after = pool.stake(&stake.id).unwrap();
        assert_eq!(after.status, StakeStatus::Unstaking);
        assert!(after.total_reward > 0.0);
        assert_eq!(pool.total_staked(), 0.0);
    }

    #[test]
    fn test_invariant_total_staked_matches_active() {
        let now = Utc::now();
        let pool = pool(now);
        pool.create_stake("a", 100.0, 30 * SECONDS_PER_DAY, now)
            .unwrap();
        let b = pool
            .create_stake("b", 50.0, 30 * SECONDS_PER_DAY, now)
            .unwrap();
        pool.register_validator("v", "pk", 200.0, now).unwrap();

        pool.initiate_unstake(&b.id, now + days(8)).unwrap();

        let active_sum: f64 = ["a", "b", "v"]
            .iter()
            .flat_map(|o| pool.stakes_by_owner(o))
            .filter(Stake::is_active)
            .map(|s| s.amount)
            .sum();
        assert!((pool.total_staked() - active_sum).abs() < 1e-9);
    }

    #[test]
    fn test_commission_bounds() {
        let now = Utc::now();
        let pool = pool(now);
        pool.register_validator("v", "pk", 100.0, now).unwrap();

        assert!(pool.set_commission("v", 0.25).is_ok());
        assert!(matches!(
            pool.set_commission("v", 0.6),
            Err(StakingError::InvalidCommission)
        ));
        assert!(matches!(
            pool.set_commission("v", -0.1),
            Err(StakingError::InvalidCommission)
        ));
    }

    #[test]
    fn test_stats() {
        let now = Utc::now();
        let pool = pool(now);
        pool.create_stake("a", 100.0, 30 * SECONDS_PER_DAY, now)
            .unwrap();
        pool.register_validator("v", "pk", 200.0, now).unwrap();
        pool.delegate("d", "v", 50.0, now).unwrap();

        let stats = pool.stats();
        assert_eq!(stats.active_stakes, 3);
        assert_eq!(stats.active_validators, 1);
        assert!((stats.total_staked - 350.0).abs() < 1e-9);
        assert!((stats.total_delegated - 50.0).abs() < 1e-9);
    }
}
