//! Staking and delegation for cryptochain.
//!
//! Token holders lock capital in stakes that accrue rewards over time;
//! heavier, longer stakes carry more staking power. Validators self-stake a
//! larger bond, accept delegations, and earn commission on their delegators'
//! rewards. The pool runs as a periodic task distributing rewards and
//! sweeping expired stakes.

pub mod pool;
pub mod stake;

pub use pool::{StakingConfig, StakingError, StakingPool, StakingStats};
pub use stake::{Stake, StakeStatus, Validator};
