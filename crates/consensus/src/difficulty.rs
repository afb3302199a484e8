//! Difficulty adjustment from observed mining times.

use std::time::Duration;

/// Difficulty never drops below one leading hex zero.
pub const MIN_DIFFICULTY: u32 = 1;

/// Tuning for the difficulty controller.
#[derive(Debug, Clone, Copy)]
pub struct DifficultyConfig {
    /// Desired interval between blocks.
    pub target_block_time: Duration,
}

impl Default for DifficultyConfig {
    fn default() -> Self {
        Self {
            target_block_time: Duration::from_secs(60),
        }
    }
}

impl DifficultyConfig {
    /// The accepted operating mode with a 30 second target.
    pub fn fast() -> Self {
        Self {
            target_block_time: Duration::from_secs(30),
        }
    }
}

/// Recompute the difficulty after a block lands.
///
/// Blocks arriving in under half the target raise the difficulty by one;
/// blocks taking more than twice the target lower it by one, floored at
/// [`MIN_DIFFICULTY`]. Anything in between holds.
pub fn adjust_difficulty(current: u32, mining_time: Duration, config: &DifficultyConfig) -> u32 {
    let target = config.target_block_time;

    if mining_time < target / 2 {
        current + 1
    } else if mining_time > target * 2 && current > MIN_DIFFICULTY {
        current - 1
    } else {
        current.max(MIN_DIFFICULTY)
    }
}
