//! Proof-of-work nonce search.

use cryptochain_core::Block;
use std::time::{Duration, Instant};

/// How many nonce attempts run between scheduler yield points.
const YIELD_EVERY: u64 = 100_000;

/// Mine a block in place: increment the nonce from zero, recomputing the hash
/// each time, until the leading `difficulty` hex characters are all `'0'`.
///
/// The search yields to the runtime every [`YIELD_EVERY`] attempts, which
/// keeps other tasks live and makes the mining task cancelable between
/// attempts (aborting the task takes effect at the next yield). No lock may
/// be held across a call to this function.
///
/// Returns the wall-clock duration of the search, which is also recorded on
/// `block.mining_time` in seconds.
pub async fn mine(block: &mut Block, difficulty: u32) -> Duration {
    let started = Instant::now();
    block.difficulty = difficulty;
    block.nonce = 0;
    block.hash = block.compute_hash();

    let mut attempts: u64 = 0;
    while !Block::hash_meets_difficulty(&block.hash, difficulty) {
        block.nonce += 1;
        block.hash = block.compute_hash();

        attempts += 1;
        if attempts % YIELD_EVERY == 0 {
            tokio::task::yield_now().await;
        }
    }

    let elapsed = started.elapsed();
    block.mining_time = elapsed.as_secs_f64();
    tracing::debug!(
        index = block.index,
        nonce = block.nonce,
        difficulty,
        elapsed_ms = elapsed.as_millis() as u64,
        "mined block"
    );
    elapsed
}

/// Verify that a block's stored hash is honest: it must re-derive from the
/// canonical record and satisfy the block's stored difficulty.
pub fn verify_proof_of_work(block: &Block) -> bool {
    block.hash == block.compute_hash() && block.meets_difficulty()
}
