//! Full-chain validation rules.
//!
//! A chain that fails any of these checks is considered corrupt at rest; the
//! node must refuse to extend it until the condition is resolved.

use crate::pow::verify_proof_of_work;
use cryptochain_core::Block;
use thiserror::Error;

/// Ways a stored chain can be broken.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainValidationError {
    #[error("chain is empty")]
    Empty,

    #[error("block {index}: prev_hash does not link to the previous block")]
    BrokenLink { index: u64 },

    #[error("block {index}: stored hash does not match the canonical record")]
    HashMismatch { index: u64 },

    #[error("block {index}: hash does not satisfy difficulty {difficulty}")]
    InsufficientWork { index: u64, difficulty: u32 },

    #[error("block {index}: merkle root does not match transactions")]
    MerkleMismatch { index: u64 },

    #[error("block {index}: transaction {tx_id} failed signature verification")]
    InvalidTransaction { index: u64, tx_id: String },

    #[error("block {index}: expected index {expected}")]
    IndexGap { index: u64, expected: u64 },
}

pub type Result<T> = std::result::Result<T, ChainValidationError>;

/// Validate a single block against its predecessor.
pub fn validate_block(block: &Block, prev: &Block) -> Result<()> {
    if block.index != prev.index + 1 {
        return Err(ChainValidationError::IndexGap {
            index: block.index,
            expected: prev.index + 1,
        });
    }

    if block.prev_hash != prev.hash {
        return Err(ChainValidationError::BrokenLink { index: block.index });
    }

    if block.hash != block.compute_hash() {
        return Err(ChainValidationError::HashMismatch { index: block.index });
    }

    if !block.meets_difficulty() {
        return Err(ChainValidationError::InsufficientWork {
            index: block.index,
            difficulty: block.difficulty,
        });
    }

    if !block.verify_merkle_root() {
        return Err(ChainValidationError::MerkleMismatch { index: block.index });
    }

    for tx in &block.transactions {
        if !tx.is_system() && tx.verify().is_err() {
            return Err(ChainValidationError::InvalidTransaction {
                index: block.index,
                tx_id: tx.id.clone(),
            });
        }
    }

    debug_assert!(verify_proof_of_work(block));

    Ok(())
}

/// Walk the chain from index 1 to the tip and validate every block against
/// its predecessor. Validation is pure and takes no locks; callers pass a
/// snapshot of the block list.
pub fn validate_chain(blocks: &[Block]) -> Result<()> {
    if blocks.is_empty() {
        return Err(ChainValidationError::Empty);
    }

    for window in blocks.windows(2) {
        validate_block(&window[1], &window[0])?;
    }

    Ok(())
}
