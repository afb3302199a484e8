//! Core ledger primitives for cryptochain.
//!
//! This crate provides the fundamental types used throughout the node:
//! - Cryptographic primitives (SHA-256 hashing, P-256 signing, addresses)
//! - Transactions
//! - Blocks
//! - Merkle trees over transaction ids

pub mod block;
pub mod crypto;
pub mod hash;
pub mod merkle;
pub mod transaction;

// Re-export commonly used items at the crate root
pub use block::{Block, GENESIS_ADDRESS, GENESIS_DIFFICULTY, GENESIS_REWARD};
pub use crypto::{derive_address, verify_signature, CryptoError, KeyPair, Wallet};
pub use hash::{double_sha256, format_amount, sha256_bytes, sha256_hex};
pub use merkle::{merkle_root, verify_proof, MerkleProof, MerkleTree};
pub use transaction::{signed_transfer, Transaction, TransactionError, SYSTEM_ADDRESS};
