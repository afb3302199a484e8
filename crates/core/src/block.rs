//! Block structure and canonical hashing.

use crate::hash::sha256_hex;
use crate::merkle::merkle_root;
use crate::transaction::Transaction;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Well-known recipient of the genesis coinbase.
pub const GENESIS_ADDRESS: &str = "genesis_address";

/// Reward credited by the genesis coinbase.
pub const GENESIS_REWARD: f64 = 50.0;

/// Fixed bootstrap difficulty the genesis block is mined at.
pub const GENESIS_DIFFICULTY: u32 = 4;

/// An ordered batch of transactions linked to its predecessor by hash and
/// sealed by proof of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    pub transactions: Vec<Transaction>,
    #[serde(rename = "merkleRoot")]
    pub merkle_root: String,
    #[serde(rename = "prevHash")]
    pub prev_hash: String,
    pub hash: String,
    pub nonce: u64,
    pub difficulty: u32,
    pub miner: String,
    /// Observed nonce-search duration in seconds. Not part of the hash
    /// record; consumed by the difficulty controller.
    #[serde(rename = "miningTime", default)]
    pub mining_time: f64,
}

impl Block {
    /// Assemble an unmined block. The merkle root is computed from the given
    /// transactions; the hash is left for the miner to settle.
    pub fn new(
        index: u64,
        prev_hash: String,
        transactions: Vec<Transaction>,
        difficulty: u32,
        miner: String,
    ) -> Self {
        let merkle_root = merkle_root(&transactions);
        let mut block = Self {
            index,
            timestamp: Utc::now(),
            transactions,
            merkle_root,
            prev_hash,
            hash: String::new(),
            nonce: 0,
            difficulty,
            miner,
            mining_time: 0.0,
        };
        block.hash = block.compute_hash();
        block
    }

    /// Assemble the unmined genesis block: index 0, empty previous hash, and
    /// a single coinbase of the genesis reward.
    pub fn genesis(timestamp: DateTime<Utc>) -> Self {
        let coinbase = Transaction {
            id: "genesis_coinbase".to_string(),
            sender: crate::transaction::SYSTEM_ADDRESS.to_string(),
            recipient: GENESIS_ADDRESS.to_string(),
            amount: GENESIS_REWARD,
            fee: 0.0,
            timestamp,
            signature: String::new(),
            public_key: String::new(),
            data: String::new(),
        };

        let transactions = vec![coinbase];
        let merkle_root = merkle_root(&transactions);
        let mut block = Self {
            index: 0,
            timestamp,
            transactions,
            merkle_root,
            prev_hash: String::new(),
            hash: String::new(),
            nonce: 0,
            difficulty: GENESIS_DIFFICULTY,
            miner: crate::transaction::SYSTEM_ADDRESS.to_string(),
            mining_time: 0.0,
        };
        block.hash = block.compute_hash();
        block
    }

    /// The canonical record hashed into `hash`:
    /// `index || timestamp(RFC3339) || merkle_root || prev_hash || nonce || difficulty`.
    pub fn canonical_record(&self) -> String {
        format!(
            "{}{}{}{}{}{}",
            self.index,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.merkle_root,
            self.prev_hash,
            self.nonce,
            self.difficulty
        )
    }

    /// Hash the canonical record.
    pub fn compute_hash(&self) -> String {
        sha256_hex(self.canonical_record().as_bytes())
    }

    /// Whether a hex digest satisfies a difficulty target. The comparison is
    /// on the hex representation: `difficulty` leading `'0'` characters.
    pub fn hash_meets_difficulty(hash: &str, difficulty: u32) -> bool {
        hash.chars().take(difficulty as usize).all(|c| c == '0')
            && hash.len() >= difficulty as usize
    }

    /// Whether this block's stored hash satisfies its stored difficulty.
    pub fn meets_difficulty(&self) -> bool {
        Self::hash_meets_difficulty(&self.hash, self.difficulty)
    }

    /// Recompute the merkle root and compare against the stored one.
    pub fn verify_merkle_root(&self) -> bool {
        merkle_root(&self.transactions) == self.merkle_root
    }

    /// Whether this is the genesis block.
    pub fn is_genesis(&self) -> bool {
        self.index == 0 && self.prev_hash.is_empty()
    }

    /// Sum of the non-system transaction amounts in the block.
    pub fn transferred_total(&self) -> f64 {
        self.transactions
            .iter()
            .filter(|tx| !tx.is_system())
            .map(|tx| tx.amount)
            .sum()
    }

    /// Number of transactions in this block.
    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "block #{} [{}] txs={} difficulty={} miner={}",
            self.index,
            &self.hash[..self.hash.len().min(12)],
            self.transactions.len(),
            self.difficulty,
            self.miner
        )
    }
}
