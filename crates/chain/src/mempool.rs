//! Concurrent pool of pending transactions.
//!
//! The mempool is keyed by transaction id with a unique-id invariant; the
//! balance-aware admission checks live on the blockchain, which consults
//! `pending_outflow` to subtract in-flight spending from confirmed balances.

use cryptochain_core::Transaction;
use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during mempool operations.
#[derive(Debug, Error)]
pub enum MempoolError {
    #[error("transaction already in mempool")]
    DuplicateTransaction,

    #[error("mempool is full (capacity: {0})")]
    MempoolFull(usize),

    #[error("transaction not found in mempool")]
    TransactionNotFound,
}

pub type Result<T> = std::result::Result<T, MempoolError>;

/// Configuration for the mempool.
#[derive(Debug, Clone)]
pub struct MempoolConfig {
    /// Maximum number of pending transactions.
    pub max_transactions: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_transactions: 10_000,
        }
    }
}

/// Transaction mempool. Readers run in parallel; writers exclude all other
/// access through the interior lock.
pub struct Mempool {
    config: MempoolConfig,
    transactions: RwLock<HashMap<String, Transaction>>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::with_config(MempoolConfig::default())
    }

    pub fn with_config(config: MempoolConfig) -> Self {
        Self {
            config,
            transactions: RwLock::new(HashMap::new()),
        }
    }

    /// Number of pending transactions.
    pub fn len(&self) -> usize {
        self.transactions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.read().is_empty()
    }

    /// Whether a transaction id is pending.
    pub fn contains(&self, id: &str) -> bool {
        self.transactions.read().contains_key(id)
    }

    /// Fetch a pending transaction by id.
    pub fn get(&self, id: &str) -> Option<Transaction> {
        self.transactions.read().get(id).cloned()
    }

    /// Insert an already-validated transaction, enforcing the unique-id
    /// invariant and the capacity bound.
    pub fn insert(&self, tx: Transaction) -> Result<()> {
        let mut transactions = self.transactions.write();

        if transactions.contains_key(&tx.id) {
            return Err(MempoolError::DuplicateTransaction);
        }
        if transactions.len() >= self.config.max_transactions {
            return Err(MempoolError::MempoolFull(self.config.max_transactions));
        }

        transactions.insert(tx.id.clone(), tx);
        Ok(())
    }

    /// Remove a transaction unconditionally.
    pub fn remove(&self, id: &str) -> Result<Transaction> {
        self.transactions
            .write()
            .remove(id)
            .ok_or(MempoolError::TransactionNotFound)
    }

    /// Remove a batch of ids, ignoring the ones already gone.
    pub fn remove_batch(&self, ids: &[String]) {
        let mut transactions = self.transactions.write();
        for id in ids {
            transactions.remove(id);
        }
    }

    /// Select up to `limit` transactions, highest fee first. Selected
    /// transactions stay in the pool until the block containing them is
    /// appended.
    pub fn select(&self, limit: usize) -> Vec<Transaction> {
        let mut txs: Vec<Transaction> = self.transactions.read().values().cloned().collect();
        txs.sort_by(|a, b| b.fee.partial_cmp(&a.fee).unwrap_or(std::cmp::Ordering::Equal));
        txs.truncate(limit);
        txs
    }

    /// Sum of `amount + fee` across this sender's pending transactions.
    pub fn pending_outflow(&self, sender: &str) -> f64 {
        self.transactions
            .read()
            .values()
            .filter(|tx| tx.sender == sender)
            .map(Transaction::total_cost)
            .sum()
    }

    /// Every pending transaction.
    pub fn all(&self) -> Vec<Transaction> {
        self.transactions.read().values().cloned().collect()
    }

    /// Snapshot for persistence.
    pub fn snapshot(&self) -> HashMap<String, Transaction> {
        self.transactions.read().clone()
    }

    /// Restore a persisted snapshot, replacing the current contents.
    pub fn restore(&self, transactions: HashMap<String, Transaction>) {
        *self.transactions.write() = transactions;
    }

    pub fn clear(&self) {
        self.transactions.write().clear();
    }

    pub fn stats(&self) -> MempoolStats {
        let transactions = self.transactions.read();
        let unique_senders = transactions
            .values()
            .map(|tx| tx.sender.as_str())
            .collect::<std::collections::HashSet<_>>()
            .len();
        MempoolStats {
            pending_transactions: transactions.len(),
            unique_senders,
            capacity: self.config.max_transactions,
        }
    }
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new()
    }
}

/// Mempool statistics.
#[derive(Debug, Clone)]
pub struct MempoolStats {
    pub pending_transactions: usize,
    pub unique_senders: usize,
    pub capacity: usize,
}
