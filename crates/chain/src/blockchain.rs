//! The blockchain aggregate: blocks, balances, difficulty, and mining.

use crate::mempool::{Mempool, MempoolConfig, MempoolError};
use chrono::Utc;
use cryptochain_consensus::{
    adjust_difficulty, mine, validate_chain, ChainValidationError, DifficultyConfig,
};
use cryptochain_consensus::validator::validate_block;
use cryptochain_core::{Block, Transaction, TransactionError, GENESIS_DIFFICULTY};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by chain operations.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("invalid transaction: {0}")]
    InvalidTransaction(#[from] TransactionError),

    #[error("duplicate id: {0}")]
    DuplicateId(String),

    #[error(
        "insufficient funds for {address}: required {required:.8}, available {available:.8}"
    )]
    InsufficientFunds {
        address: String,
        required: f64,
        available: f64,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("chain broken: {0}")]
    ChainBroken(#[from] ChainValidationError),

    #[error("tip moved while mining (expected parent {expected}, found {actual})")]
    StaleTip { expected: String, actual: String },

    #[error("mempool error: {0}")]
    Mempool(#[from] MempoolError),

    #[error("contract error: {0}")]
    Contract(#[from] cryptochain_contracts::ContractError),

    #[error("no wallet held for signer {0}")]
    SignerUnavailable(String),

    #[error("storage error: {0}")]
    Storage(#[from] cryptochain_storage::StorageError),
}

pub type Result<T> = std::result::Result<T, ChainError>;

/// Blockchain configuration.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Difficulty mining starts at.
    pub initial_difficulty: u32,
    /// Coinbase reward per block.
    pub mining_reward: f64,
    /// Difficulty controller tuning.
    pub difficulty: DifficultyConfig,
    /// Maximum transactions pulled into one block, coinbase excluded.
    pub max_block_transactions: usize,
    /// Mempool tuning.
    pub mempool: MempoolConfig,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            initial_difficulty: GENESIS_DIFFICULTY,
            mining_reward: 50.0,
            difficulty: DifficultyConfig::default(),
            max_block_transactions: 100,
            mempool: MempoolConfig::default(),
        }
    }
}

/// Everything guarded by the chain's writer lock. Block append, balance
/// application, and difficulty adjustment happen inside one critical section
/// so the tip stays consistent.
struct ChainState {
    blocks: Vec<Block>,
    balances: HashMap<String, f64>,
    confirmed_ids: HashSet<String>,
    difficulty: u32,
}

impl ChainState {
    fn apply_block(&mut self, block: &Block) {
        for tx in &block.transactions {
            *self.balances.entry(tx.recipient.clone()).or_insert(0.0) += tx.amount;
            if !tx.is_system() {
                *self.balances.entry(tx.sender.clone()).or_insert(0.0) -= tx.total_cost();
            }
            self.confirmed_ids.insert(tx.id.clone());
        }
        self.blocks.push(block.clone());
    }

    fn tip(&self) -> &Block {
        self.blocks.last().expect("chain always holds genesis")
    }
}

/// The chain aggregate. One writer lock guards the block vector, the derived
/// balance ledger, and the current difficulty; the mempool carries its own
/// lock and is always taken after the chain's.
pub struct Blockchain {
    state: RwLock<ChainState>,
    mempool: Mempool,
    config: ChainConfig,
}

impl Blockchain {
    /// Create a fresh chain by mining a genesis block.
    pub async fn new(config: ChainConfig) -> Self {
        let mut genesis = Block::genesis(Utc::now());
        let difficulty = genesis.difficulty;
        mine(&mut genesis, difficulty).await;
        Self::with_genesis(genesis, config)
    }

    /// Create a chain from an existing (mined) genesis block. Peers that
    /// share a network must share the genesis.
    pub fn with_genesis(genesis: Block, config: ChainConfig) -> Self {
        let mempool = Mempool::with_config(config.mempool.clone());
        let mut state = ChainState {
            blocks: Vec::new(),
            balances: HashMap::new(),
            confirmed_ids: HashSet::new(),
            difficulty: config.initial_difficulty,
        };
        state.apply_block(&genesis);

        Self {
            state: RwLock::new(state),
            mempool,
            config,
        }
    }

    /// Rebuild a chain from persisted blocks, validating the whole chain and
    /// replaying every balance. The stored balance index is only a cache;
    /// this replay is the source of truth.
    pub fn from_blocks(blocks: Vec<Block>, config: ChainConfig) -> Result<Self> {
        validate_chain(&blocks)?;

        let mut iter = blocks.into_iter();
        let genesis = iter
            .next()
            .ok_or(ChainError::ChainBroken(ChainValidationError::Empty))?;
        let chain = Self::with_genesis(genesis, config);

        {
            let mut state = chain.state.write();
            for block in iter {
                state.difficulty = block.difficulty;
                state.apply_block(&block);
            }
            let mining_time = Duration::from_secs_f64(state.tip().mining_time.max(0.0));
            state.difficulty =
                adjust_difficulty(state.difficulty, mining_time, &chain.config.difficulty);
        }

        Ok(chain)
    }

    /// The mempool owned by this chain.
    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    /// Height of the tip.
    pub fn height(&self) -> u64 {
        self.state.read().tip().index
    }

    /// A clone of the tip block.
    pub fn tip(&self) -> Block {
        self.state.read().tip().clone()
    }

    /// A snapshot of the whole chain.
    pub fn blocks(&self) -> Vec<Block> {
        self.state.read().blocks.clone()
    }

    /// Current mining difficulty.
    pub fn difficulty(&self) -> u32 {
        self.state.read().difficulty
    }

    /// Fetch a block by index.
    pub fn block_by_index(&self, index: u64) -> Option<Block> {
        self.state.read().blocks.get(index as usize).cloned()
    }

    /// Fetch a block by hash.
    pub fn block_by_hash(&self, hash: &str) -> Option<Block> {
        self.state
            .read()
            .blocks
            .iter()
            .find(|b| b.hash == hash)
            .cloned()
    }

    /// Whether a transaction id is confirmed in some block.
    pub fn is_confirmed(&self, id: &str) -> bool {
        self.state.read().confirmed_ids.contains(id)
    }

    /// Confirmed balance of an address, derived from the applied blocks.
    pub fn balance(&self, address: &str) -> f64 {
        self.state
            .read()
            .balances
            .get(address)
            .copied()
            .unwrap_or(0.0)
    }

    /// Every confirmed balance.
    pub fn balances(&self) -> HashMap<String, f64> {
        self.state.read().balances.clone()
    }

    /// Confirmed transactions touching an address, oldest first.
    pub fn transaction_history(&self, address: &str) -> Vec<Transaction> {
        self.state
            .read()
            .blocks
            .iter()
            .flat_map(|b| b.transactions.iter())
            .filter(|tx| tx.sender == address || tx.recipient == address)
            .cloned()
            .collect()
    }

    /// Admit a transaction to the mempool.
    ///
    /// The transaction must verify, its id must be new to
    /// both the mempool and the chain, and a non-system sender must cover
    /// `amount + fee` out of confirmed balance minus pending outflows.
    pub fn add_transaction(&self, tx: Transaction) -> Result<()> {
        tx.verify()?;

        if self.mempool.contains(&tx.id) || self.is_confirmed(&tx.id) {
            return Err(ChainError::DuplicateId(tx.id));
        }

        if !tx.is_system() {
            let confirmed = self.balance(&tx.sender);
            let available = confirmed - self.mempool.pending_outflow(&tx.sender);
            let required = tx.total_cost();
            if available < required {
                return Err(ChainError::InsufficientFunds {
                    address: tx.sender,
                    required,
                    available,
                });
            }
        }

        tracing::debug!(id = %tx.id, sender = %tx.sender, "transaction admitted");
        self.mempool.insert(tx)?;
        Ok(())
    }

    /// Assemble, mine, and append a new block.
    ///
    /// The tip is snapshotted under a short read lock, the nonce search runs
    /// without any lock, and the append (balance application and difficulty
    /// adjustment included) happens under the write lock. If another block
    /// landed while mining, the result is discarded with `StaleTip`.
    pub async fn create_block(&self, miner: &str) -> Result<Block> {
        let (index, prev_hash, difficulty) = {
            let state = self.state.read();
            let tip = state.tip();
            (tip.index + 1, tip.hash.clone(), state.difficulty)
        };

        let mut transactions = vec![Transaction::coinbase(
            miner,
            self.config.mining_reward,
            index,
            Utc::now(),
        )];

        let mut included = Vec::new();
        for tx in self.mempool.select(self.config.max_block_transactions) {
            if tx.verify().is_ok() && !self.is_confirmed(&tx.id) {
                included.push(tx.id.clone());
                transactions.push(tx);
            }
        }

        let mut block = Block::new(index, prev_hash, transactions, difficulty, miner.to_string());
        let elapsed = mine(&mut block, difficulty).await;

        {
            let mut state = self.state.write();
            let tip_hash = state.tip().hash.clone();
            if block.prev_hash != tip_hash {
                return Err(ChainError::StaleTip {
                    expected: block.prev_hash,
                    actual: tip_hash,
                });
            }
            state.apply_block(&block);
            state.difficulty =
                adjust_difficulty(state.difficulty, elapsed, &self.config.difficulty);
        }

        self.mempool.remove_batch(&included);
        tracing::info!(index = block.index, txs = block.tx_count(), "block mined");
        Ok(block)
    }

    /// Append a block received from a peer.
    ///
    /// The block must extend the current tip and pass full validation;
    /// a failure leaves local state untouched. Included transactions are
    /// evicted from the mempool.
    pub fn append_block(&self, block: Block) -> Result<()> {
        let included: Vec<String> = block.transactions.iter().map(|tx| tx.id.clone()).collect();

        {
            let mut state = self.state.write();
            validate_block(&block, state.tip())?;

            for tx in &block.transactions {
                if state.confirmed_ids.contains(&tx.id) {
                    return Err(ChainError::DuplicateId(tx.id.clone()));
                }
            }

            state.apply_block(&block);
            let mining_time = Duration::from_secs_f64(block.mining_time.max(0.0));
            state.difficulty =
                adjust_difficulty(state.difficulty, mining_time, &self.config.difficulty);
        }

        self.mempool.remove_batch(&included);
        tracing::info!(index = block.index, "peer block appended");
        Ok(())
    }

    /// Run full validation over a snapshot of the chain. Hashing is
    /// CPU-bound and runs without holding the lock.
    pub fn validate(&self) -> Result<()> {
        let blocks = self.blocks();
        validate_chain(&blocks)?;
        Ok(())
    }

    /// Chain statistics.
    pub fn stats(&self) -> ChainStats {
        let state = self.state.read();
        ChainStats {
            height: state.tip().index,
            blocks: state.blocks.len(),
            difficulty: state.difficulty,
            mining_reward: self.config.mining_reward,
            latest_hash: state.tip().hash.clone(),
            pending_transactions: self.mempool.len(),
        }
    }

    /// Chain configuration.
    pub fn config(&self) -> &ChainConfig {
        &self.config
    }
}

/// Point-in-time chain statistics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChainStats {
    pub height: u64,
    pub blocks: usize,
    pub difficulty: u32,
    pub mining_reward: f64,
    pub latest_hash: String,
    pub pending_transactions: usize,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use cryptochain_core::{KeyPair, SYSTEM_ADDRESS};

    pub(crate) fn test_config() -> ChainConfig {
        ChainConfig {
            initial_difficulty: 1,
            difficulty: DifficultyConfig::fast(),
            ..ChainConfig::default()
        }
    }

    /// Fund an address through a mined block carrying a system transfer.
    pub(crate) async fn fund(chain: &Blockchain, address: &str, amount: f64) {
        let tip = chain.tip();
        let grant = Transaction::new(SYSTEM_ADDRESS, address, amount, 0.0);
        let mut block = Block::new(
            tip.index + 1,
            tip.hash,
            vec![grant],
            chain.difficulty(),
            "faucet".to_string(),
        );
        mine(&mut block, chain.difficulty()).await;
        chain.append_block(block).unwrap();
    }

    #[tokio::test]
    async fn test_genesis_chain() {
        let chain = Blockchain::new(test_config()).await;
        assert_eq!(chain.height(), 0);

        let genesis = chain.tip();
        assert!(genesis.is_genesis());
        assert_eq!(genesis.transactions.len(), 1);
        assert_eq!(
            chain.balance(cryptochain_core::GENESIS_ADDRESS),
            cryptochain_core::GENESIS_REWARD
        );
        assert!(chain.validate().is_ok());
    }

    #[tokio::test]
    async fn test_mine_and_validate_balances() {
        let chain = Blockchain::new(test_config()).await;

        let alice = KeyPair::generate();
        fund(&chain, &alice.address(), 10.0).await;

        let tx = Transaction::new(&alice.address(), "bob", 5.0, 0.1).signed(&alice);
        chain.add_transaction(tx).unwrap();

        let block = chain.create_block("miner1").await.unwrap();
        assert_eq!(block.transactions.len(), 2);
        assert_eq!(block.transactions[0].sender, SYSTEM_ADDRESS);

        assert_eq!(chain.balance("bob"), 5.0);
        assert!((chain.balance(&alice.address()) - 4.9).abs() < 1e-9);
        assert_eq!(chain.balance("miner1"), chain.config().mining_reward);
        assert!(chain.validate().is_ok());
        assert!(chain.mempool().is_empty());
    }

    #[tokio::test]
    async fn test_insufficient_funds_rejected() {
        let chain = Blockchain::new(test_config()).await;

        let alice = KeyPair::generate();
        fund(&chain, &alice.address(), 10.0).await;

        let tx = Transaction::new(&alice.address(), "bob", 100.0, 1.0).signed(&alice);
        let err = chain.add_transaction(tx).unwrap_err();
        assert!(matches!(err, ChainError::InsufficientFunds { .. }));
        assert!(chain.mempool().is_empty());
    }

    #[tokio::test]
    async fn test_pending_outflow_counts_against_balance() {
        let chain = Blockchain::new(test_config()).await;

        let alice = KeyPair::generate();
        fund(&chain, &alice.address(), 10.0).await;

        let tx1 = Transaction::new(&alice.address(), "bob", 6.0, 0.0).signed(&alice);
        chain.add_transaction(tx1).unwrap();

        // 6 of the 10 are already promised; another 6 must be rejected
        let tx2 = Transaction::new(&alice.address(), "carol", 6.0, 0.0).signed(&alice);
        assert!(matches!(
            chain.add_transaction(tx2),
            Err(ChainError::InsufficientFunds { .. })
        ));
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let chain = Blockchain::new(test_config()).await;

        let alice = KeyPair::generate();
        fund(&chain, &alice.address(), 10.0).await;

        let tx = Transaction::new(&alice.address(), "bob", 1.0, 0.1).signed(&alice);
        chain.add_transaction(tx.clone()).unwrap();
        assert!(matches!(
            chain.add_transaction(tx.clone()),
            Err(ChainError::DuplicateId(_))
        ));

        // Confirm it, then try again: still a duplicate
        chain.create_block("miner1").await.unwrap();
        assert!(matches!(
            chain.add_transaction(tx),
            Err(ChainError::DuplicateId(_))
        ));
    }

    #[tokio::test]
    async fn test_unsigned_transaction_rejected() {
        let chain = Blockchain::new(test_config()).await;
        let tx = Transaction::new("alice", "bob", 1.0, 0.1);
        assert!(matches!(
            chain.add_transaction(tx),
            Err(ChainError::InvalidTransaction(_))
        ));
    }

    #[tokio::test]
    async fn test_append_block_from_peer() {
        let config = test_config();
        let chain = Blockchain::new(config.clone()).await;
        let peer = Blockchain::with_genesis(chain.tip(), config);

        peer.create_block("peer-miner").await.unwrap();
        let block = peer.tip();

        chain.append_block(block).unwrap();
        assert_eq!(chain.height(), 1);
        assert_eq!(chain.balance("peer-miner"), 50.0);
    }

    #[tokio::test]
    async fn test_append_rejects_bad_link() {
        let chain = Blockchain::new(test_config()).await;
        let mut block = Block::new(1, "f".repeat(64), vec![], 1, "m".to_string());
        mine(&mut block, 1).await;

        assert!(matches!(
            chain.append_block(block),
            Err(ChainError::ChainBroken(_))
        ));
        assert_eq!(chain.height(), 0);
    }

    #[tokio::test]
    async fn test_from_blocks_replays_balances() {
        let config = test_config();
        let chain = Blockchain::new(config.clone()).await;

        let alice = KeyPair::generate();
        fund(&chain, &alice.address(), 10.0).await;
        let tx = Transaction::new(&alice.address(), "bob", 5.0, 0.1).signed(&alice);
        chain.add_transaction(tx).unwrap();
        chain.create_block("miner1").await.unwrap();

        let rebuilt = Blockchain::from_blocks(chain.blocks(), config).unwrap();
        assert_eq!(rebuilt.height(), chain.height());
        assert_eq!(rebuilt.balance("bob"), 5.0);
        assert!((rebuilt.balance(&alice.address()) - 4.9).abs() < 1e-9);
        assert!(rebuilt.validate().is_ok());
    }

    #[tokio::test]
    async fn test_balance_conservation() {
        let chain = Blockchain::new(test_config()).await;

        let alice = KeyPair::generate();
        fund(&chain, &alice.address(), 10.0).await;
        let tx = Transaction::new(&alice.address(), "bob", 3.0, 0.5).signed(&alice);
        chain.add_transaction(tx).unwrap();
        chain.create_block("miner1").await.unwrap();

        // Every balance equals credits minus debits-plus-fees over the chain
        let mut expected: HashMap<String, f64> = HashMap::new();
        for block in chain.blocks() {
            for tx in &block.transactions {
                *expected.entry(tx.recipient.clone()).or_insert(0.0) += tx.amount;
                if !tx.is_system() {
                    *expected.entry(tx.sender.clone()).or_insert(0.0) -= tx.total_cost();
                }
            }
        }
        for (address, balance) in expected {
            assert!((chain.balance(&address) - balance).abs() < 1e-9);
        }
    }

    #[tokio::test]
    async fn test_transaction_history() {
        let chain = Blockchain::new(test_config()).await;
        let alice = KeyPair::generate();
        fund(&chain, &alice.address(), 10.0).await;

        let tx = Transaction::new(&alice.address(), "bob", 2.0, 0.1).signed(&alice);
        chain.add_transaction(tx).unwrap();
        chain.create_block("miner1").await.unwrap();

        let history = chain.transaction_history(&alice.address());
        assert_eq!(history.len(), 2); // the grant plus the spend
        assert_eq!(chain.transaction_history("bob").len(), 1);
    }

    #[tokio::test]
    async fn test_stats() {
        let chain = Blockchain::new(test_config()).await;
        let stats = chain.stats();
        assert_eq!(stats.height, 0);
        assert_eq!(stats.blocks, 1);
        assert_eq!(stats.pending_transactions, 0);
    }
}
