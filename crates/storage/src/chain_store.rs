//! Block, transaction, and balance persistence.

use crate::db::{BatchOp, Result, StorageError, Store};
use cryptochain_core::{Block, Transaction};
use std::collections::HashMap;

/// Persists the chain and its derived indices.
pub struct ChainStore<'a> {
    store: &'a Store,
}

impl<'a> ChainStore<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Persist a block and every index it touches in one atomic batch:
    /// the block by hash, the height pointer, the latest height, each
    /// transaction, its containing-block pointer, and both address indices.
    pub fn put_block(&self, block: &Block) -> Result<()> {
        let mut ops = Vec::with_capacity(3 + block.transactions.len() * 4);

        ops.push(BatchOp::Put {
            key: Store::block_key(&block.hash),
            value: serde_json::to_vec(block)?,
        });
        ops.push(BatchOp::Put {
            key: Store::block_height_key(block.index),
            value: block.hash.clone().into_bytes(),
        });
        ops.push(BatchOp::Put {
            key: Store::HEIGHT_KEY.to_vec(),
            value: block.index.to_string().into_bytes(),
        });

        for tx in &block.transactions {
            ops.push(BatchOp::Put {
                key: Store::tx_key(&tx.id),
                value: serde_json::to_vec(tx)?,
            });
            ops.push(BatchOp::Put {
                key: Store::tx_block_key(&tx.id),
                value: block.hash.clone().into_bytes(),
            });
            ops.push(BatchOp::Put {
                key: Store::address_tx_key(&tx.sender, &tx.id),
                value: vec![1],
            });
            ops.push(BatchOp::Put {
                key: Store::address_tx_key(&tx.recipient, &tx.id),
                value: vec![1],
            });
        }

        self.store.apply_batch(ops)
    }

    /// Fetch a block by its hash.
    pub fn block(&self, hash: &str) -> Result<Option<Block>> {
        self.store.get_json(Store::block_key(hash))
    }

    /// Fetch a block by height: height pointer first, then the block.
    pub fn block_by_height(&self, height: u64) -> Result<Option<Block>> {
        match self.store.get_string(Store::block_height_key(height))? {
            Some(hash) => self.block(&hash),
            None => Ok(None),
        }
    }

    /// The latest persisted height, or None for a fresh store.
    pub fn latest_height(&self) -> Result<Option<u64>> {
        match self.store.get_string(Store::HEIGHT_KEY)? {
            Some(raw) => raw
                .parse::<u64>()
                .map(Some)
                .map_err(|_| StorageError::InvalidValue("height".to_string())),
            None => Ok(None),
        }
    }

    /// Load the whole chain in height order for boot-time replay. Stops at
    /// the first gap.
    pub fn load_blocks(&self) -> Result<Vec<Block>> {
        let Some(height) = self.latest_height()? else {
            return Ok(Vec::new());
        };

        let mut blocks = Vec::with_capacity(height as usize + 1);
        for h in 0..=height {
            match self.block_by_height(h)? {
                Some(block) => blocks.push(block),
                None => break,
            }
        }
        Ok(blocks)
    }

    /// Fetch a transaction by id.
    pub fn transaction(&self, id: &str) -> Result<Option<Transaction>> {
        self.store.get_json(Store::tx_key(id))
    }

    /// The hash of the block containing a transaction.
    pub fn transaction_block(&self, id: &str) -> Result<Option<String>> {
        self.store.get_string(Store::tx_block_key(id))
    }

    /// Every transaction touching an address, via the `atx:` index.
    pub fn transactions_by_address(&self, address: &str) -> Result<Vec<Transaction>> {
        let prefix = format!("atx:{}:", address).into_bytes();
        let mut out = Vec::new();
        for (key, _) in self.store.scan_prefix(&prefix)? {
            let id = String::from_utf8(key[prefix.len()..].to_vec())
                .map_err(|_| StorageError::InvalidValue("atx".to_string()))?;
            if let Some(tx) = self.transaction(&id)? {
                out.push(tx);
            }
        }
        Ok(out)
    }

    /// Persist a balance as a decimal string.
    pub fn put_balance(&self, address: &str, balance: f64) -> Result<()> {
        self.store
            .put_raw(Store::balance_key(address), format!("{}", balance).as_bytes())
    }

    /// Persist a whole balance map in one batch.
    pub fn put_balances(&self, balances: &HashMap<String, f64>) -> Result<()> {
        let ops = balances
            .iter()
            .map(|(address, balance)| BatchOp::Put {
                key: Store::balance_key(address),
                value: format!("{}", balance).into_bytes(),
            })
            .collect();
        self.store.apply_batch(ops)
    }

    /// Read back a persisted balance. Missing addresses are zero.
    pub fn balance(&self, address: &str) -> Result<f64> {
        match self.store.get_string(Store::balance_key(address))? {
            Some(raw) => raw
                .parse::<f64>()
                .map_err(|_| StorageError::InvalidValue(format!("bal:{}", address))),
            None => Ok(0.0),
        }
    }

    /// Snapshot the mempool under the `mempool` key.
    pub fn save_mempool(&self, transactions: &HashMap<String, Transaction>) -> Result<()> {
        self.store.put_json(Store::MEMPOOL_KEY, transactions)
    }

    /// Restore a mempool snapshot. A fresh store yields an empty map.
    pub fn load_mempool(&self) -> Result<HashMap<String, Transaction>> {
        Ok(self
            .store
            .get_json(Store::MEMPOOL_KEY)?
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryptochain_core::KeyPair;

    fn sample_block(index: u64, prev_hash: &str) -> Block {
        let kp = KeyPair::generate();
        let coinbase = Transaction::coinbase("miner1", 50.0, index, chrono::Utc::now());
        let transfer = Transaction::new(&kp.address(), "bob", 2.0, 0.1).signed(&kp);
        Block::new(
            index,
            prev_hash.to_string(),
            vec![coinbase, transfer],
            1,
            "miner1".to_string(),
        )
    }

    #[test]
    fn test_block_roundtrip() {
        let store = Store::open_temporary().unwrap();
        let chain = ChainStore::new(&store);

        let block = sample_block(1, "prev");
        chain.put_block(&block).unwrap();

        let loaded = chain.block(&block.hash).unwrap().unwrap();
        assert_eq!(loaded, block);

        let by_height = chain.block_by_height(1).unwrap().unwrap();
        assert_eq!(by_height.hash, block.hash);

        assert_eq!(chain.latest_height().unwrap(), Some(1));
    }

    #[test]
    fn test_missing_block_is_none() {
        let store = Store::open_temporary().unwrap();
        let chain = ChainStore::new(&store);
        assert!(chain.block("nope").unwrap().is_none());
        assert!(chain.block_by_height(0).unwrap().is_none());
        assert_eq!(chain.latest_height().unwrap(), None);
    }

    #[test]
    fn test_transaction_indices() {
        let store = Store::open_temporary().unwrap();
        let chain = ChainStore::new(&store);

        let block = sample_block(1, "prev");
        chain.put_block(&block).unwrap();

        let transfer = &block.transactions[1];
        let loaded = chain.transaction(&transfer.id).unwrap().unwrap();
        assert_eq!(&loaded, transfer);

        assert_eq!(
            chain.transaction_block(&transfer.id).unwrap().unwrap(),
            block.hash
        );

        let sender_txs = chain.transactions_by_address(&transfer.sender).unwrap();
        assert_eq!(sender_txs.len(), 1);

        let recipient_txs = chain.transactions_by_address("bob").unwrap();
        assert_eq!(recipient_txs.len(), 1);
    }

    #[test]
    fn test_load_blocks_in_order() {
        let store = Store::open_temporary().unwrap();
        let chain = ChainStore::new(&store);

        let b0 = sample_block(0, "");
        let b1 = sample_block(1, &b0.hash);
        chain.put_block(&b0).unwrap();
        chain.put_block(&b1).unwrap();

        let blocks = chain.load_blocks().unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].index, 0);
        assert_eq!(blocks[1].index, 1);
    }

    #[test]
    fn test_balances_roundtrip() {
        let store = Store::open_temporary().unwrap();
        let chain = ChainStore::new(&store);

        let mut balances = HashMap::new();
        balances.insert("alice".to_string(), 4.9);
        balances.insert("bob".to_string(), 5.0);
        chain.put_balances(&balances).unwrap();

        assert_eq!(chain.balance("alice").unwrap(), 4.9);
        assert_eq!(chain.balance("bob").unwrap(), 5.0);
        assert_eq!(chain.balance("unknown").unwrap(), 0.0);
    }

    #[test]
    fn test_mempool_snapshot_roundtrip() {
        let store = Store::open_temporary().unwrap();
        let chain = ChainStore::new(&store);

        assert!(chain.load_mempool().unwrap().is_empty());

        let kp = KeyPair::generate();
        let tx = Transaction::new(&kp.address(), "bob", 1.0, 0.1).signed(&kp);
        let mut pending = HashMap::new();
        pending.insert(tx.id.clone(), tx.clone());

        chain.save_mempool(&pending).unwrap();
        let restored = chain.load_mempool().unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored.get(&tx.id).unwrap(), &tx);
    }
}
