//! Durable key-value persistence for cryptochain.
//!
//! Everything the node keeps on disk lives in a single sled tree under one
//! root directory, addressed by a small set of key families:
//!
//! ```text
//!   b:<hash>             -> serialized block
//!   bh:<height>          -> block hash
//!   tx:<id>              -> serialized transaction
//!   txb:<id>             -> block hash containing the tx
//!   atx:<addr>:<txid>    -> 1 (address -> tx index)
//!   c:<id>               -> serialized contract
//!   ac:<addr>:<cid>      -> 1 (address -> contract index)
//!   bal:<addr>           -> balance as decimal string
//!   height               -> latest height as decimal
//!   mempool              -> serialized mempool snapshot
//! ```
//!
//! Values are canonical JSON. The chain itself is the source of truth; the
//! balance and address indices are caches a recovering node can rebuild by
//! replaying blocks.

pub mod chain_store;
pub mod contract_store;
pub mod db;

pub use chain_store::ChainStore;
pub use contract_store::ContractStore;
pub use db::{BatchOp, Store, StorageError};
