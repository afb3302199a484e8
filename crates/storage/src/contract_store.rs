//! Contract persistence and address indexing.

use crate::db::{BatchOp, Result, StorageError, Store};
use cryptochain_contracts::Contract;

/// Persists contracts under `c:` with an `ac:` address index covering the
/// creator, the recipient, and every participant.
pub struct ContractStore<'a> {
    store: &'a Store,
}

impl<'a> ContractStore<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Write a contract and its address index entries in one batch. Used
    /// both for creation and for status updates.
    pub fn put(&self, contract: &Contract) -> Result<()> {
        let mut ops = vec![BatchOp::Put {
            key: Store::contract_key(&contract.id),
            value: serde_json::to_vec(contract)?,
        }];

        let mut addresses: Vec<&str> = vec![&contract.created_by, &contract.recipient];
        addresses.extend(contract.participants.iter().map(String::as_str));
        addresses.sort_unstable();
        addresses.dedup();

        for address in addresses {
            ops.push(BatchOp::Put {
                key: Store::address_contract_key(address, &contract.id),
                value: vec![1],
            });
        }

        self.store.apply_batch(ops)
    }

    /// Fetch a contract by id.
    pub fn get(&self, id: &str) -> Result<Option<Contract>> {
        self.store.get_json(Store::contract_key(id))
    }

    /// Fetch a contract by id, erroring when unknown.
    pub fn get_or_err(&self, id: &str) -> Result<Contract> {
        self.get(id)?
            .ok_or_else(|| StorageError::NotFound(format!("contract {}", id)))
    }

    /// Whether a contract id is already known.
    pub fn contains(&self, id: &str) -> Result<bool> {
        self.store.contains(Store::contract_key(id))
    }

    /// Every contract involving an address, via the `ac:` index.
    pub fn by_address(&self, address: &str) -> Result<Vec<Contract>> {
        let prefix = format!("ac:{}:", address).into_bytes();
        let mut out = Vec::new();
        for (key, _) in self.store.scan_prefix(&prefix)? {
            let id = String::from_utf8(key[prefix.len()..].to_vec())
                .map_err(|_| StorageError::InvalidValue("ac".to_string()))?;
            if let Some(contract) = self.get(&id)? {
                out.push(contract);
            }
        }
        Ok(out)
    }

    /// Every stored contract, for the periodic pending sweep.
    pub fn all(&self) -> Result<Vec<Contract>> {
        let mut out = Vec::new();
        for (_, value) in self.store.scan_prefix(b"c:")? {
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }
}
