//! Bridge between the contract store and the ledger.
//!
//! Contracts live outside the chain; executing one emits an ordinary
//! transaction that goes through normal mempool admission, which means it
//! must carry the creator's signature. The node operates the creators'
//! wallets, so execution resolves a signing key by address through
//! [`SignerResolver`]. The periodic sweep expires overdue contracts and
//! auto-executes the ones whose conditions hold and whose creator's wallet is
//! available.

use crate::blockchain::{Blockchain, ChainError, Result};
use chrono::{DateTime, Utc};
use cryptochain_contracts::{ConditionPredicate, Contract, ContractStatus};
use cryptochain_core::{KeyPair, Transaction};
use cryptochain_storage::ContractStore;

/// Looks up the signing key for an address this node operates.
pub trait SignerResolver: Send + Sync {
    fn keypair_for(&self, address: &str) -> Option<KeyPair>;
}

impl Blockchain {
    /// Store a new contract after checking uniqueness and the creator's
    /// funds. The creator must be able to cover `amount + fee` out of
    /// confirmed balance at creation time.
    pub fn save_contract(&self, store: &ContractStore<'_>, contract: &Contract) -> Result<()> {
        if store.contains(&contract.id)? {
            return Err(ChainError::DuplicateId(contract.id.clone()));
        }

        if contract.created_by != cryptochain_core::SYSTEM_ADDRESS {
            let available = self.balance(&contract.created_by);
            let required = contract.amount + contract.fee;
            if available < required {
                return Err(ChainError::InsufficientFunds {
                    address: contract.created_by.clone(),
                    required,
                    available,
                });
            }
        }

        store.put(contract)?;
        tracing::info!(id = %contract.id, kind = ?contract.contract_type, "contract stored");
        Ok(())
    }

    /// Execute a stored contract: run the state machine, sign the emitted
    /// transaction with the creator's wallet, admit it, and persist the
    /// updated contract with its `tx_id`.
    pub fn execute_contract(
        &self,
        store: &ContractStore<'_>,
        id: &str,
        signers: &dyn SignerResolver,
        predicate: &dyn ConditionPredicate,
        now: DateTime<Utc>,
    ) -> Result<Transaction> {
        let mut contract = store.get_or_err(id)?;

        let keypair = if contract.created_by == cryptochain_core::SYSTEM_ADDRESS {
            None
        } else {
            Some(
                signers
                    .keypair_for(&contract.created_by)
                    .ok_or_else(|| ChainError::SignerUnavailable(contract.created_by.clone()))?,
            )
        };

        let mut tx = contract.execute(now, predicate)?;
        if let Some(keypair) = keypair {
            // Signing covers the id and does not change it, so the tx_id
            // recorded on the contract stays valid.
            tx.sign(&keypair);
        }

        if let Err(err) = self.add_transaction(tx.clone()) {
            // Admission failed after the state transition; record the failure
            // so the contract does not stay executed without a transaction.
            contract.status = ContractStatus::Failed;
            contract.tx_id.clear();
            store.put(&contract)?;
            return Err(err);
        }

        store.put(&contract)?;
        tracing::info!(id = %contract.id, tx_id = %tx.id, "contract executed");
        Ok(tx)
    }

    /// Sweep pending contracts: lazily expire the overdue ones and execute
    /// the ones whose conditions now hold. Contracts whose creator's wallet
    /// is not held by this node are left pending. Returns how many contracts
    /// changed state.
    pub fn process_pending_contracts(
        &self,
        store: &ContractStore<'_>,
        signers: &dyn SignerResolver,
        predicate: &dyn ConditionPredicate,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let mut changed = 0;

        for mut contract in store.all()? {
            if contract.status != ContractStatus::Pending {
                continue;
            }

            if contract.check_expiration(now) {
                store.put(&contract)?;
                changed += 1;
                continue;
            }

            if contract.can_execute(now, predicate) {
                match self.execute_contract(store, &contract.id, signers, predicate, now) {
                    Ok(_) => changed += 1,
                    Err(ChainError::SignerUnavailable(address)) => {
                        tracing::debug!(id = %contract.id, %address, "no wallet for creator, leaving pending");
                    }
                    Err(err) => {
                        tracing::warn!(id = %contract.id, %err, "pending contract failed to execute");
                    }
                }
            }
        }

        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::tests::{fund, test_config};
    use chrono::Duration;
    use cryptochain_contracts::{AlwaysSatisfied, ContractParams, ContractType};
    use std::collections::{BTreeMap, HashMap};

    /// Test resolver backed by a map of private keys.
    struct MapSigners(HashMap<String, Vec<u8>>);

    impl MapSigners {
        fn with(keypairs: &[&KeyPair]) -> Self {
            Self(
                keypairs
                    .iter()
                    .map(|kp| (kp.address(), kp.private_key()))
                    .collect(),
            )
        }
    }

    impl SignerResolver for MapSigners {
        fn keypair_for(&self, address: &str) -> Option<KeyPair> {
            self.0
                .get(address)
                .and_then(|bytes| KeyPair::from_private_key(bytes).ok())
        }
    }

    fn transfer_contract(creator: &str, amount: f64) -> Contract {
        Contract::new(
            ContractParams {
                contract_type: ContractType::Transfer,
                creator: creator.to_string(),
                participants: Vec::new(),
                required_approvals: 0,
                amount,
                fee: 0.0,
                recipient: "r".to_string(),
                data: "settlement".to_string(),
                expires_in: Duration::hours(1),
                conditions: BTreeMap::new(),
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_save_contract_requires_funds() {
        let chain = Blockchain::new(test_config()).await;
        let store = cryptochain_storage::Store::open_temporary().unwrap();
        let contracts = ContractStore::new(&store);

        let contract = transfer_contract("pauper", 5.0);
        assert!(matches!(
            chain.save_contract(&contracts, &contract),
            Err(ChainError::InsufficientFunds { .. })
        ));

        fund(&chain, "pauper", 10.0).await;
        chain.save_contract(&contracts, &contract).unwrap();
        assert!(contracts.contains(&contract.id).unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_contract_rejected() {
        let chain = Blockchain::new(test_config()).await;
        let store = cryptochain_storage::Store::open_temporary().unwrap();
        let contracts = ContractStore::new(&store);

        fund(&chain, "creator", 10.0).await;
        let contract = transfer_contract("creator", 5.0);
        chain.save_contract(&contracts, &contract).unwrap();
        assert!(matches!(
            chain.save_contract(&contracts, &contract),
            Err(ChainError::DuplicateId(_))
        ));
    }

    #[tokio::test]
    async fn test_execute_contract_emits_signed_transaction() {
        let chain = Blockchain::new(test_config()).await;
        let store = cryptochain_storage::Store::open_temporary().unwrap();
        let contracts = ContractStore::new(&store);

        let alice = KeyPair::generate();
        let signers = MapSigners::with(&[&alice]);
        fund(&chain, &alice.address(), 10.0).await;

        let contract = transfer_contract(&alice.address(), 5.0);
        chain.save_contract(&contracts, &contract).unwrap();

        let tx = chain
            .execute_contract(&contracts, &contract.id, &signers, &AlwaysSatisfied, Utc::now())
            .unwrap();
        assert_eq!(tx.sender, alice.address());
        assert_eq!(tx.amount, 5.0);
        assert_eq!(tx.data, "settlement");
        assert!(tx.verify().is_ok());
        assert!(chain.mempool().contains(&tx.id));

        let stored = contracts.get(&contract.id).unwrap().unwrap();
        assert_eq!(stored.status, ContractStatus::Executed);
        assert_eq!(stored.tx_id, tx.id);
    }

    #[tokio::test]
    async fn test_execute_without_wallet_fails() {
        let chain = Blockchain::new(test_config()).await;
        let store = cryptochain_storage::Store::open_temporary().unwrap();
        let contracts = ContractStore::new(&store);

        fund(&chain, "creator", 10.0).await;
        let contract = transfer_contract("creator", 5.0);
        chain.save_contract(&contracts, &contract).unwrap();

        let signers = MapSigners(HashMap::new());
        assert!(matches!(
            chain.execute_contract(
                &contracts,
                &contract.id,
                &signers,
                &AlwaysSatisfied,
                Utc::now()
            ),
            Err(ChainError::SignerUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_execute_without_funds_marks_failed() {
        let chain = Blockchain::new(test_config()).await;
        let store = cryptochain_storage::Store::open_temporary().unwrap();
        let contracts = ContractStore::new(&store);

        let alice = KeyPair::generate();
        let signers = MapSigners::with(&[&alice]);
        fund(&chain, &alice.address(), 10.0).await;

        let contract = transfer_contract(&alice.address(), 5.0);
        chain.save_contract(&contracts, &contract).unwrap();

        // A bigger execution first leaves a 9.0 pending outflow
        let big = transfer_contract(&alice.address(), 9.0);
        chain.save_contract(&contracts, &big).unwrap();
        chain
            .execute_contract(&contracts, &big.id, &signers, &AlwaysSatisfied, Utc::now())
            .unwrap();

        let err = chain
            .execute_contract(&contracts, &contract.id, &signers, &AlwaysSatisfied, Utc::now())
            .unwrap_err();
        assert!(matches!(err, ChainError::InsufficientFunds { .. }));

        let stored = contracts.get(&contract.id).unwrap().unwrap();
        assert_eq!(stored.status, ContractStatus::Failed);
        assert!(stored.tx_id.is_empty());
    }

    #[tokio::test]
    async fn test_pending_sweep_expires_and_executes() {
        let chain = Blockchain::new(test_config()).await;
        let store = cryptochain_storage::Store::open_temporary().unwrap();
        let contracts = ContractStore::new(&store);

        let alice = KeyPair::generate();
        let signers = MapSigners::with(&[&alice]);
        fund(&chain, &alice.address(), 20.0).await;

        // Executable transfer (creator auto-approved)
        let executable = transfer_contract(&alice.address(), 5.0);
        chain.save_contract(&contracts, &executable).unwrap();

        // Contract that will be overdue at sweep time
        let mut short = transfer_contract(&alice.address(), 1.0);
        short.expires_at = Utc::now() - Duration::seconds(1);
        short.id = format!("{}x", &short.id[..63]);
        chain.save_contract(&contracts, &short).unwrap();

        let changed = chain
            .process_pending_contracts(&contracts, &signers, &AlwaysSatisfied, Utc::now())
            .unwrap();
        assert_eq!(changed, 2);

        assert_eq!(
            contracts.get(&executable.id).unwrap().unwrap().status,
            ContractStatus::Executed
        );
        assert_eq!(
            contracts.get(&short.id).unwrap().unwrap().status,
            ContractStatus::Expired
        );
    }

    #[tokio::test]
    async fn test_sweep_leaves_unsignable_contracts_pending() {
        let chain = Blockchain::new(test_config()).await;
        let store = cryptochain_storage::Store::open_temporary().unwrap();
        let contracts = ContractStore::new(&store);

        fund(&chain, "creator", 10.0).await;
        let contract = transfer_contract("creator", 5.0);
        chain.save_contract(&contracts, &contract).unwrap();

        let signers = MapSigners(HashMap::new());
        let changed = chain
            .process_pending_contracts(&contracts, &signers, &AlwaysSatisfied, Utc::now())
            .unwrap();
        assert_eq!(changed, 0);
        assert_eq!(
            contracts.get(&contract.id).unwrap().unwrap().status,
            ContractStatus::Pending
        );
    }
}
