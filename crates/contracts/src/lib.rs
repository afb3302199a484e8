//! Smart-contract state machine for cryptochain.
//!
//! Contracts are multi-party conditional transfers stored outside the chain.
//! A contract moves through a small lifecycle (pending, executed, cancelled,
//! expired, failed); successful execution emits an ordinary transaction that
//! is admitted to the mempool like any other.

pub mod contract;
pub mod predicate;

pub use contract::{
    ApprovalOutcome, Contract, ContractError, ContractParams, ContractStatus, ContractType,
    StateChange,
};
pub use predicate::{AlwaysSatisfied, ConditionPredicate};
