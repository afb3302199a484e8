//! Transaction types, canonical hashing, and signing.

use crate::crypto::{self, derive_address, KeyPair};
use crate::hash::{format_amount, sha256_hex};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Reserved sender address for coinbase and reward transactions.
pub const SYSTEM_ADDRESS: &str = "system";

/// Errors that can occur during transaction operations.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("sender and recipient are required")]
    MissingParty,
    #[error("amount must be positive")]
    NonPositiveAmount,
    #[error("fee cannot be negative")]
    NegativeFee,
    #[error("missing signature")]
    MissingSignature,
    #[error("signature verification failed")]
    VerificationFailed,
    #[error("public key does not match sender address")]
    SenderMismatch,
    #[error("crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),
}

pub type Result<T> = std::result::Result<T, TransactionError>;

/// A value-transfer record, immutable once hashed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Hex SHA-256 of the canonical record.
    pub id: String,
    pub sender: String,
    pub recipient: String,
    pub amount: f64,
    pub fee: f64,
    pub timestamp: DateTime<Utc>,
    /// Hex-encoded 64-byte ECDSA signature over the id. Empty for system
    /// transactions.
    #[serde(default)]
    pub signature: String,
    /// Hex-encoded `X || Y` public key of the sender. Empty for system
    /// transactions.
    #[serde(default)]
    pub public_key: String,
    /// Free-form annotation, stamped by contract executions.
    #[serde(default)]
    pub data: String,
}

impl Transaction {
    /// Create a new unsigned transaction with a freshly computed id.
    pub fn new(sender: &str, recipient: &str, amount: f64, fee: f64) -> Self {
        let mut tx = Self {
            id: String::new(),
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            amount,
            fee,
            timestamp: Utc::now(),
            signature: String::new(),
            public_key: String::new(),
            data: String::new(),
        };
        tx.id = tx.compute_id();
        tx
    }

    /// Create a coinbase transaction crediting a miner.
    ///
    /// The id is the literal `coinbase_<index>` so every block's reward has a
    /// distinct, predictable identifier.
    pub fn coinbase(miner: &str, reward: f64, block_index: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: format!("coinbase_{}", block_index),
            sender: SYSTEM_ADDRESS.to_string(),
            recipient: miner.to_string(),
            amount: reward,
            fee: 0.0,
            timestamp,
            signature: String::new(),
            public_key: String::new(),
            data: String::new(),
        }
    }

    /// The canonical record hashed into the id:
    /// `sender || recipient || amount(8dp) || fee(8dp) || timestamp(RFC3339)`.
    pub fn canonical_record(&self) -> String {
        format!(
            "{}{}{}{}{}",
            self.sender,
            self.recipient,
            format_amount(self.amount),
            format_amount(self.fee),
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }

    /// Hash the canonical record.
    pub fn compute_id(&self) -> String {
        sha256_hex(self.canonical_record().as_bytes())
    }

    /// Whether this transaction originates from the reserved system sender.
    pub fn is_system(&self) -> bool {
        self.sender == SYSTEM_ADDRESS
    }

    /// Sign the transaction id with the given keypair, recording the
    /// signature and public key on the transaction.
    pub fn sign(&mut self, keypair: &KeyPair) {
        self.signature = keypair.sign(self.id.as_bytes());
        self.public_key = keypair.public_key_hex();
    }

    /// Builder-style signing.
    pub fn signed(mut self, keypair: &KeyPair) -> Self {
        self.sign(keypair);
        self
    }

    /// Full validity check: non-empty parties, positive amount, and for
    /// non-system senders a verifying signature whose public key derives to
    /// the sender address.
    pub fn verify(&self) -> Result<()> {
        if self.sender.is_empty() || self.recipient.is_empty() {
            return Err(TransactionError::MissingParty);
        }
        if self.amount <= 0.0 {
            return Err(TransactionError::NonPositiveAmount);
        }
        if self.fee < 0.0 {
            return Err(TransactionError::NegativeFee);
        }

        // System transactions carry no signature
        if self.is_system() {
            return Ok(());
        }

        if self.signature.is_empty() || self.public_key.is_empty() {
            return Err(TransactionError::MissingSignature);
        }

        crypto::verify_signature(&self.public_key, self.id.as_bytes(), &self.signature)
            .map_err(|_| TransactionError::VerificationFailed)?;

        let key_bytes =
            hex::decode(&self.public_key).map_err(|_| TransactionError::VerificationFailed)?;
        if derive_address(&key_bytes) != self.sender {
            return Err(TransactionError::SenderMismatch);
        }

        Ok(())
    }

    /// Convenience boolean form of `verify`.
    pub fn is_valid(&self) -> bool {
        self.verify().is_ok()
    }

    /// Total balance the sender must cover.
    pub fn total_cost(&self) -> f64 {
        self.amount + self.fee
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} {:.8} (fee {:.8}) [{}]",
            self.sender, self.recipient, self.amount, self.fee, self.id
        )
    }
}

/// Create and sign a transfer from a wallet keypair in one step.
pub fn signed_transfer(
    keypair: &KeyPair,
    recipient: &str,
    amount: f64,
    fee: f64,
) -> Result<Transaction> {
    if amount <= 0.0 {
        return Err(TransactionError::NonPositiveAmount);
    }
    let tx = Transaction::new(&keypair.address(), recipient, amount, fee).signed(keypair);
    Ok(tx)
}
