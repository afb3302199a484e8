//! P-256 ECDSA signing, verification, and address derivation.

use crate::hash::{double_sha256, sha256_bytes};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Version byte prepended to the hashed public key when deriving an address.
const ADDRESS_VERSION: u8 = 0x00;

/// Errors that can occur during cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid private key")]
    InvalidPrivateKey,
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("invalid signature encoding")]
    InvalidSignature,
    #[error("signature verification failed")]
    VerificationFailed,
    #[error("invalid hex encoding")]
    InvalidHex,
    #[error("wallet file error: {0}")]
    WalletFile(#[from] std::io::Error),
    #[error("wallet encoding error: {0}")]
    WalletEncoding(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CryptoError>;

/// Derive a textual address from the 64-byte `X || Y` public key encoding.
///
/// The derivation follows the Bitcoin-style recipe: SHA-256 of the key,
/// SHA-256 again in place of RIPEMD-160, take the 20 leading bytes, prepend
/// the version byte, append the first 4 bytes of the double-SHA-256 checksum,
/// and hex-encode the result. Addresses depend on the full `X || Y` bytes;
/// truncating or reordering them is wire-incompatible.
pub fn derive_address(public_key: &[u8]) -> String {
    let first = sha256_bytes(public_key);
    let second = sha256_bytes(&first);

    let mut versioned = Vec::with_capacity(25);
    versioned.push(ADDRESS_VERSION);
    versioned.extend_from_slice(&second[..20]);

    let checksum = double_sha256(&versioned);
    versioned.extend_from_slice(&checksum[..4]);

    hex::encode(versioned)
}

/// A P-256 keypair for signing transactions.
pub struct KeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl KeyPair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut OsRng);
        let verifying_key = VerifyingKey::from(&signing_key);
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Restore a keypair from the 32-byte private scalar.
    pub fn from_private_key(bytes: &[u8]) -> Result<Self> {
        let signing_key =
            SigningKey::from_slice(bytes).map_err(|_| CryptoError::InvalidPrivateKey)?;
        let verifying_key = VerifyingKey::from(&signing_key);
        Ok(Self {
            signing_key,
            verifying_key,
        })
    }

    /// Restore a keypair from a hex-encoded private scalar.
    pub fn from_private_key_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|_| CryptoError::InvalidHex)?;
        Self::from_private_key(&bytes)
    }

    /// The raw private scalar bytes.
    pub fn private_key(&self) -> Vec<u8> {
        self.signing_key.to_bytes().to_vec()
    }

    /// The public key as the 64-byte `X || Y` concatenation.
    pub fn public_key(&self) -> Vec<u8> {
        public_key_bytes(&self.verifying_key)
    }

    /// The public key as lowercase hex, the form carried inside transactions.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key())
    }

    /// The address derived from this keypair's public key.
    pub fn address(&self) -> String {
        derive_address(&self.public_key())
    }

    /// Sign a message. ECDSA hashes the message with SHA-256 internally, so
    /// signing a transaction id signs SHA-256(id). The signature is the
    /// fixed-size 64-byte `r || s` form, hex-encoded.
    pub fn sign(&self, message: &[u8]) -> String {
        let signature: Signature = self.signing_key.sign(message);
        hex::encode(signature.to_bytes())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("address", &self.address())
            .finish()
    }
}

/// Extract the 64-byte `X || Y` encoding from a verifying key.
fn public_key_bytes(key: &VerifyingKey) -> Vec<u8> {
    let point = key.to_encoded_point(false);
    // Skip the 0x04 uncompressed-point tag
    point.as_bytes()[1..].to_vec()
}

/// Reconstruct a verifying key from the 64-byte `X || Y` encoding.
fn verifying_key_from_bytes(bytes: &[u8]) -> Result<VerifyingKey> {
    if bytes.len() != 64 {
        return Err(CryptoError::InvalidPublicKey);
    }
    let mut sec1 = Vec::with_capacity(65);
    sec1.push(0x04);
    sec1.extend_from_slice(bytes);
    VerifyingKey::from_sec1_bytes(&sec1).map_err(|_| CryptoError::InvalidPublicKey)
}

/// Verify a hex-encoded signature over a message under a hex-encoded
/// `X || Y` public key.
pub fn verify_signature(public_key_hex: &str, message: &[u8], signature_hex: &str) -> Result<()> {
    let key_bytes = hex::decode(public_key_hex).map_err(|_| CryptoError::InvalidHex)?;
    let key = verifying_key_from_bytes(&key_bytes)?;

    let sig_bytes = hex::decode(signature_hex).map_err(|_| CryptoError::InvalidHex)?;
    let signature =
        Signature::from_slice(&sig_bytes).map_err(|_| CryptoError::InvalidSignature)?;

    key.verify(message, &signature)
        .map_err(|_| CryptoError::VerificationFailed)
}

/// A wallet as persisted on disk: the keypair plus its derived address.
///
/// Keys are stored unencrypted, matching the node's local-operator trust
/// model.
#[derive(Serialize, Deserialize)]
pub struct Wallet {
    pub private_key: String,
    pub public_key: String,
    pub address: String,
}

impl Wallet {
    /// Create a wallet from an existing keypair.
    pub fn from_keypair(keypair: &KeyPair) -> Self {
        Self {
            private_key: hex::encode(keypair.private_key()),
            public_key: keypair.public_key_hex(),
            address: keypair.address(),
        }
    }

    /// Generate a fresh wallet.
    pub fn generate() -> Self {
        Self::from_keypair(&KeyPair::generate())
    }

    /// Rebuild the signing keypair from the stored private key.
    pub fn keypair(&self) -> Result<KeyPair> {
        KeyPair::from_private_key_hex(&self.private_key)
    }

    /// Write the wallet to a JSON file, creating parent directories.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(dir) = path.as_ref().parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load a wallet from a JSON file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generation() {
        let kp = KeyPair::generate();
        assert_eq!(kp.public_key().len(), 64);
        assert!(!kp.address().is_empty());
    }

    #[test]
    fn test_sign_and_verify() {
        let kp = KeyPair::generate();
        let sig = kp.sign(b"hello world");
        assert!(verify_signature(&kp.public_key_hex(), b"hello world", &sig).is_ok());
    }

    #[test]
    fn test_wrong_message_fails() {
        let kp = KeyPair::generate();
        let sig = kp.sign(b"hello");
        assert!(verify_signature(&kp.public_key_hex(), b"world", &sig).is_err());
    }

    #[test]
    fn test_wrong_key_fails() {
        let kp1 = KeyPair::generate();
        let kp2 = KeyPair::generate();
        let sig = kp1.sign(b"hello");
        assert!(verify_signature(&kp2.public_key_hex(), b"hello", &sig).is_err());
    }

    #[test]
    fn test_address_is_deterministic() {
        let kp = KeyPair::generate();
        let kp2 = KeyPair::from_private_key(&kp.private_key()).unwrap();
        assert_eq!(kp.address(), kp2.address());
    }

    #[test]
    fn test_address_shape() {
        let kp = KeyPair::generate();
        let addr = kp.address();
        // version byte + 20 payload bytes + 4 checksum bytes, hex-encoded
        assert_eq!(addr.len(), 50);
        assert!(addr.starts_with("00"));
    }

    #[test]
    fn test_derived_address_matches_public_key() {
        let kp = KeyPair::generate();
        assert_eq!(derive_address(&kp.public_key()), kp.address());
    }

    #[test]
    fn test_wallet_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallets").join("test.json");

        let wallet = Wallet::generate();
        wallet.save_to_file(&path).unwrap();

        let loaded = Wallet::load_from_file(&path).unwrap();
        assert_eq!(loaded.address, wallet.address);
        assert_eq!(loaded.keypair().unwrap().address(), wallet.address);
    }
}
