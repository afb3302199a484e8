//! Wallet directory handling.
//!
//! The node operates wallets for local accounts, one JSON file per wallet
//! under `<data-dir>/wallets/`. Contract auto-execution looks signing keys
//! up here.

use cryptochain_chain::SignerResolver;
use cryptochain_core::{KeyPair, Wallet};
use std::path::{Path, PathBuf};

/// Resolves signing keys from a wallet directory. Files are named
/// `<address>.json`.
pub struct WalletDir {
    dir: PathBuf,
}

impl WalletDir {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn wallet_path(&self, address: &str) -> PathBuf {
        self.dir.join(format!("{}.json", address))
    }

    /// Create and persist a new wallet.
    pub fn create(&self) -> cryptochain_core::crypto::Result<Wallet> {
        let wallet = Wallet::generate();
        wallet.save_to_file(self.wallet_path(&wallet.address))?;
        Ok(wallet)
    }

    /// Load a wallet by address.
    pub fn load(&self, address: &str) -> Option<Wallet> {
        Wallet::load_from_file(self.wallet_path(address)).ok()
    }

    /// Addresses of every wallet in the directory.
    pub fn addresses(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                name.strip_suffix(".json").map(str::to_string)
            })
            .collect()
    }
}

impl SignerResolver for WalletDir {
    fn keypair_for(&self, address: &str) -> Option<KeyPair> {
        self.load(address).and_then(|wallet| wallet.keypair().ok())
    }
}
