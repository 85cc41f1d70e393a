use dashmap::DashMap;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::crypto::{Address, Wallet, WalletKeys};

/// Wallets held by the session, keyed by address.
///
/// Removing a wallet forgets its keys; the ledger is unaffected.
#[derive(Debug, Clone, Default)]
pub struct WalletRegistry {
    wallets: Arc<DashMap<Address, Wallet>>,
    created: Arc<AtomicUsize>,
}

impl WalletRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates and stores a wallet; unnamed wallets are called "User N"
    pub fn create(&self, name: Option<&str>) -> Wallet {
        let count = self.created.fetch_add(1, Ordering::Relaxed) + 1;
        let name = match name {
            Some(name) => name.to_string(),
            None => format!("User {}", count),
        };

        let wallet = Wallet::with_name(name);
        self.insert(wallet.clone());
        wallet
    }

    /// Stores an existing wallet, replacing any with the same address
    pub fn insert(&self, wallet: Wallet) {
        self.wallets.insert(wallet.address().clone(), wallet);
    }

    pub fn get(&self, address: &Address) -> Option<Wallet> {
        self.wallets.get(address).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.wallets.contains_key(address)
    }

    pub fn remove(&self, address: &Address) -> Option<Wallet> {
        self.wallets.remove(address).map(|(_, wallet)| wallet)
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }

    /// Key records for every wallet, ordered by name then address
    pub fn list(&self) -> Vec<WalletKeys> {
        let mut keys: Vec<WalletKeys> = self.wallets.iter().map(|entry| entry.value().keys()).collect();
        keys.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.address.cmp(&b.address)));
        keys
    }
}
