use log::info;
use thiserror::Error;

use std::collections::BTreeMap;

use super::block::Block;
use super::chain::Blockchain;
use super::crypto::{Address, CryptoError, DigitalSignature, WalletKeys};
use super::miner::{Candidate, Miner, MiningError, MiningReport};
use super::pow::MiningControl;
use super::transaction::{Transaction, TransactionError, TransactionInput, TransactionOutput};
use super::wallet_registry::WalletRegistry;
use crate::config::{ConfigError, LedgerConfig};

/// Errors surfaced to the driver of an engine session
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unknown wallet: {0}")]
    UnknownWallet(Address),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: f64, available: f64 },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("Mining error: {0}")]
    Mining(#[from] MiningError),
}

/// Everything one session works on: wallets, queued transactions and the ledger
#[derive(Debug)]
pub struct EngineState {
    config: LedgerConfig,
    wallets: WalletRegistry,
    pending: Vec<Transaction>,
    ledger: Blockchain,
    miner: Miner,
}

impl EngineState {
    pub fn new(config: LedgerConfig) -> Result<Self, EngineError> {
        config.validate()?;

        Ok(EngineState {
            ledger: Blockchain::new(config.difficulty),
            miner: Miner::new(&config),
            wallets: WalletRegistry::new(),
            pending: Vec::new(),
            config,
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Blockchain {
        &self.ledger
    }

    pub fn wallets(&self) -> &WalletRegistry {
        &self.wallets
    }

    /// Transactions queued for the next block
    pub fn pending(&self) -> &[Transaction] {
        &self.pending
    }

    pub fn create_wallet(&self, name: Option<&str>) -> WalletKeys {
        let wallet = self.wallets.create(name);
        info!("Created wallet {} ({})", wallet.name(), wallet.address());
        wallet.keys()
    }

    pub fn remove_wallet(&self, address: &Address) -> Result<WalletKeys, EngineError> {
        let wallet = self
            .wallets
            .remove(address)
            .ok_or_else(|| EngineError::UnknownWallet(address.clone()))?;

        info!("Removed wallet {} ({})", wallet.name(), address);
        Ok(wallet.keys())
    }

    /// Signs raw bytes with a held wallet
    pub fn sign(&self, address: &Address, message: &[u8]) -> Result<DigitalSignature, EngineError> {
        let wallet = self
            .wallets
            .get(address)
            .ok_or_else(|| EngineError::UnknownWallet(address.clone()))?;
        Ok(wallet.sign(message))
    }

    pub fn create_genesis(&mut self, address: &Address) -> Result<Block, EngineError> {
        if !self.wallets.contains(address) {
            return Err(EngineError::UnknownWallet(address.clone()));
        }
        Ok(self.miner.create_genesis(&mut self.ledger, address)?)
    }

    /// Builds and signs a payment from `sender`'s unspent outputs.
    ///
    /// Outputs are selected in key order until they cover `amount + fee`;
    /// any excess returns to the sender as change. Nothing is queued and no
    /// output is reserved.
    pub fn build_payment(
        &self,
        sender: &Address,
        receiver: &Address,
        amount: f64,
        fee: f64,
    ) -> Result<Transaction, EngineError> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(EngineError::InvalidAmount(format!(
                "Payment amount must be positive: {}",
                amount
            )));
        }

        let wallet = self
            .wallets
            .get(sender)
            .ok_or_else(|| EngineError::UnknownWallet(sender.clone()))?;

        let required = amount + fee;
        let mut inputs = Vec::new();
        let mut total = 0.0;
        for (outpoint, output) in self.ledger.utxo_pool().utxos_of(sender) {
            inputs.push(TransactionInput::from(outpoint));
            total += output.amount;
            if total >= required {
                break;
            }
        }

        if total < required {
            return Err(EngineError::InsufficientFunds {
                required,
                available: total,
            });
        }

        let mut outputs = vec![TransactionOutput::new(amount, receiver.clone())];
        if total > required {
            outputs.push(TransactionOutput::new(total - required, sender.clone()));
        }

        let mut transaction = Transaction::new(inputs, outputs, fee)?;
        transaction.sign(&wallet);
        Ok(transaction)
    }

    /// Queues a transaction; verification waits until mining
    pub fn submit(&mut self, transaction: Transaction) -> &Transaction {
        info!("Queued transaction {}", transaction.txid());
        self.pending.push(transaction);
        &self.pending[self.pending.len() - 1]
    }

    /// Builds, signs and queues a payment, returning its id
    pub fn send(
        &mut self,
        sender: &Address,
        receiver: &Address,
        amount: f64,
        fee: f64,
    ) -> Result<String, EngineError> {
        let transaction = self.build_payment(sender, receiver, amount, fee)?;
        Ok(self.submit(transaction).txid().to_string())
    }

    /// Mines everything queued into the next block.
    ///
    /// The queue is cleared only when a block is committed, rejected
    /// transactions included; on failure it is kept for a retry.
    pub fn mine_pending(
        &mut self,
        miner_address: &Address,
        control: &MiningControl,
    ) -> Result<MiningReport, EngineError> {
        let report = self
            .miner
            .mine(&mut self.ledger, &self.pending, miner_address, control)?;
        self.pending.clear();
        Ok(report)
    }

    /// Finishes a block whose search was interrupted by `mine_pending`.
    ///
    /// On success the queue is cleared, since the candidate already holds
    /// the verdict on every queued transaction.
    pub fn resume_mining(
        &mut self,
        candidate: Candidate,
        control: &MiningControl,
    ) -> Result<MiningReport, EngineError> {
        let report = self.miner.resume(&mut self.ledger, candidate, control)?;
        self.pending.clear();
        Ok(report)
    }

    pub fn balance_of(&self, address: &Address) -> f64 {
        self.ledger.utxo_pool().balance_of(address)
    }

    pub fn balances(&self) -> BTreeMap<Address, f64> {
        self.ledger.utxo_pool().balances()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::pow::CancelToken;
    use crate::blockchain::crypto::verify_signature;

    fn addr(keys: &WalletKeys) -> Address {
        Address(keys.address.clone())
    }

    fn session() -> (EngineState, Address, Address, Address) {
        let mut state = EngineState::new(LedgerConfig::default()).unwrap();
        let a = addr(&state.create_wallet(Some("A")));
        let b = addr(&state.create_wallet(Some("B")));
        let m = addr(&state.create_wallet(Some("M")));
        state.create_genesis(&a).unwrap();
        (state, a, b, m)
    }

    #[test]
    fn test_end_to_end() {
        let (mut state, a, b, m) = session();

        state.send(&a, &b, 100.0, 1.0).unwrap();
        assert_eq!(state.pending().len(), 1);
        // Queuing does not touch the unspent set.
        assert_eq!(state.balance_of(&a), 1000.0);

        let report = state.mine_pending(&m, &MiningControl::default()).unwrap();
        assert_eq!(report.rejected().count(), 0);
        assert!(state.pending().is_empty());

        let balances = state.balances();
        assert_eq!(balances.len(), 3);
        assert_eq!(balances[&a], 899.0);
        assert_eq!(balances[&b], 100.0);
        assert_eq!(balances[&m], 3.0 + 1.0);
        assert_eq!(state.ledger().len(), 2);
        assert!(state.ledger().is_valid());
    }

    #[test]
    fn test_insufficient_funds() {
        let (state, a, b, _) = session();

        let result = state.build_payment(&a, &b, 1000.0, 1.0);
        assert!(matches!(
            result,
            Err(EngineError::InsufficientFunds { required, available })
                if required == 1001.0 && available == 1000.0
        ));
        assert!(matches!(
            state.build_payment(&b, &a, 1.0, 0.0),
            Err(EngineError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn test_exact_payment_has_no_change() {
        let (state, a, b, _) = session();
        let tx = state.build_payment(&a, &b, 999.0, 1.0).unwrap();

        assert_eq!(tx.outputs().len(), 1);
        assert!(tx.verify(state.ledger().utxo_pool()));
    }

    #[test]
    fn test_conflicting_queued_payments_resolve_at_mining() {
        let (mut state, a, b, m) = session();

        state.send(&a, &b, 10.0, 0.0).unwrap();
        state.send(&a, &m, 20.0, 0.0).unwrap();
        assert_eq!(state.pending().len(), 2);

        let report = state.mine_pending(&m, &MiningControl::default()).unwrap();
        assert_eq!(report.accepted().count(), 1);
        assert_eq!(report.rejected().count(), 1);
        assert_eq!(state.balance_of(&b), 10.0);
        assert_eq!(state.balance_of(&a), 990.0);
        assert!(state.pending().is_empty());
    }

    #[test]
    fn test_failed_mining_keeps_queue() {
        let mut config = LedgerConfig::default();
        config.difficulty = 64;
        let mut state = EngineState::new(config).unwrap();
        let a = addr(&state.create_wallet(None));
        let b = addr(&state.create_wallet(None));
        state.create_genesis(&a).unwrap();
        state.send(&a, &b, 5.0, 0.0).unwrap();

        let token = CancelToken::new();
        token.cancel();
        let result = state.mine_pending(&b, &MiningControl::default().with_cancel(token));

        assert!(matches!(result, Err(EngineError::Mining(MiningError::Cancelled { .. }))));
        assert_eq!(state.pending().len(), 1);
        assert_eq!(state.balance_of(&a), 1000.0);
    }

    #[test]
    fn test_resume_after_timeout() {
        let (mut state, a, b, m) = session();
        state.send(&a, &b, 100.0, 1.0).unwrap();

        let expired = MiningControl::default().with_timeout(std::time::Duration::ZERO);
        let candidate = match state.mine_pending(&m, &expired) {
            Err(EngineError::Mining(err)) => err.into_candidate().unwrap(),
            other => panic!("expected a timed out search, got {:?}", other),
        };
        assert_eq!(state.pending().len(), 1);
        assert_eq!(state.ledger().len(), 1);

        let report = state.resume_mining(candidate, &MiningControl::default()).unwrap();
        assert_eq!(report.accepted().count(), 1);
        assert!(state.pending().is_empty());
        assert_eq!(state.balance_of(&a), 899.0);
        assert_eq!(state.balance_of(&b), 100.0);
        assert_eq!(state.balance_of(&m), 4.0);
        assert!(state.ledger().is_valid());
    }

    #[test]
    fn test_large_balances_pay_without_rounding_rejects() {
        let config = LedgerConfig {
            difficulty: 0,
            initial_supply: 1e16 + 2.0,
            ..LedgerConfig::default()
        };
        let mut state = EngineState::new(config).unwrap();
        let a = addr(&state.create_wallet(None));
        let b = addr(&state.create_wallet(None));
        state.create_genesis(&a).unwrap();

        let tx = state.build_payment(&a, &b, 3.3, 1.1).unwrap();
        assert!(tx.verify(state.ledger().utxo_pool()));

        state.submit(tx);
        let report = state.mine_pending(&a, &MiningControl::default()).unwrap();
        assert_eq!(report.rejected().count(), 0);
        assert_eq!(state.balance_of(&b), 3.3);
    }

    #[test]
    fn test_unknown_wallets() {
        let (mut state, a, b, _) = session();
        let stranger = Address("9".repeat(64));

        assert!(matches!(state.create_genesis(&stranger), Err(EngineError::UnknownWallet(_))));
        assert!(matches!(
            state.build_payment(&stranger, &a, 1.0, 0.0),
            Err(EngineError::UnknownWallet(_))
        ));
        assert!(state.sign(&stranger, b"hi").is_err());

        state.remove_wallet(&b).unwrap();
        assert!(matches!(state.remove_wallet(&b), Err(EngineError::UnknownWallet(_))));
    }

    #[test]
    fn test_removing_wallet_keeps_funds_on_ledger() {
        let (mut state, a, b, m) = session();
        state.send(&a, &b, 50.0, 0.0).unwrap();
        state.mine_pending(&m, &MiningControl::default()).unwrap();

        state.remove_wallet(&b).unwrap();
        assert_eq!(state.balance_of(&b), 50.0);
        assert!(matches!(
            state.build_payment(&b, &a, 1.0, 0.0),
            Err(EngineError::UnknownWallet(_))
        ));
    }

    #[test]
    fn test_sign_raw_message() {
        let (state, a, _, _) = session();
        let signature = state.sign(&a, b"hello").unwrap();
        let public_key = state.wallets().get(&a).unwrap().public_key_hex();
        assert!(verify_signature(b"hello", &signature, &public_key).unwrap());
    }

    #[test]
    fn test_invalid_payment_amount() {
        let (state, a, b, _) = session();
        assert!(matches!(state.build_payment(&a, &b, 0.0, 0.0), Err(EngineError::InvalidAmount(_))));
        assert!(matches!(state.build_payment(&a, &b, 1.0, -1.0), Err(EngineError::Transaction(_))));
    }
}
