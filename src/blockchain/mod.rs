// Blockchain module
//
// This module contains the ledger engine:
// - Wallets and signatures (secp256k1)
// - UTXO transactions and the unspent-output pool
// - Blocks and the chain
// - Proof of work and the miner
// - The session state a driver works through

pub mod block;
pub mod chain;
pub mod crypto;
pub mod miner;
pub mod pow;
pub mod state;
pub mod transaction;
pub mod utxo;
pub mod wallet_registry;

// Re-export main components for easier access
pub use block::Block;
pub use chain::{Blockchain, ChainError};
pub use crypto::{Address, DigitalSignature, PublicKeyHex, Wallet, WalletKeys};
pub use miner::{Candidate, Miner, MiningError, MiningReport, Validation};
pub use pow::{CancelToken, MiningControl, ProofOfWork, SearchOutcome};
pub use state::{EngineError, EngineState};
pub use transaction::{
    OutPoint, RejectReason, Transaction, TransactionError, TransactionInput, TransactionOutput, VerifyPolicy,
};
pub use utxo::UtxoPool;
pub use wallet_registry::WalletRegistry;
