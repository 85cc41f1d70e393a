//! Single-node UTXO ledger: secp256k1 wallets, signed transactions, and
//! proof-of-work blocks chained by hash, all held in memory.

pub mod blockchain;
pub mod config;

pub use blockchain::{
    Address, Block, Blockchain, EngineError, EngineState, MiningControl, Transaction, Wallet,
};
pub use config::LedgerConfig;
