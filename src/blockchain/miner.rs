use log::{info, warn};
use thiserror::Error;

use std::time::{Duration, Instant};

use super::block::{Block, GENESIS_PREVIOUS_HASH};
use super::chain::{Blockchain, ChainError};
use super::crypto::Address;
use super::pow::{MiningControl, ProofOfWork, SearchOutcome};
use super::transaction::{RejectReason, Transaction, TransactionError, VerifyPolicy};
use super::utxo::UtxoPool;
use crate::config::LedgerConfig;

/// Errors that can occur while creating or mining blocks
#[derive(Debug, Error)]
pub enum MiningError {
    #[error("No genesis block; create one before mining")]
    NoGenesis,

    #[error("Mining cancelled; resume at nonce {next_nonce}")]
    Cancelled { next_nonce: u64, candidate: Box<Candidate> },

    #[error("Mining timed out; resume at nonce {next_nonce}")]
    TimedOut { next_nonce: u64, candidate: Box<Candidate> },

    #[error("Mining gave up after the attempt limit; resume at nonce {next_nonce}")]
    Exhausted { next_nonce: u64, candidate: Box<Candidate> },

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),
}

impl MiningError {
    /// The unfinished block of an interrupted search, if this is one
    pub fn into_candidate(self) -> Option<Candidate> {
        match self {
            MiningError::Cancelled { candidate, .. }
            | MiningError::TimedOut { candidate, .. }
            | MiningError::Exhausted { candidate, .. } => Some(*candidate),
            _ => None,
        }
    }
}

/// Outcome of checking one pending transaction
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    Valid(Transaction),
    Rejected(Transaction, RejectReason),
}

/// A block whose proof-of-work search has not finished yet.
///
/// `utxo_pool` is the pool the block produces; it is published only when
/// the search succeeds and the block still extends the chain tip.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub block: Block,
    pub utxo_pool: UtxoPool,
    pub validations: Vec<Validation>,
    pub next_nonce: u64,
    pub attempts: u64,
}

impl Candidate {
    fn interrupted(mut self, next_nonce: u64, attempts: u64) -> Box<Self> {
        self.next_nonce = next_nonce;
        self.attempts += attempts;
        Box::new(self)
    }
}

/// A committed block and what happened to the batch it was mined from
#[derive(Debug, Clone)]
pub struct MiningReport {
    pub block: Block,
    pub validations: Vec<Validation>,
    pub attempts: u64,
    pub elapsed: Duration,
}

impl MiningReport {
    /// Transactions that failed verification and were left out of the block
    pub fn rejected(&self) -> impl Iterator<Item = (&Transaction, &RejectReason)> {
        self.validations.iter().filter_map(|validation| match validation {
            Validation::Rejected(tx, reason) => Some((tx, reason)),
            Validation::Valid(_) => None,
        })
    }

    pub fn accepted(&self) -> impl Iterator<Item = &Transaction> {
        self.validations.iter().filter_map(|validation| match validation {
            Validation::Valid(tx) => Some(tx),
            Validation::Rejected(..) => None,
        })
    }

    /// Fees collected from the accepted transactions
    pub fn total_fee(&self) -> f64 {
        self.accepted().map(Transaction::fee).sum()
    }
}

/// Creates the genesis block and mines new blocks onto a ledger
#[derive(Debug, Clone)]
pub struct Miner {
    base_reward: f64,
    initial_supply: f64,
    policy: VerifyPolicy,
}

impl Miner {
    pub fn new(config: &LedgerConfig) -> Self {
        Miner {
            base_reward: config.base_reward,
            initial_supply: config.initial_supply,
            policy: config.verification,
        }
    }

    pub fn base_reward(&self) -> f64 {
        self.base_reward
    }

    pub fn initial_supply(&self) -> f64 {
        self.initial_supply
    }

    /// Issues the initial supply to `address` in block 0.
    ///
    /// Genesis is committed at nonce 0 without a proof-of-work search.
    pub fn create_genesis(&self, ledger: &mut Blockchain, address: &Address) -> Result<Block, MiningError> {
        if !ledger.is_empty() {
            return Err(ChainError::GenesisExists.into());
        }

        let supply = Transaction::coinbase(address.clone(), self.initial_supply)?;
        let mut utxo_pool = ledger.utxo_pool().clone();
        utxo_pool.add_outputs(&supply);

        let block = Block::new(0, GENESIS_PREVIOUS_HASH, vec![supply], 0);
        let block = ledger.commit(block, utxo_pool)?.clone();

        info!(
            "Created genesis block {} with {} to {}",
            block.hash(),
            self.initial_supply,
            address
        );
        Ok(block)
    }

    /// Verifies `pending` in order against `utxo_pool`, applying each valid
    /// transaction so later ones may spend its outputs.
    pub fn validate_batch(&self, pending: &[Transaction], utxo_pool: &mut UtxoPool) -> Vec<Validation> {
        pending
            .iter()
            .map(|tx| match tx.validate(utxo_pool, self.policy) {
                Ok(()) => {
                    utxo_pool.apply(tx);
                    Validation::Valid(tx.clone())
                }
                Err(reason) => {
                    warn!("Rejected transaction {}: {}", tx.txid(), reason);
                    Validation::Rejected(tx.clone(), reason)
                }
            })
            .collect()
    }

    /// Builds the next block from the valid subset of `pending` plus a
    /// reward, without searching for proof of work.
    ///
    /// All UTXO changes are made on a private copy of the ledger's pool.
    pub fn prepare(
        &self,
        ledger: &Blockchain,
        pending: &[Transaction],
        miner_address: &Address,
    ) -> Result<Candidate, MiningError> {
        let (index, previous_hash) = match ledger.last_block() {
            Some(last) => (last.index() + 1, last.hash().to_string()),
            None => return Err(MiningError::NoGenesis),
        };

        let mut utxo_pool = ledger.utxo_pool().clone();
        let validations = self.validate_batch(pending, &mut utxo_pool);

        let mut transactions: Vec<Transaction> = validations
            .iter()
            .filter_map(|validation| match validation {
                Validation::Valid(tx) => Some(tx.clone()),
                Validation::Rejected(..) => None,
            })
            .collect();
        let total_fee: f64 = transactions.iter().map(Transaction::fee).sum();

        let reward = Transaction::reward(miner_address.clone(), self.base_reward + total_fee, index)?;
        utxo_pool.add_outputs(&reward);
        transactions.push(reward);

        Ok(Candidate {
            block: Block::new(index, previous_hash, transactions, 0),
            utxo_pool,
            validations,
            next_nonce: 0,
            attempts: 0,
        })
    }

    /// Mines the valid subset of `pending` plus a reward into the next block.
    ///
    /// The block and its pool are published together only once proof of
    /// work is found and the append succeeds. Any error leaves `ledger`
    /// untouched; an interrupted search hands back its [`Candidate`] so
    /// [`Miner::resume`] can carry on from where it stopped.
    pub fn mine(
        &self,
        ledger: &mut Blockchain,
        pending: &[Transaction],
        miner_address: &Address,
        control: &MiningControl,
    ) -> Result<MiningReport, MiningError> {
        let started = Instant::now();
        let candidate = self.prepare(ledger, pending, miner_address)?;
        self.finish(ledger, candidate, control, started)
    }

    /// Continues the search of an interrupted candidate and commits it.
    ///
    /// Fails with a linkage error if the chain has grown since the
    /// candidate was prepared.
    pub fn resume(
        &self,
        ledger: &mut Blockchain,
        candidate: Candidate,
        control: &MiningControl,
    ) -> Result<MiningReport, MiningError> {
        info!(
            "Resuming block {} at nonce {}",
            candidate.block.index(),
            candidate.next_nonce
        );
        self.finish(ledger, candidate, control, Instant::now())
    }

    fn finish(
        &self,
        ledger: &mut Blockchain,
        mut candidate: Candidate,
        control: &MiningControl,
        started: Instant,
    ) -> Result<MiningReport, MiningError> {
        let pow = ProofOfWork::new(ledger.difficulty());
        let attempts = match pow.search(&mut candidate.block, candidate.next_nonce, control) {
            SearchOutcome::Found { attempts, .. } => candidate.attempts + attempts,
            SearchOutcome::Cancelled { next_nonce, attempts } => {
                return Err(MiningError::Cancelled {
                    next_nonce,
                    candidate: candidate.interrupted(next_nonce, attempts),
                })
            }
            SearchOutcome::TimedOut { next_nonce, attempts } => {
                return Err(MiningError::TimedOut {
                    next_nonce,
                    candidate: candidate.interrupted(next_nonce, attempts),
                })
            }
            SearchOutcome::Exhausted { next_nonce, attempts } => {
                return Err(MiningError::Exhausted {
                    next_nonce,
                    candidate: candidate.interrupted(next_nonce, attempts),
                })
            }
        };

        let Candidate {
            block,
            utxo_pool,
            validations,
            ..
        } = candidate;
        let block = ledger.commit(block, utxo_pool)?.clone();
        let elapsed = started.elapsed();

        info!(
            "Mined block {} (nonce {}, hash {}) with {} transactions after {} attempts in {:?}",
            block.index(),
            block.nonce(),
            block.hash(),
            block.transactions().len(),
            attempts,
            elapsed
        );

        Ok(MiningReport {
            block,
            validations,
            attempts,
            elapsed,
        })
    }
}
