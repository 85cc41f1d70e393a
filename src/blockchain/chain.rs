use log::debug;
use serde_json::Value;
use thiserror::Error;

use std::collections::BTreeMap;

use super::block::{Block, GENESIS_PREVIOUS_HASH};
use super::pow::meets_difficulty;
use super::transaction::TransactionOutput;
use super::utxo::UtxoPool;

/// Errors that can occur when appending to the chain
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Chain linkage error at index {index}: expected previous hash {expected}, got {found}")]
    ChainLinkage {
        index: u64,
        expected: String,
        found: String,
    },

    #[error("Difficulty error: hash {hash} has fewer than {difficulty} leading zeros")]
    Difficulty { hash: String, difficulty: usize },

    #[error("Block {index} hash does not match its contents")]
    HashMismatch { index: u64 },

    #[error("Genesis block already exists")]
    GenesisExists,
}

/// The ledger: committed blocks plus the outputs they leave unspent
#[derive(Debug, Clone)]
pub struct Blockchain {
    /// The chain of blocks
    chain: Vec<Block>,

    /// Outputs produced and not yet consumed by committed blocks
    utxo_pool: UtxoPool,

    /// Mining difficulty (number of leading zero hex characters required in hash)
    difficulty: usize,
}

impl Blockchain {
    /// Creates an empty ledger; the first append must be a genesis block
    pub fn new(difficulty: usize) -> Self {
        Blockchain {
            chain: Vec::new(),
            utxo_pool: UtxoPool::new(),
            difficulty,
        }
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    /// Gets the last block in the chain
    pub fn last_block(&self) -> Option<&Block> {
        self.chain.last()
    }

    /// Gets the entire chain
    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    pub fn utxo_pool(&self) -> &UtxoPool {
        &self.utxo_pool
    }

    /// `"txid:index" -> output` view of the unspent set
    pub fn utxo_snapshot(&self) -> BTreeMap<String, TransactionOutput> {
        self.utxo_pool.snapshot()
    }

    /// Block records in chain order
    pub fn records(&self) -> Vec<Value> {
        self.chain.iter().map(Block::to_record).collect()
    }

    /// Checks that `block` may extend the chain
    fn check_append(&self, block: &Block) -> Result<(), ChainError> {
        match self.chain.last() {
            None => {
                if block.index() != 0 || block.previous_hash() != GENESIS_PREVIOUS_HASH {
                    return Err(ChainError::ChainLinkage {
                        index: block.index(),
                        expected: GENESIS_PREVIOUS_HASH.to_string(),
                        found: block.previous_hash().to_string(),
                    });
                }
            }
            Some(last) => {
                if block.previous_hash() != last.hash() || block.index() != last.index() + 1 {
                    return Err(ChainError::ChainLinkage {
                        index: block.index(),
                        expected: last.hash().to_string(),
                        found: block.previous_hash().to_string(),
                    });
                }
            }
        }

        if !block.has_valid_hash() {
            return Err(ChainError::HashMismatch {
                index: block.index(),
            });
        }

        // Genesis is not searched, so it is exempt from the difficulty rule.
        if block.index() > 0 && !meets_difficulty(block.hash(), self.difficulty) {
            return Err(ChainError::Difficulty {
                hash: block.hash().to_string(),
                difficulty: self.difficulty,
            });
        }

        Ok(())
    }

    /// Appends a block after checking linkage and proof of work
    ///
    /// This is the only place the chain grows.
    pub fn append(&mut self, block: Block) -> Result<&Block, ChainError> {
        self.check_append(&block)?;

        debug!("Appending block {} with hash {}", block.index(), block.hash());
        self.chain.push(block);

        Ok(&self.chain[self.chain.len() - 1])
    }

    /// Appends `block` and publishes `utxo_pool` as the new unspent set.
    ///
    /// Both happen or neither does.
    pub(crate) fn commit(&mut self, block: Block, utxo_pool: UtxoPool) -> Result<&Block, ChainError> {
        self.check_append(&block)?;

        self.utxo_pool = utxo_pool;
        self.chain.push(block);

        Ok(&self.chain[self.chain.len() - 1])
    }

    /// Validates the whole chain
    ///
    /// # Returns
    ///
    /// true if every block hashes correctly, links to its predecessor and
    /// (after genesis) meets the difficulty
    pub fn is_valid(&self) -> bool {
        for (i, block) in self.chain.iter().enumerate() {
            if !block.has_valid_hash() || block.index() != i as u64 {
                return false;
            }

            if i == 0 {
                if block.previous_hash() != GENESIS_PREVIOUS_HASH {
                    return false;
                }
                continue;
            }

            if block.previous_hash() != self.chain[i - 1].hash() {
                return false;
            }

            if !meets_difficulty(block.hash(), self.difficulty) {
                return false;
            }
        }

        true
    }
}
