use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::crypto::sha256_hex;
use super::transaction::Transaction;

/// `previous_hash` of the first block in a chain
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Represents a block in the blockchain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Index of the block in the chain
    index: u64,

    /// Hash of the previous block
    previous_hash: String,

    /// Timestamp when the block was created
    timestamp: DateTime<Utc>,

    /// Proof of work
    nonce: u64,

    /// Hash over every other field; kept in step with `nonce`
    hash: String,

    /// List of transactions included in this block
    transactions: Vec<Transaction>,
}

impl Block {
    /// Creates a new block stamped with the current time
    ///
    /// # Arguments
    ///
    /// * `index` - The index of the block in the chain
    /// * `previous_hash` - The hash of the previous block
    /// * `transactions` - The list of transactions to include in the block
    /// * `nonce` - The starting proof of work (usually 0)
    pub fn new(
        index: u64,
        previous_hash: impl Into<String>,
        transactions: Vec<Transaction>,
        nonce: u64,
    ) -> Self {
        let mut block = Block {
            index,
            previous_hash: previous_hash.into(),
            timestamp: Utc::now(),
            nonce,
            hash: String::new(),
            transactions,
        };
        block.recompute_hash();
        block
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn previous_hash(&self) -> &str {
        &self.previous_hash
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// Sets the nonce and rehashes
    pub fn set_nonce(&mut self, nonce: u64) {
        self.nonce = nonce;
        self.recompute_hash();
    }

    pub fn recompute_hash(&mut self) {
        self.hash = self.calculate_hash();
    }

    /// Calculates the SHA-256 hash of the block as a hexadecimal string
    pub fn calculate_hash(&self) -> String {
        let block_data = json!({
            "index": self.index,
            "previous_hash": self.previous_hash,
            "timestamp": self.timestamp,
            "transactions": self
                .transactions
                .iter()
                .map(Transaction::to_record)
                .collect::<Vec<_>>(),
            "nonce": self.nonce,
        });

        sha256_hex(block_data.to_string().as_bytes())
    }

    /// True when the stored hash matches the block's fields
    pub fn has_valid_hash(&self) -> bool {
        self.hash == self.calculate_hash()
    }

    /// Full block record, including the hash
    pub fn to_record(&self) -> Value {
        json!({
            "index": self.index,
            "previous_hash": self.previous_hash,
            "timestamp": self.timestamp,
            "nonce": self.nonce,
            "hash": self.hash,
            "transactions": self
                .transactions
                .iter()
                .map(Transaction::to_record)
                .collect::<Vec<_>>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::pow::{meets_difficulty, MiningControl, ProofOfWork, SearchOutcome};
    use crate::blockchain::Address;

    fn sample_transactions() -> Vec<Transaction> {
        vec![
            Transaction::coinbase(Address("1".repeat(64)), 10.0).unwrap(),
            Transaction::coinbase(Address("2".repeat(64)), 20.0).unwrap(),
        ]
    }

    #[test]
    fn test_new_block() {
        let block = Block::new(1, "previous_hash", sample_transactions(), 0);

        assert_eq!(block.index(), 1);
        assert_eq!(block.nonce(), 0);
        assert_eq!(block.previous_hash(), "previous_hash");
        assert_eq!(block.transactions().len(), 2);
        assert_eq!(block.hash().len(), 64);
        assert!(block.has_valid_hash());
    }

    #[test]
    fn test_starting_nonce_is_hashed() {
        let block = Block::new(1, "previous_hash", sample_transactions(), 42);
        assert_eq!(block.nonce(), 42);
        assert!(block.has_valid_hash());
    }

    #[test]
    fn test_mutated_mined_block_rarely_keeps_proof() {
        let difficulty = 3;
        let mut block = Block::new(1, "previous_hash", sample_transactions(), 0);
        let outcome = ProofOfWork::new(difficulty).search(&mut block, 0, &MiningControl::default());
        assert!(matches!(outcome, SearchOutcome::Found { .. }));

        // Each mutated hash meets the prefix with probability 16^-3.
        let mut still_valid = 0;
        for i in 1..=300u64 {
            let mut mutated = block.clone();
            match i % 3 {
                0 => mutated.index += i,
                1 => mutated.previous_hash = format!("{:064x}", i),
                _ => mutated.transactions[0] =
                    Transaction::coinbase(Address("1".repeat(64)), 10.0 + i as f64).unwrap(),
            }
            mutated.recompute_hash();
            assert_ne!(mutated.hash(), block.hash());
            if meets_difficulty(mutated.hash(), difficulty) {
                still_valid += 1;
            }
        }
        assert!(still_valid <= 3, "{} mutated blocks kept the proof", still_valid);
    }

    #[test]
    fn test_hash_follows_nonce() {
        let mut block = Block::new(1, "previous_hash", sample_transactions(), 0);
        let first = block.hash().to_string();

        block.set_nonce(1);
        assert_ne!(block.hash(), first);
        assert!(block.has_valid_hash());

        block.set_nonce(0);
        assert_eq!(block.hash(), first);
    }

    #[test]
    fn test_tampering_invalidates_hash() {
        let mut block = Block::new(3, "abc", sample_transactions(), 0);
        block.index = 4;
        assert!(!block.has_valid_hash());

        block.recompute_hash();
        assert!(block.has_valid_hash());
    }

    #[test]
    fn test_record_round_trip_recomputes_same_hash() {
        let block = Block::new(2, "abc", sample_transactions(), 0);

        let record = block.to_record();
        assert_eq!(serde_json::to_value(&block).unwrap(), record);

        let restored: Block = serde_json::from_value(record).unwrap();
        assert_eq!(restored, block);
        assert!(restored.has_valid_hash());
    }
}
