use std::collections::BTreeMap;

use super::crypto::Address;
use super::transaction::{OutPoint, Transaction, TransactionOutput};

/// Index of unspent outputs, keyed by the outpoint that produced them.
///
/// A key is present exactly while its output is produced and not yet
/// consumed. Ordered so that snapshots and coin selection are deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UtxoPool {
    outputs: BTreeMap<OutPoint, TransactionOutput>,
}

impl UtxoPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<&TransactionOutput> {
        self.outputs.get(outpoint)
    }

    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.outputs.contains_key(outpoint)
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Inserts every output of `transaction`
    pub fn add_outputs(&mut self, transaction: &Transaction) {
        for (index, output) in transaction.outputs().iter().enumerate() {
            self.outputs
                .insert(OutPoint::new(transaction.txid(), index as u32), output.clone());
        }
    }

    /// Consumes the outputs `transaction` spends and adds the ones it creates
    pub fn apply(&mut self, transaction: &Transaction) {
        for input in transaction.inputs() {
            self.outputs.remove(&input.outpoint());
        }
        self.add_outputs(transaction);
    }

    /// Mapping of `"txid:index"` to the output it names
    pub fn snapshot(&self) -> BTreeMap<String, TransactionOutput> {
        self.outputs
            .iter()
            .map(|(outpoint, output)| (outpoint.to_string(), output.clone()))
            .collect()
    }

    /// Unspent outputs owned by `address`, in key order
    pub fn utxos_of(&self, address: &Address) -> Vec<(OutPoint, TransactionOutput)> {
        self.outputs
            .iter()
            .filter(|(_, output)| &output.owner == address)
            .map(|(outpoint, output)| (outpoint.clone(), output.clone()))
            .collect()
    }

    pub fn balance_of(&self, address: &Address) -> f64 {
        self.outputs
            .values()
            .filter(|output| &output.owner == address)
            .map(|output| output.amount)
            .sum()
    }

    /// Spendable total per address
    pub fn balances(&self) -> BTreeMap<Address, f64> {
        let mut balances = BTreeMap::new();
        for output in self.outputs.values() {
            *balances.entry(output.owner.clone()).or_insert(0.0) += output.amount;
        }
        balances
    }

    pub fn total_value(&self) -> f64 {
        self.outputs.values().map(|output| output.amount).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(c: char) -> Address {
        Address(c.to_string().repeat(64))
    }

    #[test]
    fn test_add_and_snapshot() {
        let tx = Transaction::coinbase(address('a'), 1000.0).unwrap();
        let mut pool = UtxoPool::new();
        pool.add_outputs(&tx);

        let snapshot = pool.snapshot();
        let key = format!("{}:0", tx.txid());
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[&key].amount, 1000.0);
        assert_eq!(snapshot[&key].owner, address('a'));
    }

    #[test]
    fn test_apply_moves_value() {
        let funding = Transaction::coinbase(address('a'), 10.0).unwrap();
        let mut pool = UtxoPool::new();
        pool.add_outputs(&funding);

        let spend = Transaction::new(
            vec![OutPoint::new(funding.txid(), 0).into()],
            vec![
                TransactionOutput::new(4.0, address('b')),
                TransactionOutput::new(6.0, address('a')),
            ],
            0.0,
        )
        .unwrap();
        pool.apply(&spend);

        assert!(!pool.contains(&OutPoint::new(funding.txid(), 0)));
        assert!(pool.contains(&OutPoint::new(spend.txid(), 1)));
        assert_eq!(pool.balance_of(&address('a')), 6.0);
        assert_eq!(pool.balance_of(&address('b')), 4.0);
        assert_eq!(pool.utxos_of(&address('b')).len(), 1);
        assert_eq!(pool.total_value(), 10.0);

        let balances = pool.balances();
        assert_eq!(balances.len(), 2);
        assert_eq!(balances[&address('a')], 6.0);
    }
}
