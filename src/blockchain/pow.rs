use log::debug;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::block::Block;

/// How many nonces are tried between checks of the cancel flag and deadline
const CHECK_INTERVAL: u64 = 1024;

/// True when `hash` starts with at least `difficulty` zero hex characters
pub fn meets_difficulty(hash: &str, difficulty: usize) -> bool {
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}

/// Shared flag a caller flips to abandon a search
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Limits on a single proof-of-work search
#[derive(Debug, Clone, Default)]
pub struct MiningControl {
    pub cancel: CancelToken,
    pub deadline: Option<Instant>,
    pub max_attempts: Option<u64>,
}

impl MiningControl {
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u64) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// Result of a search; every non-`Found` outcome says where to resume
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    Found { nonce: u64, hash: String, attempts: u64 },
    Cancelled { next_nonce: u64, attempts: u64 },
    TimedOut { next_nonce: u64, attempts: u64 },
    Exhausted { next_nonce: u64, attempts: u64 },
}

/// Leading-zero-hex proof of work
#[derive(Debug, Clone, Copy)]
pub struct ProofOfWork {
    difficulty: usize,
}

impl ProofOfWork {
    pub fn new(difficulty: usize) -> Self {
        ProofOfWork { difficulty }
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    /// Searches nonces upward from `start_nonce`, rehashing `block` each time.
    ///
    /// On `Found` the block holds the winning nonce and hash. Otherwise the
    /// block holds the last nonce tried and `next_nonce` resumes the search.
    pub fn search(&self, block: &mut Block, start_nonce: u64, control: &MiningControl) -> SearchOutcome {
        let mut nonce = start_nonce;
        let mut attempts = 0u64;

        loop {
            if attempts % CHECK_INTERVAL == 0 {
                if control.cancel.is_cancelled() {
                    debug!("Proof of work cancelled at nonce {}", nonce);
                    return SearchOutcome::Cancelled { next_nonce: nonce, attempts };
                }
                if control.deadline.map_or(false, |deadline| Instant::now() >= deadline) {
                    debug!("Proof of work timed out at nonce {}", nonce);
                    return SearchOutcome::TimedOut { next_nonce: nonce, attempts };
                }
                if attempts > 0 {
                    debug!("Proof of work: {} attempts, nonce {}", attempts, nonce);
                }
            }

            if control.max_attempts.map_or(false, |max| attempts >= max) {
                return SearchOutcome::Exhausted { next_nonce: nonce, attempts };
            }

            block.set_nonce(nonce);
            attempts += 1;

            if meets_difficulty(block.hash(), self.difficulty) {
                return SearchOutcome::Found {
                    nonce,
                    hash: block.hash().to_string(),
                    attempts,
                };
            }

            nonce = match nonce.checked_add(1) {
                Some(next) => next,
                None => return SearchOutcome::Exhausted { next_nonce: nonce, attempts },
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::{Address, Transaction};
    use proptest::prelude::*;

    fn candidate() -> Block {
        let reward = Transaction::reward(Address("d".repeat(64)), 3.0, 1).unwrap();
        Block::new(1, "e".repeat(64), vec![reward], 0)
    }

    #[test]
    fn test_meets_difficulty() {
        assert!(meets_difficulty("00ab", 2));
        assert!(meets_difficulty("00ab", 0));
        assert!(!meets_difficulty("0a0b", 2));
        assert!(!meets_difficulty("0", 2));
    }

    #[test]
    fn test_search_finds_valid_nonce() {
        let mut block = candidate();
        let outcome = ProofOfWork::new(2).search(&mut block, 0, &MiningControl::default());

        match outcome {
            SearchOutcome::Found { nonce, hash, attempts } => {
                assert_eq!(block.nonce(), nonce);
                assert_eq!(block.hash(), hash);
                assert_eq!(attempts, nonce + 1);
                assert!(hash.starts_with("00"));
                assert!(block.has_valid_hash());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_zero_difficulty_takes_first_nonce() {
        let mut block = candidate();
        let outcome = ProofOfWork::new(0).search(&mut block, 7, &MiningControl::default());
        assert!(matches!(outcome, SearchOutcome::Found { nonce: 7, attempts: 1, .. }));
    }

    #[test]
    fn test_cancelled_before_start() {
        let mut block = candidate();
        let token = CancelToken::new();
        token.cancel();

        let control = MiningControl::default().with_cancel(token);
        let outcome = ProofOfWork::new(64).search(&mut block, 5, &control);
        assert_eq!(outcome, SearchOutcome::Cancelled { next_nonce: 5, attempts: 0 });
    }

    #[test]
    fn test_expired_deadline_times_out() {
        let mut block = candidate();
        let control = MiningControl::default().with_timeout(Duration::ZERO);
        let outcome = ProofOfWork::new(64).search(&mut block, 0, &control);
        assert!(matches!(outcome, SearchOutcome::TimedOut { next_nonce: 0, .. }));
    }

    #[test]
    fn test_exhausted_search_resumes() {
        let mut block = candidate();
        let pow = ProofOfWork::new(2);

        let bounded = MiningControl::default().with_max_attempts(1);
        let next = match pow.search(&mut block, 0, &bounded) {
            SearchOutcome::Found { .. } => return,
            SearchOutcome::Exhausted { next_nonce, attempts } => {
                assert_eq!(attempts, 1);
                next_nonce
            }
            other => panic!("unexpected outcome {:?}", other),
        };
        assert_eq!(next, 1);

        let resumed = pow.search(&mut block, next, &MiningControl::default());
        assert!(matches!(resumed, SearchOutcome::Found { .. }));
        assert!(meets_difficulty(block.hash(), 2));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_nonce_change_breaks_stored_hash(delta in 1u64..1_000_000) {
            let mut block = candidate();
            let outcome = ProofOfWork::new(3).search(&mut block, 0, &MiningControl::default());
            let found = matches!(outcome, SearchOutcome::Found { .. });
            prop_assert!(found);

            let stored = block.hash().to_string();
            block.set_nonce(block.nonce().wrapping_add(delta));
            prop_assert_ne!(block.hash(), stored.as_str());
        }
    }
}
