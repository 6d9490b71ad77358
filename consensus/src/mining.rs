//! Proof-of-work mining worker (C6).

use chain_core::{Block, Transaction, MINE_RATE_MS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the Unix epoch")
        .as_millis() as i64
}

/// `adjust(lastBlock, timestamp)`: +1 if the candidate arrives within
/// `MINE_RATE`, -1 otherwise, clamped to a minimum of 1 (§4.6, §8 boundary:
/// difficulty never drops below 1 no matter how many slow blocks follow).
#[must_use]
pub fn adjust_difficulty(last_block: &Block, timestamp: i64) -> u32 {
    let difficulty = if timestamp - last_block.timestamp <= MINE_RATE_MS {
        last_block.difficulty + 1
    } else {
        last_block.difficulty.saturating_sub(1)
    };
    difficulty.max(1)
}

/// A cooperative cancellation flag shared between the orchestrator and the
/// mining task. Checked once per hash attempt so cancellation latency is
/// bounded by a single hash computation.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Mines the next block on top of `last_block` including `txs` (the
/// coinbase is expected to already be prepended by the caller, §4.10).
/// Yields to the runtime between attempts so the task can be preempted and
/// so a shared single-threaded executor is not starved; returns `None` if
/// `cancel` fires before a valid nonce is found, with no partial artifact
/// produced.
pub async fn mine_block(
    last_block: &Block,
    txs: Vec<Transaction>,
    cancel: &CancelToken,
) -> Option<Block> {
    let mut nonce = 0u64;
    let mut timestamp = now_ms();
    loop {
        if cancel.is_cancelled() {
            info!(number = last_block.number + 1, "mining cancelled");
            return None;
        }

        let difficulty = adjust_difficulty(last_block, timestamp);
        let hash = Block::compute_hash(timestamp, &last_block.hash, &txs, nonce, difficulty)
            .expect("serializing already-validated transactions cannot fail");

        if hash.meets_difficulty(difficulty) {
            info!(
                number = last_block.number + 1,
                nonce, difficulty, "mined block"
            );
            return Some(Block {
                number: last_block.number + 1,
                timestamp,
                last_hash: last_block.hash.clone(),
                hash: hash.to_string(),
                difficulty,
                nonce,
                data: txs,
            });
        }

        nonce += 1;
        timestamp = now_ms();
        if nonce % 256 == 0 {
            debug!(nonce, "mining in progress");
            tokio::task::yield_now().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain_core::transaction::mint_keypair;
    use shared::KeyPair;

    fn low_difficulty_genesis() -> Block {
        let mut genesis = Block::genesis();
        genesis.difficulty = 1;
        genesis
    }

    #[test]
    fn difficulty_increases_when_block_arrives_quickly() {
        let last = low_difficulty_genesis();
        let next_ts = last.timestamp + 1;
        assert_eq!(adjust_difficulty(&last, next_ts), last.difficulty + 1);
    }

    #[test]
    fn difficulty_decreases_but_never_below_one_when_slow() {
        let mut last = low_difficulty_genesis();
        last.difficulty = 1;
        let slow_ts = last.timestamp + MINE_RATE_MS * 100;
        assert_eq!(adjust_difficulty(&last, slow_ts), 1);
    }

    #[tokio::test]
    async fn mined_block_satisfies_its_own_difficulty() {
        let last = low_difficulty_genesis();
        let coinbase = Transaction::coinbase(&KeyPair::generate().public_key).unwrap();
        let cancel = CancelToken::new();
        let block = mine_block(&last, vec![coinbase], &cancel).await.unwrap();
        block.validate_against(&last, block.timestamp + 1).unwrap();
    }

    #[tokio::test]
    async fn cancelled_before_start_yields_no_block() {
        let last = {
            let mut g = Block::genesis();
            g.difficulty = 64; // unreasonably hard so mining would otherwise spin
            g
        };
        let coinbase = Transaction::coinbase(&mint_keypair().public_key).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = mine_block(&last, vec![coinbase], &cancel).await;
        assert!(result.is_none());
    }
}
