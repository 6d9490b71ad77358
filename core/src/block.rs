//! Block data model, canonical hashing and structural validity (C2).

use crate::error::{ChainError, Result};
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use shared::{BlockNumber, Hash256, Timestamp};

/// Genesis `lastHash` placeholder, identical across every node.
pub const GENESIS_LAST_HASH: &str = "----";

/// Initial PoW difficulty, in required leading zero bits.
pub const INITIAL_DIFFICULTY: u32 = 3;

/// `MINE_RATE` in milliseconds: the target time between consecutive blocks.
pub const MINE_RATE_MS: i64 = 1000;

/// An immutable, ordered unit of the chain (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub number: BlockNumber,
    pub timestamp: Timestamp,
    pub last_hash: String,
    pub hash: String,
    pub difficulty: u32,
    pub nonce: u64,
    pub data: Vec<Transaction>,
}

impl Block {
    /// The fixed genesis block every node writes to its store on first
    /// startup (§4.10 Fresh mode). Bit-identical across all nodes.
    #[must_use]
    pub fn genesis() -> Self {
        Self {
            number: 1,
            timestamp: 1,
            last_hash: GENESIS_LAST_HASH.to_string(),
            hash: "hash-one".to_string(),
            difficulty: INITIAL_DIFFICULTY,
            nonce: 0,
            data: Vec::new(),
        }
    }

    /// `hash = H(timestamp, lastHash, data, nonce, difficulty)` over a
    /// canonical encoding (fixed field order, JSON for the transaction
    /// array so wire and hash payload agree byte-for-byte).
    pub fn compute_hash(
        timestamp: Timestamp,
        last_hash: &str,
        data: &[Transaction],
        nonce: u64,
        difficulty: u32,
    ) -> Result<Hash256> {
        let data_json = serde_json::to_vec(data)?;
        Ok(Hash256::hash_fields(&[
            timestamp.to_string().as_bytes(),
            last_hash.as_bytes(),
            &data_json,
            nonce.to_string().as_bytes(),
            difficulty.to_string().as_bytes(),
        ]))
    }

    /// Recomputes this block's hash from its own fields.
    pub fn recompute_hash(&self) -> Result<Hash256> {
        Self::compute_hash(
            self.timestamp,
            &self.last_hash,
            &self.data,
            self.nonce,
            self.difficulty,
        )
    }

    /// Structural/consensus validity against the immediate predecessor
    /// (§3 invariants, §8 round-trip/boundary laws). Transaction-level
    /// validity and the balance-overdraw check are the caller's
    /// responsibility (C4/C5), since they require world-state.
    pub fn validate_against(&self, previous: &Block, now: Timestamp) -> Result<()> {
        if self.number != previous.number + 1 {
            return Err(ChainError::InvalidBlock(format!(
                "expected number {}, got {}",
                previous.number + 1,
                self.number
            )));
        }
        if self.last_hash != previous.hash {
            return Err(ChainError::InvalidBlock(
                "lastHash does not match previous block's hash".into(),
            ));
        }
        if self.timestamp <= previous.timestamp {
            return Err(ChainError::InvalidBlock(
                "timestamp must be strictly greater than the previous block's".into(),
            ));
        }
        if self.timestamp > now {
            return Err(ChainError::InvalidBlock(
                "timestamp is in the future".into(),
            ));
        }
        let diff = self.difficulty as i64 - previous.difficulty as i64;
        if diff.abs() > 1 {
            return Err(ChainError::InvalidBlock(
                "difficulty may change by at most 1 between adjacent blocks".into(),
            ));
        }

        let recomputed = self.recompute_hash()?;
        if recomputed.to_string() != self.hash {
            return Err(ChainError::InvalidBlock(
                "hash does not match canonical encoding".into(),
            ));
        }
        if !recomputed.meets_difficulty(self.difficulty) {
            return Err(ChainError::InvalidBlock(
                "hash does not satisfy the declared difficulty".into(),
            ));
        }
        Ok(())
    }
}
