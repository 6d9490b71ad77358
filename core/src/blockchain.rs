//! The five persisted namespaces (§4.3) wired into one chain-level store:
//! `block`, `blockHash`, `txHash`, `state`, `stake`.

use crate::block::Block;
use crate::error::{ChainError, Result};
use crate::store::{InMemoryStore, KvStore};
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use shared::{Amount, BlockNumber};
use tracing::{debug, warn};

/// Zero-padded so lexicographic key order equals numeric order, letting
/// `KvStore::keys()` double as a range scan for "latest block number".
fn number_key(number: BlockNumber) -> String {
    format!("{number:020}")
}

/// A world-state account record (§3): balance plus an optional opaque
/// role/attribute blob the core never interprets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub name: String,
    pub balance: Amount,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub role: Option<serde_json::Value>,
}

impl Account {
    #[must_use]
    pub fn new(name: impl Into<String>, balance: Amount) -> Self {
        Self {
            name: name.into(),
            balance,
            role: None,
        }
    }
}

/// Bundles the five ordered namespaces required by §4.3 and the
/// higher-level operations built on top of them.
pub struct ChainStore {
    block: InMemoryStore,
    block_hash: InMemoryStore,
    tx_hash: InMemoryStore,
    state: InMemoryStore,
    stake: InMemoryStore,
    applied: InMemoryStore,
}

impl Default for ChainStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            block: InMemoryStore::new(),
            block_hash: InMemoryStore::new(),
            tx_hash: InMemoryStore::new(),
            state: InMemoryStore::new(),
            stake: InMemoryStore::new(),
            applied: InMemoryStore::new(),
        }
    }

    // ---- block / blockHash / txHash namespaces -------------------------

    /// Persists a block and its derived indices. Idempotent: replaying the
    /// same block overwrites identical values at the same keys.
    pub fn put_block(&self, block: &Block) -> Result<()> {
        let json = serde_json::to_string(block)?;
        self.block.put(&number_key(block.number), &json);
        self.block_hash.put(&block.hash, &block.number.to_string());
        for (index, tx) in block.data.iter().enumerate() {
            let location = format!("{} {}", block.number, index);
            self.tx_hash.put(&tx.hash()?.to_string(), &location);
        }
        debug!(number = block.number, hash = %block.hash, "persisted block");
        Ok(())
    }

    pub fn get_block_by_number(&self, number: BlockNumber) -> Result<Option<Block>> {
        match self.block.get(&number_key(number)) {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn get_block_by_hash(&self, hash: &str) -> Result<Option<Block>> {
        let Some(number_str) = self.block_hash.get(hash) else {
            return Ok(None);
        };
        let number: BlockNumber = number_str
            .parse()
            .map_err(|_| ChainError::StoreFailure("corrupt blockHash index entry".into()))?;
        self.get_block_by_number(number)
    }

    /// The highest persisted block number, if any block has been written.
    pub fn latest_block_number(&self) -> Option<BlockNumber> {
        self.block.keys().pop().map(|k| k.parse().expect("number_key is numeric"))
    }

    pub fn latest_block(&self) -> Result<Option<Block>> {
        match self.latest_block_number() {
            Some(n) => self.get_block_by_number(n),
            None => Ok(None),
        }
    }

    /// `(blockNumber, txIndex)` for a committed transaction signature.
    pub fn get_tx_location(&self, signature: &str) -> Option<(BlockNumber, u32)> {
        let raw = self.tx_hash.get(signature)?;
        let mut parts = raw.split(' ');
        let number: BlockNumber = parts.next()?.parse().ok()?;
        let index: u32 = parts.next()?.parse().ok()?;
        Some((number, index))
    }

    pub fn has_committed_tx(&self, signature: &str) -> bool {
        self.tx_hash.has(signature)
    }

    // ---- idempotence marker ---------------------------------------------

    pub fn mark_applied(&self, number: BlockNumber) {
        self.applied.put(&number_key(number), "1");
    }

    pub fn is_applied(&self, number: BlockNumber) -> bool {
        self.applied.has(&number_key(number))
    }

    // ---- state namespace -------------------------------------------------

    pub fn get_account(&self, public_key: &str) -> Result<Option<Account>> {
        match self.state.get(public_key) {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn put_account(&self, public_key: &str, account: &Account) -> Result<()> {
        let json = serde_json::to_string(account)?;
        self.state.put(public_key, &json);
        Ok(())
    }

    pub fn accounts(&self) -> Result<Vec<(String, Account)>> {
        self.state
            .keys()
            .into_iter()
            .map(|k| {
                let account = self
                    .get_account(&k)?
                    .expect("key returned by keys() exists");
                Ok((k, account))
            })
            .collect()
    }

    // ---- stake namespace ---------------------------------------------------

    pub fn get_stake(&self, public_key: &str) -> Amount {
        self.stake
            .get(public_key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub fn put_stake(&self, public_key: &str, stake: Amount) {
        if stake == 0 {
            warn!(%public_key, "clearing staker table entry to zero stake");
        }
        self.stake.put(public_key, &stake.to_string());
    }

    pub fn stakers(&self) -> Vec<(String, Amount)> {
        self.stake
            .keys()
            .into_iter()
            .map(|k| {
                let stake = self.get_stake(&k);
                (k, stake)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_block_by_number_and_hash() {
        let store = ChainStore::new();
        let genesis = Block::genesis();
        store.put_block(&genesis).unwrap();

        assert_eq!(store.get_block_by_number(1).unwrap(), Some(genesis.clone()));
        assert_eq!(store.get_block_by_hash(&genesis.hash).unwrap(), Some(genesis));
    }

    #[test]
    fn latest_block_number_tracks_the_highest_written_block() {
        let store = ChainStore::new();
        assert_eq!(store.latest_block_number(), None);
        let genesis = Block::genesis();
        store.put_block(&genesis).unwrap();
        assert_eq!(store.latest_block_number(), Some(1));
    }

    #[test]
    fn replaying_a_block_is_idempotent() {
        let store = ChainStore::new();
        let genesis = Block::genesis();
        store.put_block(&genesis).unwrap();
        store.put_block(&genesis).unwrap();
        assert_eq!(store.block.keys().len(), 1);
    }

    #[test]
    fn account_round_trips() {
        let store = ChainStore::new();
        let account = Account::new("alice", 100);
        store.put_account("alice-pubkey", &account).unwrap();
        assert_eq!(store.get_account("alice-pubkey").unwrap(), Some(account));
    }

    #[test]
    fn stake_defaults_to_zero_and_accumulates() {
        let store = ChainStore::new();
        assert_eq!(store.get_stake("alice"), 0);
        store.put_stake("alice", 3);
        assert_eq!(store.get_stake("alice"), 3);
        assert_eq!(store.stakers(), vec![("alice".to_string(), 3)]);
    }
}
