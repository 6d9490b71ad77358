//! Pending-transaction pool: dedup, admission, eviction (C5).

use crate::blockchain::ChainStore;
use crate::block::Block;
use crate::error::Result;
use crate::transaction::Transaction;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Default mempool capacity; overflow evicts the oldest entry.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Ordered set of pending transactions, deduplicated by signature.
pub struct Mempool {
    capacity: usize,
    order: Vec<Transaction>,
    seen_signatures: HashSet<String>,
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Mempool {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: Vec::new(),
            seen_signatures: HashSet::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    #[must_use]
    pub fn contains_signature(&self, signature: &str) -> bool {
        self.seen_signatures.contains(signature)
    }

    #[must_use]
    pub fn transactions(&self) -> &[Transaction] {
        &self.order
    }

    /// Admits `tx` if it validates in isolation, its sender account exists
    /// (in the store, or was just created by a prior pooled tx's `to`),
    /// and its signature is not already pooled. Returns whether it was
    /// admitted.
    pub fn admit(&mut self, tx: Transaction, store: &ChainStore) -> Result<bool> {
        tx.is_valid().is_ok().then_some(()).ok_or_else(|| {
            crate::error::ChainError::InvalidTransaction("signature/amount check failed".into())
        })?;

        if self.seen_signatures.contains(&tx.signature) {
            debug!(signature = %tx.signature, "duplicate transaction, ignoring");
            return Ok(false);
        }

        let mint_hex = crate::transaction::mint_keypair().public_key.to_hex();
        let sender_known = tx.from == mint_hex
            || store.get_account(&tx.from)?.is_some()
            || self.order.iter().any(|pending| pending.to == tx.from);
        if !sender_known {
            debug!(from = %tx.from, "sender account does not exist, rejecting");
            return Ok(false);
        }

        if self.order.len() >= self.capacity {
            let evicted = self.order.remove(0);
            self.seen_signatures.remove(&evicted.signature);
            warn!(signature = %evicted.signature, "mempool full, evicted oldest transaction");
        }

        self.seen_signatures.insert(tx.signature.clone());
        self.order.push(tx);
        Ok(true)
    }

    /// Drops every pooled transaction whose signature appears in `block`.
    pub fn evict_committed(&mut self, block: &Block) {
        let committed: HashSet<&str> = block.data.iter().map(|tx| tx.signature.as_str()).collect();
        self.order.retain(|tx| {
            let keep = !committed.contains(tx.signature.as_str());
            if !keep {
                self.seen_signatures.remove(&tx.signature);
            }
            keep
        });
    }

    /// Silently drops pooled transactions whose sender can no longer
    /// afford them after a commit (policy: silent drop, §4.5).
    pub fn garbage_collect(&mut self, store: &ChainStore) -> Result<()> {
        let mut keep = Vec::with_capacity(self.order.len());
        for tx in self.order.drain(..) {
            let affordable = match tx.debits_from() {
                Some((from, amount)) => store
                    .get_account(from)?
                    .map(|account| account.balance >= amount)
                    .unwrap_or(false),
                None => true,
            };
            if affordable {
                keep.push(tx);
            } else {
                self.seen_signatures.remove(&tx.signature);
                debug!(from = %tx.from, "garbage-collected unaffordable transaction");
            }
        }
        self.order = keep;
        Ok(())
    }
}
