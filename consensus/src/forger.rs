//! Stake-weighted PoS forger election (C7).

use chain_core::ChainStore;
use shared::{Amount, Hash256};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

/// In-memory staker table mirror kept alongside the persisted `stake`
/// namespace so forger election does not need to round-trip through JSON
/// on every tick. `update` and block application both go through this
/// table, keeping it the single source of truth the scheduler reads.
#[derive(Default)]
pub struct StakerTable {
    stakes: RwLock<HashMap<String, Amount>>,
}

impl StakerTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the in-memory table from a chain store's persisted
    /// `stake` namespace (used on node resume).
    #[must_use]
    pub fn from_store(store: &ChainStore) -> Self {
        let table = Self::new();
        for (public_key, stake) in store.stakers() {
            table.stakes.write().expect("lock poisoned").insert(public_key, stake);
        }
        table
    }

    pub fn update(&self, public_key: &str, stake_delta: Amount) {
        let mut stakes = self.stakes.write().expect("lock poisoned");
        *stakes.entry(public_key.to_string()).or_insert(0) += stake_delta;
    }

    #[must_use]
    pub fn stake_of(&self, public_key: &str) -> Amount {
        self.stakes
            .read()
            .expect("lock poisoned")
            .get(public_key)
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, Amount)> {
        let stakes = self.stakes.read().expect("lock poisoned");
        let mut entries: Vec<_> = stakes.iter().map(|(k, v)| (k.clone(), *v)).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Stake-weighted leader election, deterministic given a fixed
    /// iteration order over the staker map (§4.7).
    ///
    /// Materializes one "lot" per stake unit for each staker — staker `S`
    /// with stake `k` has lots `(S, 1..=k)` — each with
    /// `lotHash = H^i(pub || seed)`. The winning lot minimizes
    /// `|int(lotHash) - int(seed)|`; ties go to the first lot seen in
    /// iteration order (stable because `snapshot()` sorts by public key).
    #[must_use]
    pub fn forger(&self, seed: &Hash256) -> Option<String> {
        let seed_value = seed.as_u128();
        let mut winner: Option<(String, u128)> = None;

        for (public_key, stake) in self.snapshot() {
            for lot in 1..=stake {
                let lot_seed = Hash256::hash_fields(&[public_key.as_bytes(), seed.as_bytes().as_slice()]);
                let lot_hash = lot_seed.iterate(lot as u32);
                let distance = lot_hash.as_u128().abs_diff(seed_value);
                let better = match &winner {
                    None => true,
                    Some((_, best_distance)) => distance < *best_distance,
                };
                if better {
                    debug!(%public_key, lot, distance, "new leading forger lot");
                    winner = Some((public_key.clone(), distance));
                }
            }
        }

        winner.map(|(public_key, _)| public_key)
    }
}
