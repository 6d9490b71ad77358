//! World-state transition: the deterministic `apply_block` function (C4).

use crate::blockchain::{Account, ChainStore};
use crate::block::Block;
use crate::error::{ChainError, Result};
use crate::transaction::{mint_keypair, TransactionData};
use serde::{Deserialize, Serialize};
use shared::{Amount, KeyPair};
use std::sync::OnceLock;
use tracing::info;

/// Balance every node's `FIRST_ACCOUNT` starts with.
pub const INITIAL_SUPPLY: Amount = 1_000_000;

/// The fixed, well-known identity every node seeds its world state with at
/// genesis — the source of `COIN_PURCHASE`/`TRANSFER` liquidity in the
/// account model, distinct from the mint identity used to sign coinbase
/// transactions (§6 lists both as constants required identical across
/// nodes).
pub fn first_account_keypair() -> &'static KeyPair {
    static FIRST: OnceLock<KeyPair> = OnceLock::new();
    FIRST.get_or_init(|| {
        const FIRST_ACCOUNT_SEED: &[u8; 32] = b"agrichain-first-account-seed-001";
        KeyPair::from_private_bytes(FIRST_ACCOUNT_SEED.to_vec())
            .expect("first-account seed is a valid ed25519 scalar")
    })
}

/// Orderer self-stake recorded at genesis so a forger always exists (§4.10).
pub const ORDERER_GENESIS_STAKE: Amount = 1;

/// Seeds a fresh store with the genesis world state: the initial-supply
/// account, and — if this node is the orderer — its own stake-1 entry.
pub fn seed_genesis_state(store: &ChainStore, orderer_public_key: Option<&str>) -> Result<()> {
    let first = first_account_keypair().public_key.to_hex();
    store.put_account(&first, &Account::new("first-account", INITIAL_SUPPLY))?;
    if let Some(orderer) = orderer_public_key {
        store.put_stake(orderer, ORDERER_GENESIS_STAKE);
        info!(%orderer, "seeded orderer self-stake at genesis");
    }
    Ok(())
}

/// Intermediate per-account balance delta used to pre-check a candidate
/// block for overdraws before mining/committing it (§4.10's "shadow state").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TentativeDebit {
    pub account: String,
    pub amount: Amount,
}

/// Applies a committed block to the world state and staker table.
///
/// Idempotent: re-applying a block whose number is already marked applied
/// is a silent no-op, so a duplicate `PUBLISH_BLOCK` never double-spends.
pub fn apply_block(store: &ChainStore, block: &Block) -> Result<()> {
    if store.is_applied(block.number) {
        info!(number = block.number, "block already applied, skipping");
        return Ok(());
    }

    let mint_hex = mint_keypair().public_key.to_hex();

    for tx in &block.data {
        ensure_account_exists(store, &tx.to)?;
        if tx.from != mint_hex {
            ensure_account_exists(store, &tx.from)?;
        }

        if let Some((from, amount)) = tx.debits_from() {
            debit(store, from, amount)?;
            match &tx.data {
                TransactionData::Transfer { .. } | TransactionData::CoinPurchase { .. } => {
                    credit(store, &tx.to, amount)?;
                }
                TransactionData::Stake { .. } => {
                    let current = store.get_stake(&tx.to);
                    store.put_stake(&tx.to, current + amount);
                }
                TransactionData::MiningReward | TransactionData::Opaque(_) => unreachable!(
                    "debits_from only returns Some for Transfer/CoinPurchase/Stake"
                ),
            }
        }
    }

    if let Some(first) = block.data.first() {
        if first.from == mint_hex && first.to != mint_hex {
            let reward = (block.data.len() as Amount).saturating_sub(1);
            credit(store, &first.to, reward)?;
        }
    }

    store.mark_applied(block.number);
    Ok(())
}

fn ensure_account_exists(store: &ChainStore, public_key: &str) -> Result<()> {
    if store.get_account(public_key)?.is_none() {
        store.put_account(public_key, &Account::new(public_key, 0))?;
    }
    Ok(())
}

fn debit(store: &ChainStore, public_key: &str, amount: Amount) -> Result<()> {
    let mut account = store
        .get_account(public_key)?
        .ok_or_else(|| ChainError::AccountNotFound(public_key.to_string()))?;
    if account.balance < amount {
        return Err(ChainError::InsufficientBalance {
            account: public_key.to_string(),
            balance: account.balance,
            needed: amount,
        });
    }
    account.balance -= amount;
    store.put_account(public_key, &account)
}

fn credit(store: &ChainStore, public_key: &str, amount: Amount) -> Result<()> {
    let mut account = store
        .get_account(public_key)?
        .unwrap_or_else(|| Account::new(public_key, 0));
    account.balance += amount;
    store.put_account(public_key, &account)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use crate::transaction::Transaction;
    use shared::KeyPair;

    fn setup() -> ChainStore {
        let store = ChainStore::new();
        seed_genesis_state(&store, None).unwrap();
        store.put_block(&Block::genesis()).unwrap();
        apply_block(&store, &Block::genesis()).unwrap();
        store
    }

    fn mined_block(number: u64, last_hash: &str, timestamp: i64, data: Vec<Transaction>) -> Block {
        let difficulty = 1;
        let mut nonce = 0u64;
        loop {
            let hash = Block::compute_hash(timestamp, last_hash, &data, nonce, difficulty).unwrap();
            if hash.meets_difficulty(difficulty) {
                return Block {
                    number,
                    timestamp,
                    last_hash: last_hash.to_string(),
                    hash: hash.to_string(),
                    difficulty,
                    nonce,
                    data,
                };
            }
            nonce += 1;
        }
    }

    #[test]
    fn scenario_coin_purchase_then_transfer() {
        let store = setup();
        let first = first_account_keypair();
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let miner = KeyPair::generate();

        let coin_purchase = Transaction::new(
            alice.public_key.clone(),
            TransactionData::CoinPurchase { amount: 100 },
            first,
        )
        .unwrap();
        let coinbase1 = Transaction::coinbase(&miner.public_key).unwrap();
        let block2 = mined_block(2, &Block::genesis().hash, 2, vec![coinbase1, coin_purchase]);
        store.put_block(&block2).unwrap();
        apply_block(&store, &block2).unwrap();

        assert_eq!(store.get_account(&alice.public_key.to_hex()).unwrap().unwrap().balance, 100);
        assert_eq!(
            store.get_account(&first.public_key.to_hex()).unwrap().unwrap().balance,
            INITIAL_SUPPLY - 100
        );

        let transfer = Transaction::new(
            bob.public_key.clone(),
            TransactionData::Transfer { amount: 40 },
            &alice,
        )
        .unwrap();
        let coinbase2 = Transaction::coinbase(&miner.public_key).unwrap();
        let block3 = mined_block(3, &block2.hash, 3, vec![coinbase2, transfer]);
        store.put_block(&block3).unwrap();
        apply_block(&store, &block3).unwrap();

        assert_eq!(store.get_account(&alice.public_key.to_hex()).unwrap().unwrap().balance, 60);
        assert_eq!(store.get_account(&bob.public_key.to_hex()).unwrap().unwrap().balance, 40);
        assert_eq!(
            store.get_account(&first.public_key.to_hex()).unwrap().unwrap().balance,
            999_900
        );
        assert_eq!(store.get_account(&miner.public_key.to_hex()).unwrap().unwrap().balance, 2);
    }

    #[test]
    fn reapplying_a_block_is_a_no_op() {
        let store = setup();
        let alice = KeyPair::generate();
        let miner = KeyPair::generate();
        let tx = Transaction::new(
            alice.public_key.clone(),
            TransactionData::CoinPurchase { amount: 100 },
            first_account_keypair(),
        )
        .unwrap();
        let coinbase = Transaction::coinbase(&miner.public_key).unwrap();
        let block2 = mined_block(2, &Block::genesis().hash, 2, vec![coinbase, tx]);
        store.put_block(&block2).unwrap();

        apply_block(&store, &block2).unwrap();
        let after_first = store.get_account(&alice.public_key.to_hex()).unwrap().unwrap();
        apply_block(&store, &block2).unwrap();
        let after_second = store.get_account(&alice.public_key.to_hex()).unwrap().unwrap();

        assert_eq!(after_first, after_second);
    }

    #[test]
    fn stake_debits_sender_and_credits_staker_table() {
        let store = setup();
        let first = first_account_keypair();
        let staker = KeyPair::generate();
        let fund = Transaction::new(
            staker.public_key.clone(),
            TransactionData::CoinPurchase { amount: 10 },
            first,
        )
        .unwrap();
        let coinbase = Transaction::coinbase(&staker.public_key).unwrap();
        let block2 = mined_block(2, &Block::genesis().hash, 2, vec![coinbase, fund]);
        store.put_block(&block2).unwrap();
        apply_block(&store, &block2).unwrap();

        let stake_tx = Transaction::new(
            staker.public_key.clone(),
            TransactionData::Stake { amount: 5 },
            &staker,
        )
        .unwrap();
        let coinbase2 = Transaction::coinbase(&staker.public_key).unwrap();
        let block3 = mined_block(3, &block2.hash, 3, vec![coinbase2, stake_tx]);
        store.put_block(&block3).unwrap();
        apply_block(&store, &block3).unwrap();

        assert_eq!(store.get_stake(&staker.public_key.to_hex()), 5);
        let balance = store.get_account(&staker.public_key.to_hex()).unwrap().unwrap().balance;
        assert_eq!(balance, 10 + 1 /* first coinbase reward */ - 5 + 1 /* second coinbase reward */);
    }

    #[test]
    fn overdraw_is_rejected() {
        let store = setup();
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let miner = KeyPair::generate();
        let overdraw = Transaction::new(
            bob.public_key.clone(),
            TransactionData::Transfer { amount: 1 },
            &alice,
        )
        .unwrap();
        let coinbase = Transaction::coinbase(&miner.public_key).unwrap();
        let block2 = mined_block(2, &Block::genesis().hash, 2, vec![coinbase, overdraw]);
        store.put_block(&block2).unwrap();
        assert!(apply_block(&store, &block2).is_err());
    }
}
