//! Block/transaction data model, persistent stores, world-state transition
//! and mempool (C2-C5).

pub mod block;
pub mod blockchain;
pub mod error;
pub mod mempool;
pub mod state;
pub mod store;
pub mod transaction;

pub use block::{Block, GENESIS_LAST_HASH, INITIAL_DIFFICULTY, MINE_RATE_MS};
pub use blockchain::{Account, ChainStore};
pub use error::{ChainError, Result};
pub use mempool::Mempool;
pub use state::{apply_block, first_account_keypair, seed_genesis_state, INITIAL_SUPPLY};
pub use store::{InMemoryStore, KvStore};
pub use transaction::{mint_keypair, Transaction, TransactionData};
