//! Proof-of-work mining, stake-weighted forger election and the chain-sync
//! queue (C6-C8).

pub mod error;
pub mod forger;
pub mod mining;
pub mod sync;

pub use error::{ConsensusError, Result};
pub use forger::StakerTable;
pub use mining::{adjust_difficulty, mine_block, CancelToken};
pub use sync::SyncQueue;
