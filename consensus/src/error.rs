use thiserror::Error;

/// Error taxonomy for the mining, forger-election and sync-queue layer (§7).
#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error(transparent)]
    Chain(#[from] chain_core::ChainError),

    #[error("mining worker failed: {0}")]
    WorkerFailure(String),

    #[error("no stakers registered, no forger can be elected")]
    NoStakers,
}

pub type Result<T> = std::result::Result<T, ConsensusError>;
