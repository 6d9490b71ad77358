use shared::CryptoError;
use thiserror::Error;

/// Error taxonomy for the chain/mempool layer (§7).
#[derive(Error, Debug)]
pub enum ChainError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("invalid block: {0}")]
    InvalidBlock(String),

    #[error("store failure: {0}")]
    StoreFailure(String),

    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("insufficient balance: account {account} has {balance}, needs {needed}")]
    InsufficientBalance {
        account: String,
        balance: u64,
        needed: u64,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ChainError>;
