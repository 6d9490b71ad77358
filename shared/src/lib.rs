//! Crypto primitives, canonical hashing and common type aliases shared by
//! every crate in the node workspace (C1).

pub mod crypto;
pub mod error;
pub mod hash;
pub mod types;

pub use crypto::{sign_transaction_hash, verify_transaction_signature, KeyPair, PrivateKey, PublicKey, Signature};
pub use error::CryptoError;
pub use hash::Hash256;
pub use types::{Amount, BlockNumber, PublicKeyHex, Timestamp, TxIndex};

pub type Result<T> = std::result::Result<T, CryptoError>;
