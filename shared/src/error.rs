use thiserror::Error;

/// Errors raised by the crypto and hashing primitives (C1).
///
/// This is the lowest-level error kind in the workspace; the core and
/// consensus crates each carry a `Crypto(#[from] CryptoError)` variant so
/// `?` propagates across crate boundaries without manual wrapping.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("invalid signature encoding")]
    InvalidSignatureEncoding,

    #[error("signature verification failed")]
    VerificationFailed,

    #[error("invalid hex encoding: {0}")]
    InvalidHex(String),
}
