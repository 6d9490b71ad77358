use crate::error::CryptoError;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;

/// 256-bit hash used to identify blocks, transactions and other canonical data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    /// Creates a zeroed hash
    #[must_use]
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    /// Creates a hash from a 32-byte array
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes of the hash
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Computes Keccak-256 hash of the provided data
    #[must_use]
    pub fn keccak256(data: &[u8]) -> Self {
        let mut hasher = Keccak256::new();
        hasher.update(data);
        let result = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        Self(hash)
    }

    /// Domain-separated hash of several fields, joined with a fixed
    /// separator before digesting so that e.g. `hash_fields(&[b"a", b"bc"])`
    /// cannot collide with `hash_fields(&[b"ab", b"c"])`.
    #[must_use]
    pub fn hash_fields(parts: &[&[u8]]) -> Self {
        let mut buf = Vec::new();
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                buf.push(0x1f); // ASCII unit separator
            }
            buf.extend_from_slice(part);
        }
        Self::keccak256(&buf)
    }

    /// Iterates the hash function `n` times starting from `self` (used by
    /// the PoS forger's lot materialization).
    #[must_use]
    pub fn iterate(&self, n: u32) -> Self {
        let mut current = *self;
        for _ in 0..n {
            current = Self::keccak256(&current.0);
        }
        current
    }

    /// Interprets the last 16 bytes of the hash as a big-endian integer —
    /// enough entropy to compare lot distances without a bignum dependency.
    #[must_use]
    pub fn as_u128(&self) -> u128 {
        let mut buf = [0u8; 16];
        buf.copy_from_slice(&self.0[16..32]);
        u128::from_be_bytes(buf)
    }

    /// Checks if the hash satisfies the specified difficulty
    /// (number of leading zero bits)
    #[must_use]
    pub fn meets_difficulty(&self, difficulty: u32) -> bool {
        let leading_zeros = self.leading_zeros();
        leading_zeros >= difficulty
    }

    /// Counts the number of leading zero bits in the hash
    #[must_use]
    pub fn leading_zeros(&self) -> u32 {
        let mut zeros = 0;
        for &byte in &self.0 {
            if byte == 0 {
                zeros += 8;
            } else {
                zeros += byte.leading_zeros();
                break;
            }
        }
        zeros
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl TryFrom<&str> for Hash256 {
    type Error = CryptoError;

    fn try_from(hex_string: &str) -> Result<Self, Self::Error> {
        let bytes = hex::decode(hex_string).map_err(|e| CryptoError::InvalidHex(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes);
        Ok(Self(hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_creation_and_display() {
        let hash = Hash256::zero();
        assert_eq!(hash.to_string(), "0".repeat(64));
    }

    #[test]
    fn hash_fields_is_order_sensitive() {
        let a = Hash256::hash_fields(&[b"a", b"bc"]);
        let b = Hash256::hash_fields(&[b"ab", b"c"]);
        assert_ne!(a, b);
    }

    #[test]
    fn round_trips_through_hex_display() {
        let hash = Hash256::keccak256(b"round trip");
        let parsed = Hash256::try_from(hash.to_string().as_str()).unwrap();
        assert_eq!(hash, parsed);
    }

    #[test]
    fn iterate_zero_times_is_identity() {
        let hash = Hash256::keccak256(b"seed");
        assert_eq!(hash.iterate(0), hash);
        assert_ne!(hash.iterate(1), hash);
    }

    #[test]
    fn test_keccak256_hashing() {
        let data = b"hello world";
        let hash = Hash256::keccak256(data);
        // Verifica se o hash não é zero (dados válidos devem produzir hash não-zero)
        assert_ne!(hash, Hash256::zero());
    }

    #[test]
    fn test_difficulty_check() {
        // Hash com muitos zeros iniciais
        let easy_hash = Hash256::from_bytes([
            0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
            0, 0, 0,
        ]);
        assert!(easy_hash.meets_difficulty(20));
        assert!(!easy_hash.meets_difficulty(40));
    }

    #[test]
    fn test_leading_zeros_count() {
        let hash = Hash256::from_bytes([
            0, 0, 0, 128, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
            0, 0, 0, 0,
        ]);
        // 3 bytes de zeros (24 bits) + 1 bit zero no quarto byte = 25 zeros
        assert_eq!(hash.leading_zeros(), 24);
    }
}
