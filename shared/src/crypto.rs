//! Ed25519 keypairs, signing and verification (C1).

use crate::{CryptoError, Hash256, Result};
use ed25519_dalek::{Keypair, PublicKey as DalekPublicKey, SecretKey, Signature as DalekSignature};
use ed25519_dalek::{Signer, Verifier};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Ed25519 public key, stored and transmitted hex-encoded on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "hex_bytes")] Vec<u8>);

/// Ed25519 private signing key. Zeroized on drop so key material does not
/// linger in memory after the keypair goes out of scope.
#[derive(Debug, Clone)]
pub struct PrivateKey(Vec<u8>);

/// A generated or loaded keypair for this node or account.
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub public_key: PublicKey,
    pub private_key: PrivateKey,
}

/// Ed25519 signature, hex-encoded on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(#[serde(with = "hex_bytes")] Vec<u8>);

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

impl PublicKey {
    /// Builds a public key from raw bytes, validating the Ed25519 encoding.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        DalekPublicKey::from_bytes(&bytes).map_err(|_| CryptoError::InvalidKeyLength {
            expected: ed25519_dalek::PUBLIC_KEY_LENGTH,
            actual: bytes.len(),
        })?;
        Ok(Self(bytes))
    }

    /// Parses a public key from its hex representation (the wire form used
    /// as `from`/`to` in transactions).
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| CryptoError::InvalidHex(e.to_string()))?;
        Self::from_bytes(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    fn to_dalek(&self) -> Result<DalekPublicKey> {
        DalekPublicKey::from_bytes(&self.0).map_err(|_| CryptoError::InvalidKeyLength {
            expected: ed25519_dalek::PUBLIC_KEY_LENGTH,
            actual: self.0.len(),
        })
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl PrivateKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        SecretKey::from_bytes(&bytes).map_err(|_| CryptoError::InvalidKeyLength {
            expected: ed25519_dalek::SECRET_KEY_LENGTH,
            actual: bytes.len(),
        })?;
        Ok(Self(bytes))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Zeroize for PrivateKey {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

impl Drop for PrivateKey {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl KeyPair {
    /// Generates a fresh random keypair.
    ///
    /// Draws the secret scalar's bytes from `rand`'s `OsRng` directly rather
    /// than through `ed25519_dalek::Keypair::generate`, which expects a
    /// `rand_core` version older than the one this workspace's `rand`
    /// pulls in; filling the bytes ourselves and handing them to
    /// `SecretKey::from_bytes` sidesteps that mismatch entirely.
    #[must_use]
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        Self::from_private_bytes(seed.to_vec()).expect("freshly generated seed is a valid scalar")
    }

    /// Reconstructs a keypair from a private key's raw bytes.
    pub fn from_private_bytes(bytes: Vec<u8>) -> Result<Self> {
        let secret = SecretKey::from_bytes(&bytes).map_err(|_| CryptoError::InvalidKeyLength {
            expected: ed25519_dalek::SECRET_KEY_LENGTH,
            actual: bytes.len(),
        })?;
        let public: DalekPublicKey = (&secret).into();
        Ok(Self {
            public_key: PublicKey(public.to_bytes().to_vec()),
            private_key: PrivateKey(secret.to_bytes().to_vec()),
        })
    }

    fn to_dalek(&self) -> Result<Keypair> {
        let secret =
            SecretKey::from_bytes(&self.private_key.0).map_err(|_| CryptoError::InvalidKeyLength {
                expected: ed25519_dalek::SECRET_KEY_LENGTH,
                actual: self.private_key.0.len(),
            })?;
        let public: DalekPublicKey = (&secret).into();
        Ok(Keypair { secret, public })
    }

    /// Signs an arbitrary message with the private key.
    pub fn sign(&self, message: &[u8]) -> Result<Signature> {
        let keypair = self.to_dalek()?;
        let sig = keypair.sign(message);
        Ok(Signature(sig.to_bytes().to_vec()))
    }
}

impl Signature {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        DalekSignature::from_bytes(&bytes).map_err(|_| CryptoError::InvalidSignatureEncoding)?;
        Ok(Self(bytes))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| CryptoError::InvalidHex(e.to_string()))?;
        Self::from_bytes(bytes)
    }
}

/// Signs a transaction hash with the given keypair (the signature covers
/// `H(from || to || canonical(data))` as specified in §3).
pub fn sign_transaction_hash(tx_hash: &Hash256, keypair: &KeyPair) -> Result<Signature> {
    keypair.sign(tx_hash.as_bytes())
}

/// Verifies a signature against a transaction hash under `public_key`.
pub fn verify_transaction_signature(
    tx_hash: &Hash256,
    public_key: &PublicKey,
    signature: &Signature,
) -> Result<bool> {
    let dalek_pub = public_key.to_dalek()?;
    let dalek_sig =
        DalekSignature::from_bytes(&signature.0).map_err(|_| CryptoError::InvalidSignatureEncoding)?;
    Ok(dalek_pub.verify(tx_hash.as_bytes(), &dalek_sig).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let keypair = KeyPair::generate();
        let hash = Hash256::keccak256(b"agrichain transaction payload");
        let sig = sign_transaction_hash(&hash, &keypair).unwrap();
        assert!(verify_transaction_signature(&hash, &keypair.public_key, &sig).unwrap());
    }

    #[test]
    fn verification_fails_under_wrong_key() {
        let keypair = KeyPair::generate();
        let other = KeyPair::generate();
        let hash = Hash256::keccak256(b"payload");
        let sig = sign_transaction_hash(&hash, &keypair).unwrap();
        assert!(!verify_transaction_signature(&hash, &other.public_key, &sig).unwrap());
    }

    #[test]
    fn verification_fails_on_tampered_hash() {
        let keypair = KeyPair::generate();
        let hash = Hash256::keccak256(b"payload");
        let sig = sign_transaction_hash(&hash, &keypair).unwrap();
        let tampered = Hash256::keccak256(b"tampered payload");
        assert!(!verify_transaction_signature(&tampered, &keypair.public_key, &sig).unwrap());
    }

    #[test]
    fn public_key_hex_round_trips() {
        let keypair = KeyPair::generate();
        let hex = keypair.public_key.to_hex();
        let parsed = PublicKey::from_hex(&hex).unwrap();
        assert_eq!(keypair.public_key, parsed);
    }

    #[test]
    fn keypair_from_private_bytes_reproduces_public_key() {
        let keypair = KeyPair::generate();
        let restored =
            KeyPair::from_private_bytes(keypair.private_key.as_bytes().to_vec()).unwrap();
        assert_eq!(keypair.public_key, restored.public_key);
    }
}
