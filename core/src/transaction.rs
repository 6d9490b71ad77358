//! Transaction data model and validity predicates (C2).

use crate::error::{ChainError, Result};
use serde::{Deserialize, Serialize};
use shared::{verify_transaction_signature, Amount, Hash256, KeyPair, PublicKey, Signature};
use std::sync::OnceLock;
use tracing::debug;

/// The well-known mint identity: the source of `COIN_PURCHASE` credits and
/// the signer of `MINING_REWARD` coinbase transactions. Baked into every
/// node binary rather than regenerated (§9 flags regeneration as a latent
/// bug in the source this spec was distilled from).
pub fn mint_keypair() -> &'static KeyPair {
    static MINT: OnceLock<KeyPair> = OnceLock::new();
    MINT.get_or_init(|| {
        // Fixed seed so every node derives the identical mint keypair.
        const MINT_SEED: &[u8; 32] = b"agrichain-mint-account-seed-0001";
        KeyPair::from_private_bytes(MINT_SEED.to_vec()).expect("mint seed is a valid ed25519 scalar")
    })
}

/// Tagged transaction payload (§3). Serialized with an adjacently tagged
/// `type`/`data` shape so the wire form matches §6's schema and so every
/// core match on this enum is exhaustive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TransactionData {
    #[serde(rename = "COIN_PURCHASE")]
    CoinPurchase { amount: Amount },
    #[serde(rename = "TRANSFER")]
    Transfer { amount: Amount },
    #[serde(rename = "STAKE")]
    Stake { amount: Amount },
    #[serde(rename = "MINING_REWARD")]
    MiningReward,
    /// Application-opaque payload (e.g. supply-chain product/role/stock
    /// events); transparent to the core, persisted verbatim.
    #[serde(rename = "OPAQUE")]
    Opaque(serde_json::Value),
}

impl TransactionData {
    /// The amount this variant would debit from `from` (zero for variants
    /// with no balance effect on the sender).
    #[must_use]
    pub fn debit_amount(&self) -> Amount {
        match self {
            Self::CoinPurchase { amount } | Self::Transfer { amount } | Self::Stake { amount } => {
                *amount
            }
            Self::MiningReward | Self::Opaque(_) => 0,
        }
    }
}

/// A signed transaction (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub from: String,
    pub to: String,
    pub data: TransactionData,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_transaction_hash: Option<String>,
    pub signature: String,
}

impl Transaction {
    /// Builds and signs a transaction with `keypair`.
    pub fn new(to: PublicKey, data: TransactionData, keypair: &KeyPair) -> Result<Self> {
        let from = keypair.public_key.to_hex();
        let to = to.to_hex();
        let hash = Self::signing_hash(&from, &to, &data)?;
        let signature = shared::sign_transaction_hash(&hash, keypair)?;
        Ok(Self {
            from,
            to,
            data,
            last_transaction_hash: None,
            signature: signature.to_hex(),
        })
    }

    /// Builds the mint-signed coinbase transaction prepended to every
    /// mined block. `to` is the miner/forger's public key.
    pub fn coinbase(to: &PublicKey) -> Result<Self> {
        Self::new(to.clone(), TransactionData::MiningReward, mint_keypair())
    }

    /// `H(from || to || canonical(data))`, the payload the signature covers.
    fn signing_hash(from: &str, to: &str, data: &TransactionData) -> Result<Hash256> {
        let data_json = serde_json::to_vec(data)?;
        Ok(Hash256::hash_fields(&[
            from.as_bytes(),
            to.as_bytes(),
            &data_json,
        ]))
    }

    /// Hash of the fully-formed transaction, used as its mempool dedup key
    /// and as the committed `txHash` index key.
    pub fn hash(&self) -> Result<Hash256> {
        Self::signing_hash(&self.from, &self.to, &self.data)
    }

    #[must_use]
    pub fn is_coinbase(&self) -> bool {
        matches!(self.data, TransactionData::MiningReward)
            && self.from == mint_keypair().public_key.to_hex()
    }

    #[must_use]
    pub fn is_coin_purchase(&self) -> bool {
        matches!(self.data, TransactionData::CoinPurchase { .. })
    }

    /// The account debited for this transaction's effect, if any. `None`
    /// for `MiningReward`/`Opaque` payloads, which have no sender-side debit.
    #[must_use]
    pub fn debits_from(&self) -> Option<(&str, Amount)> {
        let amount = self.data.debit_amount();
        if amount == 0 {
            None
        } else {
            Some((&self.from, amount))
        }
    }

    /// Validates the transaction in isolation (signature, amount, `from !=
    /// to` except for STAKE/self-payments). Sender-existence and balance
    /// checks require world-state and are performed by the caller (C4/C5).
    pub fn is_valid(&self) -> Result<()> {
        let self_payment_allowed = matches!(self.data, TransactionData::Stake { .. });
        if self.from == self.to && !self_payment_allowed {
            return Err(ChainError::InvalidTransaction(
                "from and to must differ except for STAKE or self-payments".into(),
            ));
        }

        let amount_required = matches!(
            self.data,
            TransactionData::CoinPurchase { .. }
                | TransactionData::Transfer { .. }
                | TransactionData::Stake { .. }
        );
        if amount_required && self.data.debit_amount() == 0 {
            return Err(ChainError::InvalidTransaction(
                "amount must be greater than zero".into(),
            ));
        }

        let from = PublicKey::from_hex(&self.from)?;
        let signature = Signature::from_hex(&self.signature)?;
        let hash = Self::signing_hash(&self.from, &self.to, &self.data)?;
        let ok = verify_transaction_signature(&hash, &from, &signature)?;
        if !ok {
            debug!(from = %self.from, "signature verification failed");
            return Err(ChainError::InvalidTransaction(
                "signature does not verify".into(),
            ));
        }
        Ok(())
    }
}
