//! Domain types shared by the escrow ledger, chain adapters and the coordinator

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;

/// Identifier of a chain (e.g. "ethereum", "polkadot")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub String);

impl ChainId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Account identity on a chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The null identity: empty, or a hex address made only of zeroes
    pub fn is_null(&self) -> bool {
        let trimmed = self.0.trim();
        let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        digits.is_empty() || digits.chars().all(|c| c == '0')
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to an asset (symbol or collection) on a chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetRef(pub String);

impl AssetRef {
    pub fn new(asset: impl Into<String>) -> Self {
        Self(asset.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-chain escrow identifier, allocated by the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EscrowId(pub u64);

impl fmt::Display for EscrowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! bytes32_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            pub fn from_slice(bytes: &[u8]) -> Option<Self> {
                let arr: [u8; 32] = bytes.try_into().ok()?;
                Some(Self(arr))
            }
        }

        impl FromStr for $name {
            type Err = hex::FromHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let mut out = [0u8; 32];
                hex::decode_to_slice(s.trim_start_matches("0x"), &mut out)?;
                Ok(Self(out))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(de::Error::custom)
            }
        }
    };
}

bytes32_type!(
    /// Keccak-256 commitment to a secret
    SecretHash
);

impl fmt::Debug for SecretHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretHash({})", self.to_hex())
    }
}

impl fmt::Display for SecretHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

bytes32_type!(
    /// HTLC preimage
    Secret
);

impl Secret {
    pub fn hash(&self) -> SecretHash {
        let digest = Keccak256::digest(self.0);
        SecretHash(digest.into())
    }

    /// Whether this preimage opens the given commitment
    pub fn matches(&self, hash: &SecretHash) -> bool {
        self.hash() == *hash
    }
}

// Never print the preimage itself
impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(hash={})", self.hash().to_hex())
    }
}

/// Value locked in an escrow: a fungible amount or a single token id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EscrowValue {
    Amount {
        #[serde(with = "decimal")]
        amount: u128,
    },
    TokenId {
        #[serde(with = "decimal")]
        token_id: u128,
    },
}

impl EscrowValue {
    pub fn amount(amount: u128) -> Self {
        EscrowValue::Amount { amount }
    }

    pub fn token(token_id: u128) -> Self {
        EscrowValue::TokenId { token_id }
    }

    pub fn is_zero_amount(&self) -> bool {
        matches!(self, EscrowValue::Amount { amount: 0 })
    }
}

/// Escrow lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscrowState {
    Created,
    Funded,
    Completed,
    Cancelled,
}

impl EscrowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EscrowState::Completed | EscrowState::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EscrowState::Created => "created",
            EscrowState::Funded => "funded",
            EscrowState::Completed => "completed",
            EscrowState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for EscrowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One escrow instance as stored by its chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escrow {
    pub id: EscrowId,
    pub secret_hash: SecretHash,
    pub creator: AccountId,
    pub beneficiary: AccountId,
    pub asset: AssetRef,
    pub value: EscrowValue,
    /// Unix seconds after which the creator may cancel a funded escrow
    pub timelock_expiry: u64,
    pub state: EscrowState,
    /// Unix seconds
    pub created_at: u64,
    /// Preimage published by completion
    pub secret: Option<Secret>,
}

/// Serde helper: u128 as a decimal string, accepting JSON numbers on input
pub mod decimal {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Number(u64),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Text(s) => s
                .trim()
                .parse::<u128>()
                .map_err(|e| de::Error::custom(format!("invalid decimal amount {:?}: {}", s, e))),
            Repr::Number(n) => Ok(n as u128),
        }
    }
}
