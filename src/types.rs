//! Identifier and number types shared by the stores and the epoch service
//!
//! - [`VaultId`]: canonical (lowercase) vault address
//! - [`EpochNumber`]: arbitrary-precision epoch counter
//! - [`decimal`]: serde helpers that keep big integers as decimal strings

use std::fmt;
use std::str::FromStr;

use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::EpochError;

/// Lowercase an address so comparisons are case-insensitive
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

/// Canonical vault identifier.
///
/// Always lowercase, never empty, never contains the `:` key separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VaultId(String);

impl VaultId {
    pub fn parse(raw: &str) -> Result<Self, EpochError> {
        let canonical = normalize_address(raw);
        if canonical.is_empty() {
            return Err(EpochError::InvalidInput("vaultId cannot be empty".to_string()));
        }
        if canonical.contains(':') || canonical.chars().any(char::is_whitespace) {
            return Err(EpochError::InvalidInput(format!(
                "vaultId {:?} contains a reserved character",
                raw
            )));
        }
        Ok(Self(canonical))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for VaultId {
    type Err = EpochError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VaultId {
    type Error = EpochError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<VaultId> for String {
    fn from(vault: VaultId) -> Self {
        vault.0
    }
}

impl AsRef<str> for VaultId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VaultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Epoch counter. Ordered numerically, encoded as a decimal string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EpochNumber(BigUint);

impl EpochNumber {
    pub fn new(value: BigUint) -> Self {
        Self(value)
    }

    pub fn zero() -> Self {
        Self(BigUint::zero())
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn as_biguint(&self) -> &BigUint {
        &self.0
    }

    pub fn into_inner(self) -> BigUint {
        self.0
    }

    pub fn to_u64(&self) -> Option<u64> {
        self.0.to_u64()
    }
}

impl From<u64> for EpochNumber {
    fn from(value: u64) -> Self {
        Self(BigUint::from(value))
    }
}

impl From<BigUint> for EpochNumber {
    fn from(value: BigUint) -> Self {
        Self(value)
    }
}

impl FromStr for EpochNumber {
    type Err = EpochError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decimal::parse(s)
            .map(Self)
            .map_err(|msg| EpochError::InvalidInput(format!("invalid epoch number: {}", msg)))
    }
}

impl fmt::Display for EpochNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl Serialize for EpochNumber {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        decimal::serialize(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for EpochNumber {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        decimal::deserialize(deserializer).map(Self)
    }
}

/// Serde adapter for `BigUint` fields: written as a decimal string, read
/// from either a decimal string or a JSON integer.
pub mod decimal {
    use std::fmt;

    use num_bigint::BigUint;
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};

    pub fn parse(s: &str) -> Result<BigUint, String> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("{:?} is not a non-negative decimal integer", s));
        }
        trimmed
            .parse::<BigUint>()
            .map_err(|e| format!("{:?}: {}", s, e))
    }

    pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
        struct DecimalVisitor;

        impl<'de> Visitor<'de> for DecimalVisitor {
            type Value = BigUint;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a non-negative integer or decimal string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<BigUint, E> {
                Ok(BigUint::from(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<BigUint, E> {
                u64::try_from(v)
                    .map(BigUint::from)
                    .map_err(|_| E::custom(format!("negative value {}", v)))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<BigUint, E> {
                parse(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(DecimalVisitor)
    }
}
