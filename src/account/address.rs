//! Deterministic account addresses.
//!
//! An address is a pure function of the factory (deployer) address, the
//! account type's code hash and the salt; it can be computed before the
//! account exists on the ledger.

use std::fmt;
use std::str::FromStr;

use ripemd::Ripemd160;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::AuthError;
use crate::identity::Hash256;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; 20]);

impl Address {
    pub const LENGTH: usize = 20;
    pub const PREFIX: &'static str = "0x";

    pub const fn from_array(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

/// `RIPEMD-160(SHA-256(deployer ‖ code_hash ‖ salt))`.
///
/// Total: any salt, including an empty one, yields an address.
pub fn derive_address(deployer: &Address, code_hash: &Hash256, salt: &[u8]) -> Address {
    let mut hasher = Sha256::new();
    hasher.update(deployer.as_bytes());
    hasher.update(code_hash.as_bytes());
    hasher.update(salt);
    let inner = hasher.finalize();
    Address(Ripemd160::digest(inner).into())
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", Self::PREFIX, hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix(Self::PREFIX).ok_or_else(|| {
            AuthError::InvalidKeyMaterial(format!("address '{}' is missing the 0x prefix", s))
        })?;
        let bytes = hex::decode(digits).map_err(|e| AuthError::InvalidKeyMaterial(e.to_string()))?;
        let bytes: [u8; 20] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            AuthError::InvalidKeyMaterial(format!("address must be 20 bytes, got {}", bytes.len()))
        })?;
        Ok(Address(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
