//! Account salts.
//!
//! Two versioned modes exist and callers choose one explicitly:
//!
//! - `SaltInput::Seed`: `seed:u32 BE ‖ key_hash ‖ key_type ‖ key (zero-padded
//!   to 33 bytes)`, always 70 bytes. This is the registration mode.
//! - `SaltInput::Username`: `len:u8 ‖ username ‖ key_hash ‖ key_type ‖ key`.
//!
//! Both are pure and total: every input the types admit produces a salt.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::AuthError;
use crate::identity::key::COMPRESSED_KEY_LEN;
use crate::identity::{Key, KeyHash};

/// Width of the seed-mode salt.
pub const SEED_SALT_LEN: usize = 4 + KeyHash::LENGTH + 1 + COMPRESSED_KEY_LEN;

/// A validated username: 1 to 15 characters of `[a-z0-9_]`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Username(String);

impl Username {
    pub const MAX_LEN: usize = 15;

    pub fn new(name: impl Into<String>) -> Result<Self, AuthError> {
        let name = name.into();
        if name.is_empty() || name.len() > Self::MAX_LEN {
            return Err(AuthError::InvalidKeyMaterial(format!(
                "username must be 1 to {} characters, got {}",
                Self::MAX_LEN,
                name.len()
            )));
        }
        if let Some(c) = name
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_'))
        {
            return Err(AuthError::InvalidKeyMaterial(format!(
                "username contains '{}'; only a-z, 0-9 and _ are allowed",
                c
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Username({})", self.0)
    }
}

impl FromStr for Username {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Username::new(s)
    }
}

impl Serialize for Username {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Username {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Username::new(s).map_err(de::Error::custom)
    }
}

/// The discriminator that makes one key's accounts distinct.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaltInput {
    Seed(u32),
    Username(Username),
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct AccountSalt(Vec<u8>);

impl AccountSalt {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl fmt::Debug for AccountSalt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountSalt({})", hex::encode(&self.0))
    }
}

pub fn derive_salt(key: &Key, key_hash: &KeyHash, input: &SaltInput) -> AccountSalt {
    let key_bytes = key.as_bytes();
    let mut salt = Vec::with_capacity(SEED_SALT_LEN + Username::MAX_LEN);

    match input {
        SaltInput::Seed(seed) => {
            salt.extend_from_slice(&seed.to_be_bytes());
            salt.extend_from_slice(key_hash.as_bytes());
            salt.push(key.algo().ledger_type());
            salt.extend_from_slice(key_bytes);
            salt.resize(SEED_SALT_LEN, 0);
        }
        SaltInput::Username(username) => {
            // Username length is bounded by validation, so it fits a byte.
            salt.push(username.as_str().len() as u8);
            salt.extend_from_slice(username.as_str().as_bytes());
            salt.extend_from_slice(key_hash.as_bytes());
            salt.push(key.algo().ledger_type());
            salt.extend_from_slice(key_bytes);
        }
    }

    AccountSalt(salt)
}
