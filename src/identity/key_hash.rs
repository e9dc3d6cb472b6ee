//! Key hashes: the stable identifier an account is keyed by.
//!
//! `KeyHash = SHA-256(tag ‖ identity)`, where the one-byte tag is the key
//! algorithm's domain separator and the identity is the credential id for
//! passkeys, the compressed key for secp256k1 keys and the address for
//! external wallets. The same key bytes under different algorithms never
//! collide.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use super::key::{parse_hex32, Key, KeyAlgo, COMPRESSED_KEY_LEN, ETH_ADDRESS_LEN};
use crate::error::AuthError;

/// Upper bound on platform credential ids (WebAuthn allows up to 1023 bytes).
pub const MAX_CREDENTIAL_ID_LEN: usize = 1023;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyHash([u8; 32]);

impl KeyHash {
    pub const LENGTH: usize = 32;

    pub const fn from_array(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hash a key whose identity is the key itself.
    ///
    /// Passkeys are identified by their credential id, not the public key,
    /// so they must go through [`hash`] with the id.
    pub fn of_key(key: &Key) -> Result<Self, AuthError> {
        match key {
            Key::Secp256r1(_) => Err(AuthError::InvalidKeyMaterial(
                "passkey key hashes are derived from the credential id".into(),
            )),
            other => hash(other.algo(), other.as_bytes()),
        }
    }
}

/// Derive the key hash for `identity` under `algo`.
pub fn hash(algo: KeyAlgo, identity: &[u8]) -> Result<KeyHash, AuthError> {
    let valid = match algo {
        KeyAlgo::Secp256r1 => !identity.is_empty() && identity.len() <= MAX_CREDENTIAL_ID_LEN,
        KeyAlgo::Secp256k1 => identity.len() == COMPRESSED_KEY_LEN,
        KeyAlgo::Ethereum => identity.len() == ETH_ADDRESS_LEN,
    };
    if !valid {
        return Err(AuthError::InvalidKeyMaterial(format!(
            "{} identity of {} bytes",
            algo,
            identity.len()
        )));
    }

    let mut hasher = Sha256::new();
    hasher.update([algo.hash_tag()]);
    hasher.update(identity);
    Ok(KeyHash(hasher.finalize().into()))
}

impl fmt::Display for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl fmt::Debug for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyHash({})", self)
    }
}

impl FromStr for KeyHash {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex32(s).map(KeyHash)
    }
}

impl Serialize for KeyHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for KeyHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
