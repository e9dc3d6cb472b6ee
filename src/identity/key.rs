//! Public key material as the ledger sees it.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::AuthError;

/// Length of a SEC1-compressed curve point.
pub const COMPRESSED_KEY_LEN: usize = 33;

/// Length of an externally-held account address.
pub const ETH_ADDRESS_LEN: usize = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyAlgo {
    /// P-256, held by a platform authenticator (passkey).
    Secp256r1,
    Secp256k1,
    /// Address of an external wallet account.
    Ethereum,
}

impl KeyAlgo {
    /// Domain tag mixed into the key hash preimage.
    pub const fn hash_tag(self) -> u8 {
        match self {
            KeyAlgo::Secp256r1 => 0x01,
            KeyAlgo::Secp256k1 => 0x02,
            KeyAlgo::Ethereum => 0x03,
        }
    }

    /// Key-type discriminant written into account salts.
    pub const fn ledger_type(self) -> u8 {
        match self {
            KeyAlgo::Secp256r1 => 0,
            KeyAlgo::Secp256k1 => 1,
            KeyAlgo::Ethereum => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyAlgo::Secp256r1 => "secp256r1",
            KeyAlgo::Secp256k1 => "secp256k1",
            KeyAlgo::Ethereum => "ethereum",
        }
    }
}

impl fmt::Display for KeyAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyAlgo {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "secp256r1" | "p256" | "passkey" => Ok(KeyAlgo::Secp256r1),
            "secp256k1" | "k256" => Ok(KeyAlgo::Secp256k1),
            "ethereum" | "eth" => Ok(KeyAlgo::Ethereum),
            other => Err(AuthError::InvalidKeyMaterial(format!(
                "unknown key algorithm '{}'",
                other
            ))),
        }
    }
}

/// A public key or account address.
///
/// Curve keys are SEC1-compressed. Construction through [`Key::from_algo_bytes`]
/// checks lengths and the compression prefix; curve membership is checked when
/// a signature is verified against the key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    Secp256r1([u8; COMPRESSED_KEY_LEN]),
    Secp256k1([u8; COMPRESSED_KEY_LEN]),
    Ethereum([u8; ETH_ADDRESS_LEN]),
}

impl Key {
    pub fn from_algo_bytes(algo: KeyAlgo, bytes: &[u8]) -> Result<Self, AuthError> {
        match algo {
            KeyAlgo::Secp256r1 => Ok(Key::Secp256r1(compressed_point(algo, bytes)?)),
            KeyAlgo::Secp256k1 => Ok(Key::Secp256k1(compressed_point(algo, bytes)?)),
            KeyAlgo::Ethereum => {
                let address: [u8; ETH_ADDRESS_LEN] = bytes.try_into().map_err(|_| {
                    AuthError::InvalidKeyMaterial(format!(
                        "ethereum address must be {} bytes, got {}",
                        ETH_ADDRESS_LEN,
                        bytes.len()
                    ))
                })?;
                Ok(Key::Ethereum(address))
            }
        }
    }

    pub fn algo(&self) -> KeyAlgo {
        match self {
            Key::Secp256r1(_) => KeyAlgo::Secp256r1,
            Key::Secp256k1(_) => KeyAlgo::Secp256k1,
            Key::Ethereum(_) => KeyAlgo::Ethereum,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Key::Secp256r1(bytes) | Key::Secp256k1(bytes) => bytes,
            Key::Ethereum(bytes) => bytes,
        }
    }

    fn encoded_bytes(&self) -> String {
        match self {
            Key::Ethereum(bytes) => format!("0x{}", hex::encode(bytes)),
            other => STANDARD.encode(other.as_bytes()),
        }
    }

    fn decode_bytes(algo: KeyAlgo, encoded: &str) -> Result<Self, AuthError> {
        let bytes = match algo {
            KeyAlgo::Ethereum => {
                let digits = encoded.strip_prefix("0x").unwrap_or(encoded);
                hex::decode(digits).map_err(|e| AuthError::InvalidKeyMaterial(e.to_string()))?
            }
            _ => STANDARD
                .decode(encoded.as_bytes())
                .map_err(|e| AuthError::InvalidKeyMaterial(e.to_string()))?,
        };
        Key::from_algo_bytes(algo, &bytes)
    }
}

fn compressed_point(algo: KeyAlgo, bytes: &[u8]) -> Result<[u8; COMPRESSED_KEY_LEN], AuthError> {
    let point: [u8; COMPRESSED_KEY_LEN] = bytes.try_into().map_err(|_| {
        AuthError::InvalidKeyMaterial(format!(
            "{} key must be {} bytes compressed, got {}",
            algo,
            COMPRESSED_KEY_LEN,
            bytes.len()
        ))
    })?;
    if point[0] != 0x02 && point[0] != 0x03 {
        return Err(AuthError::InvalidKeyMaterial(format!(
            "{} key has prefix 0x{:02x}, expected a compressed point",
            algo, point[0]
        )));
    }
    Ok(point)
}

/// `secp256r1:<base64>`, `secp256k1:<base64>` or `ethereum:0x<hex>`.
impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algo(), self.encoded_bytes())
    }
}

/// Parses the `Display` form. Curve keys also accept hex after the colon,
/// which is what command-line users tend to have at hand.
impl FromStr for Key {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algo, body) = s.split_once(':').ok_or_else(|| {
            AuthError::InvalidKeyMaterial(format!("expected '<algo>:<bytes>', got '{}'", s))
        })?;
        let algo: KeyAlgo = algo.parse()?;
        if algo != KeyAlgo::Ethereum && body.len() == COMPRESSED_KEY_LEN * 2 {
            if let Ok(bytes) = hex::decode(body) {
                return Key::from_algo_bytes(algo, &bytes);
            }
        }
        Key::decode_bytes(algo, body)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum KeyRepr {
    Secp256r1(String),
    Secp256k1(String),
    Ethereum(String),
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let encoded = self.encoded_bytes();
        let repr = match self {
            Key::Secp256r1(_) => KeyRepr::Secp256r1(encoded),
            Key::Secp256k1(_) => KeyRepr::Secp256k1(encoded),
            Key::Ethereum(_) => KeyRepr::Ethereum(encoded),
        };
        repr.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (algo, encoded) = match KeyRepr::deserialize(deserializer)? {
            KeyRepr::Secp256r1(s) => (KeyAlgo::Secp256r1, s),
            KeyRepr::Secp256k1(s) => (KeyAlgo::Secp256k1, s),
            KeyRepr::Ethereum(s) => (KeyAlgo::Ethereum, s),
        };
        Key::decode_bytes(algo, &encoded).map_err(de::Error::custom)
    }
}

/// A 32-byte SHA-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    pub const LENGTH: usize = 32;

    pub const fn from_array(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self)
    }
}

impl FromStr for Hash256 {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex32(s).map(Self)
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Parse 64 hex digits (either case) into 32 bytes.
pub(crate) fn parse_hex32(s: &str) -> Result<[u8; 32], AuthError> {
    let bytes = hex::decode(s).map_err(|e| AuthError::InvalidKeyMaterial(e.to_string()))?;
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        AuthError::InvalidKeyMaterial(format!("expected 32 bytes, got {}", bytes.len()))
    })
}
