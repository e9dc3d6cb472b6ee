//! Serde helpers for the wire encodings used by the ledger and the relay.
//!
//! Curve keys and signatures travel as standard (padded) base64, durations in
//! configuration files as whole seconds.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// `Vec<u8>` as a base64 string.
pub mod base64_bytes {
    use super::*;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.as_bytes()).map_err(de::Error::custom)
    }
}

/// `[u8; N]` as a base64 string; the decoded length must be exactly `N`.
pub mod base64_array {
    use super::*;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u8; N], D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = STANDARD
            .decode(encoded.as_bytes())
            .map_err(de::Error::custom)?;
        bytes.try_into().map_err(|bytes: Vec<u8>| {
            de::Error::custom(format!("expected {} bytes, got {}", N, bytes.len()))
        })
    }
}

/// `std::time::Duration` as whole seconds.
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

/// Encode bytes as standard base64.
pub fn to_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Sample {
        #[serde(with = "super::base64_array")]
        fixed: [u8; 4],
        #[serde(with = "super::base64_bytes")]
        var: Vec<u8>,
        #[serde(with = "super::duration_secs")]
        ttl: Duration,
    }

    #[test]
    fn test_sample_json_shape() {
        let sample = Sample {
            fixed: [1, 2, 3, 4],
            var: b"hi".to_vec(),
            ttl: Duration::from_secs(90),
        };
        let json = serde_json::to_string(&sample).unwrap();
        assert_eq!(json, r#"{"fixed":"AQIDBA==","var":"aGk=","ttl":90}"#);
        let back: Sample = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sample);
    }

    #[test]
    fn test_fixed_array_rejects_wrong_length() {
        let json = r#"{"fixed":"AQID","var":"","ttl":1}"#;
        let err = serde_json::from_str::<Sample>(json).unwrap_err();
        assert!(err.to_string().contains("expected 4 bytes, got 3"));
    }
}
