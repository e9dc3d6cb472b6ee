//! What a session is on the wire: the authorized session key and the
//! credential attached to every session-signed transaction.

use std::fmt;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::credential::StandardCredential;
use crate::error::AuthError;

/// Milliseconds since the Unix epoch, serialized as a decimal string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis().max(0) as u64)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn saturating_add(&self, duration: Duration) -> Self {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(millis))
    }

    /// Time from `earlier` to `self`, zero if `earlier` is later.
    pub fn saturating_duration_since(&self, earlier: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match i64::try_from(self.0).ok().and_then(|ms| Utc.timestamp_millis_opt(ms).single()) {
            Some(at) => write!(f, "{}", at.to_rfc3339()),
            None => write!(f, "{}ms", self.0),
        }
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<u64>().map(Timestamp).map_err(de::Error::custom)
    }
}

/// The session key a credential authorizes, and until when.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub expire_at: Timestamp,
    /// Compressed secp256k1 public key.
    #[serde(with = "crate::encoding::base64_array")]
    pub session_key: [u8; 33],
}

impl SessionInfo {
    /// The bytes a credential signs: compact JSON, keys in alphabetical order.
    pub fn sign_bytes(&self) -> Result<Vec<u8>, AuthError> {
        Ok(serde_json::to_vec(&serde_json::to_value(self)?)?)
    }
}

/// Attached to every transaction signed with a session key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCredential {
    pub session_info: SessionInfo,
    /// Session key signature over the transaction's sign bytes.
    #[serde(with = "crate::encoding::base64_array")]
    pub session_signature: [u8; 64],
    /// The long-lived credential's signature over `session_info`.
    pub authorization: StandardCredential,
}

/// How a transaction is authenticated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxCredential {
    Standard(StandardCredential),
    Session(SessionCredential),
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    #[test]
    fn test_sign_bytes_are_sorted_compact_json() {
        let info = SessionInfo {
            session_key: [0x02; 33],
            expire_at: Timestamp::from_millis(1_700_000_000_000),
        };
        let bytes = info.sign_bytes().unwrap();
        let expected = format!(
            r#"{{"expire_at":"1700000000000","session_key":"{}"}}"#,
            STANDARD.encode([0x02u8; 33])
        );
        assert_eq!(String::from_utf8(bytes).unwrap(), expected);
    }

    #[test]
    fn test_timestamp_arithmetic() {
        let t = Timestamp::from_millis(1_000);
        let later = t.saturating_add(Duration::from_secs(2));
        assert_eq!(later.as_millis(), 3_000);
        assert_eq!(later.saturating_duration_since(t), Duration::from_secs(2));
        assert_eq!(t.saturating_duration_since(later), Duration::ZERO);
        assert_eq!(
            Timestamp::from_millis(u64::MAX - 1).saturating_add(Duration::from_secs(1)).as_millis(),
            u64::MAX
        );
    }

    #[test]
    fn test_timestamp_rejects_numbers() {
        assert!(serde_json::from_str::<Timestamp>("1000").is_err());
        assert_eq!(
            serde_json::from_str::<Timestamp>("\"1000\"").unwrap(),
            Timestamp::from_millis(1000)
        );
    }

    #[test]
    fn test_timestamp_display_is_rfc3339() {
        assert_eq!(Timestamp::from_millis(0).to_string(), "1970-01-01T00:00:00+00:00");
    }
}
