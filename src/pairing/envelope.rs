//! Pairing wire messages
//!
//! Every relay frame is one JSON envelope `{"id", "type", "payload"}`. The
//! reply to a request carries the request's `id` and `type`.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

use crate::credential::StandardCredential;
use crate::error::{AuthError, ErrorKind};
use crate::identity::Key;
use crate::session::SessionInfo;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnvelopeType {
    CreateSession,
    Cancel,
    /// Any type this version does not know; such envelopes are dropped.
    Unknown(String),
}

impl EnvelopeType {
    pub fn as_str(&self) -> &str {
        match self {
            EnvelopeType::CreateSession => "create-session",
            EnvelopeType::Cancel => "cancel",
            EnvelopeType::Unknown(other) => other,
        }
    }
}

impl fmt::Display for EnvelopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EnvelopeType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EnvelopeType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(match s.as_str() {
            "create-session" => EnvelopeType::CreateSession,
            "cancel" => EnvelopeType::Cancel,
            _ => EnvelopeType::Unknown(s),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PairingEnvelope {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: EnvelopeType,
    #[serde(default)]
    pub payload: Value,
}

impl PairingEnvelope {
    /// A new `create-session` request for `info`, with a fresh id.
    pub fn create_session(info: &SessionInfo) -> Result<Self, AuthError> {
        Ok(Self {
            id: Uuid::new_v4(),
            kind: EnvelopeType::CreateSession,
            payload: serde_json::to_value(info)?,
        })
    }

    pub fn reply(id: Uuid, reply: &CreateSessionReply) -> Result<Self, AuthError> {
        Ok(Self {
            id,
            kind: EnvelopeType::CreateSession,
            payload: serde_json::to_value(reply)?,
        })
    }

    pub fn cancel(id: Uuid) -> Self {
        Self {
            id,
            kind: EnvelopeType::Cancel,
            payload: Value::Null,
        }
    }

    pub fn to_frame(&self) -> Result<String, AuthError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_frame(frame: &str) -> Result<Self, AuthError> {
        Ok(serde_json::from_str(frame)?)
    }

    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, AuthError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// The signer's answer to a `create-session` request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateSessionReply {
    Authorized(SessionGrant),
    Rejected(RemoteRejection),
}

/// The signer's key and its signature over the requested session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionGrant {
    pub key: Key,
    pub authorization: StandardCredential,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRejection {
    pub kind: ErrorKind,
    pub message: String,
}

impl RemoteRejection {
    pub fn from_error(error: &AuthError) -> Self {
        let kind = error.kind();
        Self {
            kind,
            message: kind.user_message().to_string(),
        }
    }

    pub fn into_error(self) -> AuthError {
        AuthError::from_remote(self.kind, self.message)
    }
}
