//! Relay trait definitions and core types
//!
//! Both the in-process simulator and the websocket client conform to these
//! traits, so the pairing layer never knows which one it is talking over.

use std::fmt;

use async_trait::async_trait;
use serde::{de, Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use super::RelayError;

const MAX_CHANNEL_ID_LEN: usize = 64;

/// Identifier of a relay channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ChannelId(String);

impl ChannelId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accepts 1 to 64 characters of `[A-Za-z0-9-]`.
    pub fn parse(id: &str) -> Result<Self, RelayError> {
        let valid = !id.is_empty()
            && id.len() <= MAX_CHANNEL_ID_LEN
            && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid {
            return Err(RelayError::ProtocolError(format!("invalid channel id '{}'", id)));
        }
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for ChannelId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let id = String::deserialize(deserializer)?;
        ChannelId::parse(&id).map_err(de::Error::custom)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One peer's membership in a relay channel.
#[async_trait]
pub trait RelayConnection: Send + Sync {
    /// The channel this connection belongs to.
    fn channel_id(&self) -> &ChannelId;

    /// Send a text frame to the other peers of the channel.
    async fn send(&self, frame: &str) -> Result<(), RelayError>;

    /// Receive the next text frame from another peer.
    async fn recv(&self) -> Result<String, RelayError>;

    /// Leave the channel.
    async fn close(&self) -> Result<(), RelayError>;

    /// Check whether the connection is still usable.
    fn is_connected(&self) -> bool;
}

/// Opens and joins relay channels.
#[async_trait]
pub trait RelayClient: Send + Sync {
    /// Open a fresh channel and become its first peer.
    async fn open(&self) -> Result<Box<dyn RelayConnection>, RelayError>;

    /// Join an existing channel.
    async fn join(&self, channel: &ChannelId) -> Result<Box<dyn RelayConnection>, RelayError>;
}
