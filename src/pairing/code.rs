//! The scannable pairing code: `authlink-pair:v1:<channel-id>`

use std::fmt;
use std::str::FromStr;

use crate::error::AuthError;
use crate::relay::ChannelId;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PairingCode {
    channel: ChannelId,
}

impl PairingCode {
    pub const PREFIX: &'static str = "authlink-pair:v1:";

    pub fn new(channel: ChannelId) -> Self {
        Self { channel }
    }

    pub fn channel_id(&self) -> &ChannelId {
        &self.channel
    }
}

impl fmt::Display for PairingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", Self::PREFIX, self.channel)
    }
}

impl FromStr for PairingCode {
    type Err = AuthError;

    /// A code that does not parse cannot lead anywhere: the requester has to
    /// show a new one.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s
            .trim()
            .strip_prefix(Self::PREFIX)
            .ok_or_else(|| AuthError::PairingAborted(format!("not a pairing code: '{}'", s)))?;
        let channel = ChannelId::parse(id).map_err(|e| AuthError::PairingAborted(e.to_string()))?;
        Ok(Self { channel })
    }
}
