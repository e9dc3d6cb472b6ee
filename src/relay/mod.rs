//! Relay transport for pairing
//!
//! Two devices that cannot reach each other directly meet on a relay
//! channel: one opens it and shows the channel id (inside a pairing code),
//! the other joins it. Text frames sent by one peer reach the other; frames
//! sent before the other peer arrives are held for it.
//!
//! - `transport`: the `RelayClient` / `RelayConnection` traits
//! - `simulated`: in-process relay for tests and demos
//! - `websocket`: client for the websocket relay
//! - `server`: the websocket relay hub (warp)

pub mod server;
pub mod simulated;
pub mod transport;
pub mod websocket;

pub use server::RelayHub;
pub use simulated::SimRelay;
pub use transport::{ChannelId, RelayClient, RelayConnection};
pub use websocket::WsRelayClient;

use thiserror::Error;

/// A channel holds at most the requester and the signer.
pub const MAX_PEERS_PER_CHANNEL: usize = 2;

/// Frames held for the second peer while the first is alone on a channel.
pub const MAX_CHANNEL_BACKLOG: usize = 16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    #[error("Channel is full: {0}")]
    ChannelFull(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Peer disconnected")]
    Disconnected,
}
