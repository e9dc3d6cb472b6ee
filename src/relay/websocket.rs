//! Websocket relay client
//!
//! - `GET {base}/channel` opens a channel; the relay's first text frame is
//!   `{"channel_id":"<id>"}`.
//! - `GET {base}/channel/{id}` joins one (404 unknown, 409 full).
//!
//! After that every text frame is a peer's frame.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::transport::{ChannelId, RelayClient, RelayConnection};
use crate::config::PairingConfig;
use super::RelayError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// First frame on a freshly opened channel.
#[derive(Deserialize)]
pub(crate) struct ChannelAssigned {
    pub(crate) channel_id: ChannelId,
}

pub struct WsRelayClient {
    base_url: String,
}

impl WsRelayClient {
    /// `base_url` is the relay's `ws://` or `wss://` root.
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// A client for the configured relay.
    pub fn from_config(config: &PairingConfig) -> Self {
        Self::new(&config.relay_url)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn connect(&self, url: &str, channel: Option<&ChannelId>) -> Result<WsStream, RelayError> {
        match connect_async(url).await {
            Ok((stream, _response)) => Ok(stream),
            Err(tungstenite::Error::Http(response)) => {
                let id = channel.map(|c| c.to_string()).unwrap_or_default();
                match response.status().as_u16() {
                    404 => Err(RelayError::ChannelNotFound(id)),
                    409 => Err(RelayError::ChannelFull(id)),
                    status => Err(RelayError::ConnectionError(format!(
                        "{} answered with status {}",
                        url, status
                    ))),
                }
            }
            Err(e) => Err(RelayError::ConnectionError(format!("{}: {}", url, e))),
        }
    }
}

#[async_trait]
impl RelayClient for WsRelayClient {
    async fn open(&self) -> Result<Box<dyn RelayConnection>, RelayError> {
        let url = format!("{}/channel", self.base_url);
        let stream = self.connect(&url, None).await?;
        let (sink, mut stream) = stream.split();

        let first = next_text(&mut stream).await?;
        let assigned: ChannelAssigned = serde_json::from_str(&first)
            .map_err(|e| RelayError::ProtocolError(format!("expected channel assignment: {}", e)))?;
        log::debug!("Relay assigned channel {}", assigned.channel_id);

        Ok(Box::new(WsRelayConnection::new(assigned.channel_id, sink, stream)))
    }

    async fn join(&self, channel: &ChannelId) -> Result<Box<dyn RelayConnection>, RelayError> {
        let url = format!("{}/channel/{}", self.base_url, channel);
        let stream = self.connect(&url, Some(channel)).await?;
        let (sink, stream) = stream.split();
        Ok(Box::new(WsRelayConnection::new(channel.clone(), sink, stream)))
    }
}

/// Next text frame, skipping control and binary frames.
async fn next_text(stream: &mut SplitStream<WsStream>) -> Result<String, RelayError> {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => return Ok(text),
            Ok(Message::Close(_)) => return Err(RelayError::Disconnected),
            Ok(_) => continue,
            Err(e) => {
                log::debug!("Relay stream error: {}", e);
                return Err(RelayError::Disconnected);
            }
        }
    }
    Err(RelayError::Disconnected)
}

pub struct WsRelayConnection {
    channel_id: ChannelId,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
    connected: AtomicBool,
}

impl WsRelayConnection {
    fn new(channel_id: ChannelId, sink: SplitSink<WsStream, Message>, stream: SplitStream<WsStream>) -> Self {
        Self {
            channel_id,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            connected: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl RelayConnection for WsRelayConnection {
    fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    async fn send(&self, frame: &str) -> Result<(), RelayError> {
        if !self.is_connected() {
            return Err(RelayError::Disconnected);
        }
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(frame.to_string())).await.map_err(|e| {
            self.connected.store(false, Ordering::SeqCst);
            RelayError::ConnectionError(e.to_string())
        })
    }

    async fn recv(&self) -> Result<String, RelayError> {
        if !self.is_connected() {
            return Err(RelayError::Disconnected);
        }
        let mut stream = self.stream.lock().await;
        let result = next_text(&mut stream).await;
        if result.is_err() {
            self.connected.store(false, Ordering::SeqCst);
        }
        result
    }

    async fn close(&self) -> Result<(), RelayError> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let mut sink = self.sink.lock().await;
        sink.send(Message::Close(None))
            .await
            .map_err(|e| RelayError::ConnectionError(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
