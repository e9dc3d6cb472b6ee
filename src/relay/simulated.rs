//! In-process relay
//!
//! A shared hub where simulated devices open and join channels entirely
//! in-process. Used for integration testing and the pairing demo without a
//! relay server. Knobs for latency, duplicate delivery and dropping a
//! channel let tests reproduce relay misbehaviour.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use uuid::Uuid;

use super::transport::{ChannelId, RelayClient, RelayConnection};
use super::{RelayError, MAX_CHANNEL_BACKLOG, MAX_PEERS_PER_CHANNEL};

struct SimPeer {
    id: Uuid,
    tx: mpsc::UnboundedSender<String>,
}

#[derive(Default)]
struct SimChannel {
    peers: Vec<SimPeer>,
    /// Frames sent while the sender was alone, for the peer that joins.
    backlog: Vec<String>,
}

/// The simulated relay shared by every client created from it.
pub struct SimRelay {
    channels: Mutex<HashMap<ChannelId, SimChannel>>,
    /// Deliver every frame twice.
    duplicate_delivery: AtomicBool,
    /// Applied to each send().
    latency: Mutex<Duration>,
}

impl SimRelay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            channels: Mutex::new(HashMap::new()),
            duplicate_delivery: AtomicBool::new(false),
            latency: Mutex::new(Duration::ZERO),
        })
    }

    pub fn client(self: &Arc<Self>) -> SimRelayClient {
        SimRelayClient {
            relay: Arc::clone(self),
        }
    }

    pub fn set_duplicate_delivery(&self, enabled: bool) {
        self.duplicate_delivery.store(enabled, Ordering::SeqCst);
    }

    /// Uses tokio time, so paused clocks advance instantly in tests.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(|p| p.into_inner()) = latency;
    }

    /// Tear a channel down under its peers, as a relay restart would.
    pub fn drop_channel(&self, channel: &ChannelId) {
        if self.channels().remove(channel).is_some() {
            log::debug!("Simulated relay dropped channel {}", channel);
        }
    }

    pub fn peer_count(&self, channel: &ChannelId) -> usize {
        self.channels().get(channel).map_or(0, |ch| ch.peers.len())
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<ChannelId, SimChannel>> {
        self.channels.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn attach(self: &Arc<Self>, channel: ChannelId, create: bool) -> Result<SimRelayConnection, RelayError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let peer_id = Uuid::new_v4();
        {
            let mut channels = self.channels();
            let ch = if create {
                channels.entry(channel.clone()).or_default()
            } else {
                channels
                    .get_mut(&channel)
                    .ok_or_else(|| RelayError::ChannelNotFound(channel.to_string()))?
            };
            if ch.peers.len() >= MAX_PEERS_PER_CHANNEL {
                return Err(RelayError::ChannelFull(channel.to_string()));
            }
            for frame in ch.backlog.drain(..) {
                let _ = tx.send(frame);
            }
            ch.peers.push(SimPeer { id: peer_id, tx });
        }

        Ok(SimRelayConnection {
            channel_id: channel,
            peer_id,
            relay: Arc::clone(self),
            rx: AsyncMutex::new(rx),
            connected: AtomicBool::new(true),
        })
    }

    /// A channel serves one exchange: when either peer leaves, it is torn
    /// down and the remaining peer sees a disconnect.
    fn detach(&self, channel: &ChannelId, peer_id: Uuid) {
        let mut channels = self.channels();
        let member = channels
            .get(channel)
            .map_or(false, |ch| ch.peers.iter().any(|peer| peer.id == peer_id));
        if member {
            channels.remove(channel);
        }
    }
}

pub struct SimRelayClient {
    relay: Arc<SimRelay>,
}

#[async_trait]
impl RelayClient for SimRelayClient {
    async fn open(&self) -> Result<Box<dyn RelayConnection>, RelayError> {
        Ok(Box::new(self.relay.attach(ChannelId::generate(), true)?))
    }

    async fn join(&self, channel: &ChannelId) -> Result<Box<dyn RelayConnection>, RelayError> {
        Ok(Box::new(self.relay.attach(channel.clone(), false)?))
    }
}

pub struct SimRelayConnection {
    channel_id: ChannelId,
    peer_id: Uuid,
    relay: Arc<SimRelay>,
    rx: AsyncMutex<mpsc::UnboundedReceiver<String>>,
    connected: AtomicBool,
}

#[async_trait]
impl RelayConnection for SimRelayConnection {
    fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    async fn send(&self, frame: &str) -> Result<(), RelayError> {
        if !self.is_connected() {
            return Err(RelayError::Disconnected);
        }
        let latency = *self.relay.latency.lock().unwrap_or_else(|p| p.into_inner());
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let copies = if self.relay.duplicate_delivery.load(Ordering::SeqCst) { 2 } else { 1 };
        let mut channels = self.relay.channels();
        let ch = channels.get_mut(&self.channel_id).ok_or(RelayError::Disconnected)?;
        if ch.peers.iter().all(|peer| peer.id == self.peer_id) {
            if ch.backlog.len() < MAX_CHANNEL_BACKLOG {
                ch.backlog.push(frame.to_string());
            } else {
                log::warn!("Backlog of {} full, dropping frame", self.channel_id);
            }
            return Ok(());
        }
        for peer in ch.peers.iter().filter(|peer| peer.id != self.peer_id) {
            for _ in 0..copies {
                // A peer whose receiver is gone is leaving; skip it.
                let _ = peer.tx.send(frame.to_string());
            }
        }
        Ok(())
    }

    async fn recv(&self) -> Result<String, RelayError> {
        if !self.is_connected() {
            return Err(RelayError::Disconnected);
        }
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(frame) => Ok(frame),
            None => {
                self.connected.store(false, Ordering::SeqCst);
                Err(RelayError::Disconnected)
            }
        }
    }

    async fn close(&self) -> Result<(), RelayError> {
        self.connected.store(false, Ordering::SeqCst);
        self.relay.detach(&self.channel_id, self.peer_id);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for SimRelayConnection {
    fn drop(&mut self) {
        self.relay.detach(&self.channel_id, self.peer_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_join_exchange() {
        let relay = SimRelay::new();
        let client = relay.client();

        let a = client.open().await.unwrap();
        let b = client.join(a.channel_id()).await.unwrap();
        assert_eq!(relay.peer_count(a.channel_id()), 2);

        a.send("hello").await.unwrap();
        assert_eq!(b.recv().await.unwrap(), "hello");
        b.send("back").await.unwrap();
        assert_eq!(a.recv().await.unwrap(), "back");
    }

    #[tokio::test]
    async fn test_frames_sent_alone_reach_the_joiner() {
        let relay = SimRelay::new();
        let client = relay.client();

        let a = client.open().await.unwrap();
        a.send("early").await.unwrap();
        a.send("second").await.unwrap();
        let b = client.join(a.channel_id()).await.unwrap();
        assert_eq!(b.recv().await.unwrap(), "early");
        assert_eq!(b.recv().await.unwrap(), "second");
    }

    #[tokio::test]
    async fn test_join_unknown_and_full() {
        let relay = SimRelay::new();
        let client = relay.client();

        let missing = client.join(&ChannelId::generate()).await;
        assert!(matches!(missing, Err(RelayError::ChannelNotFound(_))));

        let a = client.open().await.unwrap();
        let _b = client.join(a.channel_id()).await.unwrap();
        let third = client.join(a.channel_id()).await;
        assert!(matches!(third, Err(RelayError::ChannelFull(_))));
    }

    #[tokio::test]
    async fn test_duplicate_delivery() {
        let relay = SimRelay::new();
        relay.set_duplicate_delivery(true);
        let client = relay.client();

        let a = client.open().await.unwrap();
        let b = client.join(a.channel_id()).await.unwrap();
        a.send("once").await.unwrap();
        assert_eq!(b.recv().await.unwrap(), "once");
        assert_eq!(b.recv().await.unwrap(), "once");
    }

    #[tokio::test]
    async fn test_dropped_channel_disconnects_peers() {
        let relay = SimRelay::new();
        let client = relay.client();

        let a = client.open().await.unwrap();
        let b = client.join(a.channel_id()).await.unwrap();
        relay.drop_channel(a.channel_id());

        assert_eq!(b.recv().await.unwrap_err(), RelayError::Disconnected);
        assert!(!b.is_connected());
        assert_eq!(a.send("lost").await.unwrap_err(), RelayError::Disconnected);
    }

    #[tokio::test]
    async fn test_peer_leaving_tears_down_channel() {
        let relay = SimRelay::new();
        let client = relay.client();

        let a = client.open().await.unwrap();
        let id = a.channel_id().clone();
        let b = client.join(&id).await.unwrap();

        b.close().await.unwrap();
        assert_eq!(relay.peer_count(&id), 0);
        assert_eq!(a.recv().await.unwrap_err(), RelayError::Disconnected);
        assert!(client.join(&id).await.is_err());
    }

    #[tokio::test]
    async fn test_dropping_connection_leaves_channel() {
        let relay = SimRelay::new();
        let client = relay.client();

        let a = client.open().await.unwrap();
        let id = a.channel_id().clone();
        drop(a);
        assert_eq!(relay.peer_count(&id), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_uses_tokio_time() {
        let relay = SimRelay::new();
        relay.set_latency(Duration::from_millis(250));
        let client = relay.client();

        let a = client.open().await.unwrap();
        let b = client.join(a.channel_id()).await.unwrap();
        let start = tokio::time::Instant::now();
        a.send("slow").await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(250));
        assert_eq!(b.recv().await.unwrap(), "slow");
    }
}
