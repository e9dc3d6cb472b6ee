//! Websocket relay hub
//!
//! Serves the two routes `WsRelayClient` speaks: `GET /channel` opens a
//! channel and announces its id, `GET /channel/{id}` joins one. Text frames
//! are forwarded verbatim to the other peer, or held for it while the
//! sender is alone. The hub never inspects them.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;
use warp::http::StatusCode;
use warp::ws::{Message, WebSocket, Ws};
use warp::{Filter, Rejection, Reply};

use super::transport::ChannelId;
use super::{RelayError, MAX_CHANNEL_BACKLOG, MAX_PEERS_PER_CHANNEL};

struct HubPeer {
    id: Uuid,
    tx: mpsc::UnboundedSender<Message>,
}

#[derive(Default)]
struct HubChannel {
    peers: Vec<HubPeer>,
    backlog: Vec<Message>,
}

#[derive(Default)]
pub struct RelayHub {
    channels: RwLock<HashMap<ChannelId, HubChannel>>,
}

impl RelayHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    async fn can_join(&self, channel: &ChannelId) -> Result<(), RelayError> {
        let channels = self.channels.read().await;
        match channels.get(channel) {
            None => Err(RelayError::ChannelNotFound(channel.to_string())),
            Some(ch) if ch.peers.len() >= MAX_PEERS_PER_CHANNEL => {
                Err(RelayError::ChannelFull(channel.to_string()))
            }
            Some(_) => Ok(()),
        }
    }

    async fn register(
        &self,
        channel: &ChannelId,
        peer: HubPeer,
        create: bool,
    ) -> Result<(), RelayError> {
        let mut channels = self.channels.write().await;
        let ch = if create {
            channels.entry(channel.clone()).or_default()
        } else {
            channels
                .get_mut(channel)
                .ok_or_else(|| RelayError::ChannelNotFound(channel.to_string()))?
        };
        // Re-checked here: two joins can both pass `can_join` before either
        // upgrade completes.
        if ch.peers.len() >= MAX_PEERS_PER_CHANNEL {
            return Err(RelayError::ChannelFull(channel.to_string()));
        }
        for message in ch.backlog.drain(..) {
            let _ = peer.tx.send(message);
        }
        ch.peers.push(peer);
        Ok(())
    }

    /// Any peer leaving ends the exchange; dropping the channel drops every
    /// peer's sender, which closes their sockets.
    async fn unregister(&self, channel: &ChannelId, peer_id: Uuid) {
        let mut channels = self.channels.write().await;
        let member = channels
            .get(channel)
            .map_or(false, |ch| ch.peers.iter().any(|peer| peer.id == peer_id));
        if member {
            channels.remove(channel);
            log::debug!("Relay channel {} closed", channel);
        }
    }

    async fn forward(&self, channel: &ChannelId, from: Uuid, message: Message) {
        let mut channels = self.channels.write().await;
        let Some(ch) = channels.get_mut(channel) else {
            return;
        };
        if ch.peers.iter().all(|peer| peer.id == from) {
            if ch.backlog.len() < MAX_CHANNEL_BACKLOG {
                ch.backlog.push(message);
            } else {
                log::warn!("Backlog of {} full, dropping frame", channel);
            }
            return;
        }
        for peer in ch.peers.iter().filter(|peer| peer.id != from) {
            let _ = peer.tx.send(message.clone());
        }
    }
}

fn with_hub(hub: Arc<RelayHub>) -> impl Filter<Extract = (Arc<RelayHub>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || Arc::clone(&hub))
}

pub fn routes(hub: Arc<RelayHub>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let open = warp::path("channel")
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_hub(Arc::clone(&hub)))
        .map(|ws: Ws, hub: Arc<RelayHub>| {
            ws.on_upgrade(move |socket| serve_peer(hub, socket, ChannelId::generate(), true))
        });

    let join = warp::path("channel")
        .and(warp::path::param::<String>())
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_hub(hub))
        .and_then(handle_join);

    open.or(join)
}

async fn handle_join(id: String, ws: Ws, hub: Arc<RelayHub>) -> Result<Box<dyn Reply>, Rejection> {
    let channel = match ChannelId::parse(&id) {
        Ok(channel) => channel,
        Err(e) => return Ok(error_reply(StatusCode::BAD_REQUEST, &e)),
    };
    match hub.can_join(&channel).await {
        Ok(()) => Ok(Box::new(
            ws.on_upgrade(move |socket| serve_peer(hub, socket, channel, false)),
        )),
        Err(e @ RelayError::ChannelNotFound(_)) => Ok(error_reply(StatusCode::NOT_FOUND, &e)),
        Err(e) => Ok(error_reply(StatusCode::CONFLICT, &e)),
    }
}

fn error_reply(status: StatusCode, error: &RelayError) -> Box<dyn Reply> {
    let body = warp::reply::json(&serde_json::json!({ "error": error.to_string() }));
    Box::new(warp::reply::with_status(body, status))
}

async fn serve_peer(hub: Arc<RelayHub>, socket: WebSocket, channel: ChannelId, opened: bool) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let peer_id = Uuid::new_v4();

    let peer = HubPeer {
        id: peer_id,
        tx: tx.clone(),
    };
    if let Err(e) = hub.register(&channel, peer, opened).await {
        log::warn!("Refusing peer on {}: {}", channel, e);
        let _ = ws_tx.send(Message::close()).await;
        return;
    }
    if opened {
        let assigned = serde_json::json!({ "channel_id": channel }).to_string();
        let _ = tx.send(Message::text(assigned));
        log::info!("Opened relay channel {}", channel);
    }
    drop(tx);

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    while let Some(result) = ws_rx.next().await {
        match result {
            Ok(message) if message.is_text() => hub.forward(&channel, peer_id, message).await,
            Ok(message) if message.is_close() => break,
            Ok(_) => {}
            Err(e) => {
                log::debug!("Peer {} on {} errored: {}", peer_id, channel, e);
                break;
            }
        }
    }

    hub.unregister(&channel, peer_id).await;
    let _ = writer.await;
}

/// Bind the hub on `addr` (port 0 picks a free port) and serve it in the
/// background.
pub fn spawn(hub: Arc<RelayHub>, addr: SocketAddr) -> Result<(SocketAddr, JoinHandle<()>), RelayError> {
    let (bound, server) = warp::serve(routes(hub))
        .try_bind_ephemeral(addr)
        .map_err(|e| RelayError::ConnectionError(format!("bind {}: {}", addr, e)))?;
    log::info!("Relay listening on {}", bound);
    Ok((bound, tokio::spawn(server)))
}
