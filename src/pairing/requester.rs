//! Requester side: the device without a credential
//!
//! Opens a relay channel, shows its code, sends one `create-session` request
//! and waits (bounded) for the correlated reply. A background task reads the
//! channel and resolves pending requests by id; anything else is dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::code::PairingCode;
use super::envelope::{CreateSessionReply, EnvelopeType, PairingEnvelope, SessionGrant};
use crate::config::PairingConfig;
use crate::credential::verify::verify_standard;
use crate::credential::StandardCredential;
use crate::error::AuthError;
use crate::identity::{Key, KeyHash};
use crate::relay::{RelayClient, RelayConnection, RelayError};
use crate::session::{SessionAuthorizer, SessionInfo};

type Pending = Arc<Mutex<HashMap<Uuid, oneshot::Sender<CreateSessionReply>>>>;

fn lock(pending: &Pending) -> MutexGuard<'_, HashMap<Uuid, oneshot::Sender<CreateSessionReply>>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn aborted(error: RelayError) -> AuthError {
    AuthError::PairingAborted(error.to_string())
}

pub struct PairingRequester {
    connection: Arc<dyn RelayConnection>,
    code: PairingCode,
    config: PairingConfig,
    pending: Pending,
    /// A channel carries one attempt.
    used: AtomicBool,
    signer_key: Mutex<Option<Key>>,
    receiver: JoinHandle<()>,
}

impl PairingRequester {
    /// Open a fresh channel on `relay`.
    pub async fn open(relay: &dyn RelayClient, config: PairingConfig) -> Result<Self, AuthError> {
        let connection: Arc<dyn RelayConnection> = Arc::from(relay.open().await.map_err(aborted)?);
        let code = PairingCode::new(connection.channel_id().clone());
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let receiver = tokio::spawn(receive_loop(Arc::clone(&connection), Arc::clone(&pending)));
        log::info!("Pairing channel {} open", code.channel_id());

        Ok(Self {
            connection,
            code,
            config,
            pending,
            used: AtomicBool::new(false),
            signer_key: Mutex::new(None),
            receiver,
        })
    }

    /// The code to show to the signer.
    pub fn code(&self) -> &PairingCode {
        &self.code
    }

    /// The signer's key, once a session was authorized.
    pub fn signer_key(&self) -> Option<Key> {
        self.signer_key.lock().ok().and_then(|key| key.clone())
    }

    /// Ask the signer to authorize `info`.
    ///
    /// Fails with `PairingAborted` when the relay drops or no reply arrives
    /// within the response timeout. Dropping the future sends a `cancel`.
    pub async fn request_session(&self, info: &SessionInfo) -> Result<StandardCredential, AuthError> {
        if self.used.swap(true, Ordering::SeqCst) {
            return Err(AuthError::PairingAborted(
                "this pairing channel was already used; open a new one".into(),
            ));
        }

        let request = PairingEnvelope::create_session(info)?;
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(request.id, tx);
        let guard = CancelGuard {
            connection: Arc::clone(&self.connection),
            pending: Arc::clone(&self.pending),
            id: request.id,
            armed: true,
        };

        self.connection.send(&request.to_frame()?).await.map_err(aborted)?;
        log::debug!("Sent create-session {} on {}", request.id, self.code.channel_id());

        let reply = match tokio::time::timeout(self.config.response_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => {
                return Err(AuthError::PairingAborted(
                    "relay connection lost before the signer replied".into(),
                ))
            }
            Err(_) => {
                log::warn!(
                    "No reply to {} within {:?}",
                    request.id,
                    self.config.response_timeout
                );
                return Err(AuthError::PairingAborted(format!(
                    "no reply from the signer within {}s",
                    self.config.response_timeout.as_secs()
                )));
            }
        };
        guard.disarm();
        if let Err(e) = self.connection.close().await {
            log::debug!("Closing pairing channel: {}", e);
        }

        match reply {
            CreateSessionReply::Authorized(grant) => {
                let authorization = check_grant(&grant, info)?;
                if let Ok(mut key) = self.signer_key.lock() {
                    *key = Some(grant.key);
                }
                log::info!("Session authorized by {}", authorization.key_hash);
                Ok(authorization)
            }
            CreateSessionReply::Rejected(rejection) => {
                log::info!("Signer rejected {}: {:?}", request.id, rejection.kind);
                Err(rejection.into_error())
            }
        }
    }
}

/// Accept a grant only if its signature covers exactly `info` and, where the
/// key determines it, the key hash belongs to the key.
fn check_grant(grant: &SessionGrant, info: &SessionInfo) -> Result<StandardCredential, AuthError> {
    if !matches!(grant.key, Key::Secp256r1(_)) {
        let expected = KeyHash::of_key(&grant.key)?;
        if expected != grant.authorization.key_hash {
            return Err(AuthError::denied(format!(
                "key hash {} does not belong to the signing key",
                grant.authorization.key_hash
            )));
        }
    }
    verify_standard(&grant.key, &grant.authorization.signature, &info.sign_bytes()?)?;
    Ok(grant.authorization.clone())
}

#[async_trait]
impl SessionAuthorizer for PairingRequester {
    async fn authorize(&self, info: &SessionInfo) -> Result<StandardCredential, AuthError> {
        self.request_session(info).await
    }
}

impl Drop for PairingRequester {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}

async fn receive_loop(connection: Arc<dyn RelayConnection>, pending: Pending) {
    loop {
        match connection.recv().await {
            Ok(frame) => dispatch(&pending, &frame),
            Err(e) => {
                log::debug!("Pairing channel {} closed: {}", connection.channel_id(), e);
                // Dropping the senders fails every waiting request.
                lock(&pending).clear();
                return;
            }
        }
    }
}

fn dispatch(pending: &Pending, frame: &str) {
    let envelope = match PairingEnvelope::from_frame(frame) {
        Ok(envelope) => envelope,
        Err(e) => {
            log::debug!("Dropping unparseable frame: {}", e);
            return;
        }
    };
    if envelope.kind != EnvelopeType::CreateSession {
        log::debug!("Dropping {} envelope {}", envelope.kind, envelope.id);
        return;
    }
    let reply: CreateSessionReply = match envelope.payload_as() {
        Ok(reply) => reply,
        Err(e) => {
            log::debug!("Dropping malformed reply {}: {}", envelope.id, e);
            return;
        }
    };
    match lock(pending).remove(&envelope.id) {
        Some(tx) => {
            let _ = tx.send(reply);
        }
        None => log::debug!("Dropping reply {} with no pending request", envelope.id),
    }
}

/// Tells the signer to stop if the request is abandoned before its reply.
struct CancelGuard {
    connection: Arc<dyn RelayConnection>,
    pending: Pending,
    id: Uuid,
    armed: bool,
}

impl CancelGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        lock(&self.pending).remove(&self.id);
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let connection = Arc::clone(&self.connection);
        let cancel = PairingEnvelope::cancel(self.id);
        log::debug!("Cancelling create-session {}", self.id);
        runtime.spawn(async move {
            if let Ok(frame) = cancel.to_frame() {
                let _ = connection.send(&frame).await;
            }
            let _ = connection.close().await;
        });
    }
}
