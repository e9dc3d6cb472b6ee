//! Signer side: the device holding the credential
//!
//! Joins the channel from a scanned code and answers the first
//! `create-session` request with its provider's authorization. Further
//! requests on the channel are ignored while one is in flight, so one scan
//! authorizes at most one session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use uuid::Uuid;

use super::code::PairingCode;
use super::envelope::{CreateSessionReply, EnvelopeType, PairingEnvelope, RemoteRejection, SessionGrant};
use crate::config::PairingConfig;
use crate::credential::{CredentialProvider, StandardCredential};
use crate::error::AuthError;
use crate::relay::{RelayClient, RelayConnection, RelayError};
use crate::session::{Clock, SessionInfo, SystemClock, Timestamp};

fn aborted(error: RelayError) -> AuthError {
    AuthError::PairingAborted(error.to_string())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignerOutcome {
    /// The session was signed and the grant sent.
    Authorized { request_id: Uuid, expire_at: Timestamp },
    /// The requester cancelled before a signature was produced.
    Cancelled,
}

pub struct PairingSigner {
    connection: Box<dyn RelayConnection>,
    provider: Arc<dyn CredentialProvider>,
    config: PairingConfig,
    clock: Arc<dyn Clock>,
    in_flight: AtomicBool,
}

impl PairingSigner {
    /// Join the channel named by `code`.
    pub async fn join(
        relay: &dyn RelayClient,
        code: &PairingCode,
        provider: Arc<dyn CredentialProvider>,
        config: PairingConfig,
    ) -> Result<Self, AuthError> {
        let connection = relay.join(code.channel_id()).await.map_err(aborted)?;
        log::info!("Joined pairing channel {}", code.channel_id());
        Ok(Self {
            connection,
            provider,
            config,
            clock: Arc::new(SystemClock),
            in_flight: AtomicBool::new(false),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Serve the channel until one request has been answered or cancelled.
    ///
    /// A provider failure is reported to the requester and returned here.
    pub async fn run(&self) -> Result<SignerOutcome, AuthError> {
        loop {
            let envelope = match self.next_envelope().await? {
                Some(envelope) => envelope,
                None => continue,
            };
            match envelope.kind {
                EnvelopeType::CreateSession => {
                    if self.in_flight.swap(true, Ordering::SeqCst) {
                        log::debug!("Ignoring create-session {}: one is in flight", envelope.id);
                        continue;
                    }
                    return self.handle_request(envelope).await;
                }
                EnvelopeType::Cancel => {
                    log::info!("Requester cancelled before sending a request");
                    self.close().await;
                    return Ok(SignerOutcome::Cancelled);
                }
                EnvelopeType::Unknown(_) => {
                    log::debug!("Ignoring {} envelope {}", envelope.kind, envelope.id);
                }
            }
        }
    }

    async fn handle_request(&self, request: PairingEnvelope) -> Result<SignerOutcome, AuthError> {
        let id = request.id;
        let outcome = match self.validate(&request) {
            Ok(info) => self.authorize(id, &info).await,
            Err(e) => Err(e),
        };

        let result = match outcome {
            Ok(Some((info, authorization))) => {
                let key = self
                    .provider
                    .public_key()
                    .ok_or_else(|| AuthError::CredentialRevoked("signer has no credential".into()));
                match key {
                    Ok(key) => {
                        let grant = CreateSessionReply::Authorized(SessionGrant { key, authorization });
                        self.send(&PairingEnvelope::reply(id, &grant)?).await?;
                        log::info!("Authorized session until {} for request {}", info.expire_at, id);
                        Ok(SignerOutcome::Authorized {
                            request_id: id,
                            expire_at: info.expire_at,
                        })
                    }
                    Err(e) => self.reject(id, e).await,
                }
            }
            Ok(None) => Ok(SignerOutcome::Cancelled),
            Err(e @ AuthError::PairingAborted(_)) => Err(e),
            Err(e) => self.reject(id, e).await,
        };
        self.close().await;
        result
    }

    /// Parse and vet a request before bothering the user.
    fn validate(&self, request: &PairingEnvelope) -> Result<SessionInfo, AuthError> {
        let info: SessionInfo = request
            .payload_as()
            .map_err(|e| AuthError::InvalidKeyMaterial(format!("malformed session request: {}", e)))?;
        k256::PublicKey::from_sec1_bytes(&info.session_key)
            .map_err(|_| AuthError::InvalidKeyMaterial("session key is not a secp256k1 point".into()))?;

        let now = self.clock.now();
        if info.expire_at <= now {
            return Err(AuthError::denied(format!("session already expired at {}", info.expire_at)));
        }
        let ttl = info.expire_at.saturating_duration_since(now);
        if ttl > self.config.max_session_ttl {
            return Err(AuthError::denied(format!(
                "requested session lifetime {}s exceeds the {}s limit",
                ttl.as_secs(),
                self.config.max_session_ttl.as_secs()
            )));
        }
        Ok(info)
    }

    /// Sign `info`, watching the channel meanwhile. Returns `None` if the
    /// requester cancelled first.
    async fn authorize(
        &self,
        id: Uuid,
        info: &SessionInfo,
    ) -> Result<Option<(SessionInfo, StandardCredential)>, AuthError> {
        let sign_bytes = info.sign_bytes()?;
        let signing = self.provider.sign(&sign_bytes);
        tokio::pin!(signing);

        loop {
            tokio::select! {
                signed = &mut signing => return signed.map(|authorization| Some((info.clone(), authorization))),
                envelope = self.next_envelope() => match envelope? {
                    Some(envelope) if envelope.kind == EnvelopeType::Cancel && envelope.id == id => {
                        log::info!("Request {} cancelled by the requester", id);
                        return Ok(None);
                    }
                    Some(envelope) => {
                        log::debug!("Ignoring {} {} while {} is in flight", envelope.kind, envelope.id, id);
                    }
                    None => {}
                },
            }
        }
    }

    async fn reject(&self, id: Uuid, error: AuthError) -> Result<SignerOutcome, AuthError> {
        log::warn!("Rejecting request {}: {}", id, error);
        let reply = CreateSessionReply::Rejected(RemoteRejection::from_error(&error));
        if let Err(e) = self.send(&PairingEnvelope::reply(id, &reply)?).await {
            log::warn!("Could not deliver rejection for {}: {}", id, e);
        }
        Err(error)
    }

    /// The next parseable envelope; `None` for frames that are not one.
    async fn next_envelope(&self) -> Result<Option<PairingEnvelope>, AuthError> {
        let frame = self.connection.recv().await.map_err(aborted)?;
        match PairingEnvelope::from_frame(&frame) {
            Ok(envelope) => Ok(Some(envelope)),
            Err(e) => {
                log::debug!("Dropping unparseable frame: {}", e);
                Ok(None)
            }
        }
    }

    async fn send(&self, envelope: &PairingEnvelope) -> Result<(), AuthError> {
        self.connection.send(&envelope.to_frame()?).await.map_err(aborted)
    }

    async fn close(&self) {
        if let Err(e) = self.connection.close().await {
            log::debug!("Closing pairing channel: {}", e);
        }
    }
}
