//! SessionKeyManager: the lifecycle of the one active session
//!
//! Absent -> Pending -> Active -> Expired, with `revoke` returning to Absent
//! from anywhere. Creating a session while one exists replaces it. A pending
//! creation that is cancelled (its future dropped) or superseded leaves the
//! manager Absent, never half-created.
//!
//! The optional watcher task polls expiry on an interval and publishes
//! `SessionEvent::RenewalNeeded` when the active session lapses.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::clock::{Clock, SystemClock};
use super::info::{SessionInfo, Timestamp};
use super::key::{compressed_public_key, generate_secret, SessionKey};
use super::store::{MemorySessionStore, SessionStore};
use crate::credential::{CredentialProvider, StandardCredential};
use crate::error::AuthError;
use crate::identity::KeyHash;

/// Configuration for session creation and the expiry watcher.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Lifetime of sessions created with `create_default_session`.
    #[serde(with = "crate::encoding::duration_secs")]
    pub default_ttl: Duration,
    /// How often the watcher re-checks expiry.
    #[serde(with = "crate::encoding::duration_secs")]
    pub poll_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(24 * 60 * 60),
            poll_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Absent,
    Pending,
    Active { key_hash: KeyHash, expire_at: Timestamp },
    Expired { key_hash: KeyHash, expire_at: Timestamp },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    Activated { key_hash: KeyHash, expire_at: Timestamp },
    /// The active session lapsed; a new one must be created.
    RenewalNeeded { key_hash: KeyHash, expired_at: Timestamp },
    Revoked { key_hash: KeyHash },
}

/// Obtains a credential's signature over a session's sign bytes, either
/// locally or from another device.
#[async_trait]
pub trait SessionAuthorizer: Send + Sync {
    async fn authorize(&self, info: &SessionInfo) -> Result<StandardCredential, AuthError>;
}

/// Authorizes with a credential held on this device.
pub struct LocalAuthorizer<'a> {
    provider: &'a dyn CredentialProvider,
}

impl<'a> LocalAuthorizer<'a> {
    pub fn new(provider: &'a dyn CredentialProvider) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl SessionAuthorizer for LocalAuthorizer<'_> {
    async fn authorize(&self, info: &SessionInfo) -> Result<StandardCredential, AuthError> {
        let sign_bytes = info.sign_bytes()?;
        self.provider.sign(&sign_bytes).await
    }
}

enum Slot {
    Absent,
    Pending { generation: u64 },
    Active(SessionKey),
    Expired(SessionKey),
}

pub struct SessionKeyManager {
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn SessionStore>,
    slot: Mutex<Slot>,
    /// Bumped for every creation attempt; a completion only installs its
    /// session if its generation is still the pending one.
    generation: AtomicU64,
    events_tx: broadcast::Sender<SessionEvent>,
    shutdown_tx: broadcast::Sender<()>,
    watching: AtomicBool,
}

/// Resets a pending creation to Absent unless it completed.
struct PendingGuard<'a> {
    manager: &'a SessionKeyManager,
    generation: u64,
    armed: bool,
}

impl PendingGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut slot = self.manager.slot();
        if matches!(*slot, Slot::Pending { generation } if generation == self.generation) {
            *slot = Slot::Absent;
            log::debug!("Session creation {} abandoned", self.generation);
        }
    }
}

impl SessionKeyManager {
    pub fn new(config: SessionConfig, clock: Arc<dyn Clock>, store: Arc<dyn SessionStore>) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(16);
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(Self {
            config,
            clock,
            store,
            slot: Mutex::new(Slot::Absent),
            generation: AtomicU64::new(0),
            events_tx,
            shutdown_tx,
            watching: AtomicBool::new(false),
        })
    }

    /// System clock and an in-memory store.
    pub fn in_memory(config: SessionConfig) -> Arc<Self> {
        Self::new(config, Arc::new(SystemClock), Arc::new(MemorySessionStore::new()))
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events_tx.send(event);
    }

    fn clear_store(&self) {
        if let Err(e) = self.store.clear() {
            log::warn!("Failed to clear stored session: {}", e);
        }
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Create a session authorized by `provider` on this device.
    pub async fn create_session(
        &self,
        provider: &dyn CredentialProvider,
        ttl: Duration,
    ) -> Result<SessionKey, AuthError> {
        self.create_session_with(&LocalAuthorizer::new(provider), ttl).await
    }

    pub async fn create_default_session(&self, provider: &dyn CredentialProvider) -> Result<SessionKey, AuthError> {
        self.create_session(provider, self.config.default_ttl).await
    }

    /// Create a session authorized by `authorizer`.
    ///
    /// Replaces any existing session. Dropping the returned future before it
    /// resolves leaves the manager Absent.
    pub async fn create_session_with(
        &self,
        authorizer: &dyn SessionAuthorizer,
        ttl: Duration,
    ) -> Result<SessionKey, AuthError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = std::mem::replace(&mut *self.slot(), Slot::Pending { generation });
        if let Slot::Active(old) | Slot::Expired(old) = previous {
            log::info!("Replacing session for {}", old.key_hash());
            self.clear_store();
            self.emit(SessionEvent::Revoked {
                key_hash: *old.key_hash(),
            });
        }
        let guard = PendingGuard {
            manager: self,
            generation,
            armed: true,
        };

        let secret = generate_secret();
        let info = SessionInfo {
            session_key: compressed_public_key(&secret)?,
            expire_at: self.clock.now().saturating_add(ttl),
        };

        let authorization = authorizer
            .authorize(&info)
            .await
            .map_err(AuthError::into_denied)?;
        let session = SessionKey::new(secret, info, authorization)?;

        {
            let mut slot = self.slot();
            if !matches!(*slot, Slot::Pending { generation: g } if g == generation) {
                return Err(AuthError::UserCancelled(
                    "session creation was revoked or superseded".into(),
                ));
            }
            self.store.save(&session)?;
            *slot = Slot::Active(session.clone());
        }
        guard.disarm();

        log::info!(
            "Session for {} active until {}",
            session.key_hash(),
            session.expire_at()
        );
        self.emit(SessionEvent::Activated {
            key_hash: *session.key_hash(),
            expire_at: session.expire_at(),
        });
        Ok(session)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// The state as last observed, without consulting the clock.
    pub fn state(&self) -> SessionState {
        match &*self.slot() {
            Slot::Absent => SessionState::Absent,
            Slot::Pending { .. } => SessionState::Pending,
            Slot::Active(session) => SessionState::Active {
                key_hash: *session.key_hash(),
                expire_at: session.expire_at(),
            },
            Slot::Expired(session) => SessionState::Expired {
                key_hash: *session.key_hash(),
                expire_at: session.expire_at(),
            },
        }
    }

    /// Re-check expiry against the clock and return the resulting state.
    pub fn poll(&self) -> SessionState {
        let now = self.clock.now();
        let lapsed = {
            let mut slot = self.slot();
            let lapsed = match &*slot {
                Slot::Active(session) if session.is_expired(now) => Some(session.clone()),
                _ => None,
            };
            if let Some(session) = &lapsed {
                *slot = Slot::Expired(session.clone());
            }
            lapsed
        };

        if let Some(session) = lapsed {
            log::info!("Session for {} expired at {}", session.key_hash(), session.expire_at());
            self.emit(SessionEvent::RenewalNeeded {
                key_hash: *session.key_hash(),
                expired_at: session.expire_at(),
            });
        }
        self.state()
    }

    /// The active session, if it has not expired.
    pub fn current(&self) -> Option<SessionKey> {
        self.poll();
        match &*self.slot() {
            Slot::Active(session) => Some(session.clone()),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Revocation and restore
    // ------------------------------------------------------------------

    /// Discard the session. Idempotent; also aborts a pending creation.
    pub fn revoke(&self) {
        let previous = std::mem::replace(&mut *self.slot(), Slot::Absent);
        match previous {
            Slot::Absent => {}
            Slot::Pending { generation } => {
                log::info!("Revoked pending session creation {}", generation);
            }
            Slot::Active(session) | Slot::Expired(session) => {
                self.clear_store();
                log::info!("Revoked session for {}", session.key_hash());
                self.emit(SessionEvent::Revoked {
                    key_hash: *session.key_hash(),
                });
            }
        }
    }

    /// Load a persisted session if nothing is held yet.
    pub fn restore(&self) -> Result<SessionState, AuthError> {
        {
            let mut slot = self.slot();
            if !matches!(*slot, Slot::Absent) {
                drop(slot);
                return Ok(self.state());
            }
            match self.store.load()? {
                Some(session) => {
                    log::info!("Restored session for {}", session.key_hash());
                    *slot = Slot::Active(session);
                }
                None => return Ok(SessionState::Absent),
            }
        }
        Ok(self.poll())
    }

    // ------------------------------------------------------------------
    // Expiry watcher
    // ------------------------------------------------------------------

    pub fn start(self: &Arc<Self>) {
        if self.watching.swap(true, Ordering::SeqCst) {
            return;
        }
        let manager = Arc::clone(self);
        let interval = self.config.poll_interval;
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        manager.poll();
                    }
                    _ = shutdown.recv() => break,
                }
            }
        });
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
        self.watching.store(false, Ordering::SeqCst);
    }
}
