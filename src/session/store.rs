//! Session persistence
//!
//! A store holds at most one session record. Records are replaced whole and
//! never patched. `MemorySessionStore` keeps the secret for the lifetime of
//! the process only; `FileSessionStore` writes a JSON record whose session
//! secret is sealed with AES-256-GCM under a key derived from a device
//! secret.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

use super::info::SessionInfo;
use super::key::SessionKey;
use crate::credential::StandardCredential;

const STORE_KEY_INFO: &[u8] = b"authlink-session-store-v1";
const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    #[error("Stored session is unusable: {0}")]
    Corrupt(String),
}

pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<Option<SessionKey>, StoreError>;

    fn save(&self, session: &SessionKey) -> Result<(), StoreError>;

    fn clear(&self) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct MemorySessionStore {
    slot: Mutex<Option<SessionKey>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<SessionKey>, StoreError> {
        let slot = self
            .slot
            .lock()
            .map_err(|_| StoreError::IoError("session slot poisoned".into()))?;
        Ok(slot.clone())
    }

    fn save(&self, session: &SessionKey) -> Result<(), StoreError> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| StoreError::IoError("session slot poisoned".into()))?;
        *slot = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| StoreError::IoError("session slot poisoned".into()))?;
        *slot = None;
        Ok(())
    }
}

/// Serializable form of a session. The secret is sealed (nonce ‖ ciphertext).
#[derive(Serialize, Deserialize)]
struct StoredSession {
    info: SessionInfo,
    authorization: StandardCredential,
    #[serde(with = "crate::encoding::base64_bytes")]
    sealed_secret: Vec<u8>,
}

pub struct FileSessionStore {
    path: PathBuf,
    storage_key: [u8; 32],
}

impl Drop for FileSessionStore {
    fn drop(&mut self) {
        self.storage_key.zeroize();
    }
}

impl FileSessionStore {
    /// A store at `path` whose records are sealed under a key derived from
    /// `device_secret`.
    pub fn new(path: &Path, device_secret: &[u8]) -> Result<Self, StoreError> {
        let hk = Hkdf::<Sha256>::new(None, device_secret);
        let mut storage_key = [0u8; 32];
        hk.expand(STORE_KEY_INFO, &mut storage_key)
            .map_err(|e| StoreError::CryptoError(e.to_string()))?;
        Ok(Self {
            path: path.to_path_buf(),
            storage_key,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn cipher(&self) -> Result<Aes256Gcm, StoreError> {
        Aes256Gcm::new_from_slice(&self.storage_key).map_err(|e| StoreError::CryptoError(e.to_string()))
    }

    /// The authorization's key hash is bound in as associated data, so a
    /// sealed secret cannot be grafted onto another account's record.
    fn seal(&self, secret: &[u8], aad: &[u8]) -> Result<Vec<u8>, StoreError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let ciphertext = self
            .cipher()?
            .encrypt(Nonce::from_slice(&nonce_bytes), Payload { msg: secret, aad })
            .map_err(|e| StoreError::CryptoError(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn open(&self, sealed: &[u8], aad: &[u8]) -> Result<Zeroizing<Vec<u8>>, StoreError> {
        if sealed.len() < NONCE_LEN {
            return Err(StoreError::CryptoError("sealed secret too short (missing nonce)".into()));
        }
        let plaintext = self
            .cipher()?
            .decrypt(
                Nonce::from_slice(&sealed[..NONCE_LEN]),
                Payload {
                    msg: &sealed[NONCE_LEN..],
                    aad,
                },
            )
            .map_err(|e| StoreError::CryptoError(e.to_string()))?;
        Ok(Zeroizing::new(plaintext))
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<Option<SessionKey>, StoreError> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::IoError(e.to_string())),
        };
        let stored: StoredSession =
            serde_json::from_slice(&data).map_err(|e| StoreError::SerializationError(e.to_string()))?;

        let secret = self.open(&stored.sealed_secret, stored.authorization.key_hash.as_bytes())?;
        let session = SessionKey::from_secret_bytes(&secret, stored.info, stored.authorization)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Ok(Some(session))
    }

    fn save(&self, session: &SessionKey) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::IoError(e.to_string()))?;
        }

        let stored = StoredSession {
            info: session.info().clone(),
            authorization: session.authorization().clone(),
            sealed_secret: self.seal(&session.secret_bytes(), session.key_hash().as_bytes())?,
        };
        let json =
            serde_json::to_vec_pretty(&stored).map_err(|e| StoreError::SerializationError(e.to_string()))?;

        // Write-then-rename so a crash never leaves half a record behind.
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json).map_err(|e| StoreError::IoError(e.to_string()))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| StoreError::IoError(e.to_string()))?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::IoError(e.to_string())),
        }
    }
}
