//! In-process credential collaborators.
//!
//! `SoftwareAuthenticator` behaves like a platform authenticator holding
//! P-256 passkeys; `SoftwareWallet` like an external wallet holding one
//! secp256k1 account. Both can be told to fail their next request, which is
//! how tests drive the cancel and unsupported paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use super::passkey::{Assertion, Attestation, CreationOptions, PlatformAuthenticator, PlatformError};
use super::verify::{eth_address, personal_sign_hash, WEBAUTHN_GET};
use super::wallet::{ExternalSigner, WalletError};
use crate::error::AuthError;

/// User-present and user-verified.
const AUTH_DATA_FLAGS: u8 = 0x05;

pub struct SoftwareAuthenticator {
    rp_id: String,
    supported: bool,
    keys: Mutex<HashMap<Vec<u8>, p256::ecdsa::SigningKey>>,
    sign_count: AtomicU32,
    fail_next: Mutex<Option<PlatformError>>,
}

impl SoftwareAuthenticator {
    pub fn new(rp_id: &str) -> Self {
        Self {
            rp_id: rp_id.to_string(),
            supported: true,
            keys: Mutex::new(HashMap::new()),
            sign_count: AtomicU32::new(0),
            fail_next: Mutex::new(None),
        }
    }

    /// A device without a platform authenticator.
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new("")
        }
    }

    /// Fail the next `create` or `get` with `error`.
    pub fn fail_next(&self, error: PlatformError) {
        if let Ok(mut slot) = self.fail_next.lock() {
            *slot = Some(error);
        }
    }

    /// Delete a credential, as a user would from the platform's settings.
    pub fn remove_credential(&self, credential_id: &[u8]) {
        if let Ok(mut keys) = self.keys.lock() {
            keys.remove(credential_id);
        }
    }

    /// Number of assertions signed so far.
    pub fn assertion_count(&self) -> u32 {
        self.sign_count.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), PlatformError> {
        if !self.supported {
            return Err(PlatformError::NotSupported("no platform authenticator".into()));
        }
        match self.fail_next.lock().ok().and_then(|mut slot| slot.take()) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PlatformAuthenticator for SoftwareAuthenticator {
    async fn create(&self, options: &CreationOptions) -> Result<Attestation, PlatformError> {
        self.check_available()?;
        if options.rp_id != self.rp_id {
            return Err(PlatformError::Other(format!("unexpected rp id '{}'", options.rp_id)));
        }

        let signing_key = p256::ecdsa::SigningKey::random(&mut OsRng);
        let public_key = signing_key.verifying_key().to_encoded_point(true).as_bytes().to_vec();
        let mut credential_id = vec![0u8; 16];
        OsRng.fill_bytes(&mut credential_id);

        self.keys
            .lock()
            .map_err(|_| PlatformError::Other("key store poisoned".into()))?
            .insert(credential_id.clone(), signing_key);

        Ok(Attestation {
            credential_id,
            public_key,
        })
    }

    async fn get(
        &self,
        rp_id: &str,
        allow_credential: Option<&[u8]>,
        challenge: &[u8],
    ) -> Result<Assertion, PlatformError> {
        use p256::ecdsa::signature::hazmat::PrehashSigner;

        self.check_available()?;

        let (credential_id, signing_key) = {
            let keys = self
                .keys
                .lock()
                .map_err(|_| PlatformError::Other("key store poisoned".into()))?;
            let entry = match allow_credential {
                Some(id) => keys.get_key_value(id),
                None => keys.iter().next(),
            };
            let (id, key) = entry.ok_or(PlatformError::UnknownCredential)?;
            (id.clone(), key.clone())
        };

        let counter = self.sign_count.fetch_add(1, Ordering::SeqCst) + 1;
        let mut authenticator_data = Sha256::digest(rp_id.as_bytes()).to_vec();
        authenticator_data.push(AUTH_DATA_FLAGS);
        authenticator_data.extend_from_slice(&counter.to_be_bytes());

        let client_data_json = serde_json::to_vec(&serde_json::json!({
            "type": WEBAUTHN_GET,
            "challenge": URL_SAFE_NO_PAD.encode(challenge),
            "origin": format!("https://{}", rp_id),
            "crossOrigin": false,
        }))
        .map_err(|e| PlatformError::Other(e.to_string()))?;

        let mut hasher = Sha256::new();
        hasher.update(&authenticator_data);
        hasher.update(Sha256::digest(&client_data_json));
        let signature: p256::ecdsa::Signature = signing_key
            .sign_prehash(&hasher.finalize())
            .map_err(|e| PlatformError::Other(e.to_string()))?;

        Ok(Assertion {
            credential_id,
            authenticator_data,
            client_data_json,
            signature: signature.to_der().as_bytes().to_vec(),
        })
    }
}

pub struct SoftwareWallet {
    signing_key: k256::ecdsa::SigningKey,
    fail_next: Mutex<Option<WalletError>>,
}

impl SoftwareWallet {
    pub fn random() -> Self {
        Self::from_signing_key(k256::ecdsa::SigningKey::random(&mut OsRng))
    }

    pub fn from_signing_key(signing_key: k256::ecdsa::SigningKey) -> Self {
        Self {
            signing_key,
            fail_next: Mutex::new(None),
        }
    }

    /// A wallet for a raw 32-byte secp256k1 secret.
    pub fn from_secret_bytes(secret: &[u8]) -> Result<Self, AuthError> {
        let signing_key = k256::ecdsa::SigningKey::from_slice(secret)
            .map_err(|_| AuthError::InvalidKeyMaterial("wallet secret is not a secp256k1 scalar".into()))?;
        Ok(Self::from_signing_key(signing_key))
    }

    pub fn address(&self) -> [u8; 20] {
        eth_address(self.signing_key.verifying_key())
    }

    pub fn fail_next(&self, error: WalletError) {
        if let Ok(mut slot) = self.fail_next.lock() {
            *slot = Some(error);
        }
    }

    fn check_available(&self) -> Result<(), WalletError> {
        match self.fail_next.lock().ok().and_then(|mut slot| slot.take()) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ExternalSigner for SoftwareWallet {
    async fn request_account(&self) -> Result<[u8; 20], WalletError> {
        self.check_available()?;
        Ok(self.address())
    }

    async fn personal_sign(&self, account: &[u8; 20], message: &[u8]) -> Result<[u8; 65], WalletError> {
        self.check_available()?;
        if account != &self.address() {
            return Err(WalletError::Unauthorized);
        }

        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(&personal_sign_hash(message))
            .map_err(|e| WalletError::Other(e.to_string()))?;

        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&signature.to_bytes());
        out[64] = recovery_id.to_byte() + 27;
        Ok(out)
    }
}
