//! Platform-key (passkey) credentials.
//!
//! The platform's WebAuthn surface sits behind [`PlatformAuthenticator`];
//! `PasskeyProvider` turns its attestations and assertions into the ledger's
//! key and signature types.

use async_trait::async_trait;
use thiserror::Error;

use super::verify::passkey_challenge;
use super::{Credential, CredentialCache, CredentialKind, CredentialProvider, PasskeySignature, Signature, StandardCredential};
use crate::error::AuthError;
use crate::identity::{Key, KeyAlgo};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("User dismissed the authenticator prompt")]
    Cancelled,

    #[error("No platform authenticator available: {0}")]
    NotSupported(String),

    #[error("Authenticator does not know this credential")]
    UnknownCredential,

    #[error("Authenticator error: {0}")]
    Other(String),
}

impl From<PlatformError> for AuthError {
    fn from(e: PlatformError) -> Self {
        match e {
            PlatformError::Cancelled => AuthError::UserCancelled(e.to_string()),
            PlatformError::NotSupported(_) => AuthError::DeviceUnsupported(e.to_string()),
            PlatformError::UnknownCredential => AuthError::CredentialRevoked(e.to_string()),
            PlatformError::Other(_) => AuthError::Unknown(e.to_string()),
        }
    }
}

/// Parameters of a credential creation ceremony.
#[derive(Debug, Clone)]
pub struct CreationOptions {
    pub rp_id: String,
    pub user_name: String,
    pub challenge: Vec<u8>,
}

/// A freshly created platform credential.
#[derive(Debug, Clone)]
pub struct Attestation {
    pub credential_id: Vec<u8>,
    /// SEC1 public key, compressed or uncompressed.
    pub public_key: Vec<u8>,
}

/// A signed assertion.
#[derive(Debug, Clone)]
pub struct Assertion {
    pub credential_id: Vec<u8>,
    pub authenticator_data: Vec<u8>,
    pub client_data_json: Vec<u8>,
    /// DER-encoded ECDSA signature, as WebAuthn returns it.
    pub signature: Vec<u8>,
}

/// The platform's WebAuthn surface.
#[async_trait]
pub trait PlatformAuthenticator: Send + Sync {
    /// Run the creation ceremony.
    async fn create(&self, options: &CreationOptions) -> Result<Attestation, PlatformError>;

    /// Run the assertion ceremony over `challenge`, restricted to
    /// `allow_credential` when given.
    async fn get(
        &self,
        rp_id: &str,
        allow_credential: Option<&[u8]>,
        challenge: &[u8],
    ) -> Result<Assertion, PlatformError>;
}

pub struct PasskeyProvider<A> {
    authenticator: A,
    rp_id: String,
    cache: CredentialCache,
}

impl<A: PlatformAuthenticator> PasskeyProvider<A> {
    pub fn new(authenticator: A, rp_id: &str) -> Self {
        Self {
            authenticator,
            rp_id: rp_id.to_string(),
            cache: CredentialCache::default(),
        }
    }

    /// A provider for a credential created earlier on this device.
    pub fn with_credential(authenticator: A, rp_id: &str, credential: Credential) -> Result<Self, AuthError> {
        if credential.kind != CredentialKind::PlatformKey || credential.public_key.algo() != KeyAlgo::Secp256r1 {
            return Err(AuthError::InvalidKeyMaterial(format!(
                "{:?} credential with a {} key is not a passkey",
                credential.kind,
                credential.public_key.algo()
            )));
        }
        let provider = Self::new(authenticator, rp_id);
        provider.cache.set(credential)?;
        Ok(provider)
    }

    pub fn authenticator(&self) -> &A {
        &self.authenticator
    }

    /// Forget the credential, e.g. after the authenticator reported it gone.
    pub fn forget(&self) {
        self.cache.clear();
    }
}

fn compress_p256(public_key: &[u8]) -> Result<Key, AuthError> {
    let key = p256::PublicKey::from_sec1_bytes(public_key)
        .map_err(|e| AuthError::InvalidKeyMaterial(format!("attested key: {}", e)))?;
    let point = p256::elliptic_curve::sec1::ToEncodedPoint::to_encoded_point(&key, true);
    Key::from_algo_bytes(KeyAlgo::Secp256r1, point.as_bytes())
}

fn raw_signature(der: &[u8]) -> Result<[u8; 64], AuthError> {
    let sig = p256::ecdsa::Signature::from_der(der)
        .map_err(|e| AuthError::InvalidKeyMaterial(format!("assertion signature: {}", e)))?;
    let sig = sig.normalize_s().unwrap_or(sig);
    let mut raw = [0u8; 64];
    raw.copy_from_slice(&sig.to_bytes());
    Ok(raw)
}

#[async_trait]
impl<A: PlatformAuthenticator> CredentialProvider for PasskeyProvider<A> {
    fn kind(&self) -> CredentialKind {
        CredentialKind::PlatformKey
    }

    async fn create_credential(&self, challenge: &[u8], account_hint: &str) -> Result<Credential, AuthError> {
        let options = CreationOptions {
            rp_id: self.rp_id.clone(),
            user_name: account_hint.to_string(),
            challenge: challenge.to_vec(),
        };
        let attestation = self.authenticator.create(&options).await?;

        let credential = Credential {
            kind: CredentialKind::PlatformKey,
            public_key: compress_p256(&attestation.public_key)?,
            identifier: attestation.credential_id,
        };
        let key_hash = self.cache.set(credential.clone())?;
        log::info!("Created passkey credential {} for '{}'", key_hash, account_hint);
        Ok(credential)
    }

    async fn sign(&self, sign_bytes: &[u8]) -> Result<StandardCredential, AuthError> {
        let (credential, key_hash) = self.cache.require()?;
        let challenge = passkey_challenge(sign_bytes);

        let assertion = match self
            .authenticator
            .get(&self.rp_id, Some(&credential.identifier), &challenge)
            .await
        {
            Ok(assertion) => assertion,
            Err(PlatformError::UnknownCredential) => {
                log::warn!("Authenticator no longer holds credential {}", key_hash);
                self.cache.clear();
                return Err(PlatformError::UnknownCredential.into());
            }
            Err(e) => return Err(e.into()),
        };

        if assertion.credential_id != credential.identifier {
            return Err(AuthError::CredentialRevoked(
                "authenticator answered with a different credential".into(),
            ));
        }

        Ok(StandardCredential {
            key_hash,
            signature: Signature::Passkey(PasskeySignature {
                authenticator_data: assertion.authenticator_data,
                client_data: assertion.client_data_json,
                sig: raw_signature(&assertion.signature)?,
            }),
        })
    }

    fn credential(&self) -> Option<Credential> {
        self.cache.get().map(|(credential, _)| credential)
    }

    fn key_hash(&self) -> Option<crate::identity::KeyHash> {
        self.cache.get().map(|(_, key_hash)| key_hash)
    }
}
