//! Credentials that authorize accounts and sessions
//!
//! A credential is either a platform key (a passkey held by the device's
//! authenticator) or an external key (an account in an external wallet).
//! Both sit behind [`CredentialProvider`], so the session and pairing layers
//! never branch on which kind they hold.
//!
//! - `passkey`: `PasskeyProvider` over a `PlatformAuthenticator`
//! - `wallet`: `ExternalWalletProvider` over an `ExternalSigner`
//! - `software`: in-process authenticator and wallet (tests, demos)
//! - `verify`: signature verification as the ledger performs it

pub mod passkey;
pub mod software;
pub mod verify;
pub mod wallet;

pub use passkey::{PasskeyProvider, PlatformAuthenticator, PlatformError};
pub use software::{SoftwareAuthenticator, SoftwareWallet};
pub use wallet::{ExternalSigner, ExternalWalletProvider, WalletError};

use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::identity::{key_hash, Key, KeyHash};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    PlatformKey,
    ExternalKey,
}

/// A credential as known to this device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub kind: CredentialKind,
    pub public_key: Key,
    /// Credential id for platform keys, the account address for external keys.
    #[serde(with = "crate::encoding::base64_bytes")]
    pub identifier: Vec<u8>,
}

impl Credential {
    pub fn key_hash(&self) -> Result<KeyHash, AuthError> {
        key_hash::hash(self.public_key.algo(), &self.identifier)
    }
}

/// A WebAuthn assertion over the ledger's sign bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasskeySignature {
    #[serde(with = "crate::encoding::base64_bytes")]
    pub authenticator_data: Vec<u8>,
    #[serde(with = "crate::encoding::base64_bytes")]
    pub client_data: Vec<u8>,
    /// P-256 `r ‖ s`.
    #[serde(with = "crate::encoding::base64_array")]
    pub sig: [u8; 64],
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signature {
    Passkey(PasskeySignature),
    /// secp256k1 `r ‖ s` over SHA-256 of the sign bytes.
    Secp256k1(#[serde(with = "crate::encoding::base64_array")] [u8; 64]),
    /// Personal-sign `r ‖ s ‖ v` over SHA-256 of the sign bytes.
    Eip191(#[serde(with = "crate::encoding::base64_array")] [u8; 65]),
}

/// A key hash plus a signature by the key behind it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardCredential {
    pub key_hash: KeyHash,
    pub signature: Signature,
}

/// Creates a credential and signs with it.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Which kind of credential this provider holds.
    fn kind(&self) -> CredentialKind;

    /// Create (or connect) the credential, proving control over `challenge`.
    ///
    /// `account_hint` is the name shown by the platform prompt.
    async fn create_credential(&self, challenge: &[u8], account_hint: &str) -> Result<Credential, AuthError>;

    /// Sign `sign_bytes`, choosing the challenge format for this kind.
    async fn sign(&self, sign_bytes: &[u8]) -> Result<StandardCredential, AuthError>;

    /// The credential, once created or restored.
    fn credential(&self) -> Option<Credential>;

    fn public_key(&self) -> Option<Key> {
        self.credential().map(|c| c.public_key)
    }

    fn key_hash(&self) -> Option<KeyHash> {
        self.credential().and_then(|c| c.key_hash().ok())
    }
}

/// The credential a provider holds and its cached key hash.
#[derive(Default)]
pub(crate) struct CredentialCache(RwLock<Option<(Credential, KeyHash)>>);

impl CredentialCache {
    pub(crate) fn get(&self) -> Option<(Credential, KeyHash)> {
        self.0.read().ok().and_then(|slot| slot.clone())
    }

    pub(crate) fn set(&self, credential: Credential) -> Result<KeyHash, AuthError> {
        let key_hash = credential.key_hash()?;
        let mut slot = self
            .0
            .write()
            .map_err(|_| AuthError::Unknown("credential cache lock poisoned".into()))?;
        *slot = Some((credential, key_hash));
        Ok(key_hash)
    }

    pub(crate) fn clear(&self) {
        if let Ok(mut slot) = self.0.write() {
            *slot = None;
        }
    }

    /// The cached credential, or `CredentialRevoked` when there is none.
    pub(crate) fn require(&self) -> Result<(Credential, KeyHash), AuthError> {
        self.get()
            .ok_or_else(|| AuthError::CredentialRevoked("no credential on this device".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_key_hash_uses_identifier() {
        let mut point = [0x11u8; 33];
        point[0] = 0x02;
        let credential = Credential {
            kind: CredentialKind::PlatformKey,
            public_key: Key::Secp256r1(point),
            identifier: vec![0xc1; 16],
        };
        assert_eq!(
            credential.key_hash().unwrap().to_string(),
            "D2705A75F28AD41FECD5F7619EEF79276E4266644563262B336024350C1E059C"
        );
    }

    #[test]
    fn test_signature_json_shape() {
        let sig = Signature::Secp256k1([0u8; 64]);
        let json = serde_json::to_value(&sig).unwrap();
        assert!(json.get("secp256k1").unwrap().is_string());

        let eip = Signature::Eip191([7u8; 65]);
        let back: Signature = serde_json::from_str(&serde_json::to_string(&eip).unwrap()).unwrap();
        assert_eq!(back, eip);
    }

    #[test]
    fn test_cache_require_without_credential() {
        let cache = CredentialCache::default();
        let err = cache.require().unwrap_err();
        assert!(matches!(err, AuthError::CredentialRevoked(_)));
    }
}
