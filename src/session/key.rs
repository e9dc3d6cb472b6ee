//! The session key: an ephemeral secp256k1 keypair plus the long-lived
//! credential's authorization of it.
//!
//! The secret never leaves this type except as a sealed record for the
//! session store.

use std::fmt;

use k256::ecdsa::signature::hazmat::PrehashSigner;
use k256::ecdsa::SigningKey;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::info::{SessionCredential, SessionInfo, Timestamp};
use crate::credential::StandardCredential;
use crate::error::AuthError;
use crate::identity::KeyHash;

/// A fresh ephemeral secret.
pub fn generate_secret() -> SigningKey {
    SigningKey::random(&mut OsRng)
}

/// Compressed SEC1 public key of `secret`.
pub fn compressed_public_key(secret: &SigningKey) -> Result<[u8; 33], AuthError> {
    secret
        .verifying_key()
        .to_encoded_point(true)
        .as_bytes()
        .try_into()
        .map_err(|_| AuthError::InvalidKeyMaterial("session public key is not 33 bytes".into()))
}

#[derive(Clone)]
pub struct SessionKey {
    secret: SigningKey,
    info: SessionInfo,
    authorization: StandardCredential,
}

impl SessionKey {
    /// Bind `secret` to the authorization of `info`.
    pub fn new(secret: SigningKey, info: SessionInfo, authorization: StandardCredential) -> Result<Self, AuthError> {
        if compressed_public_key(&secret)? != info.session_key {
            return Err(AuthError::InvalidKeyMaterial(
                "authorized session key does not match the local secret".into(),
            ));
        }
        Ok(Self {
            secret,
            info,
            authorization,
        })
    }

    pub(crate) fn from_secret_bytes(
        secret: &[u8],
        info: SessionInfo,
        authorization: StandardCredential,
    ) -> Result<Self, AuthError> {
        let secret = SigningKey::from_slice(secret)
            .map_err(|e| AuthError::InvalidKeyMaterial(format!("session secret: {}", e)))?;
        Self::new(secret, info, authorization)
    }

    pub(crate) fn secret_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.secret.to_bytes().to_vec())
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn public_key(&self) -> &[u8; 33] {
        &self.info.session_key
    }

    pub fn expire_at(&self) -> Timestamp {
        self.info.expire_at
    }

    pub fn key_hash(&self) -> &KeyHash {
        &self.authorization.key_hash
    }

    pub fn authorization(&self) -> &StandardCredential {
        &self.authorization
    }

    /// Expired once `now` reaches `expire_at`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.info.expire_at
    }

    /// secp256k1 `r ‖ s` (low-S) over SHA-256 of `sign_bytes`.
    pub fn sign(&self, sign_bytes: &[u8]) -> Result<[u8; 64], AuthError> {
        let signature: k256::ecdsa::Signature = self
            .secret
            .sign_prehash(&Sha256::digest(sign_bytes))
            .map_err(|e| AuthError::Unknown(format!("session signing failed: {}", e)))?;
        let signature = signature.normalize_s().unwrap_or(signature);
        let mut out = [0u8; 64];
        out.copy_from_slice(&signature.to_bytes());
        Ok(out)
    }

    /// The credential to attach to a transaction with these sign bytes.
    pub fn sign_credential(&self, sign_bytes: &[u8]) -> Result<SessionCredential, AuthError> {
        Ok(SessionCredential {
            session_info: self.info.clone(),
            session_signature: self.sign(sign_bytes)?,
            authorization: self.authorization.clone(),
        })
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKey")
            .field("key_hash", &self.authorization.key_hash)
            .field("expire_at", &self.info.expire_at)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::verify::verify_secp256k1;
    use crate::credential::Signature;

    fn authorization() -> StandardCredential {
        StandardCredential {
            key_hash: KeyHash::from_array([7u8; 32]),
            signature: Signature::Secp256k1([0u8; 64]),
        }
    }

    fn session(expire_at: u64) -> SessionKey {
        let secret = generate_secret();
        let info = SessionInfo {
            session_key: compressed_public_key(&secret).unwrap(),
            expire_at: Timestamp::from_millis(expire_at),
        };
        SessionKey::new(secret, info, authorization()).unwrap()
    }

    #[test]
    fn test_signatures_verify_against_session_key() {
        let session = session(10_000);
        let sig = session.sign(b"tx sign doc").unwrap();
        verify_secp256k1(session.public_key(), &sig, b"tx sign doc").unwrap();

        let credential = session.sign_credential(b"tx sign doc").unwrap();
        assert_eq!(credential.session_info, *session.info());
        assert_eq!(credential.authorization, authorization());
    }

    #[test]
    fn test_expiry_boundary() {
        let session = session(10_000);
        assert!(!session.is_expired(Timestamp::from_millis(9_999)));
        assert!(session.is_expired(Timestamp::from_millis(10_000)));
    }

    #[test]
    fn test_mismatched_secret_rejected() {
        let info = SessionInfo {
            session_key: compressed_public_key(&generate_secret()).unwrap(),
            expire_at: Timestamp::from_millis(1),
        };
        let err = SessionKey::new(generate_secret(), info, authorization()).unwrap_err();
        assert!(matches!(err, AuthError::InvalidKeyMaterial(_)));
    }

    #[test]
    fn test_secret_bytes_round_trip() {
        let original = session(5);
        let restored = SessionKey::from_secret_bytes(
            &original.secret_bytes(),
            original.info().clone(),
            original.authorization().clone(),
        )
        .unwrap();
        assert_eq!(restored.public_key(), original.public_key());
    }

    #[test]
    fn test_debug_hides_secret() {
        let rendered = format!("{:?}", session(5));
        assert!(rendered.contains("key_hash"));
        assert!(!rendered.contains("secret"));
    }
}
