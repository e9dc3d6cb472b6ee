//! External-key credentials: an account held by an external wallet.

use async_trait::async_trait;
use thiserror::Error;

use super::verify::{passkey_challenge, recover_eip191};
use super::{Credential, CredentialCache, CredentialKind, CredentialProvider, Signature, StandardCredential};
use crate::error::AuthError;
use crate::identity::{Key, KeyAlgo, KeyHash};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error("User rejected the request in the wallet")]
    Rejected,

    #[error("Account is not authorized by the wallet")]
    Unauthorized,

    #[error("No wallet detected: {0}")]
    NotDetected(String),

    #[error("Wallet error: {0}")]
    Other(String),
}

impl From<WalletError> for AuthError {
    fn from(e: WalletError) -> Self {
        match e {
            WalletError::Rejected => AuthError::UserCancelled(e.to_string()),
            WalletError::Unauthorized => AuthError::CredentialRevoked(e.to_string()),
            WalletError::NotDetected(_) => AuthError::DeviceUnsupported(e.to_string()),
            WalletError::Other(_) => AuthError::Unknown(e.to_string()),
        }
    }
}

/// An external wallet that holds accounts and personal-signs messages.
#[async_trait]
pub trait ExternalSigner: Send + Sync {
    /// Ask the wallet for its active account.
    async fn request_account(&self) -> Result<[u8; 20], WalletError>;

    /// EIP-191 personal-sign `message` with `account`, returning `r ‖ s ‖ v`.
    async fn personal_sign(&self, account: &[u8; 20], message: &[u8]) -> Result<[u8; 65], WalletError>;
}

pub struct ExternalWalletProvider<W> {
    wallet: W,
    cache: CredentialCache,
}

impl<W: ExternalSigner> ExternalWalletProvider<W> {
    pub fn new(wallet: W) -> Self {
        Self {
            wallet,
            cache: CredentialCache::default(),
        }
    }

    pub fn wallet(&self) -> &W {
        &self.wallet
    }
}

#[async_trait]
impl<W: ExternalSigner> CredentialProvider for ExternalWalletProvider<W> {
    fn kind(&self) -> CredentialKind {
        CredentialKind::ExternalKey
    }

    /// Connects the wallet's active account and proves control of it by
    /// personal-signing `challenge`.
    async fn create_credential(&self, challenge: &[u8], account_hint: &str) -> Result<Credential, AuthError> {
        let account = self.wallet.request_account().await?;
        let proof = self.wallet.personal_sign(&account, challenge).await?;
        if recover_eip191(&proof, challenge)? != account {
            return Err(AuthError::InvalidKeyMaterial(
                "wallet signature does not belong to its account".into(),
            ));
        }

        let credential = Credential {
            kind: CredentialKind::ExternalKey,
            public_key: Key::from_algo_bytes(KeyAlgo::Ethereum, &account)?,
            identifier: account.to_vec(),
        };
        let key_hash = self.cache.set(credential.clone())?;
        log::info!("Connected wallet account 0x{} as {} ({})", hex::encode(account), key_hash, account_hint);
        Ok(credential)
    }

    async fn sign(&self, sign_bytes: &[u8]) -> Result<StandardCredential, AuthError> {
        let (credential, key_hash) = self.cache.require()?;
        let account: [u8; 20] = match credential.public_key {
            Key::Ethereum(address) => address,
            other => {
                return Err(AuthError::InvalidKeyMaterial(format!(
                    "wallet credential holds a {} key",
                    other.algo()
                )))
            }
        };

        let active = self.wallet.request_account().await?;
        if active != account {
            return Err(AuthError::CredentialRevoked(format!(
                "wallet switched from 0x{} to 0x{}",
                hex::encode(account),
                hex::encode(active)
            )));
        }

        let digest = passkey_challenge(sign_bytes);
        let sig = self.wallet.personal_sign(&account, &digest).await?;
        Ok(StandardCredential {
            key_hash,
            signature: Signature::Eip191(sig),
        })
    }

    fn credential(&self) -> Option<Credential> {
        self.cache.get().map(|(credential, _)| credential)
    }

    fn key_hash(&self) -> Option<KeyHash> {
        self.cache.get().map(|(_, key_hash)| key_hash)
    }
}
