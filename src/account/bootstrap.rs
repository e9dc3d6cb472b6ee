//! Account bootstrap: predict a credential's address and register it.

use super::address::{derive_address, Address};
use super::salt::{derive_salt, SaltInput, Username};
use crate::credential::CredentialProvider;
use crate::error::AuthError;
use crate::identity::{Key, KeyHash};
use crate::ledger::{AccountType, LedgerClient, RegisterUser, RegistrationMessage};

/// A submitted registration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registration {
    pub username: Username,
    pub key: Key,
    pub key_hash: KeyHash,
    pub salt_input: SaltInput,
    /// Where the ledger will deploy the account.
    pub address: Address,
}

/// The address the ledger will give an account of `account_type` for this
/// key and salt input.
pub async fn predict_address(
    ledger: &dyn LedgerClient,
    account_type: AccountType,
    key: &Key,
    key_hash: &KeyHash,
    salt_input: &SaltInput,
) -> Result<Address, AuthError> {
    let app = ledger.app_config().await?;
    let code_hash = ledger.account_type_code_hash(account_type).await?;
    let salt = derive_salt(key, key_hash, salt_input);
    Ok(derive_address(&app.account_factory, &code_hash, salt.as_bytes()))
}

/// Register `username` for the provider's credential, with a spot account
/// salted by `seed`.
pub async fn register_account(
    ledger: &dyn LedgerClient,
    provider: &dyn CredentialProvider,
    username: Username,
    seed: u32,
    chain_id: &str,
) -> Result<Registration, AuthError> {
    let credential = provider
        .credential()
        .ok_or_else(|| AuthError::CredentialRevoked("create a credential before registering".into()))?;
    let key_hash = credential.key_hash()?;
    let salt_input = SaltInput::Seed(seed);
    let address = predict_address(ledger, AccountType::Spot, &credential.public_key, &key_hash, &salt_input).await?;

    let message = RegistrationMessage {
        chain_id: chain_id.to_string(),
        username: username.clone(),
    };
    let signed = provider.sign(&message.sign_bytes()?).await?;
    if signed.key_hash != key_hash {
        return Err(AuthError::CredentialRevoked(format!(
            "provider signed with {} instead of {}",
            signed.key_hash, key_hash
        )));
    }

    ledger
        .register_user(&RegisterUser {
            key: credential.public_key,
            key_hash,
            salt_input: salt_input.clone(),
            username: username.clone(),
            signature: signed.signature,
        })
        .await?;
    log::info!("Registered '{}' as {} ({})", username, address, key_hash);

    Ok(Registration {
        username,
        key: credential.public_key,
        key_hash,
        salt_input,
        address,
    })
}
