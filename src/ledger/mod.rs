//! The ledger's read and registration surface
//!
//! Only what account bootstrap needs: the factory address, the code hash of
//! an account type and user registration. `HttpLedgerClient` talks to a
//! ledger gateway over HTTP; tests substitute their own `LedgerClient`.

pub mod http;

pub use http::HttpLedgerClient;

use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::account::{Address, SaltInput, Username};
use crate::credential::Signature;
use crate::error::AuthError;
use crate::identity::{Hash256, Key, KeyHash};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Spot,
    Margin,
    Multi,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Spot => "spot",
            AccountType::Margin => "margin",
            AccountType::Multi => "multi",
        }
    }
}

impl FromStr for AccountType {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spot" => Ok(AccountType::Spot),
            "margin" => Ok(AccountType::Margin),
            "multi" => Ok(AccountType::Multi),
            other => Err(AuthError::Ledger(format!("unknown account type '{}'", other))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// The account factory that deploys user accounts.
    pub account_factory: Address,
}

/// What the ledger needs to create a user account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterUser {
    pub key: Key,
    pub key_hash: KeyHash,
    pub salt_input: SaltInput,
    pub username: Username,
    pub signature: Signature,
}

/// The message a user signs to register `username` on `chain_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationMessage {
    pub chain_id: String,
    pub username: Username,
}

impl RegistrationMessage {
    /// Compact JSON with fields in alphabetical order.
    pub fn sign_bytes(&self) -> Result<Vec<u8>, AuthError> {
        Ok(serde_json::to_vec(&serde_json::to_value(self)?)?)
    }
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn app_config(&self) -> Result<AppConfig, AuthError>;

    async fn account_type_code_hash(&self, account_type: AccountType) -> Result<Hash256, AuthError>;

    async fn register_user(&self, registration: &RegisterUser) -> Result<(), AuthError>;
}
