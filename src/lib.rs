// Authlink - Credential-backed accounts, session keys and cross-device pairing

pub mod account;
pub mod config;
pub mod credential;
pub mod encoding;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod pairing;
pub mod relay;
pub mod session;

pub use error::{AuthError, ErrorKind, RecoveryAction};
