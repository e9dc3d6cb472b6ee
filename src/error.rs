//! Crate-level error taxonomy
//!
//! Component errors (`RelayError`, `StoreError`, `PlatformError`,
//! `WalletError`) convert into [`AuthError`]. The UI layer branches on
//! [`AuthError::kind`] and reads the message and recovery hint from
//! [`ErrorKind`]; it never parses error strings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::relay::RelayError;
use crate::session::store::StoreError;

/// The classification every failure reduces to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    UserCancelled,
    DeviceUnsupported,
    InvalidKeyMaterial,
    AuthorizationDenied,
    PairingAborted,
    CredentialRevoked,
    Unknown,
}

/// What the caller should offer the user next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Same operation, same inputs.
    Retry,
    /// Open a new pairing channel and show a new code.
    RetryWithFreshChannel,
    /// Offer the other credential kind.
    SwitchCredential,
    /// Create or restore a credential from scratch.
    ReRegister,
    /// Nothing the user can do; surface and report.
    Report,
}

impl ErrorKind {
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::UserCancelled => "The request was cancelled. You can try again whenever you're ready.",
            ErrorKind::DeviceUnsupported => {
                "This device can't create or use that kind of credential. Try another sign-in method."
            }
            ErrorKind::InvalidKeyMaterial => "The key material for this account is malformed.",
            ErrorKind::AuthorizationDenied => {
                "Your other device did not authorize this session. Scan a new code to try again."
            }
            ErrorKind::PairingAborted => {
                "The connection to your other device was lost. Scan a new code to try again."
            }
            ErrorKind::CredentialRevoked => {
                "This credential is no longer available on this device. Register or restore it again."
            }
            ErrorKind::Unknown => "Something went wrong. Please report this if it keeps happening.",
        }
    }

    pub fn recovery(&self) -> RecoveryAction {
        match self {
            ErrorKind::UserCancelled => RecoveryAction::Retry,
            ErrorKind::DeviceUnsupported => RecoveryAction::SwitchCredential,
            ErrorKind::InvalidKeyMaterial => RecoveryAction::Report,
            ErrorKind::AuthorizationDenied => RecoveryAction::RetryWithFreshChannel,
            ErrorKind::PairingAborted => RecoveryAction::RetryWithFreshChannel,
            ErrorKind::CredentialRevoked => RecoveryAction::ReRegister,
            ErrorKind::Unknown => RecoveryAction::Report,
        }
    }
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Cancelled by user: {0}")]
    UserCancelled(String),

    #[error("Device unsupported: {0}")]
    DeviceUnsupported(String),

    #[error("Invalid key material: {0}")]
    InvalidKeyMaterial(String),

    #[error("Authorization denied ({cause:?}): {reason}")]
    AuthorizationDenied { cause: ErrorKind, reason: String },

    #[error("Pairing aborted: {0}")]
    PairingAborted(String),

    #[error("Credential revoked: {0}")]
    CredentialRevoked(String),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("{0}")]
    Unknown(String),
}

impl From<serde_json::Error> for AuthError {
    fn from(e: serde_json::Error) -> Self {
        AuthError::SerializationError(e.to_string())
    }
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::UserCancelled(_) => ErrorKind::UserCancelled,
            AuthError::DeviceUnsupported(_) => ErrorKind::DeviceUnsupported,
            AuthError::InvalidKeyMaterial(_) => ErrorKind::InvalidKeyMaterial,
            AuthError::AuthorizationDenied { .. } => ErrorKind::AuthorizationDenied,
            AuthError::PairingAborted(_) | AuthError::Relay(_) => ErrorKind::PairingAborted,
            AuthError::CredentialRevoked(_) => ErrorKind::CredentialRevoked,
            AuthError::Storage(_)
            | AuthError::Ledger(_)
            | AuthError::SerializationError(_)
            | AuthError::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// The underlying kind for denied authorizations, `kind()` otherwise.
    pub fn cause_kind(&self) -> ErrorKind {
        match self {
            AuthError::AuthorizationDenied { cause, .. } => *cause,
            other => other.kind(),
        }
    }

    /// The kind shown to the user.
    ///
    /// Malformed key material is a programming or data error, not something
    /// the user can act on: release builds log it and present `Unknown`.
    pub fn presented_kind(&self) -> ErrorKind {
        match self.kind() {
            ErrorKind::InvalidKeyMaterial => {
                log::error!("{}", self);
                if cfg!(debug_assertions) {
                    ErrorKind::InvalidKeyMaterial
                } else {
                    ErrorKind::Unknown
                }
            }
            kind => kind,
        }
    }

    /// A denial reported for a signature that did not check out.
    pub fn denied(reason: impl Into<String>) -> Self {
        AuthError::AuthorizationDenied {
            cause: ErrorKind::AuthorizationDenied,
            reason: reason.into(),
        }
    }

    /// Wrap a credential provider failure as a denied authorization.
    ///
    /// Pairing aborts and already-denied errors pass through unchanged.
    pub fn into_denied(self) -> Self {
        match self {
            AuthError::AuthorizationDenied { .. }
            | AuthError::PairingAborted(_)
            | AuthError::Relay(_) => self,
            other => AuthError::AuthorizationDenied {
                cause: other.kind(),
                reason: other.to_string(),
            },
        }
    }

    /// Rebuild an error reported by a remote peer as `(kind, message)`.
    pub fn from_remote(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::UserCancelled => AuthError::UserCancelled(message),
            ErrorKind::DeviceUnsupported => AuthError::DeviceUnsupported(message),
            ErrorKind::InvalidKeyMaterial => AuthError::InvalidKeyMaterial(message),
            ErrorKind::AuthorizationDenied => AuthError::denied(message),
            ErrorKind::PairingAborted => AuthError::PairingAborted(message),
            ErrorKind::CredentialRevoked => AuthError::CredentialRevoked(message),
            ErrorKind::Unknown => AuthError::Unknown(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const ALL_KINDS: [ErrorKind; 7] = [
        ErrorKind::UserCancelled,
        ErrorKind::DeviceUnsupported,
        ErrorKind::InvalidKeyMaterial,
        ErrorKind::AuthorizationDenied,
        ErrorKind::PairingAborted,
        ErrorKind::CredentialRevoked,
        ErrorKind::Unknown,
    ];

    #[test]
    fn test_user_messages_are_distinct() {
        let messages: HashSet<_> = ALL_KINDS.iter().map(|k| k.user_message()).collect();
        assert_eq!(messages.len(), ALL_KINDS.len());
    }

    #[test]
    fn test_recovery_per_kind() {
        assert_eq!(ErrorKind::UserCancelled.recovery(), RecoveryAction::Retry);
        assert_eq!(ErrorKind::DeviceUnsupported.recovery(), RecoveryAction::SwitchCredential);
        assert_eq!(ErrorKind::AuthorizationDenied.recovery(), RecoveryAction::RetryWithFreshChannel);
        assert_eq!(ErrorKind::PairingAborted.recovery(), RecoveryAction::RetryWithFreshChannel);
        assert_eq!(ErrorKind::CredentialRevoked.recovery(), RecoveryAction::ReRegister);
        assert_eq!(ErrorKind::Unknown.recovery(), RecoveryAction::Report);
    }

    #[test]
    fn test_into_denied_preserves_cause() {
        let err = AuthError::UserCancelled("prompt dismissed".into()).into_denied();
        assert_eq!(err.kind(), ErrorKind::AuthorizationDenied);
        assert_eq!(err.cause_kind(), ErrorKind::UserCancelled);

        let aborted = AuthError::PairingAborted("timeout".into()).into_denied();
        assert_eq!(aborted.kind(), ErrorKind::PairingAborted);

        let twice = AuthError::CredentialRevoked("gone".into()).into_denied().into_denied();
        assert_eq!(twice.cause_kind(), ErrorKind::CredentialRevoked);
    }

    #[test]
    fn test_relay_errors_are_pairing_aborts() {
        let err: AuthError = RelayError::Disconnected.into();
        assert_eq!(err.kind(), ErrorKind::PairingAborted);
    }

    #[test]
    fn test_presented_kind_in_debug_builds() {
        let err = AuthError::InvalidKeyMaterial("bad length".into());
        let expected = if cfg!(debug_assertions) {
            ErrorKind::InvalidKeyMaterial
        } else {
            ErrorKind::Unknown
        };
        assert_eq!(err.presented_kind(), expected);
        assert_eq!(
            AuthError::PairingAborted("x".into()).presented_kind(),
            ErrorKind::PairingAborted
        );
    }

    #[test]
    fn test_from_remote_round_trips_kind() {
        for kind in ALL_KINDS {
            assert_eq!(AuthError::from_remote(kind, "m").kind(), kind);
        }
    }

    #[test]
    fn test_kind_wire_names() {
        let json = serde_json::to_string(&ErrorKind::CredentialRevoked).unwrap();
        assert_eq!(json, "\"credential-revoked\"");
    }
}
