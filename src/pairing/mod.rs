//! Cross-device session pairing
//!
//! A requester (no credential) and a signer (holds the credential) meet on a
//! relay channel named by a scannable code:
//!
//! 1. The requester opens a channel and shows `PairingCode`.
//! 2. The signer scans it and joins the channel.
//! 3. The requester sends `create-session` with its ephemeral session key.
//! 4. The signer authorizes it with its `CredentialProvider` and replies
//!    under the same id, or replies with a rejection.
//! 5. The requester verifies the grant and tears the channel down.
//!
//! `PairingRequester` implements `SessionAuthorizer`, so a paired session is
//! created through `SessionKeyManager::create_session_with` like any other.

pub mod code;
pub mod envelope;
pub mod requester;
pub mod signer;

pub use code::PairingCode;
pub use envelope::{CreateSessionReply, EnvelopeType, PairingEnvelope, RemoteRejection, SessionGrant};
pub use requester::PairingRequester;
pub use signer::{PairingSigner, SignerOutcome};
