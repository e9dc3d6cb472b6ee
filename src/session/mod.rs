//! Session keys
//!
//! A session is an ephemeral secp256k1 key authorized once by the user's
//! long-lived credential, then used to sign transactions without prompting
//! until it expires.
//!
//! - `info`: the wire types (`SessionInfo`, `SessionCredential`, `Timestamp`)
//! - `key`: `SessionKey`, the secret plus its authorization
//! - `manager`: `SessionKeyManager`, the lifecycle state machine
//! - `store`: persistence of the active session
//! - `clock`: time source for expiry

pub mod clock;
pub mod info;
pub mod key;
pub mod manager;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use info::{SessionCredential, SessionInfo, Timestamp, TxCredential};
pub use key::SessionKey;
pub use manager::{
    LocalAuthorizer, SessionAuthorizer, SessionConfig, SessionEvent, SessionKeyManager, SessionState,
};
pub use store::{FileSessionStore, MemorySessionStore, SessionStore, StoreError};
