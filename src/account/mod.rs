//! Account identity on the ledger
//!
//! An account's address is fixed before it exists: it follows from the
//! factory address, the account type's code hash and a salt derived from
//! the credential.
//!
//! - `salt`: `derive_salt` and its two input modes
//! - `address`: `derive_address`
//! - `bootstrap`: address prediction and registration against a ledger

pub mod address;
pub mod bootstrap;
pub mod salt;

pub use address::{derive_address, Address};
pub use bootstrap::{predict_address, register_account, Registration};
pub use salt::{derive_salt, AccountSalt, SaltInput, Username};
