//! Key material and the key hashes derived from it
//!
//! - `Key`: a curve public key or an externally-held account address
//! - `KeyHash`: the stable 32-byte account identifier derived from a key
//! - `Hash256`: a plain SHA-256 digest (ledger code hashes)

pub mod key;
pub mod key_hash;

pub use key::{Hash256, Key, KeyAlgo};
pub use key_hash::KeyHash;
