//! Signature verification, performed the way the ledger performs it.
//!
//! - Passkey: the client data's `challenge` must be base64url(SHA-256(sign
//!   bytes)) and the P-256 signature covers
//!   SHA-256(authenticator_data ‖ SHA-256(client_data)).
//! - secp256k1: ECDSA over SHA-256(sign bytes).
//! - EIP-191: personal-sign over the 32-byte SHA-256(sign bytes); the
//!   recovered address must equal the key.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use sha3::Keccak256;

use super::{PasskeySignature, Signature};
use crate::error::AuthError;
use crate::identity::Key;

pub const WEBAUTHN_GET: &str = "webauthn.get";

#[derive(Deserialize)]
struct ClientData {
    #[serde(rename = "type")]
    kind: String,
    challenge: String,
}

/// The challenge a platform authenticator is asked to sign.
pub fn passkey_challenge(sign_bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(sign_bytes).into()
}

/// Keccak-256 of the EIP-191 personal-message envelope around `message`.
pub fn personal_sign_hash(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(format!("\x19Ethereum Signed Message:\n{}", message.len()).as_bytes());
    hasher.update(message);
    hasher.finalize().into()
}

/// The account address for a secp256k1 key.
pub fn eth_address(key: &k256::ecdsa::VerifyingKey) -> [u8; 20] {
    let point = key.to_encoded_point(false);
    let digest = Keccak256::digest(&point.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&digest[12..]);
    address
}

pub fn verify_standard(key: &Key, signature: &Signature, sign_bytes: &[u8]) -> Result<(), AuthError> {
    match (key, signature) {
        (Key::Secp256r1(public_key), Signature::Passkey(sig)) => {
            verify_passkey(public_key, sig, sign_bytes)
        }
        (Key::Secp256k1(public_key), Signature::Secp256k1(sig)) => {
            verify_secp256k1(public_key, sig, sign_bytes)
        }
        (Key::Ethereum(address), Signature::Eip191(sig)) => {
            let recovered = recover_eip191(sig, &passkey_challenge(sign_bytes))?;
            if &recovered != address {
                return Err(AuthError::denied(format!(
                    "signature recovers to 0x{}, expected 0x{}",
                    hex::encode(recovered),
                    hex::encode(address)
                )));
            }
            Ok(())
        }
        (key, _) => Err(AuthError::denied(format!(
            "signature type does not match {} key",
            key.algo()
        ))),
    }
}

pub fn verify_passkey(
    public_key: &[u8; 33],
    signature: &PasskeySignature,
    sign_bytes: &[u8],
) -> Result<(), AuthError> {
    use p256::ecdsa::signature::hazmat::PrehashVerifier;

    let client_data: ClientData = serde_json::from_slice(&signature.client_data)
        .map_err(|e| AuthError::denied(format!("malformed client data: {}", e)))?;
    if client_data.kind != WEBAUTHN_GET {
        return Err(AuthError::denied(format!(
            "client data type '{}', expected '{}'",
            client_data.kind, WEBAUTHN_GET
        )));
    }
    let expected = URL_SAFE_NO_PAD.encode(passkey_challenge(sign_bytes));
    if client_data.challenge != expected {
        return Err(AuthError::denied("client data challenge does not match sign bytes"));
    }

    let verifying_key = p256::ecdsa::VerifyingKey::from_sec1_bytes(public_key)
        .map_err(|e| AuthError::InvalidKeyMaterial(format!("secp256r1 key: {}", e)))?;
    let sig = p256::ecdsa::Signature::from_slice(&signature.sig)
        .map_err(|e| AuthError::denied(format!("malformed passkey signature: {}", e)))?;

    let mut hasher = Sha256::new();
    hasher.update(&signature.authenticator_data);
    hasher.update(Sha256::digest(&signature.client_data));
    let signed = hasher.finalize();

    verifying_key
        .verify_prehash(&signed, &sig)
        .map_err(|_| AuthError::denied("passkey signature does not verify"))
}

pub fn verify_secp256k1(public_key: &[u8; 33], sig: &[u8; 64], sign_bytes: &[u8]) -> Result<(), AuthError> {
    use k256::ecdsa::signature::hazmat::PrehashVerifier;

    let verifying_key = k256::ecdsa::VerifyingKey::from_sec1_bytes(public_key)
        .map_err(|e| AuthError::InvalidKeyMaterial(format!("secp256k1 key: {}", e)))?;
    let sig = k256::ecdsa::Signature::from_slice(sig)
        .map_err(|e| AuthError::denied(format!("malformed secp256k1 signature: {}", e)))?;

    verifying_key
        .verify_prehash(&Sha256::digest(sign_bytes), &sig)
        .map_err(|_| AuthError::denied("secp256k1 signature does not verify"))
}

/// Recover the address that personal-signed `message`.
pub fn recover_eip191(sig: &[u8; 65], message: &[u8]) -> Result<[u8; 20], AuthError> {
    let v = match sig[64] {
        v @ (0 | 1) => v,
        v @ (27 | 28) => v - 27,
        other => return Err(AuthError::denied(format!("invalid recovery byte {}", other))),
    };
    let recovery_id = k256::ecdsa::RecoveryId::from_byte(v)
        .ok_or_else(|| AuthError::denied(format!("invalid recovery byte {}", v)))?;
    let signature = k256::ecdsa::Signature::from_slice(&sig[..64])
        .map_err(|e| AuthError::denied(format!("malformed personal signature: {}", e)))?;

    let verifying_key = k256::ecdsa::VerifyingKey::recover_from_prehash(
        &personal_sign_hash(message),
        &signature,
        recovery_id,
    )
    .map_err(|_| AuthError::denied("personal signature does not recover"))?;

    Ok(eth_address(&verifying_key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_personal_sign_hash_known_value() {
        // Keccak-256 of "\x19Ethereum Signed Message:\n5hello"
        assert_eq!(
            hex::encode(personal_sign_hash(b"hello")),
            "50b2c43fd39106bafbba0da34fc430e1f91e3c96ea2acee2bc34119f92b37750"
        );
    }

    #[test]
    fn test_mismatched_signature_type_denied() {
        let key = Key::Ethereum([1u8; 20]);
        let err = verify_standard(&key, &Signature::Secp256k1([0u8; 64]), b"x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthorizationDenied);
    }

    #[test]
    fn test_bad_recovery_byte_denied() {
        let mut sig = [1u8; 65];
        sig[64] = 5;
        assert!(recover_eip191(&sig, b"x").is_err());
    }

    #[test]
    fn test_passkey_wrong_client_data_type() {
        let mut point = [0x11u8; 33];
        point[0] = 0x02;
        let sig = PasskeySignature {
            authenticator_data: vec![0u8; 37],
            client_data: br#"{"type":"webauthn.create","challenge":"x"}"#.to_vec(),
            sig: [0u8; 64],
        };
        let err = verify_passkey(&point, &sig, b"sign bytes").unwrap_err();
        assert!(err.to_string().contains("webauthn.create"));
    }
}
