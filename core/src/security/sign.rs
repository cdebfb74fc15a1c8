//! Manifest signing
//!
//! ```text
//! signature = Ed25519_Sign(private_key, manifestHash)
//! ```
//!
//! The signed message is the raw 32-byte canonical manifest hash. This is the
//! only signing contract in the crate: deploy, broadcast and load all go
//! through these two functions.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::bundle::ContentHash;

/// Sign a digest with a 32-byte Ed25519 secret key
pub fn sign_digest(private_key: &[u8; 32], digest: &ContentHash) -> [u8; 64] {
    let signing_key = SigningKey::from_bytes(private_key);
    let signature: Signature = signing_key.sign(digest.as_bytes());
    signature.to_bytes()
}

/// Verify a digest signature.
///
/// Returns `false` for malformed public keys as well as bad signatures.
pub fn verify_digest(public_key: &[u8; 32], digest: &ContentHash, signature: &[u8; 64]) -> bool {
    let verifying_key = match VerifyingKey::from_bytes(public_key) {
        Ok(key) => key,
        Err(_) => {
            tracing::trace!("verify_digest: invalid public key bytes");
            return false;
        }
    };

    let signature = Signature::from_bytes(signature);
    verifying_key.verify(digest.as_bytes(), &signature).is_ok()
}
