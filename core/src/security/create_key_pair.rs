//! Deployer key pairs
//!
//! Every node signs the manifests it deploys with an Ed25519 key. The public
//! half, hex encoded, is the node's address (`deployedBy` / `senderAddress`).

use ed25519_dalek::SigningKey;
use rand::RngCore;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// An Ed25519 key pair. The secret half is zeroed on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyPair {
    pub private_key: [u8; 32],
    #[zeroize(skip)]
    pub public_key: [u8; 32],
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("private_key", &"[REDACTED]")
            .field("public_key", &hex::encode(self.public_key))
            .finish()
    }
}

impl KeyPair {
    /// Hex encoded public key, used as the peer address
    pub fn address(&self) -> String {
        hex::encode(self.public_key)
    }
}

/// Generate a new random key pair from the OS RNG
pub fn generate_key_pair() -> KeyPair {
    let mut secret_bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut secret_bytes);

    let keypair = key_pair_from_bytes(&secret_bytes);
    secret_bytes.zeroize();
    keypair
}

/// Rebuild a key pair from stored secret bytes
pub fn key_pair_from_bytes(private_key: &[u8; 32]) -> KeyPair {
    let signing_key = SigningKey::from_bytes(private_key);

    KeyPair {
        private_key: signing_key.to_bytes(),
        public_key: signing_key.verifying_key().to_bytes(),
    }
}
