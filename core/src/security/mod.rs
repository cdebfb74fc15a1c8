//! Security module for Mooring
//!
//! Provides cryptographic operations:
//! - Key pair generation (Ed25519)
//! - Manifest signing and verification
//!
//! # Crypto Model
//!
//! Every deployer signs the canonical manifest hash with its Ed25519 key.
//! The public key travels in the manifest (`deployedBy`), so any peer can
//! verify a bundle without trusting the peer that served it.

pub mod create_key_pair;
pub mod sign;

// Re-export commonly used items
pub use create_key_pair::{generate_key_pair, key_pair_from_bytes, KeyPair};
pub use sign::{sign_digest, verify_digest};
