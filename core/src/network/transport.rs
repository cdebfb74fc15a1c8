//! Peer transport contract
//!
//! The node does not own a network stack. It talks to peers through this
//! trait: enumerate connected peers, send a datagram to one of them, and pull
//! inbound datagrams. Delivery is at-most-once and best-effort with no
//! ordering guarantee across peers.

use async_trait::async_trait;

/// Peer identifier (the peer's Ed25519 public key)
pub type PeerId = [u8; 32];

/// Short hex form of a peer ID, for logs
pub fn peer_short(peer: &PeerId) -> String {
    hex::encode(&peer[..4])
}

/// A datagram received from a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub from: PeerId,
    pub bytes: Vec<u8>,
}

/// Transport failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("peer {0} is not connected")]
    NotConnected(String),
    #[error("peer {0} is unreachable")]
    Unreachable(String),
    #[error("transport closed")]
    Closed,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Our own peer ID
    fn local_id(&self) -> PeerId;

    /// Peers currently reachable (excluding ourselves)
    async fn connected_peers(&self) -> Vec<PeerId>;

    /// Send one datagram to `peer`
    async fn send(&self, peer: &PeerId, bytes: &[u8]) -> Result<(), TransportError>;

    /// Next inbound datagram; `None` once the transport is closed
    async fn recv(&self) -> Option<InboundMessage>;
}
