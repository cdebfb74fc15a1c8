//! In-process transport
//!
//! Every endpoint joined to a [`MemoryNetwork`] sees every other endpoint as
//! a connected peer. Used by tests, the `testing` harness and the CLI.
//! Endpoints can be marked unreachable (still listed, sends fail) or
//! disconnected (removed), and delivered frames are counted by type byte.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;

use super::transport::{peer_short, InboundMessage, PeerId, Transport, TransportError};

#[derive(Default)]
struct NetworkState {
    endpoints: HashMap<PeerId, mpsc::UnboundedSender<InboundMessage>>,
    unreachable: HashSet<PeerId>,
    /// Type byte of every delivered frame
    delivered: Vec<u8>,
}

/// Shared in-process switch
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl std::fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MemoryNetwork")
            .field("endpoints", &state.endpoints.len())
            .field("delivered", &state.delivered.len())
            .finish()
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Attach an endpoint with the given ID, replacing any previous one
    pub fn join(&self, id: PeerId) -> MemoryTransport {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().endpoints.insert(id, tx);
        MemoryTransport {
            id,
            network: self.clone(),
            inbox: tokio::sync::Mutex::new(rx),
        }
    }

    /// Remove an endpoint; its `recv` returns `None` once drained
    pub fn disconnect(&self, id: &PeerId) {
        let mut state = self.lock();
        state.endpoints.remove(id);
        state.unreachable.remove(id);
    }

    /// Keep the endpoint listed but make sends to it fail
    pub fn set_unreachable(&self, id: &PeerId, unreachable: bool) {
        let mut state = self.lock();
        if unreachable {
            state.unreachable.insert(*id);
        } else {
            state.unreachable.remove(id);
        }
    }

    /// Number of delivered frames whose type byte is `tag`
    pub fn delivered_with_tag(&self, tag: u8) -> usize {
        self.lock().delivered.iter().filter(|&&t| t == tag).count()
    }

    pub fn reset_counters(&self) {
        self.lock().delivered.clear();
    }

    fn peers_of(&self, id: &PeerId) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self
            .lock()
            .endpoints
            .keys()
            .filter(|peer| *peer != id)
            .copied()
            .collect();
        peers.sort();
        peers
    }

    fn deliver(&self, from: PeerId, to: &PeerId, bytes: &[u8]) -> Result<(), TransportError> {
        let mut state = self.lock();
        if state.unreachable.contains(to) {
            return Err(TransportError::Unreachable(peer_short(to)));
        }
        let inbox = state
            .endpoints
            .get(to)
            .ok_or_else(|| TransportError::NotConnected(peer_short(to)))?;

        inbox
            .send(InboundMessage {
                from,
                bytes: bytes.to_vec(),
            })
            .map_err(|_| TransportError::Closed)?;

        if let Some(&tag) = bytes.first() {
            state.delivered.push(tag);
        }
        trace!(from = %peer_short(&from), to = %peer_short(to), len = bytes.len(), "memory: delivered");
        Ok(())
    }
}

/// One endpoint on a [`MemoryNetwork`]
pub struct MemoryTransport {
    id: PeerId,
    network: MemoryNetwork,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<InboundMessage>>,
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("id", &peer_short(&self.id))
            .finish()
    }
}

impl MemoryTransport {
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_id(&self) -> PeerId {
        self.id
    }

    async fn connected_peers(&self) -> Vec<PeerId> {
        self.network.peers_of(&self.id)
    }

    async fn send(&self, peer: &PeerId, bytes: &[u8]) -> Result<(), TransportError> {
        self.network.deliver(self.id, peer, bytes)
    }

    async fn recv(&self) -> Option<InboundMessage> {
        self.inbox.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_peers_and_delivery() {
        let net = MemoryNetwork::new();
        let a = net.join([1; 32]);
        let b = net.join([2; 32]);

        assert_eq!(a.connected_peers().await, vec![[2; 32]]);
        a.send(&[2; 32], &[0x02, 9]).await.unwrap();

        let msg = b.recv().await.unwrap();
        assert_eq!(msg.from, [1; 32]);
        assert_eq!(msg.bytes, vec![0x02, 9]);
        assert_eq!(net.delivered_with_tag(0x02), 1);
    }

    #[tokio::test]
    async fn test_unreachable_and_disconnected() {
        let net = MemoryNetwork::new();
        let a = net.join([1; 32]);
        let _b = net.join([2; 32]);

        net.set_unreachable(&[2; 32], true);
        assert!(matches!(
            a.send(&[2; 32], b"x").await,
            Err(TransportError::Unreachable(_))
        ));
        assert_eq!(a.connected_peers().await.len(), 1);

        net.disconnect(&[2; 32]);
        assert!(a.connected_peers().await.is_empty());
        assert!(matches!(
            a.send(&[2; 32], b"x").await,
            Err(TransportError::NotConnected(_))
        ));
        assert_eq!(net.delivered_with_tag(b'x'), 0);
    }
}
