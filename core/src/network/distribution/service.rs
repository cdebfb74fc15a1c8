//! Distribution Service - core infrastructure
//!
//! This module holds the service struct, its configuration and error types,
//! and the fan-out primitive. Behaviour is organized in:
//! - `outgoing.rs` - announce, request and publish
//! - `incoming.rs` - handlers for inbound messages

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, warn};

use crate::bundle::{ContentHash, Manifest};
use crate::data::cache::{Cache, CacheError};
use crate::network::singleflight::SingleFlight;
use crate::network::transport::{peer_short, PeerId, Transport};
use crate::network::wire::WireError;
use crate::protocol::events::NodeEvent;

use super::protocol::{Envelope, MessageBody};

/// Configuration for the Distribution service
#[derive(Debug, Clone)]
pub struct DistributionConfig {
    /// How long a request waits for the first response
    pub request_timeout: Duration,
    /// Maximum sends in flight during a broadcast
    pub broadcast_concurrency: usize,
    /// Capacity of the node event channel
    pub event_capacity: usize,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            broadcast_concurrency: 8,
            event_capacity: 256,
        }
    }
}

/// Error during Distribution operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DistributionError {
    /// No peer answered before the timeout (or there were no peers)
    #[error("not found on network: {0}")]
    NotFound(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("cache error: {0}")]
    Cache(String),
}

impl From<WireError> for DistributionError {
    fn from(e: WireError) -> Self {
        DistributionError::Encode(e.to_string())
    }
}

impl From<CacheError> for DistributionError {
    fn from(e: CacheError) -> Self {
        DistributionError::Cache(e.to_string())
    }
}

/// A peer a send failed for, with the reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerFailure {
    pub peer: PeerId,
    pub reason: String,
}

/// Per-peer outcome of a broadcast
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub delivered: Vec<PeerId>,
    pub failed: Vec<PeerFailure>,
}

impl FanOutReport {
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }
}

/// Waiters for responses, keyed by what was requested
pub(super) type Pending<K, V> = Mutex<HashMap<K, oneshot::Sender<V>>>;

pub(super) fn lock<K, V>(map: &Pending<K, V>) -> MutexGuard<'_, HashMap<K, oneshot::Sender<V>>> {
    map.lock().unwrap_or_else(|e| e.into_inner())
}

/// Removes a pending waiter when the request finishes or is dropped
pub(super) struct PendingGuard<'a, K: Eq + Hash, V> {
    map: &'a Pending<K, V>,
    key: K,
}

impl<'a, K: Eq + Hash + Clone, V> PendingGuard<'a, K, V> {
    pub(super) fn register(map: &'a Pending<K, V>, key: K) -> (Self, oneshot::Receiver<V>) {
        let (tx, rx) = oneshot::channel();
        lock(map).insert(key.clone(), tx);
        (Self { map, key }, rx)
    }
}

impl<K: Eq + Hash, V> Drop for PendingGuard<'_, K, V> {
    fn drop(&mut self) {
        lock(self.map).remove(&self.key);
    }
}

/// Distribution service
///
/// Owns request coalescing and response routing. Shared as `Arc<Self>` so
/// singleflight futures can outlive the caller that started them.
pub struct DistributionService {
    pub(super) transport: Arc<dyn Transport>,
    pub(super) cache: Cache,
    /// Our hex address, stamped on every envelope
    pub(super) local_address: String,
    pub(super) config: DistributionConfig,
    pub(super) pending_manifests: Pending<String, Manifest>,
    pub(super) pending_chunks: Pending<ContentHash, Vec<u8>>,
    pub(super) manifest_flights: SingleFlight<String, Result<Manifest, DistributionError>>,
    pub(super) chunk_flights: SingleFlight<String, Result<Vec<u8>, DistributionError>>,
    pub(super) events: broadcast::Sender<NodeEvent>,
}

impl std::fmt::Debug for DistributionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributionService")
            .field("local_address", &self.local_address)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DistributionService {
    pub fn new(
        transport: Arc<dyn Transport>,
        cache: Cache,
        local_address: String,
        config: DistributionConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Arc::new(Self {
            transport,
            cache,
            local_address,
            config,
            pending_manifests: Mutex::new(HashMap::new()),
            pending_chunks: Mutex::new(HashMap::new()),
            manifest_flights: SingleFlight::new(),
            chunk_flights: SingleFlight::new(),
            events,
        })
    }

    pub fn local_address(&self) -> &str {
        &self.local_address
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn config(&self) -> &DistributionConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Subscribe to node events
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    pub(super) fn emit(&self, event: NodeEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Wrap a body in an envelope stamped with our address and clock
    pub(super) fn envelope(&self, app_id: &str, body: MessageBody) -> Envelope {
        Envelope {
            app_id: app_id.to_string(),
            timestamp: self.cache.now(),
            sender_address: self.local_address.clone(),
            body,
        }
    }

    /// Send one envelope to a single peer
    pub(super) async fn send_to(
        &self,
        peer: &PeerId,
        envelope: &Envelope,
    ) -> Result<(), DistributionError> {
        let bytes = envelope.encode()?;
        self.transport
            .send(peer, &bytes)
            .await
            .map_err(|e| DistributionError::Transport(e.to_string()))
    }

    /// Send `bytes` to every peer with at most `broadcast_concurrency` sends
    /// in flight. Failures are recorded, never fatal.
    pub async fn fan_out(&self, peers: &[PeerId], bytes: &[u8]) -> FanOutReport {
        let concurrency = self.config.broadcast_concurrency.max(1);
        let results: Vec<_> = stream::iter(peers.iter().copied())
            .map(|peer| async move { (peer, self.transport.send(&peer, bytes).await) })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut report = FanOutReport::default();
        for (peer, result) in results {
            match result {
                Ok(()) => report.delivered.push(peer),
                Err(e) => {
                    warn!(peer = %peer_short(&peer), error = %e, "fan-out: send failed");
                    report.failed.push(PeerFailure {
                        peer,
                        reason: e.to_string(),
                    });
                }
            }
        }

        debug!(
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "fan-out complete"
        );
        report
    }

    /// Encode an envelope and fan it out to every connected peer
    pub(super) async fn broadcast(
        &self,
        envelope: &Envelope,
    ) -> Result<FanOutReport, DistributionError> {
        let bytes = envelope.encode()?;
        let peers = self.transport.connected_peers().await;
        Ok(self.fan_out(&peers, &bytes).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::clock::ManualClock;
    use crate::data::start::start_memory_db;
    use crate::network::memory::MemoryNetwork;

    fn service(net: &MemoryNetwork, id: u8, concurrency: usize) -> Arc<DistributionService> {
        let db = Arc::new(tokio::sync::Mutex::new(start_memory_db().unwrap()));
        let cache = Cache::new(db, Arc::new(ManualClock::new(0)));
        let config = DistributionConfig {
            broadcast_concurrency: concurrency,
            ..DistributionConfig::default()
        };
        DistributionService::new(Arc::new(net.join([id; 32])), cache, hex::encode([id; 32]), config)
    }

    #[tokio::test]
    async fn test_fan_out_isolates_failures() {
        let net = MemoryNetwork::new();
        let svc = service(&net, 1, 2);
        let _b = net.join([2; 32]);
        let _c = net.join([3; 32]);
        let _d = net.join([4; 32]);
        net.set_unreachable(&[3; 32], true);

        let peers = svc.transport.connected_peers().await;
        let report = svc.fan_out(&peers, &[0x06, 0, 0, 0, 0]).await;

        assert_eq!(report.attempted(), 3);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].peer, [3; 32]);
        let mut delivered = report.delivered.clone();
        delivered.sort();
        assert_eq!(delivered, vec![[2; 32], [4; 32]]);
    }

    #[tokio::test]
    async fn test_pending_guard_cleans_up() {
        let net = MemoryNetwork::new();
        let svc = service(&net, 1, 1);
        {
            let (_guard, _rx) = PendingGuard::register(&svc.pending_manifests, "app".to_string());
            assert_eq!(lock(&svc.pending_manifests).len(), 1);
        }
        assert!(lock(&svc.pending_manifests).is_empty());
    }
}
