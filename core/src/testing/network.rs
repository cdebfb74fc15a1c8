//! Test network - a set of real Nodes on one in-process switch
//!
//! Every node gets a fresh in-memory database and a random transport ID. All
//! nodes share one manually driven clock, so expiry can be tested without
//! sleeping.

use std::sync::Arc;
use std::time::Duration;

use crate::data::clock::ManualClock;
use crate::network::memory::MemoryNetwork;
use crate::network::transport::PeerId;
use crate::protocol::{MooringError, Node, NodeConfig};

/// Start time of the shared clock (Unix milliseconds)
pub const TEST_EPOCH_MILLIS: i64 = 1_700_000_000_000;

/// How long `wait_*` helpers poll before giving up
const WAIT_LIMIT: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// A simulated network of Mooring nodes
pub struct TestNetwork {
    net: MemoryNetwork,
    clock: Arc<ManualClock>,
    /// All nodes in the network (index = node id)
    nodes: Vec<Node>,
    /// Transport ID of each node
    peer_ids: Vec<PeerId>,
}

impl std::fmt::Debug for TestNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestNetwork")
            .field("nodes", &self.nodes.len())
            .field("net", &self.net)
            .finish()
    }
}

impl TestNetwork {
    /// Create a new empty test network
    pub fn new() -> Self {
        Self {
            net: MemoryNetwork::new(),
            clock: Arc::new(ManualClock::new(TEST_EPOCH_MILLIS)),
            nodes: Vec::new(),
            peer_ids: Vec::new(),
        }
    }

    /// Create a network with N nodes using [`NodeConfig::for_testing`]
    pub async fn with_nodes(count: usize) -> Result<Self, MooringError> {
        let mut network = Self::new();
        for _ in 0..count {
            network.add_node().await?;
        }
        Ok(network)
    }

    /// Add a new node to the network
    pub async fn add_node(&mut self) -> Result<usize, MooringError> {
        self.add_node_with_config(NodeConfig::for_testing()).await
    }

    /// Add a node with a custom configuration
    pub async fn add_node_with_config(&mut self, config: NodeConfig) -> Result<usize, MooringError> {
        let peer_id: PeerId = rand::random();
        let transport = Arc::new(self.net.join(peer_id));
        let node = Node::open_with_clock(config, transport, self.clock.clone()).await?;

        let index = self.nodes.len();
        self.nodes.push(node);
        self.peer_ids.push(peer_id);
        Ok(index)
    }

    /// Get a node by index
    pub fn node(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    /// Transport ID of a node
    pub fn peer_id(&self, index: usize) -> PeerId {
        self.peer_ids[index]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The shared switch (delivery counters, reachability)
    pub fn network(&self) -> &MemoryNetwork {
        &self.net
    }

    /// The shared clock
    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    /// Move the shared clock forward
    pub fn advance(&self, millis: i64) {
        self.clock.advance(millis);
    }

    /// Keep a node listed but make sends to it fail
    pub fn set_unreachable(&self, index: usize, unreachable: bool) {
        self.net.set_unreachable(&self.peer_ids[index], unreachable);
    }

    /// Remove a node from the switch
    pub fn disconnect(&self, index: usize) {
        self.net.disconnect(&self.peer_ids[index]);
    }

    /// Wait until a node has a manifest for `app_id` (fresh or stale).
    /// Returns false if it did not arrive in time.
    pub async fn wait_for_app(&self, index: usize, app_id: &str) -> bool {
        let cache = self.nodes[index].cache();
        let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
        while tokio::time::Instant::now() < deadline {
            if matches!(cache.peek_app(app_id).await, Ok(Some(_))) {
                return true;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        false
    }

    /// Wait until a node holds `data` under `app_id`/`key`
    pub async fn wait_for_state(&self, index: usize, app_id: &str, key: &str, data: &[u8]) -> bool {
        let cache = self.nodes[index].cache();
        let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
        while tokio::time::Instant::now() < deadline {
            if let Ok(Some(entry)) = cache.get_state(app_id, key).await {
                if entry.data == data {
                    return true;
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        false
    }

    /// Close every node
    pub async fn shutdown(&self) {
        for node in &self.nodes {
            node.close().await;
        }
    }
}

impl Default for TestNetwork {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::SourceFile;

    #[tokio::test]
    async fn test_nodes_get_distinct_identities() {
        let network = TestNetwork::with_nodes(3).await.unwrap();
        assert_eq!(network.len(), 3);

        let addresses: std::collections::HashSet<_> =
            (0..3).map(|i| network.node(i).address()).collect();
        assert_eq!(addresses.len(), 3);
        // transport IDs are separate from identity keys
        assert_ne!(hex::encode(network.peer_id(0)), network.node(0).address());
        network.shutdown().await;
    }

    #[tokio::test]
    async fn test_deployment_reaches_peers() {
        let network = TestNetwork::with_nodes(2).await.unwrap();
        let node = network.node(0);

        let outcome = node
            .deploy(
                vec![SourceFile::new("index.html", "<p>hi</p>")],
                node.build_options("chat"),
            )
            .await
            .unwrap();
        assert_eq!(outcome.report.delivered, vec![network.peer_id(1)]);
        assert!(network.wait_for_app(1, &outcome.manifest.app_id).await);
        network.shutdown().await;
    }
}
