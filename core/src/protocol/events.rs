//! Node events for the application layer
//!
//! Published on a `tokio::sync::broadcast` channel. Slow subscribers lag and
//! lose the oldest events rather than blocking the node.

/// Events emitted by the node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// A verified deployment was received and cached
    AppDeployed(AppDeployedEvent),
    /// A state value changed (local write or accepted remote update)
    StateUpdated(StateUpdatedEvent),
}

/// Event: a peer announced a new app version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppDeployedEvent {
    pub app_id: String,
    pub version: u32,
    /// Deployer's hex address
    pub deployed_by: String,
}

/// Event: a state entry was written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateUpdatedEvent {
    pub app_id: String,
    pub key: String,
    pub data: Vec<u8>,
    /// Write timestamp (Unix milliseconds)
    pub version: i64,
    /// Hex address of the writer
    pub origin: String,
}

impl NodeEvent {
    pub fn app_id(&self) -> &str {
        match self {
            NodeEvent::AppDeployed(e) => &e.app_id,
            NodeEvent::StateUpdated(e) => &e.app_id,
        }
    }
}
