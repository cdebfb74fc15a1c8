//! Capability bridge
//!
//! The only surface a loaded app gets into the node. Every call checks the
//! manifest's permissions first; a denied call has no effect.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::bundle::Permission;
use crate::data::cache::{Cache, CacheError, StateEntry};
use crate::network::distribution::{DistributionError, DistributionService, FanOutReport};
use crate::protocol::events::{NodeEvent, StateUpdatedEvent};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("app {app_id} lacks the {permission} permission")]
    PermissionDenied { permission: Permission, app_id: String },
    #[error("storage error: {0}")]
    Storage(String),
    #[error(transparent)]
    Distribution(#[from] DistributionError),
}

impl From<CacheError> for BridgeError {
    fn from(e: CacheError) -> Self {
        BridgeError::Storage(e.to_string())
    }
}

/// Permission-gated access to state and broadcast for one app
#[derive(Clone)]
pub struct CapabilityBridge {
    app_id: String,
    permissions: Vec<Permission>,
    cache: Cache,
    distribution: Arc<DistributionService>,
}

impl std::fmt::Debug for CapabilityBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityBridge")
            .field("app_id", &self.app_id)
            .field("permissions", &self.permissions)
            .finish_non_exhaustive()
    }
}

impl CapabilityBridge {
    pub fn new(
        app_id: impl Into<String>,
        permissions: Vec<Permission>,
        cache: Cache,
        distribution: Arc<DistributionService>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            permissions,
            cache,
            distribution,
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn permissions(&self) -> &[Permission] {
        &self.permissions
    }

    fn require(&self, permission: Permission) -> Result<(), BridgeError> {
        if self.permissions.contains(&permission) {
            return Ok(());
        }
        warn!(app_id = %self.app_id, %permission, "capability denied");
        Err(BridgeError::PermissionDenied {
            permission,
            app_id: self.app_id.clone(),
        })
    }

    /// Read one state key
    pub async fn get_state(&self, key: &str) -> Result<Option<Vec<u8>>, BridgeError> {
        self.require(Permission::Storage)?;
        let entry = self.cache.get_state(&self.app_id, key).await?;
        Ok(entry.map(|e| e.data))
    }

    /// Every state entry of the app
    pub async fn list_state(&self) -> Result<Vec<StateEntry>, BridgeError> {
        self.require(Permission::Storage)?;
        Ok(self.cache.list_state(&self.app_id).await?)
    }

    /// Write one state key locally. Returns whether the write was applied.
    pub async fn set_state(&self, key: &str, data: &[u8]) -> Result<bool, BridgeError> {
        self.require(Permission::Storage)?;
        let applied = self
            .cache
            .set_state(&self.app_id, key, data, self.cache.now())
            .await?;
        debug!(app_id = %self.app_id, key, applied, "bridge set_state");
        Ok(applied)
    }

    /// Write one state key and replicate it to every connected peer
    pub async fn broadcast(&self, key: &str, data: &[u8]) -> Result<FanOutReport, BridgeError> {
        self.require(Permission::Broadcast)?;
        Ok(self.distribution.publish_state(&self.app_id, key, data).await?)
    }

    /// Stream of state updates for this app, local and remote
    pub fn subscribe(&self) -> Result<AppUpdates, BridgeError> {
        self.require(Permission::Broadcast)?;
        Ok(AppUpdates {
            app_id: self.app_id.clone(),
            rx: self.distribution.subscribe(),
        })
    }
}

/// State updates filtered to one app
pub struct AppUpdates {
    app_id: String,
    rx: broadcast::Receiver<NodeEvent>,
}

impl AppUpdates {
    /// Next update for the app, or `None` once the node shut down.
    ///
    /// Updates missed because the receiver lagged are skipped.
    pub async fn next(&mut self) -> Option<StateUpdatedEvent> {
        loop {
            match self.rx.recv().await {
                Ok(NodeEvent::StateUpdated(update)) if update.app_id == self.app_id => {
                    return Some(update)
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(app_id = %self.app_id, skipped, "state subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::clock::ManualClock;
    use crate::data::start::start_memory_db;
    use crate::network::distribution::DistributionConfig;
    use crate::network::memory::MemoryNetwork;

    fn bridge(permissions: Vec<Permission>) -> (CapabilityBridge, Arc<ManualClock>) {
        let db = Arc::new(tokio::sync::Mutex::new(start_memory_db().unwrap()));
        let clock = Arc::new(ManualClock::new(1_000));
        let cache = Cache::new(db, clock.clone());
        let net = MemoryNetwork::new();
        let distribution = DistributionService::new(
            Arc::new(net.join([1; 32])),
            cache.clone(),
            hex::encode([1; 32]),
            DistributionConfig::default(),
        );
        (CapabilityBridge::new("app", permissions, cache, distribution), clock)
    }

    #[tokio::test]
    async fn test_storage_requires_permission() {
        let (bridge, _) = bridge(vec![Permission::Broadcast]);

        let err = bridge.set_state("k", b"v").await.unwrap_err();
        assert_eq!(
            err,
            BridgeError::PermissionDenied {
                permission: Permission::Storage,
                app_id: "app".to_string()
            }
        );
        assert!(bridge.get_state("k").await.is_err());
        // nothing was written
        assert!(bridge.cache.get_state("app", "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_broadcast_requires_permission() {
        let (bridge, _) = bridge(vec![Permission::Storage]);

        assert!(matches!(
            bridge.broadcast("k", b"v").await,
            Err(BridgeError::PermissionDenied { permission: Permission::Broadcast, .. })
        ));
        assert!(bridge.subscribe().is_err());
        assert!(bridge.cache.get_state("app", "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_state_round_trip() {
        let (bridge, clock) = bridge(vec![Permission::Storage]);

        assert!(bridge.set_state("score", b"1").await.unwrap());
        clock.advance(10);
        assert!(bridge.set_state("score", b"2").await.unwrap());

        assert_eq!(bridge.get_state("score").await.unwrap(), Some(b"2".to_vec()));
        assert_eq!(bridge.list_state().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_sees_own_broadcast() {
        let (bridge, _) = bridge(vec![Permission::Broadcast]);
        let mut updates = bridge.subscribe().unwrap();

        let report = bridge.broadcast("cursor", b"42").await.unwrap();
        assert_eq!(report.attempted(), 0);

        let update = updates.next().await.unwrap();
        assert_eq!(update.key, "cursor");
        assert_eq!(update.data, b"42");
        assert_eq!(update.version, 1_000);
    }
}
