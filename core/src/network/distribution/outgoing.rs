//! Outgoing distribution operations
//!
//! Requests go to every connected peer; the first response with a matching
//! key wins. No retry and no second wave: an unanswered request resolves to
//! `NotFound` after `request_timeout`, or at once when nobody could be asked.

use std::sync::Arc;

use tracing::{debug, info};

use crate::bundle::{ContentHash, Manifest};
use crate::protocol::events::{NodeEvent, StateUpdatedEvent};

use super::protocol::{
    ChunkRequestBody, DeploymentBody, ManifestRequestBody, MessageBody, StateUpdateBody,
};
use super::service::{DistributionError, DistributionService, FanOutReport, PendingGuard};

impl DistributionService {
    /// Broadcast a signed manifest to every connected peer
    pub async fn announce_deployment(
        &self,
        manifest: &Manifest,
    ) -> Result<FanOutReport, DistributionError> {
        let envelope = self.envelope(
            &manifest.app_id,
            MessageBody::Deployment(DeploymentBody {
                manifest: manifest.clone(),
                signature: manifest.signature.to_vec(),
            }),
        );
        let report = self.broadcast(&envelope).await?;

        info!(
            app_id = %manifest.app_id,
            version = manifest.version,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "announced deployment"
        );
        Ok(report)
    }

    /// Ask peers for a manifest. Concurrent calls for the same app share one
    /// request.
    pub async fn request_manifest(
        self: &Arc<Self>,
        app_id: &str,
    ) -> Result<Manifest, DistributionError> {
        let this = Arc::clone(self);
        let owned = app_id.to_string();
        self.manifest_flights
            .run(format!("manifest:{}", app_id), move || async move {
                this.fetch_manifest(owned).await
            })
            .await
    }

    /// Ask peers for a chunk. Concurrent calls for the same hash share one
    /// request.
    pub async fn request_chunk(
        self: &Arc<Self>,
        app_id: &str,
        hash: &ContentHash,
    ) -> Result<Vec<u8>, DistributionError> {
        let this = Arc::clone(self);
        let owned = app_id.to_string();
        let hash = *hash;
        self.chunk_flights
            .run(format!("chunk:{}", hash), move || async move {
                this.fetch_chunk(owned, hash).await
            })
            .await
    }

    async fn fetch_manifest(&self, app_id: String) -> Result<Manifest, DistributionError> {
        let peers = self.transport.connected_peers().await;
        if peers.is_empty() {
            debug!(app_id = %app_id, "manifest request: no peers");
            return Err(DistributionError::NotFound(format!("manifest {}", app_id)));
        }

        let (_guard, rx) = PendingGuard::register(&self.pending_manifests, app_id.clone());
        let envelope = self.envelope(
            &app_id,
            MessageBody::ManifestRequest(ManifestRequestBody {
                app_id: app_id.clone(),
                requester_address: self.local_address.clone(),
            }),
        );
        let bytes = envelope.encode()?;
        let report = self.fan_out(&peers, &bytes).await;
        if report.delivered.is_empty() {
            return Err(DistributionError::NotFound(format!("manifest {}", app_id)));
        }

        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(manifest)) => Ok(manifest),
            _ => {
                debug!(app_id = %app_id, "manifest request timed out");
                Err(DistributionError::NotFound(format!("manifest {}", app_id)))
            }
        }
    }

    async fn fetch_chunk(
        &self,
        app_id: String,
        hash: ContentHash,
    ) -> Result<Vec<u8>, DistributionError> {
        let peers = self.transport.connected_peers().await;
        if peers.is_empty() {
            return Err(DistributionError::NotFound(format!("chunk {}", hash)));
        }

        let (_guard, rx) = PendingGuard::register(&self.pending_chunks, hash);
        let envelope = self.envelope(
            &app_id,
            MessageBody::ChunkRequest(ChunkRequestBody {
                app_id: app_id.clone(),
                chunk_hash: hash,
            }),
        );
        let bytes = envelope.encode()?;
        let report = self.fan_out(&peers, &bytes).await;
        if report.delivered.is_empty() {
            return Err(DistributionError::NotFound(format!("chunk {}", hash)));
        }

        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(bytes)) => Ok(bytes),
            _ => {
                debug!(app_id = %app_id, hash = %hash.short(), "chunk request timed out");
                Err(DistributionError::NotFound(format!("chunk {}", hash)))
            }
        }
    }

    /// Write state locally (version = now) and broadcast it
    pub async fn publish_state(
        &self,
        app_id: &str,
        key: &str,
        data: &[u8],
    ) -> Result<FanOutReport, DistributionError> {
        let envelope = self.envelope(
            app_id,
            MessageBody::StateUpdate(StateUpdateBody {
                app_id: app_id.to_string(),
                key: key.to_string(),
                data: data.to_vec(),
            }),
        );

        if self
            .cache
            .set_state(app_id, key, data, envelope.timestamp)
            .await?
        {
            self.emit(NodeEvent::StateUpdated(StateUpdatedEvent {
                app_id: app_id.to_string(),
                key: key.to_string(),
                data: data.to_vec(),
                version: envelope.timestamp,
                origin: self.local_address.clone(),
            }));
        }

        let report = self.broadcast(&envelope).await?;
        debug!(app_id, key, delivered = report.delivered.len(), "published state");
        Ok(report)
    }
}
