//! Incoming message handlers
//!
//! Malformed or unverifiable messages are logged and dropped; nothing here
//! fails the receive loop.

use tracing::{debug, info, trace, warn};

use crate::bundle::manifest;
use crate::network::transport::{peer_short, InboundMessage, PeerId};
use crate::protocol::events::{AppDeployedEvent, NodeEvent, StateUpdatedEvent};

use super::protocol::{
    ChunkRequestBody, ChunkResponseBody, DeploymentBody, Envelope, ManifestRequestBody,
    ManifestResponseBody, MessageBody, StateUpdateBody,
};
use super::service::{lock, DistributionService};

/// What happened to an inbound deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentOutcome {
    Cached,
    /// Verification failed
    Rejected(String),
    /// Older than (or identical to) the cached version
    Ignored,
}

impl DistributionService {
    /// Decode and dispatch one inbound datagram
    pub async fn handle_incoming(&self, message: InboundMessage) {
        let envelope = match Envelope::decode(&message.bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(peer = %peer_short(&message.from), error = %e, "dropping undecodable message");
                return;
            }
        };

        trace!(
            peer = %peer_short(&message.from),
            kind = ?envelope.kind(),
            app_id = %envelope.app_id,
            "received message"
        );

        let from = message.from;
        let timestamp = envelope.timestamp;
        let sender = envelope.sender_address;
        match envelope.body {
            MessageBody::Deployment(body) => {
                self.handle_deployment(&from, body).await;
            }
            MessageBody::ManifestRequest(body) => self.handle_manifest_request(&from, body).await,
            MessageBody::ManifestResponse(body) => self.handle_manifest_response(body),
            MessageBody::ChunkRequest(body) => self.handle_chunk_request(&from, body).await,
            MessageBody::ChunkResponse(body) => self.handle_chunk_response(body),
            MessageBody::StateUpdate(body) => {
                self.handle_state_update(body, timestamp, sender).await
            }
        }
    }

    /// Verify and cache an announced manifest
    pub async fn handle_deployment(&self, from: &PeerId, body: DeploymentBody) -> DeploymentOutcome {
        let manifest = body.manifest;

        if body.signature.as_slice() != manifest.signature.as_slice() {
            warn!(peer = %peer_short(from), app_id = %manifest.app_id, "deployment signature does not match manifest");
            return DeploymentOutcome::Rejected("envelope signature mismatch".to_string());
        }
        if let Err(e) = manifest::verify(&manifest) {
            warn!(peer = %peer_short(from), app_id = %manifest.app_id, error = %e, "rejected deployment");
            return DeploymentOutcome::Rejected(e.to_string());
        }

        match self.cache.peek_app(&manifest.app_id).await {
            Ok(Some(cached)) => {
                let current = &cached.manifest;
                let newer = (manifest.version, manifest.deployed_at)
                    > (current.version, current.deployed_at);
                if !newer {
                    debug!(
                        app_id = %manifest.app_id,
                        cached_version = current.version,
                        version = manifest.version,
                        "ignoring deployment not newer than cached copy"
                    );
                    return DeploymentOutcome::Ignored;
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(app_id = %manifest.app_id, error = %e, "deployment: cache lookup failed");
                return DeploymentOutcome::Rejected(e.to_string());
            }
        }

        if let Err(e) = self.cache.cache_app(&manifest).await {
            warn!(app_id = %manifest.app_id, error = %e, "deployment: failed to cache manifest");
            return DeploymentOutcome::Rejected(e.to_string());
        }

        info!(
            peer = %peer_short(from),
            app_id = %manifest.app_id,
            version = manifest.version,
            "cached deployment"
        );
        self.emit(NodeEvent::AppDeployed(AppDeployedEvent {
            app_id: manifest.app_id.clone(),
            version: manifest.version,
            deployed_by: manifest.deployer_address(),
        }));
        DeploymentOutcome::Cached
    }

    async fn handle_manifest_request(&self, from: &PeerId, body: ManifestRequestBody) {
        let cached = match self.cache.get_cached_app(&body.app_id).await {
            Ok(Some(cached)) => cached,
            Ok(None) => return,
            Err(e) => {
                warn!(app_id = %body.app_id, error = %e, "manifest request: cache lookup failed");
                return;
            }
        };

        let reply = self.envelope(
            &body.app_id,
            MessageBody::ManifestResponse(ManifestResponseBody {
                app_id: body.app_id.clone(),
                manifest: cached.manifest,
            }),
        );
        if let Err(e) = self.send_to(from, &reply).await {
            debug!(peer = %peer_short(from), error = %e, "failed to answer manifest request");
        }
    }

    fn handle_manifest_response(&self, body: ManifestResponseBody) {
        // only the first response for a key finds a waiter
        if let Some(waiter) = lock(&self.pending_manifests).remove(&body.app_id) {
            let _ = waiter.send(body.manifest);
        }
    }

    async fn handle_chunk_request(&self, from: &PeerId, body: ChunkRequestBody) {
        let chunk = match self.cache.get_cached_chunk(&body.chunk_hash).await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => return,
            Err(e) => {
                warn!(hash = %body.chunk_hash.short(), error = %e, "chunk request: cache lookup failed");
                return;
            }
        };

        let reply = self.envelope(
            &body.app_id,
            MessageBody::ChunkResponse(ChunkResponseBody {
                chunk_hash: body.chunk_hash,
                bytes: chunk.data,
            }),
        );
        if let Err(e) = self.send_to(from, &reply).await {
            debug!(peer = %peer_short(from), error = %e, "failed to answer chunk request");
        }
    }

    fn handle_chunk_response(&self, body: ChunkResponseBody) {
        if let Some(waiter) = lock(&self.pending_chunks).remove(&body.chunk_hash) {
            let _ = waiter.send(body.bytes);
        }
    }

    async fn handle_state_update(&self, body: StateUpdateBody, timestamp: i64, sender: String) {
        match self.cache.peek_app(&body.app_id).await {
            Ok(Some(cached)) if !cached.manifest.has_permission(crate::bundle::Permission::Broadcast) => {
                debug!(app_id = %body.app_id, "dropping state update for app without broadcast permission");
                return;
            }
            Err(e) => {
                warn!(app_id = %body.app_id, error = %e, "state update: cache lookup failed");
                return;
            }
            _ => {}
        }

        match self
            .cache
            .set_state(&body.app_id, &body.key, &body.data, timestamp)
            .await
        {
            Ok(true) => self.emit(NodeEvent::StateUpdated(StateUpdatedEvent {
                app_id: body.app_id,
                key: body.key,
                data: body.data,
                version: timestamp,
                origin: sender,
            })),
            Ok(false) => {}
            Err(e) => warn!(app_id = %body.app_id, error = %e, "failed to apply state update"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::bundle::{build, BuildOptions, Permission, SourceFile};
    use crate::data::cache::Cache;
    use crate::data::clock::ManualClock;
    use crate::data::start::start_memory_db;
    use crate::network::distribution::service::DistributionConfig;
    use crate::network::memory::MemoryNetwork;
    use crate::security::create_key_pair::generate_key_pair;

    fn service(net: &MemoryNetwork) -> Arc<DistributionService> {
        let db = Arc::new(tokio::sync::Mutex::new(start_memory_db().unwrap()));
        let cache = Cache::new(db, Arc::new(ManualClock::new(0)));
        DistributionService::new(
            Arc::new(net.join([9; 32])),
            cache,
            "me".to_string(),
            DistributionConfig::default(),
        )
    }

    fn deployment(version: u32, deployed_at: i64) -> DeploymentBody {
        let out = build(
            vec![SourceFile::new("index.html", b"<p>v</p>".to_vec())],
            &BuildOptions::new("chat")
                .with_version(version)
                .with_permission(Permission::Broadcast),
            &generate_key_pair(),
            &ManualClock::new(deployed_at),
        )
        .unwrap();
        DeploymentBody {
            signature: out.manifest.signature.to_vec(),
            manifest: out.manifest,
        }
    }

    #[tokio::test]
    async fn test_deployment_cached_and_announced() {
        let net = MemoryNetwork::new();
        let svc = service(&net);
        let mut events = svc.subscribe();

        let body = deployment(1, 10);
        let app_id = body.manifest.app_id.clone();
        assert_eq!(svc.handle_deployment(&[1; 32], body).await, DeploymentOutcome::Cached);
        assert!(svc.cache.peek_app(&app_id).await.unwrap().is_some());

        match events.try_recv().unwrap() {
            NodeEvent::AppDeployed(e) => assert_eq!(e.version, 1),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_older_deployment_ignored() {
        let net = MemoryNetwork::new();
        let svc = service(&net);

        assert_eq!(svc.handle_deployment(&[1; 32], deployment(2, 10)).await, DeploymentOutcome::Cached);
        assert_eq!(svc.handle_deployment(&[1; 32], deployment(1, 20)).await, DeploymentOutcome::Ignored);
        assert_eq!(svc.handle_deployment(&[1; 32], deployment(3, 5)).await, DeploymentOutcome::Cached);
    }

    #[tokio::test]
    async fn test_tampered_deployment_rejected() {
        let net = MemoryNetwork::new();
        let svc = service(&net);

        let mut body = deployment(1, 10);
        body.manifest.description = "tampered".to_string();
        let app_id = body.manifest.app_id.clone();
        assert!(matches!(
            svc.handle_deployment(&[1; 32], body).await,
            DeploymentOutcome::Rejected(_)
        ));

        let mut body = deployment(1, 10);
        body.signature[0] ^= 1;
        assert!(matches!(
            svc.handle_deployment(&[1; 32], body).await,
            DeploymentOutcome::Rejected(_)
        ));
        assert!(svc.cache.peek_app(&app_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_state_update_last_writer_wins() {
        let net = MemoryNetwork::new();
        let svc = service(&net);
        let update = |data: &[u8]| StateUpdateBody {
            app_id: "some-app-id".to_string(),
            key: "k".to_string(),
            data: data.to_vec(),
        };

        svc.handle_state_update(update(b"new"), 20, "a".to_string()).await;
        svc.handle_state_update(update(b"old"), 10, "b".to_string()).await;

        let entry = svc.cache.get_state("some-app-id", "k").await.unwrap().unwrap();
        assert_eq!(entry.data, b"new");
        assert_eq!(entry.version, 20);
    }

    #[tokio::test]
    async fn test_garbage_is_dropped() {
        let net = MemoryNetwork::new();
        let svc = service(&net);
        svc.handle_incoming(InboundMessage {
            from: [1; 32],
            bytes: vec![0xff, 0, 0],
        })
        .await;
        assert_eq!(svc.cache.stats().await.unwrap().apps, 0);
    }
}
