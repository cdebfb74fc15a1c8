//! Main Node implementation
//!
//! The Node owns the database, identity, cache, distribution service, loader
//! and background tasks. Implementation is split across:
//! - `protocol/` (this module): Node struct, open/close, public methods
//! - `tasks/`: Background automation (receive loop, maintenance)

use std::sync::Arc;

use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tracing::info;

use crate::bundle::{self, BuildOptions, Manifest, SourceFile};
use crate::data::cache::{Cache, CacheStats, CleanupReport, EvictionReport};
use crate::data::clock::{Clock, SystemClock};
use crate::data::identity::{get_or_create_identity, LocalIdentity};
use crate::data::start::{start_db, start_memory_db};
use crate::loader::{LoadState, LoadedApp, Loader, RenderHost, ResolvedAddress};
use crate::naming::{ClaimOutcome, NameClaim, NameRegistry};
use crate::network::distribution::{DistributionService, FanOutReport};
use crate::network::transport::Transport;

use super::config::NodeConfig;
use super::error::MooringError;
use super::events::NodeEvent;

/// Result of [`Node::deploy`]
#[derive(Debug, Clone)]
pub struct DeployOutcome {
    pub manifest: Manifest,
    /// Per-peer result of the announcement
    pub report: FanOutReport,
}

/// A Mooring node
///
/// This is the main entry point: deploy bundles, load apps by address and
/// claim names.
pub struct Node {
    /// Configuration
    pub(crate) config: NodeConfig,
    /// Local identity (deployer key pair)
    pub(crate) identity: LocalIdentity,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) cache: Cache,
    pub(crate) names: NameRegistry,
    pub(crate) distribution: Arc<DistributionService>,
    pub(crate) loader: Loader,
    /// Running flag
    pub(crate) running: Arc<RwLock<bool>>,
    /// Background tasks
    pub(crate) tasks: Arc<RwLock<Vec<tokio::task::JoinHandle<()>>>>,
    /// Shutdown signal
    shutdown_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("address", &self.identity.address())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Open a node on the system clock
    pub async fn open(config: NodeConfig, transport: Arc<dyn Transport>) -> Result<Self, MooringError> {
        Self::open_with_clock(config, transport, Arc::new(SystemClock)).await
    }

    /// Open a node
    ///
    /// Opens (or creates) the database, loads or generates the identity, and
    /// starts the receive and maintenance loops.
    pub async fn open_with_clock(
        config: NodeConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, MooringError> {
        let db = match &config.db_path {
            Some(path) => start_db(path)?,
            None => start_memory_db()?,
        };

        let identity = get_or_create_identity(&db, clock.now_millis())?;
        info!(
            address = %identity.address(),
            created_at = identity.created_at,
            "Loaded identity from database"
        );

        let db = Arc::new(Mutex::new(db));
        let cache = Cache::new(db.clone(), clock.clone());
        let names = NameRegistry::new(db.clone(), clock.clone());
        let distribution = DistributionService::new(
            transport,
            cache.clone(),
            identity.address(),
            config.distribution(),
        );
        let loader = Loader::new(
            cache.clone(),
            distribution.clone(),
            names.clone(),
            Some(config.scheme.clone()),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let node = Self {
            config,
            identity,
            clock,
            cache,
            names,
            distribution,
            loader,
            running: Arc::new(RwLock::new(true)),
            tasks: Arc::new(RwLock::new(Vec::new())),
            shutdown_tx,
        };

        node.start_background_tasks(shutdown_rx).await;
        info!(address = %node.address(), "Node started");
        Ok(node)
    }

    /// Stop background tasks. The database stays usable for reads until drop.
    pub async fn close(&self) {
        info!("Stopping node...");

        {
            let mut running = self.running.write().await;
            *running = false;
        }
        self.shutdown_tx.send_replace(true);

        {
            let mut tasks = self.tasks.write().await;
            for task in tasks.drain(..) {
                task.abort();
            }
        }

        info!("Node stopped");
    }

    /// Check if the node is running
    pub(crate) async fn check_running(&self) -> Result<(), MooringError> {
        let running = self.running.read().await;
        if !*running {
            return Err(MooringError::NotRunning);
        }
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Our hex address (deployer key and envelope sender)
    pub fn address(&self) -> String {
        self.identity.address()
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.identity.public_key
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn names(&self) -> &NameRegistry {
        &self.names
    }

    pub fn distribution(&self) -> &Arc<DistributionService> {
        &self.distribution
    }

    pub fn loader(&self) -> &Loader {
        &self.loader
    }

    /// Subscribe to deployment and state events
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.distribution.subscribe()
    }

    /// Build options carrying this node's default cache duration
    pub fn build_options(&self, name: impl Into<String>) -> BuildOptions {
        BuildOptions::new(name).with_cache_duration_ms(self.config.default_cache_duration_ms)
    }

    /// Build, sign and cache a bundle, then announce it to every peer
    pub async fn deploy(
        &self,
        files: Vec<SourceFile>,
        options: BuildOptions,
    ) -> Result<DeployOutcome, MooringError> {
        self.check_running().await?;

        let key_pair = self.identity.to_key_pair();
        let output = bundle::build(files, &options, &key_pair, self.clock.as_ref())?;
        self.cache.admit_app(&output.manifest, &output.chunks).await?;
        let report = self.distribution.announce_deployment(&output.manifest).await?;

        info!(
            app_id = %output.manifest.app_id,
            version = output.manifest.version,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "deployed app"
        );
        Ok(DeployOutcome {
            manifest: output.manifest,
            report,
        })
    }

    /// Resolve an address to an app ID (and local claim, for names)
    pub async fn resolve(&self, address: &str) -> Result<ResolvedAddress, MooringError> {
        Ok(self.loader.resolve(address).await?)
    }

    /// Load an app by address
    pub async fn load(&self, address: &str) -> Result<LoadedApp, MooringError> {
        self.check_running().await?;
        Ok(self.loader.load(address).await?)
    }

    /// Load an app by address, publishing progress on `progress`
    pub async fn load_with_progress(
        &self,
        address: &str,
        progress: &watch::Sender<LoadState>,
    ) -> Result<LoadedApp, MooringError> {
        self.check_running().await?;
        Ok(self.loader.load_with_progress(address, progress).await?)
    }

    /// Load an app and hand it to `host`
    pub async fn launch(&self, address: &str, host: &dyn RenderHost) -> Result<(), MooringError> {
        self.check_running().await?;
        Ok(self.loader.launch(address, host).await?)
    }

    /// Claim a short name for this node
    pub async fn claim_name(&self, raw: &str) -> Result<ClaimOutcome, MooringError> {
        Ok(self.names.register_name(raw, &self.address()).await?)
    }

    /// Local claim for a name, if any
    pub async fn lookup_name(&self, raw: &str) -> Result<Option<NameClaim>, MooringError> {
        Ok(self.names.lookup_name(raw).await?)
    }

    /// Remove expired apps now
    pub async fn cleanup_expired(&self) -> Result<CleanupReport, MooringError> {
        Ok(self.cache.cleanup_expired().await?)
    }

    /// Evict chunks down to the configured budget (no-op when unbounded)
    pub async fn enforce_chunk_budget(&self) -> Result<EvictionReport, MooringError> {
        match self.config.max_chunk_cache_bytes {
            Some(max) => Ok(self.cache.evict_chunks(max).await?),
            None => Ok(EvictionReport::default()),
        }
    }

    pub async fn stats(&self) -> Result<CacheStats, MooringError> {
        Ok(self.cache.stats().await?)
    }
}
