//! Loader - resolves an address to a verified, self-contained app
//!
//! Fetching is lazy: a deployment announcement only caches the manifest, the
//! chunks are pulled here on first load. Nothing fetched is admitted to the
//! cache until the whole bundle has verified.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bundle::hasher::{self, ChunkPayload};
use crate::bundle::manifest;
use crate::bundle::mime::is_html;
use crate::bundle::{CacheStrategy, ChunkInfo, ContentHash, IntegrityError, Manifest};
use crate::data::cache::{Cache, CacheError};
use crate::naming::claims::{NameRegistry, NamingError};
use crate::naming::codec::{self, CodecError};
use crate::network::distribution::{DistributionError, DistributionService};

use super::address::{parse_address, AddressError, AppTarget, ResolvedAddress, DEFAULT_SCHEME};
use super::bridge::CapabilityBridge;
use super::render::{inline_document, RenderError};
use super::state::LoadState;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error(transparent)]
    Name(#[from] CodecError),
    #[error("app not found on network")]
    NotFound { app_id: String },
    #[error("chunk {hash} unavailable")]
    ChunkUnavailable { hash: String },
    #[error("integrity error: {0}")]
    Integrity(IntegrityError),
    #[error("manifest verification failed")]
    Verification(#[source] IntegrityError),
    #[error("file not found in bundle: {0}")]
    FileNotFound(String),
    #[error("storage error: {0}")]
    Storage(#[from] CacheError),
    #[error("naming error: {0}")]
    Naming(#[from] NamingError),
    #[error("network error: {0}")]
    Network(DistributionError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Host(#[from] RenderHostError),
}

impl LoadError {
    /// The integrity failure behind this error, if there is one
    pub fn integrity(&self) -> Option<&IntegrityError> {
        match self {
            LoadError::Integrity(e) | LoadError::Verification(e) => Some(e),
            _ => None,
        }
    }
}

/// A loaded app, ready to hand to a [`RenderHost`]
#[derive(Clone)]
pub struct LoadedApp {
    pub manifest: Manifest,
    /// Bundle path of `document`
    pub path: String,
    pub query: Option<String>,
    pub mime_type: String,
    /// File contents; HTML has its same-bundle references inlined
    pub document: Vec<u8>,
    pub bridge: CapabilityBridge,
}

impl std::fmt::Debug for LoadedApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedApp")
            .field("app_id", &self.manifest.app_id)
            .field("version", &self.manifest.version)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("mime_type", &self.mime_type)
            .field("document_len", &self.document.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("render host failed: {0}")]
pub struct RenderHostError(pub String);

/// Whatever displays a loaded app (webview, headless runner, test double)
#[async_trait]
pub trait RenderHost: Send + Sync {
    async fn render(&self, app: LoadedApp) -> Result<(), RenderHostError>;
}

/// Whether `candidate` supersedes `current`
fn is_newer(candidate: &Manifest, current: &Manifest) -> bool {
    (candidate.version, candidate.deployed_at) > (current.version, current.deployed_at)
}

/// The manifest being loaded and where it came from
struct Plan {
    manifest: Manifest,
    /// Came from the network rather than the cache
    fetched: bool,
}

/// Resolves addresses and drives loads through [`LoadState`]
#[derive(Clone)]
pub struct Loader {
    cache: Cache,
    distribution: Arc<DistributionService>,
    names: NameRegistry,
    scheme: String,
}

impl std::fmt::Debug for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader")
            .field("scheme", &self.scheme)
            .finish_non_exhaustive()
    }
}

impl Loader {
    pub fn new(
        cache: Cache,
        distribution: Arc<DistributionService>,
        names: NameRegistry,
        scheme: Option<String>,
    ) -> Self {
        Self {
            cache,
            distribution,
            names,
            scheme: scheme.unwrap_or_else(|| DEFAULT_SCHEME.to_string()),
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Parse an address and map it to an app ID, attaching the local claim
    /// when the address used a name
    pub async fn resolve(&self, address: &str) -> Result<ResolvedAddress, LoadError> {
        let parsed = parse_address(address, &self.scheme)?;
        let resolved = match parsed.target {
            AppTarget::Name(name) => {
                let app_id = codec::encode(&name)?;
                let claim = self.names.lookup_name(&name).await?;
                ResolvedAddress {
                    app_id,
                    name: Some(name),
                    claim,
                    path: parsed.path,
                    query: parsed.query,
                }
            }
            AppTarget::AppId(app_id) => ResolvedAddress {
                app_id,
                name: None,
                claim: None,
                path: parsed.path,
                query: parsed.query,
            },
        };
        Ok(resolved)
    }

    /// Load an app without observing progress
    pub async fn load(&self, address: &str) -> Result<LoadedApp, LoadError> {
        let (progress, _rx) = watch::channel(LoadState::CheckingCache);
        self.load_with_progress(address, &progress).await
    }

    /// Load an app, publishing every state change on `progress`.
    ///
    /// The final state is always `Ready` or `Error`.
    pub async fn load_with_progress(
        &self,
        address: &str,
        progress: &watch::Sender<LoadState>,
    ) -> Result<LoadedApp, LoadError> {
        let result = self.run(address, progress).await;
        match &result {
            Ok(app) => {
                info!(
                    app_id = %app.manifest.app_id,
                    version = app.manifest.version,
                    path = %app.path,
                    "app ready"
                );
                progress.send_replace(LoadState::Ready);
            }
            Err(e) => {
                warn!(address, error = %e, "load failed");
                progress.send_replace(LoadState::Error(e.to_string()));
            }
        }
        result
    }

    /// Load an app and hand it to `host`
    pub async fn launch(&self, address: &str, host: &dyn RenderHost) -> Result<(), LoadError> {
        let app = self.load(address).await?;
        host.render(app).await?;
        Ok(())
    }

    async fn run(
        &self,
        address: &str,
        progress: &watch::Sender<LoadState>,
    ) -> Result<LoadedApp, LoadError> {
        let resolved = self.resolve(address).await?;
        let app_id = resolved.app_id.as_str();

        progress.send_replace(LoadState::CheckingCache);
        let plan = self.plan(app_id, progress).await?;
        let manifest = plan.manifest;

        let mut staged = self.download(&manifest, progress).await?;

        if plan.fetched || !staged.is_empty() {
            progress.send_replace(LoadState::Verifying);
        }
        manifest::verify(&manifest).map_err(LoadError::Verification)?;
        let files = self.assemble(&manifest, &mut staged).await?;

        let payloads: Vec<ChunkPayload> = staged
            .into_iter()
            .map(|(hash, bytes)| ChunkPayload { hash, bytes })
            .collect();
        if plan.fetched {
            self.cache.admit_app(&manifest, &payloads).await?;
        } else if !payloads.is_empty() {
            // repair of a fresh copy keeps its install time and expiry
            self.cache.restore_chunks(&manifest.app_id, &payloads).await?;
        }

        let path = match resolved.path {
            Some(path) if path.ends_with('/') => format!("{}index.html", path),
            Some(path) => path,
            None => manifest.entry_point.clone(),
        };
        let entry = manifest
            .file(&path)
            .ok_or_else(|| LoadError::FileNotFound(path.clone()))?;
        let mime_type = entry.mime_type.clone();
        let raw = files
            .get(&path)
            .ok_or_else(|| LoadError::FileNotFound(path.clone()))?;

        let document = if is_html(&mime_type) {
            inline_document(&path, &String::from_utf8_lossy(raw), &files)?.into_bytes()
        } else {
            raw.clone()
        };

        let bridge = CapabilityBridge::new(
            manifest.app_id.clone(),
            manifest.permissions.clone(),
            self.cache.clone(),
            Arc::clone(&self.distribution),
        );

        Ok(LoadedApp {
            manifest,
            path,
            query: resolved.query,
            mime_type,
            document,
            bridge,
        })
    }

    /// Pick the manifest to load: the fresh cached copy, a newer network
    /// copy for network-first apps, or the network copy on a miss
    async fn plan(
        &self,
        app_id: &str,
        progress: &watch::Sender<LoadState>,
    ) -> Result<Plan, LoadError> {
        let Some(cached) = self.cache.get_cached_app(app_id).await? else {
            debug!(app_id, "cache miss");
            let manifest = self.fetch_manifest(app_id, progress).await?;
            return Ok(Plan {
                manifest,
                fetched: true,
            });
        };

        if cached.manifest.cache_strategy != CacheStrategy::NetworkFirst {
            debug!(app_id, version = cached.manifest.version, "cache hit");
            return Ok(Plan {
                manifest: cached.manifest,
                fetched: false,
            });
        }

        match self.fetch_manifest(app_id, progress).await {
            Ok(remote) if is_newer(&remote, &cached.manifest) => {
                debug!(app_id, version = remote.version, "network has a newer version");
                Ok(Plan {
                    manifest: remote,
                    fetched: true,
                })
            }
            Ok(_) | Err(LoadError::NotFound { .. }) => Ok(Plan {
                manifest: cached.manifest,
                fetched: false,
            }),
            Err(e) => Err(e),
        }
    }

    async fn fetch_manifest(
        &self,
        app_id: &str,
        progress: &watch::Sender<LoadState>,
    ) -> Result<Manifest, LoadError> {
        progress.send_replace(LoadState::DiscoveringPeers);
        let manifest = match self.distribution.request_manifest(app_id).await {
            Ok(manifest) => manifest,
            Err(DistributionError::NotFound(_)) => {
                return Err(LoadError::NotFound {
                    app_id: app_id.to_string(),
                })
            }
            Err(e) => return Err(LoadError::Network(e)),
        };

        if manifest.app_id != app_id {
            return Err(LoadError::Integrity(IntegrityError::AppIdMismatch {
                requested: app_id.to_string(),
                received: manifest.app_id,
            }));
        }
        Ok(manifest)
    }

    /// Fetch every chunk the cache lacks, one at a time
    async fn download(
        &self,
        manifest: &Manifest,
        progress: &watch::Sender<LoadState>,
    ) -> Result<HashMap<ContentHash, Vec<u8>>, LoadError> {
        let missing = self.cache.missing_chunks(manifest).await?;
        let mut staged = HashMap::with_capacity(missing.len());
        if missing.is_empty() {
            return Ok(staged);
        }

        let total = missing.len();
        progress.send_replace(LoadState::Downloading {
            completed: 0,
            total,
        });
        for (done, hash) in missing.into_iter().enumerate() {
            let info = manifest
                .chunk_infos()
                .find(|info| info.hash == hash)
                .ok_or_else(|| LoadError::ChunkUnavailable { hash: hash.to_hex() })?;
            let bytes = self.fetch_chunk(&manifest.app_id, info).await?;
            staged.insert(hash, bytes);
            progress.send_replace(LoadState::Downloading {
                completed: done + 1,
                total,
            });
        }

        debug!(app_id = %manifest.app_id, chunks = total, "downloaded chunks");
        Ok(staged)
    }

    async fn fetch_chunk(&self, app_id: &str, info: &ChunkInfo) -> Result<Vec<u8>, LoadError> {
        let bytes = match self.distribution.request_chunk(app_id, &info.hash).await {
            Ok(bytes) => bytes,
            Err(DistributionError::NotFound(_)) => {
                return Err(LoadError::ChunkUnavailable {
                    hash: info.hash.to_hex(),
                })
            }
            Err(e) => return Err(LoadError::Network(e)),
        };

        if !hasher::verify_chunk(info, &bytes) {
            warn!(app_id, hash = %info.hash.short(), "received chunk does not match its hash");
            return Err(LoadError::Integrity(IntegrityError::ChunkHash {
                hash: info.hash.to_hex(),
            }));
        }
        Ok(bytes)
    }

    /// Bytes for one chunk: staged, else cached, else refetched. A cached
    /// chunk that fails its hash is discarded and replaced; if no peer can
    /// replace it the load fails with the integrity error.
    async fn chunk_bytes(
        &self,
        app_id: &str,
        info: &ChunkInfo,
        staged: &mut HashMap<ContentHash, Vec<u8>>,
    ) -> Result<Vec<u8>, LoadError> {
        if let Some(bytes) = staged.get(&info.hash) {
            return Ok(bytes.clone());
        }

        if let Some(cached) = self.cache.get_cached_chunk(&info.hash).await? {
            if hasher::verify_chunk(info, &cached.data) {
                return Ok(cached.data);
            }
            warn!(app_id, hash = %info.hash.short(), "cached chunk is corrupt");
            self.cache.discard_chunk(&info.hash).await?;

            return match self.fetch_chunk(app_id, info).await {
                Ok(bytes) => {
                    staged.insert(info.hash, bytes.clone());
                    Ok(bytes)
                }
                Err(e) => {
                    debug!(app_id, hash = %info.hash.short(), error = %e, "corrupt chunk could not be replaced");
                    Err(LoadError::Integrity(IntegrityError::ChunkHash {
                        hash: info.hash.to_hex(),
                    }))
                }
            };
        }

        let bytes = self.fetch_chunk(app_id, info).await?;
        staged.insert(info.hash, bytes.clone());
        Ok(bytes)
    }

    /// Reassemble every file and check it against its declared hash
    async fn assemble(
        &self,
        manifest: &Manifest,
        staged: &mut HashMap<ContentHash, Vec<u8>>,
    ) -> Result<HashMap<String, Vec<u8>>, LoadError> {
        let mut files = HashMap::with_capacity(manifest.files.len());
        for entry in &manifest.files {
            let bytes = match &entry.content {
                Some(content) => content.clone(),
                None => {
                    let mut parts = Vec::with_capacity(entry.chunk_list().len());
                    for info in entry.chunk_list() {
                        let bytes = self.chunk_bytes(&manifest.app_id, info, staged).await?;
                        parts.push((info.index, bytes));
                    }
                    hasher::reassemble(parts)
                }
            };

            if !hasher::verify_file(entry, &bytes) {
                return Err(LoadError::Integrity(IntegrityError::FileHash {
                    path: entry.path.clone(),
                }));
            }
            files.insert(entry.path.clone(), bytes);
        }
        Ok(files)
    }
}
