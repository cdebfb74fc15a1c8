//! Local app cache
//!
//! Async facade over the SQLite tables in `apps`, `chunks` and `state`. The
//! connection is shared with the rest of the node behind a tokio mutex; every
//! method holds the lock for the duration of one statement group, so
//! multi-table writes (`admit_app`, `clear_app`) are atomic.

pub mod apps;
pub mod chunks;
pub mod state;

use std::collections::BTreeSet;
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::bundle::{ChunkPayload, ContentHash, Manifest};
use crate::data::clock::Clock;

pub use apps::CachedApp;
pub use chunks::CachedChunk;
pub use state::StateEntry;

/// Cache failures. Storage errors are never swallowed.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

/// Result of [`Cache::clear_app`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClearReport {
    pub removed_app: bool,
    pub removed_chunks: usize,
}

/// Result of [`Cache::cleanup_expired`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed_apps: Vec<String>,
    pub removed_chunks: usize,
}

/// Result of [`Cache::evict_chunks`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub evicted_chunks: usize,
    pub freed_bytes: u64,
    /// Apps that lost at least one chunk and are now partially cached
    pub partial_apps: Vec<String>,
}

/// Counts and byte totals
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub apps: u64,
    pub chunks: u64,
    pub chunk_bytes: u64,
    pub state_entries: u64,
}

/// Persistent store for manifests, chunks and per-app state
#[derive(Clone)]
pub struct Cache {
    db: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache").field("clock", &self.clock).finish()
    }
}

/// Manifest + chunk bytes + owner rows, inside whatever transaction the
/// caller holds
fn store_app(
    conn: &Connection,
    manifest: &Manifest,
    payloads: &[ChunkPayload],
    now: i64,
) -> rusqlite::Result<CachedApp> {
    let cached = apps::upsert_app(conn, manifest, now)?;
    for payload in payloads {
        chunks::insert_chunk(conn, &payload.hash, &payload.bytes, &manifest.app_id, now)?;
    }

    let hashes: Vec<ContentHash> = manifest.chunk_infos().map(|c| c.hash).collect();
    let dropped = chunks::rebind_owners(conn, &manifest.app_id, &hashes)?;
    if dropped > 0 {
        debug!(app_id = %manifest.app_id, dropped, "released chunks of previous version");
    }
    Ok(cached)
}

impl Cache {
    pub fn new(db: Arc<Mutex<Connection>>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    pub fn db(&self) -> &Arc<Mutex<Connection>> {
        &self.db
    }

    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Store a manifest, replacing any previous entry for its app ID.
    ///
    /// Chunks already in the cache that the manifest references are adopted;
    /// the rest can be fetched later (see [`Cache::missing_chunks`]).
    pub async fn cache_app(&self, manifest: &Manifest) -> Result<CachedApp, CacheError> {
        self.admit_app(manifest, &[]).await
    }

    /// Store a manifest together with its chunk bytes in one transaction
    pub async fn admit_app(
        &self,
        manifest: &Manifest,
        payloads: &[ChunkPayload],
    ) -> Result<CachedApp, CacheError> {
        let now = self.now();
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let cached = store_app(&tx, manifest, payloads, now)?;
        tx.commit()?;

        debug!(
            app_id = %manifest.app_id,
            version = manifest.version,
            chunks = payloads.len(),
            expiry = cached.cache_expiry,
            "admitted app"
        );
        Ok(cached)
    }

    /// Get a fresh cached app (`now <= cache_expiry`) and record the use.
    ///
    /// Stale rows are left in place for [`Cache::cleanup_expired`].
    pub async fn get_cached_app(&self, app_id: &str) -> Result<Option<CachedApp>, CacheError> {
        let now = self.now();
        let db = self.db.lock().await;
        let Some(mut cached) = apps::get_app(&db, app_id)? else {
            return Ok(None);
        };
        if !cached.is_fresh(now) {
            debug!(app_id, expiry = cached.cache_expiry, now, "cached app is stale");
            return Ok(None);
        }
        apps::touch_app(&db, app_id, now)?;
        cached.last_used = now;
        Ok(Some(cached))
    }

    /// Get the cached row whether fresh or stale, without recording a use
    pub async fn peek_app(&self, app_id: &str) -> Result<Option<CachedApp>, CacheError> {
        let db = self.db.lock().await;
        Ok(apps::get_app(&db, app_id)?)
    }

    /// Summary of every cached app: (app_id, version, cache_expiry)
    pub async fn list_apps(&self) -> Result<Vec<(String, u32, i64)>, CacheError> {
        let db = self.db.lock().await;
        Ok(apps::list_apps(&db)?)
    }

    /// Chunk hashes referenced by the manifest that are not cached
    pub async fn missing_chunks(&self, manifest: &Manifest) -> Result<Vec<ContentHash>, CacheError> {
        let db = self.db.lock().await;
        let mut missing = BTreeSet::new();
        for info in manifest.chunk_infos() {
            if !chunks::has_chunk(&db, &info.hash)? {
                missing.insert(info.hash);
            }
        }
        Ok(missing.into_iter().collect())
    }

    /// Whether the manifest and every chunk it references are cached
    pub async fn is_fully_cached(&self, manifest: &Manifest) -> Result<bool, CacheError> {
        Ok(self.missing_chunks(manifest).await?.is_empty())
    }

    /// Store chunk bytes and record `owner_app_id` as a reference
    pub async fn cache_chunk(
        &self,
        hash: &ContentHash,
        bytes: &[u8],
        owner_app_id: &str,
    ) -> Result<(), CacheError> {
        let now = self.now();
        let db = self.db.lock().await;
        chunks::insert_chunk(&db, hash, bytes, owner_app_id, now)?;
        Ok(())
    }

    /// Add chunks for an app that is already cached, in one transaction.
    ///
    /// The app row is left alone, so repairing a partial copy does not move
    /// its install time or expiry.
    pub async fn restore_chunks(
        &self,
        app_id: &str,
        payloads: &[ChunkPayload],
    ) -> Result<(), CacheError> {
        let now = self.now();
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        for payload in payloads {
            chunks::insert_chunk(&tx, &payload.hash, &payload.bytes, app_id, now)?;
        }
        tx.commit()?;

        debug!(app_id, chunks = payloads.len(), "restored chunks");
        Ok(())
    }

    /// Get chunk bytes, bumping `access_count` and `last_accessed`
    pub async fn get_cached_chunk(
        &self,
        hash: &ContentHash,
    ) -> Result<Option<CachedChunk>, CacheError> {
        let now = self.now();
        let db = self.db.lock().await;
        Ok(chunks::get_chunk_and_touch(&db, hash, now)?)
    }

    /// Drop a chunk whose bytes no longer match its hash
    pub async fn discard_chunk(&self, hash: &ContentHash) -> Result<bool, CacheError> {
        let db = self.db.lock().await;
        let removed = chunks::delete_chunk(&db, hash)?;
        if removed {
            info!(hash = %hash.short(), "discarded corrupt chunk");
        }
        Ok(removed)
    }

    /// Remove an app and every chunk no other app references
    pub async fn clear_app(&self, app_id: &str) -> Result<ClearReport, CacheError> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let removed_app = apps::delete_app(&tx, app_id)?;
        let removed_chunks = chunks::release_app_chunks(&tx, app_id)?;
        tx.commit()?;

        debug!(app_id, removed_app, removed_chunks, "cleared app");
        Ok(ClearReport {
            removed_app,
            removed_chunks,
        })
    }

    /// Remove every app with `cache_expiry < now`, cascading to chunks
    pub async fn cleanup_expired(&self) -> Result<CleanupReport, CacheError> {
        let now = self.now();
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;

        let expired = apps::expired_app_ids(&tx, now)?;
        let mut removed_chunks = 0;
        for app_id in &expired {
            apps::delete_app(&tx, app_id)?;
            removed_chunks += chunks::release_app_chunks(&tx, app_id)?;
        }
        tx.commit()?;

        if !expired.is_empty() {
            info!(apps = expired.len(), chunks = removed_chunks, "removed expired apps");
        }
        Ok(CleanupReport {
            removed_apps: expired,
            removed_chunks,
        })
    }

    /// Evict least recently used chunks until the total is within `max_bytes`
    pub async fn evict_chunks(&self, max_bytes: u64) -> Result<EvictionReport, CacheError> {
        let mut db = self.db.lock().await;
        let (_, mut total) = chunks::chunk_totals(&db)?;
        if total <= max_bytes {
            return Ok(EvictionReport::default());
        }

        let tx = db.transaction()?;
        let mut report = EvictionReport::default();
        let mut partial = BTreeSet::new();

        for (hash, size) in chunks::eviction_order(&tx)? {
            if total <= max_bytes {
                break;
            }
            partial.extend(chunks::owners_of(&tx, &hash)?);
            if chunks::delete_chunk(&tx, &hash)? {
                total = total.saturating_sub(size);
                report.evicted_chunks += 1;
                report.freed_bytes += size;
            }
        }
        tx.commit()?;

        report.partial_apps = partial.into_iter().collect();
        info!(
            evicted = report.evicted_chunks,
            freed_bytes = report.freed_bytes,
            partial_apps = report.partial_apps.len(),
            "evicted chunks over budget"
        );
        Ok(report)
    }

    /// Last-writer-wins state write. Returns whether it was applied.
    pub async fn set_state(
        &self,
        app_id: &str,
        key: &str,
        data: &[u8],
        version: i64,
    ) -> Result<bool, CacheError> {
        let db = self.db.lock().await;
        let applied = state::put_state(&db, app_id, key, data, version)?;
        if !applied {
            debug!(app_id, key, version, "ignored stale state write");
        }
        Ok(applied)
    }

    pub async fn get_state(&self, app_id: &str, key: &str) -> Result<Option<StateEntry>, CacheError> {
        let db = self.db.lock().await;
        Ok(state::get_state(&db, app_id, key)?)
    }

    pub async fn list_state(&self, app_id: &str) -> Result<Vec<StateEntry>, CacheError> {
        let db = self.db.lock().await;
        Ok(state::list_state(&db, app_id)?)
    }

    pub async fn stats(&self) -> Result<CacheStats, CacheError> {
        let db = self.db.lock().await;
        let (chunk_count, chunk_bytes) = chunks::chunk_totals(&db)?;
        Ok(CacheStats {
            apps: apps::count_apps(&db)?,
            chunks: chunk_count,
            chunk_bytes,
            state_entries: state::count_state(&db)?,
        })
    }
}
