//! Maintenance tasks
//!
//! Periodic removal of expired apps and eviction of chunks over the budget.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tracing::{info, trace, warn};

use crate::data::cache::Cache;
use crate::protocol::Node;

impl Node {
    /// Run the maintenance loop
    ///
    /// Each tick:
    /// 1. Removes apps past their cache expiry, with chunks no other app uses
    /// 2. Evicts least recently used chunks while over `max_chunk_bytes`
    pub(crate) async fn run_maintenance_loop(
        cache: Cache,
        running: Arc<RwLock<bool>>,
        mut shutdown: watch::Receiver<bool>,
        interval: Duration,
        max_chunk_bytes: Option<u64>,
    ) {
        info!(interval_secs = interval.as_secs(), "Maintenance loop started");

        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // Skip immediate tick

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            // Skip if stopped while waiting
            if !*running.read().await {
                break;
            }

            Self::run_maintenance_once(&cache, max_chunk_bytes).await;
        }

        info!("Maintenance loop stopped");
    }

    /// One maintenance pass; failures are logged and retried next tick
    pub(crate) async fn run_maintenance_once(cache: &Cache, max_chunk_bytes: Option<u64>) {
        match cache.cleanup_expired().await {
            Ok(report) if !report.removed_apps.is_empty() => {
                info!(
                    apps = report.removed_apps.len(),
                    chunks = report.removed_chunks,
                    "Maintenance: removed expired apps"
                );
            }
            Ok(_) => trace!("Maintenance: no expired apps"),
            Err(e) => warn!(error = %e, "Maintenance: failed to remove expired apps"),
        }

        let Some(max) = max_chunk_bytes else {
            return;
        };
        match cache.evict_chunks(max).await {
            Ok(report) if report.evicted_chunks > 0 => {
                info!(
                    evicted = report.evicted_chunks,
                    freed_bytes = report.freed_bytes,
                    "Maintenance: evicted chunks over budget"
                );
            }
            Ok(_) => trace!("Maintenance: chunk cache within budget"),
            Err(e) => warn!(error = %e, "Maintenance: chunk eviction failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{build, BuildOptions, SourceFile, CHUNK_SIZE};
    use crate::data::clock::ManualClock;
    use crate::data::start::start_memory_db;
    use crate::security::generate_key_pair;

    #[tokio::test]
    async fn test_maintenance_pass_expires_and_evicts() {
        let db = Arc::new(tokio::sync::Mutex::new(start_memory_db().unwrap()));
        let clock = Arc::new(ManualClock::new(0));
        let cache = Cache::new(db, clock.clone());
        let keys = generate_key_pair();

        let big = vec![7u8; CHUNK_SIZE * 2];
        let short = build(
            vec![SourceFile::new("index.html", "a"), SourceFile::new("a.bin", big.clone())],
            &BuildOptions::new("tmp").with_cache_duration_ms(1_000),
            &keys,
            clock.as_ref(),
        )
        .unwrap();
        let long = build(
            vec![SourceFile::new("index.html", "b"), SourceFile::new("b.bin", vec![9u8; CHUNK_SIZE * 2])],
            &BuildOptions::new("keep"),
            &keys,
            clock.as_ref(),
        )
        .unwrap();
        cache.admit_app(&short.manifest, &short.chunks).await.unwrap();
        cache.admit_app(&long.manifest, &long.chunks).await.unwrap();

        clock.set(1_001);
        Node::run_maintenance_once(&cache, Some(0)).await;

        let apps = cache.list_apps().await.unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].0, long.manifest.app_id);
        // the surviving app is now partially cached
        assert_eq!(cache.stats().await.unwrap().chunk_bytes, 0);
        assert!(!cache.is_fully_cached(&long.manifest).await.unwrap());
    }

    #[tokio::test]
    async fn test_maintenance_loop_stops_on_shutdown() {
        let db = Arc::new(tokio::sync::Mutex::new(start_memory_db().unwrap()));
        let cache = Cache::new(db, Arc::new(ManualClock::new(0)));
        let running = Arc::new(RwLock::new(true));
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn(Node::run_maintenance_loop(
            cache,
            running,
            rx,
            Duration::from_secs(3600),
            None,
        ));
        tx.send_replace(true);

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
