//! Background tasks for the Node
//!
//! This module contains the long-running background tasks:
//! - Receive loop (decodes and dispatches inbound datagrams)
//! - Maintenance loop (removes expired apps, enforces the chunk budget)

mod maintenance;
mod receive;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::protocol::Node;

impl Node {
    /// Start background tasks (receive loop, maintenance loop)
    pub(crate) async fn start_background_tasks(&self, shutdown_rx: watch::Receiver<bool>) {
        let mut tasks = self.tasks.write().await;

        // 1. Receive loop
        let distribution = self.distribution.clone();
        let running = self.running.clone();
        let shutdown = shutdown_rx.clone();
        let receive_task = tokio::spawn(async move {
            Self::run_receive_loop(distribution, running, shutdown).await;
        });
        tasks.push(receive_task);

        // 2. Maintenance loop
        match self.config.cleanup_interval() {
            Some(interval) => {
                let cache = self.cache.clone();
                let running = self.running.clone();
                let max_chunk_bytes = self.config.max_chunk_cache_bytes;
                let maintenance_task = tokio::spawn(async move {
                    Self::run_maintenance_loop(cache, running, shutdown_rx, interval, max_chunk_bytes)
                        .await;
                });
                tasks.push(maintenance_task);
            }
            None => debug!("Maintenance loop disabled"),
        }

        info!(tasks = tasks.len(), "Background tasks started");
    }
}
