//! Receive loop
//!
//! Pulls datagrams off the transport and hands them to the distribution
//! service one at a time.

use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tracing::{debug, info};

use crate::network::distribution::DistributionService;
use crate::protocol::Node;

impl Node {
    /// Run until shutdown or until the transport closes
    pub(crate) async fn run_receive_loop(
        distribution: Arc<DistributionService>,
        running: Arc<RwLock<bool>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Receive loop started");
        let transport = distribution.transport().clone();

        loop {
            if !*running.read().await {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                message = transport.recv() => match message {
                    Some(message) => distribution.handle_incoming(message).await,
                    None => {
                        debug!("Receive loop: transport closed");
                        break;
                    }
                },
            }
        }

        info!("Receive loop stopped");
    }
}
