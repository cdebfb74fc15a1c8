//! Distribution protocol
//!
//! Announces deployments, serves and fetches manifests and chunks, and
//! replicates per-app state between peers.

mod incoming;
mod outgoing;
pub mod protocol;
pub mod service;

pub use incoming::DeploymentOutcome;
pub use protocol::{Envelope, MessageBody, MessageKind};
pub use service::{
    DistributionConfig, DistributionError, DistributionService, FanOutReport, PeerFailure,
};
