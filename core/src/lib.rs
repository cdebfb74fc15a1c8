//! Mooring Core
//!
//! Content-addressed app distribution and caching.
//!
//! This is the foundation crate that provides:
//! - Friendly names mapped to fixed-width app addresses
//! - Signed bundle manifests with inline small files and chunked large ones
//! - A persistent cache of manifests, chunks and per-app state
//! - A peer protocol to announce deployments and fetch manifests and chunks
//! - A loader that turns `mooring://` addresses into verified documents
//!
//! # Module Structure
//!
//! - `protocol/`: Public interface (Node, config, errors, events)
//! - `tasks/`: Background automation (receive loop, maintenance)
//! - `naming/`: Name codec and local name claims
//! - `bundle/`: Hashing, chunking, manifest build and verification
//! - `data/`: SQLite persistence (identity, cache)
//! - `network/`: Transport contract, wire framing, distribution protocol
//! - `loader/`: Address resolution, load state machine, capability bridge
//! - `security/`: Ed25519 keys and signatures
//! - `testing/`: Test utilities
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use mooring_core::{MemoryNetwork, Node, NodeConfig, SourceFile};
//!
//! let net = MemoryNetwork::new();
//! let node = Node::open(NodeConfig::for_testing(), Arc::new(net.join([1; 32]))).await?;
//!
//! let files = vec![
//!     SourceFile::new("index.html", "<script src=\"app.js\"></script>"),
//!     SourceFile::new("app.js", "console.log('hi')"),
//! ];
//! let outcome = node.deploy(files, node.build_options("chat")).await?;
//!
//! let app = node.load("mooring://chat").await?;
//! assert_eq!(app.manifest.app_id, outcome.manifest.app_id);
//! ```

// Public interface
pub mod protocol;

// Internal modules
pub(crate) mod tasks;

// Infrastructure modules (pub for flexibility)
pub mod bundle;
pub mod data;
pub mod loader;
pub mod naming;
pub mod network;
pub mod security;
pub mod testing;

// Re-export main API types for convenience
pub use protocol::{
    AppDeployedEvent, ConfigError, DeployOutcome, MooringError, Node, NodeConfig, NodeEvent,
    StateUpdatedEvent,
};

pub use bundle::{
    BuildOptions, CacheStrategy, ContentHash, IntegrityError, Manifest, Permission, SourceFile,
};
pub use data::{CacheStats, Clock, ManualClock, SystemClock};
pub use loader::{
    CapabilityBridge, LoadError, LoadState, LoadedApp, RenderHost, RenderHostError,
    ResolvedAddress,
};
pub use naming::{ClaimOutcome, NameClaim};
pub use network::{FanOutReport, MemoryNetwork, Transport};
