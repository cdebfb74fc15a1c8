//! Mooring Node - Public Interface
//!
//! This module provides the public API of a node.
//! External code imports types and methods from here.
//!
//! # Module Structure
//!
//! - `core.rs`: Node struct, open/close, deploy/load/claim
//! - `config.rs`: NodeConfig builder and TOML loading
//! - `error.rs`: MooringError
//! - `events.rs`: Node events (deployments, state updates)
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mooring_core::{MemoryNetwork, Node, NodeConfig, SourceFile};
//!
//! let net = MemoryNetwork::new();
//! let node = Node::open(NodeConfig::default(), Arc::new(net.join([1; 32]))).await?;
//!
//! let files = vec![SourceFile::new("index.html", "<h1>hi</h1>")];
//! node.deploy(files, node.build_options("chat")).await?;
//! let app = node.load("mooring://chat").await?;
//!
//! node.close().await;
//! ```

mod config;
pub(crate) mod core;
mod error;
pub mod events;

// Core node
pub use config::{ConfigError, NodeConfig};
pub use core::{DeployOutcome, Node};

// Error type
pub use error::MooringError;

// Events (for app layer)
pub use events::{AppDeployedEvent, NodeEvent, StateUpdatedEvent};
