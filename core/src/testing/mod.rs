//! Testing utilities for Mooring
//!
//! Wires several real nodes onto one in-process network.
//!
//! # Example
//!
//! ```ignore
//! let network = TestNetwork::with_nodes(2).await?;
//! let alice = network.node(0);
//!
//! let outcome = alice.deploy(files, alice.build_options("chat")).await?;
//! network.wait_for_app(1, &outcome.manifest.app_id).await;
//!
//! let app = network.node(1).load("mooring://chat").await?;
//! ```

pub mod network;

pub use network::{TestNetwork, TEST_EPOCH_MILLIS};
