//! Network layer for Mooring
//!
//! Contains:
//! - Transport: the peer transport contract and an in-process implementation
//! - Wire: shared `[type][len][payload]` framing
//! - Distribution: deployment, manifest, chunk and state messages
//! - SingleFlight: at most one in-flight request per key

pub mod distribution;
pub mod memory;
pub mod singleflight;
pub mod transport;
pub mod wire;

// Re-export commonly used items
pub use distribution::{DistributionConfig, DistributionError, DistributionService, FanOutReport};
pub use memory::{MemoryNetwork, MemoryTransport};
pub use transport::{InboundMessage, PeerId, Transport, TransportError};
