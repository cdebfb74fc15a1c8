//! Resolver and loader
//!
//! Turns a `mooring://` address into a verified, self-contained document plus
//! a permission-gated capability bridge.

pub mod address;
pub mod bridge;
pub mod render;
pub mod service;
pub mod state;

pub use address::{parse_address, AddressError, AppTarget, ParsedAddress, ResolvedAddress, DEFAULT_SCHEME};
pub use bridge::{AppUpdates, BridgeError, CapabilityBridge};
pub use render::{inline_document, RenderError};
pub use service::{LoadError, LoadedApp, Loader, RenderHost, RenderHostError};
pub use state::LoadState;
