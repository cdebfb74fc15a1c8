//! App bundles
//!
//! - `types`: the manifest data model (JSON wire contract)
//! - `hasher`: BLAKE3 hashing and fixed-size chunking
//! - `mime`: extension to MIME type table
//! - `manifest`: build, hash, sign and verify manifests

pub mod error;
pub mod hasher;
pub mod manifest;
pub mod mime;
pub mod types;

pub use error::{BundleError, IntegrityError};
pub use hasher::{ChunkPayload, CHUNK_SIZE};
pub use manifest::{build, verify, BuildOptions, BuildOutput, SourceFile};
pub use types::{CacheStrategy, ChunkInfo, ContentHash, FileEntry, Manifest, Permission};
