//! Bundle errors

use crate::naming::codec::CodecError;

/// Errors raised while building a manifest
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    /// No files were supplied
    #[error("bundle has no files")]
    Empty,
    /// Two files normalize to the same path
    #[error("duplicate path in bundle: {0}")]
    DuplicatePath(String),
    /// Absolute path, `..` segment, backslash or empty segment
    #[error("unsafe path in bundle: {0:?}")]
    InvalidPath(String),
    /// No `.html` file to use as the entry point
    #[error("bundle has no HTML entry point")]
    NoEntryPoint,
    /// The app name cannot be encoded
    #[error("invalid app name: {0}")]
    Name(#[from] CodecError),
    /// Explicit app ID has an invalid form
    #[error("invalid app id: {0:?}")]
    InvalidAppId(String),
    /// Canonical serialization failed
    #[error("manifest serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Reasons a manifest, file or chunk failed verification
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntegrityError {
    #[error("manifest hash mismatch (declared {declared}, computed {computed})")]
    ManifestHash { declared: String, computed: String },
    #[error("manifest signature does not verify under deployer key")]
    Signature,
    #[error("file hash mismatch: {path}")]
    FileHash { path: String },
    #[error("chunk hash mismatch: {hash}")]
    ChunkHash { hash: String },
    #[error("app id mismatch (requested {requested}, received {received})")]
    AppIdMismatch { requested: String, received: String },
    #[error("malformed manifest: {0}")]
    Malformed(String),
}
