//! Node errors
//!
//! Every layer has its own error enum; they all fold into [`MooringError`]
//! at the node surface.

use crate::bundle::{BundleError, IntegrityError};
use crate::data::cache::CacheError;
use crate::data::start::StartError;
use crate::loader::{AddressError, BridgeError, LoadError};
use crate::naming::{CodecError, NamingError};
use crate::network::distribution::DistributionError;

use super::config::ConfigError;

/// Errors that can occur in the node
#[derive(Debug, thiserror::Error)]
pub enum MooringError {
    /// Malformed name, address, path, bundle or config
    #[error("invalid input: {0}")]
    Validation(String),
    /// Hash or signature mismatch
    #[error("integrity error: {0}")]
    Integrity(IntegrityError),
    /// Absent locally and on the network
    #[error("not found: {0}")]
    NotFound(String),
    /// Database failure
    #[error("storage error: {0}")]
    Storage(String),
    /// The app lacks a capability
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// Peer transport failure
    #[error("transport error: {0}")]
    Transport(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to open the node
    #[error("failed to start node: {0}")]
    StartFailed(String),
    /// The node has been closed
    #[error("node is not running")]
    NotRunning,
}

impl MooringError {
    /// Stable category name
    pub fn kind(&self) -> &'static str {
        match self {
            MooringError::Validation(_) => "validation",
            MooringError::Integrity(_) => "integrity",
            MooringError::NotFound(_) => "not_found",
            MooringError::Storage(_) => "storage",
            MooringError::PermissionDenied(_) => "permission_denied",
            MooringError::Transport(_) => "transport",
            MooringError::Io(_) => "io",
            MooringError::StartFailed(_) => "start_failed",
            MooringError::NotRunning => "not_running",
        }
    }
}

impl From<CodecError> for MooringError {
    fn from(e: CodecError) -> Self {
        MooringError::Validation(e.to_string())
    }
}

impl From<AddressError> for MooringError {
    fn from(e: AddressError) -> Self {
        MooringError::Validation(e.to_string())
    }
}

impl From<ConfigError> for MooringError {
    fn from(e: ConfigError) -> Self {
        MooringError::Validation(e.to_string())
    }
}

impl From<BundleError> for MooringError {
    fn from(e: BundleError) -> Self {
        MooringError::Validation(e.to_string())
    }
}

impl From<IntegrityError> for MooringError {
    fn from(e: IntegrityError) -> Self {
        MooringError::Integrity(e)
    }
}

impl From<CacheError> for MooringError {
    fn from(e: CacheError) -> Self {
        MooringError::Storage(e.to_string())
    }
}

impl From<rusqlite::Error> for MooringError {
    fn from(e: rusqlite::Error) -> Self {
        MooringError::Storage(e.to_string())
    }
}

impl From<StartError> for MooringError {
    fn from(e: StartError) -> Self {
        MooringError::StartFailed(e.to_string())
    }
}

impl From<NamingError> for MooringError {
    fn from(e: NamingError) -> Self {
        match e {
            NamingError::Invalid(e) => e.into(),
            NamingError::Storage(e) => e.into(),
        }
    }
}

impl From<DistributionError> for MooringError {
    fn from(e: DistributionError) -> Self {
        match e {
            DistributionError::NotFound(what) => MooringError::NotFound(what),
            DistributionError::Cache(msg) => MooringError::Storage(msg),
            DistributionError::Transport(msg) | DistributionError::Encode(msg) => {
                MooringError::Transport(msg)
            }
        }
    }
}

impl From<BridgeError> for MooringError {
    fn from(e: BridgeError) -> Self {
        match e {
            BridgeError::PermissionDenied { .. } => MooringError::PermissionDenied(e.to_string()),
            BridgeError::Storage(msg) => MooringError::Storage(msg),
            BridgeError::Distribution(e) => e.into(),
        }
    }
}

impl From<LoadError> for MooringError {
    fn from(e: LoadError) -> Self {
        match e {
            LoadError::Address(e) => e.into(),
            LoadError::Name(e) => e.into(),
            LoadError::NotFound { .. } | LoadError::ChunkUnavailable { .. } => {
                MooringError::NotFound(e.to_string())
            }
            LoadError::Integrity(e) | LoadError::Verification(e) => MooringError::Integrity(e),
            LoadError::FileNotFound(_) => MooringError::NotFound(e.to_string()),
            LoadError::Storage(e) => e.into(),
            LoadError::Naming(e) => e.into(),
            LoadError::Network(e) => e.into(),
            LoadError::Render(_) | LoadError::Host(_) => MooringError::Transport(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::Permission;

    #[test]
    fn test_mooring_error_display() {
        let err = MooringError::NotRunning;
        assert_eq!(err.to_string(), "node is not running");

        let err = MooringError::NotFound("app X".to_string());
        assert_eq!(err.to_string(), "not found: app X");

        let err = MooringError::StartFailed("locked".to_string());
        assert_eq!(err.to_string(), "failed to start node: locked");
    }

    #[test]
    fn test_load_errors_map_to_categories() {
        let err: MooringError = LoadError::NotFound {
            app_id: "x".to_string(),
        }
        .into();
        assert_eq!(err.kind(), "not_found");
        assert_eq!(err.to_string(), "not found: app not found on network");

        let err: MooringError = LoadError::Verification(IntegrityError::Signature).into();
        assert_eq!(err.kind(), "integrity");

        let err: MooringError = LoadError::Address(AddressError::EmptyHost).into();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_bridge_and_distribution_errors_map() {
        let err: MooringError = BridgeError::PermissionDenied {
            permission: Permission::Broadcast,
            app_id: "a".to_string(),
        }
        .into();
        assert_eq!(err.kind(), "permission_denied");

        let err: MooringError = DistributionError::NotFound("chunk".to_string()).into();
        assert_eq!(err.kind(), "not_found");

        let err: MooringError = DistributionError::Transport("closed".to_string()).into();
        assert_eq!(err.kind(), "transport");

        let err: MooringError = CodecError::EmptyName(String::new()).into();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_mooring_error_is_error_trait() {
        let err: Box<dyn std::error::Error> = Box::new(MooringError::NotRunning);
        assert!(!err.to_string().is_empty());
    }
}
