//! Error types for the group registry.

use thiserror::Error;

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors that can occur when working with registry data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("invalid provider id {0:?}: expected <scheme>://<zone>//<node-id>")]
    InvalidProviderId(String),

    #[error("group not registered: {0}")]
    GroupNotFound(String),
}
