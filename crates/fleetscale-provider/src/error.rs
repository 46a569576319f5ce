//! Provider error types.

use fleetscale_cloud::CloudError;
use fleetscale_registry::RegistryError;
use thiserror::Error;

/// Coarse classification of a [`ProviderError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Capacity,
    Remote,
    AutoscalerDisabled,
    NotImplemented,
    GroupNotFound,
    Template,
    Credential,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    /// Bad input, rejected before any remote call.
    #[error("{0}")]
    Validation(String),

    /// The operation would leave the group outside its size bounds.
    #[error("{0}")]
    Capacity(String),

    #[error("remote compute api: {0}")]
    Remote(CloudError),

    /// The remote autoscaler is switched off; the registry was flushed.
    #[error("autoscaler has been disabled, flushed all existing autoscaling groups")]
    AutoscalerDisabled,

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("node group not found: {0}")]
    GroupNotFound(String),

    #[error("invalid node config: {0}")]
    Template(String),

    #[error("credential error: {0}")]
    Credential(String),
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::Validation(_) => ErrorKind::Validation,
            ProviderError::Capacity(_) => ErrorKind::Capacity,
            ProviderError::Remote(_) => ErrorKind::Remote,
            ProviderError::AutoscalerDisabled => ErrorKind::AutoscalerDisabled,
            ProviderError::NotImplemented(_) => ErrorKind::NotImplemented,
            ProviderError::GroupNotFound(_) => ErrorKind::GroupNotFound,
            ProviderError::Template(_) => ErrorKind::Template,
            ProviderError::Credential(_) => ErrorKind::Credential,
        }
    }
}

impl From<CloudError> for ProviderError {
    fn from(e: CloudError) -> Self {
        match e {
            CloudError::InvalidRequest(msg) => ProviderError::Validation(msg),
            CloudError::Credential(msg) => ProviderError::Credential(msg),
            other => ProviderError::Remote(other),
        }
    }
}

impl From<RegistryError> for ProviderError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::InvalidProviderId(_) => ProviderError::Validation(e.to_string()),
            RegistryError::GroupNotFound(id) => ProviderError::GroupNotFound(id),
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;
