//! fleetscale-cloud — the remote compute API as seen by the reconciler.
//!
//! The control plane owns autoscaling groups and their nodes; this crate
//! describes its four actions, validates requests before any network I/O,
//! and provides two implementations of the [`ComputeApi`] contract.
//!
//! # Architecture
//!
//! ```text
//! ComputeApi (trait, boxed futures)
//!   ├── HttpComputeClient   signed JSON POST per action, one metrics
//!   │                       sample per call
//!   └── InMemoryComputeApi  scriptable fake for tests and `fleetd simulate`
//!
//! CredentialProvider (trait)
//!   ├── EnvCredentialProvider     access keys from the environment
//!   └── StaticCredentialProvider  fixed bundle
//! ```

pub mod api;
pub mod credentials;
pub mod error;
pub mod http;
pub mod memory;
pub mod types;

pub use api::{ApiFuture, ComputeApi, ComputeApiFactory};
pub use credentials::{
    ApiConfig, Credential, CredentialBundle, CredentialProvider, EnvCredentialProvider,
    StaticCredentialProvider, rotation_delay,
};
pub use error::{CloudError, CloudResult};
pub use http::{HttpComputeClient, sign_params};
pub use memory::{ClusterSeed, InMemoryComputeApi, NODE_NOT_FOUND_CODE, RecordedCall};
pub use types::*;
