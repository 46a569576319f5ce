//! fleetscale-registry — in-memory mirror of the remote autoscaling groups.
//!
//! Maps group id → (descriptor, live node records). The registry is the
//! only shared mutable state in fleetscale and is rebuilt from the remote
//! control plane on every refresh cycle; nothing is persisted.
//!
//! # Invariants
//!
//! - Every node record belongs to a registered group (no orphans).
//! - A group's target size is the number of its non-terminal node
//!   records. It is computed on read, never stored.
//! - Full refreshes build a fresh map and swap it in under one lock, so
//!   a reader never sees two remote snapshots mixed for the same group.

pub mod error;
pub mod registry;
pub mod types;

pub use error::{RegistryError, RegistryResult};
pub use registry::{GroupView, NodeGroupRegistry};
pub use types::*;
