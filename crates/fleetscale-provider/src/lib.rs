//! fleetscale-provider — reconciles a cluster's autoscaling groups with
//! the remote control plane and exposes them to an orchestrator.
//!
//! # Architecture
//!
//! ```text
//! CloudProvider
//!   ├── node_groups() ──► NodeGroup (per-group facade)
//!   │                       ├── sizes / members ──► NodeGroupRegistry
//!   │                       ├── increase / delete ──► ScaleController
//!   │                       └── template_node_info ──► TemplateBuilder
//!   └── refresh() ──► ReconciliationManager
//!                       ├── describe groups ─┐
//!                       ├── list nodes ──────┼──► ComputeApi (ClientHandle)
//!                       └── credential rotation (background task)
//! ```
//!
//! Scale-ups are split into batches of at most ten nodes and issued one
//! after another; scale-downs are one call per node. Both re-list nodes
//! afterwards so the registry reflects what the remote side did.

pub mod descriptor;
pub mod error;
pub mod group;
pub mod manager;
pub mod provider;
pub mod scale;
pub mod template;

pub use descriptor::build_descriptor;
pub use error::{ErrorKind, ProviderError, ProviderResult};
pub use group::{Instance, NodeGroup};
pub use manager::{ClientHandle, ManagerSettings, ReconciliationManager};
pub use provider::{AVAILABLE_GPU_TYPES, CloudProvider, PROVIDER_NAME};
pub use scale::{ScaleController, batch_counts, build_scale_up_request, generate_password};
pub use template::{
    GPU_LABEL, KernelReservation, NodeCondition, Quantity, TemplateBuilder, TemplateNode,
    TieredKernelReservation,
};
