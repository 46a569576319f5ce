//! The remote compute API contract.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use fleetscale_metrics::MetricsSink;

use crate::credentials::CredentialBundle;
use crate::error::CloudResult;
use crate::types::{AutoscalerGroups, ClusterRef, RemoteNode, ScaleDownRequest, ScaleUpRequest};

/// Boxed future returned by every [`ComputeApi`] call.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = CloudResult<T>> + Send + 'a>>;

/// The four remote actions the reconciler depends on.
///
/// Every call blocks its caller until the remote side answers; there is no
/// retry at this layer. Implementations validate parameters before any I/O
/// and reject bad ones with `CloudError::InvalidRequest`.
pub trait ComputeApi: Send + Sync {
    fn describe_autoscaler_groups(&self, cluster: ClusterRef) -> ApiFuture<'_, AutoscalerGroups>;

    fn list_nodes(&self, cluster: ClusterRef) -> ApiFuture<'_, Vec<RemoteNode>>;

    /// Add `req.count` nodes (at most ten) to a group.
    fn scale_up(&self, req: ScaleUpRequest) -> ApiFuture<'_, ()>;

    fn scale_down(&self, req: ScaleDownRequest) -> ApiFuture<'_, ()>;
}

/// Builds a client from a freshly loaded credential bundle, reporting call
/// samples to the given sink. Called at startup and on every credential
/// rotation.
pub type ComputeApiFactory = Arc<
    dyn Fn(&CredentialBundle, Arc<dyn MetricsSink>) -> CloudResult<Arc<dyn ComputeApi>>
        + Send
        + Sync,
>;
