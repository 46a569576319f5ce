//! NodeGroup — the orchestrator's per-group view.
//!
//! A thin delegator: sizes and membership come from the registry,
//! mutations go through the [`ScaleController`], templates through the
//! [`TemplateBuilder`]. Groups exist only because they were discovered,
//! so their lifecycle cannot be managed from here.

use std::sync::Arc;

use fleetscale_registry::GroupDescriptor;
use serde::Serialize;

use crate::error::{ProviderError, ProviderResult};
use crate::scale::ScaleController;
use crate::template::{TemplateBuilder, TemplateNode};

/// A node as the orchestrator sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instance {
    /// Provider id, `<scheme>://<zone>//<node-id>`.
    pub id: String,
    pub name: String,
    pub status: String,
}

/// One discovered autoscaling group.
#[derive(Clone)]
pub struct NodeGroup {
    descriptor: Arc<GroupDescriptor>,
    controller: Arc<ScaleController>,
    templates: TemplateBuilder,
}

impl NodeGroup {
    pub fn new(
        descriptor: Arc<GroupDescriptor>,
        controller: Arc<ScaleController>,
        templates: TemplateBuilder,
    ) -> Self {
        Self {
            descriptor,
            controller,
            templates,
        }
    }

    /// Remote autoscaling group id.
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    /// Descriptor snapshot this view was built from.
    pub fn descriptor(&self) -> &GroupDescriptor {
        &self.descriptor
    }

    /// Lower size bound.
    pub fn min_size(&self) -> u32 {
        self.descriptor.min_size
    }

    /// Upper size bound.
    pub fn max_size(&self) -> u32 {
        self.descriptor.max_size
    }

    /// Live count of the group's non-terminal nodes.
    pub fn target_size(&self) -> usize {
        self.controller
            .manager()
            .registry()
            .target_size(self.id())
            .unwrap_or(0)
    }

    /// Grow the group by `delta` nodes.
    pub async fn increase_size(&self, delta: i64) -> ProviderResult<()> {
        self.controller.increase_size(self.id(), delta).await
    }

    /// Always `NotImplemented`.
    pub async fn decrease_target_size(&self, delta: i64) -> ProviderResult<()> {
        self.controller.decrease_target_size(self.id(), delta).await
    }

    /// Delete the given nodes, in order.
    pub async fn delete_nodes(&self, provider_ids: &[String]) -> ProviderResult<()> {
        self.controller.delete_nodes(self.id(), provider_ids).await
    }

    /// Discovered groups always exist.
    pub fn exist(&self) -> bool {
        true
    }

    pub fn create(&self) -> ProviderResult<NodeGroup> {
        Err(ProviderError::NotImplemented("create node group".to_string()))
    }

    pub fn delete(&self) -> ProviderResult<()> {
        Err(ProviderError::NotImplemented("delete node group".to_string()))
    }

    /// Groups are never created by the autoscaler.
    pub fn autoprovisioned(&self) -> bool {
        false
    }

    /// `"<id> (<min>:<max>)"`.
    pub fn debug(&self) -> String {
        self.descriptor.debug_string()
    }

    pub fn nodes(&self) -> Vec<Instance> {
        self.controller
            .manager()
            .registry()
            .nodes(self.id())
            .unwrap_or_default()
            .into_iter()
            .map(|n| Instance {
                id: n.provider_id.to_string(),
                name: n.name,
                status: n.status.to_string(),
            })
            .collect()
    }

    pub fn template_node_info(&self) -> ProviderResult<TemplateNode> {
        self.templates.build(&self.descriptor)
    }
}
