//! CloudProvider — the capability set the orchestrator consumes.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{ProviderError, ProviderResult};
use crate::group::NodeGroup;
use crate::manager::ReconciliationManager;
use crate::scale::ScaleController;
use crate::template::{GPU_LABEL, TemplateBuilder};

pub const PROVIDER_NAME: &str = "fleetscale";

pub const AVAILABLE_GPU_TYPES: [&str; 3] =
    ["nvidia-tesla-k80", "nvidia-tesla-p40", "nvidia-tesla-v100"];

struct Rotation {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct CloudProvider {
    manager: Arc<ReconciliationManager>,
    controller: Arc<ScaleController>,
    templates: TemplateBuilder,
    rotation: Mutex<Option<Rotation>>,
}

impl CloudProvider {
    pub fn new(manager: Arc<ReconciliationManager>) -> Self {
        Self {
            controller: Arc::new(ScaleController::new(manager.clone())),
            manager,
            templates: TemplateBuilder::new(),
            rotation: Mutex::new(None),
        }
    }

    pub fn with_template_builder(mut self, templates: TemplateBuilder) -> Self {
        self.templates = templates;
        self
    }

    pub fn manager(&self) -> &Arc<ReconciliationManager> {
        &self.manager
    }

    pub fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    /// Every registered group, sorted by id.
    pub fn node_groups(&self) -> Vec<NodeGroup> {
        self.manager
            .registry()
            .groups()
            .into_iter()
            .map(|d| self.facade(d))
            .collect()
    }

    pub fn node_group(&self, group_id: &str) -> ProviderResult<NodeGroup> {
        self.manager
            .registry()
            .descriptor(group_id)
            .map(|d| self.facade(d))
            .ok_or_else(|| ProviderError::GroupNotFound(group_id.to_string()))
    }

    /// The group owning a node. Nodes without a provider id, and nodes no
    /// group claims, have none.
    pub fn node_group_for_node(&self, provider_id: &str) -> Option<NodeGroup> {
        if provider_id.is_empty() {
            return None;
        }
        self.manager
            .registry()
            .find_group_for_provider_id(provider_id)
            .map(|d| self.facade(d))
    }

    fn facade(&self, descriptor: Arc<fleetscale_registry::GroupDescriptor>) -> NodeGroup {
        NodeGroup::new(descriptor, self.controller.clone(), self.templates.clone())
    }

    /// Cadence-gated refresh.
    pub async fn refresh(&self) -> ProviderResult<()> {
        self.manager.refresh().await
    }

    pub async fn force_refresh(&self) -> ProviderResult<()> {
        self.manager.force_refresh().await
    }

    pub fn gpu_label(&self) -> &'static str {
        GPU_LABEL
    }

    pub fn available_gpu_types(&self) -> BTreeSet<&'static str> {
        AVAILABLE_GPU_TYPES.into_iter().collect()
    }

    pub fn available_machine_types(&self) -> Vec<String> {
        Vec::new()
    }

    pub fn pricing(&self) -> ProviderResult<()> {
        Err(ProviderError::NotImplemented("pricing".to_string()))
    }

    pub fn new_node_group(&self, machine_type: &str) -> ProviderResult<NodeGroup> {
        debug!(%machine_type, "node group creation requested");
        Err(ProviderError::NotImplemented("new node group".to_string()))
    }

    /// Start the background credential rotation. Idempotent.
    pub fn start_credential_rotation(&self) {
        let mut rotation = self.rotation.lock().expect("rotation lock");
        if rotation.is_some() {
            return;
        }
        let (shutdown, rx) = watch::channel(false);
        let task = self.manager.spawn_credential_rotation(rx);
        *rotation = Some(Rotation { shutdown, task });
        info!("credential rotation started");
    }

    pub fn rotation_running(&self) -> bool {
        self.rotation
            .lock()
            .expect("rotation lock")
            .as_ref()
            .is_some_and(|r| !r.task.is_finished())
    }

    /// Stop background work.
    pub fn cleanup(&self) -> ProviderResult<()> {
        if let Some(rotation) = self.rotation.lock().expect("rotation lock").take() {
            let _ = rotation.shutdown.send(true);
            info!("credential rotation stopped");
        }
        Ok(())
    }
}
