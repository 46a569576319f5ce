//! ScaleController — batched grow and node-by-node shrink.
//!
//! Mutations of one group are serialized by a per-group async mutex held
//! from the size precondition check through the remote calls and the
//! follow-up node refresh. Partial progress is never rolled back; the
//! registry is refreshed afterwards so it reflects what actually happened.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use fleetscale_cloud::{
    ChargeType, ClusterRef, MAX_NODES_PER_SCALE_UP, ScaleDownRequest, ScaleUpRequest,
};
use fleetscale_registry::{GroupDescriptor, GroupId, ProviderId};
use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use tracing::{debug, error, info, warn};

use crate::error::{ProviderError, ProviderResult};
use crate::manager::{ClientHandle, ReconciliationManager};

const PASSWORD_BLOCK_LEN: usize = 8;

/// Split `delta` into per-call node counts of at most ten.
pub fn batch_counts(delta: u32) -> Vec<u32> {
    let mut counts = Vec::with_capacity(delta.div_ceil(MAX_NODES_PER_SCALE_UP) as usize);
    let mut remaining = delta;
    while remaining > 0 {
        let count = remaining.min(MAX_NODES_PER_SCALE_UP);
        counts.push(count);
        remaining -= count;
    }
    counts
}

/// Login password for new nodes when the group has none configured:
/// two random alphanumeric blocks joined by `.`, base64 encoded.
pub fn generate_password() -> String {
    let block = || {
        OsRng
            .sample_iter(&Alphanumeric)
            .take(PASSWORD_BLOCK_LEN)
            .map(char::from)
            .collect::<String>()
    };
    STANDARD.encode(format!("{}.{}", block(), block()))
}

/// The scale-up request template for a group. `count` is left at zero.
pub fn build_scale_up_request(group: &GroupDescriptor, cluster: &ClusterRef) -> ScaleUpRequest {
    let res = &group.resources;
    let (charge_type, quantity) = match ChargeType::from_config(&res.charge_type) {
        Some(charge) => (charge.as_str().to_string(), charge.quantity()),
        // Left as-is so request validation reports it.
        None => (res.charge_type.clone(), 1),
    };
    let password = if res.password.is_empty() {
        generate_password()
    } else {
        res.password.clone()
    };

    ScaleUpRequest {
        region: cluster.region.clone(),
        cluster_id: cluster.cluster_id.clone(),
        zone: group.zone.clone(),
        password,
        charge_type,
        machine_type: res.machine_type.clone(),
        minimal_cpu_platform: res.minimal_cpu_platform.clone(),
        gpu_type: res.gpu_type.clone(),
        gpu: res.gpu_count,
        cpu: res.cpu_cores,
        mem: res.memory_mib,
        boot_disk_type: res.boot_disk_type.clone(),
        data_disk_type: res.data_disk_type.clone(),
        data_disk_size: res.data_disk_size_gb,
        labels: res.labels.clone(),
        taints: res.taints.clone(),
        max_pods: res.max_pods,
        count: 0,
        asg_id: group.id.clone(),
        image_id: res.image_id.clone(),
        user_data: res.user_data.clone(),
        init_script: res.init_script.clone(),
        isolation_group: res.isolation_group.clone(),
        tag: res.tag.clone(),
        quantity,
    }
}

pub struct ScaleController {
    manager: Arc<ReconciliationManager>,
    group_locks: Mutex<HashMap<GroupId, Arc<tokio::sync::Mutex<()>>>>,
}

impl ScaleController {
    pub fn new(manager: Arc<ReconciliationManager>) -> Self {
        Self {
            manager,
            group_locks: Mutex::new(HashMap::new()),
        }
    }

    /// The manager whose registry and client this controller uses.
    pub fn manager(&self) -> &Arc<ReconciliationManager> {
        &self.manager
    }

    /// Mutation lock of `group_id`. Idle locks of groups that have left
    /// the registry are dropped on the way.
    fn group_lock(&self, group_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let registry = self.manager.registry();
        let mut locks = self.group_locks.lock().expect("group locks");
        locks.retain(|id, lock| {
            id == group_id || Arc::strong_count(lock) > 1 || registry.contains(id)
        });
        locks.entry(group_id.to_string()).or_default().clone()
    }

    /// Ids of the groups that currently hold a mutation lock, sorted.
    pub fn locked_groups(&self) -> Vec<GroupId> {
        let locks = self.group_locks.lock().expect("group locks");
        let mut ids: Vec<GroupId> = locks.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn descriptor(&self, group_id: &str) -> ProviderResult<Arc<GroupDescriptor>> {
        self.manager
            .registry()
            .descriptor(group_id)
            .ok_or_else(|| ProviderError::GroupNotFound(group_id.to_string()))
    }

    fn current_size(&self, group_id: &str) -> usize {
        self.manager.registry().target_size(group_id).unwrap_or(0)
    }

    /// Grow a group by `delta` nodes in calls of at most ten.
    pub async fn increase_size(&self, group_id: &str, delta: i64) -> ProviderResult<()> {
        if delta <= 0 {
            return Err(ProviderError::Validation(
                "size increase must be positive".to_string(),
            ));
        }
        let delta = u32::try_from(delta).map_err(|_| {
            ProviderError::Capacity(format!("size increase too large - delta:{delta}"))
        })?;

        let lock = self.group_lock(group_id);
        let _guard = lock.lock().await;

        let group = self.descriptor(group_id)?;
        let desired = self.current_size(group_id) as u64 + u64::from(delta);
        if desired > u64::from(group.max_size) {
            return Err(ProviderError::Capacity(format!(
                "size increase too large - desired:{desired} max:{}",
                group.max_size
            )));
        }

        let handle = self.manager.client();
        let mut req = build_scale_up_request(&group, &handle.cluster);
        info!(group = %group_id, delta, desired, "scaling up");

        let mut added = 0u32;
        let mut result = Ok(());
        for count in batch_counts(delta) {
            req.count = count;
            match handle.api.scale_up(req.clone()).await {
                Ok(()) => {
                    added += count;
                    debug!(group = %group_id, count, added, "scale-up batch accepted");
                }
                Err(e) => {
                    error!(group = %group_id, count, added, error = %e, "scale-up batch failed");
                    result = Err(ProviderError::from(e));
                    break;
                }
            }
        }

        if result.is_ok() {
            info!(group = %group_id, added, "scaled up");
        }
        if added > 0 {
            self.refresh_after(&handle).await;
        }
        result
    }

    /// Shrinking un-fulfilled capacity is not supported.
    pub async fn decrease_target_size(&self, group_id: &str, delta: i64) -> ProviderResult<()> {
        debug!(group = %group_id, delta, "decrease target size requested");
        Err(ProviderError::NotImplemented(
            "decrease target size".to_string(),
        ))
    }

    /// Delete the given nodes, one remote call each, in the given order.
    ///
    /// A group at its minimum size is refused even when no node is given.
    pub async fn delete_nodes(&self, group_id: &str, provider_ids: &[String]) -> ProviderResult<()> {
        let lock = self.group_lock(group_id);
        let _guard = lock.lock().await;

        let group = self.descriptor(group_id)?;
        let size = self.current_size(group_id);
        if size <= group.min_size as usize {
            return Err(ProviderError::Capacity(format!(
                "min size reached, nodes will not be deleted - size:{size} min:{}",
                group.min_size
            )));
        }
        if provider_ids.is_empty() {
            warn!(group = %group_id, "no nodes given to delete");
            return Ok(());
        }

        let ids = provider_ids
            .iter()
            .map(|raw| raw.parse::<ProviderId>())
            .collect::<Result<Vec<_>, _>>()?;

        let handle = self.manager.client();
        info!(group = %group_id, count = ids.len(), "scaling down");

        let mut result = Ok(());
        for id in &ids {
            let req = ScaleDownRequest {
                region: handle.cluster.region.clone(),
                cluster_id: handle.cluster.cluster_id.clone(),
                node_id: id.node_id.clone(),
            };
            if let Err(e) = handle.api.scale_down(req).await {
                error!(group = %group_id, node = %id, error = %e, "scale-down failed");
                result = Err(ProviderError::from(e));
                break;
            }
            debug!(group = %group_id, node = %id, "node deleted");
        }

        if result.is_ok() {
            info!(group = %group_id, deleted = ids.len(), "scaled down");
        }
        self.refresh_after(&handle).await;
        result
    }

    async fn refresh_after(&self, handle: &ClientHandle) {
        if let Err(e) = self.manager.refresh_nodes_with(handle).await {
            error!(error = %e, "failed to refresh node list");
        }
    }
}
