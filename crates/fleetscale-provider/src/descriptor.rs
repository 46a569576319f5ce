//! GroupSpec → GroupDescriptor.

use fleetscale_cloud::GroupSpec;
use fleetscale_registry::{GroupDescriptor, ResourceSpec};

use crate::error::{ProviderError, ProviderResult};

/// Build a registry descriptor from a remote group, falling back to the
/// legacy resource fields older groups carry.
pub fn build_descriptor(spec: &GroupSpec, region: &str) -> ProviderResult<GroupDescriptor> {
    if spec.id.trim().is_empty() {
        return Err(ProviderError::Validation(
            "autoscaling group without an id".to_string(),
        ));
    }
    if spec.min > spec.max {
        return Err(ProviderError::Validation(format!(
            "group {}: min size {} exceeds max size {}",
            spec.id, spec.min, spec.max
        )));
    }

    Ok(GroupDescriptor {
        id: spec.id.clone(),
        name: spec.name.clone(),
        region: region.to_string(),
        zone: spec.zone.clone(),
        min_size: spec.min,
        max_size: spec.max,
        resources: ResourceSpec {
            cpu_cores: spec.effective_cpu(),
            memory_mib: spec.effective_mem(),
            gpu_count: spec.gpu,
            gpu_type: spec.gpu_type.clone(),
            boot_disk_type: spec.effective_boot_disk_type().to_string(),
            data_disk_type: spec.effective_data_disk_type().to_string(),
            data_disk_size_gb: spec.effective_data_disk_size(),
            machine_type: spec.effective_machine_type().to_string(),
            charge_type: spec.charge_type.clone(),
            labels: spec.labels.clone(),
            taints: spec.taints.clone(),
            image_id: spec.image_id.clone(),
            user_data: spec.user_data.clone(),
            init_script: spec.init_script.clone(),
            isolation_group: spec.isolation_group.clone(),
            tag: spec.tag.clone(),
            max_pods: spec.max_pods,
            minimal_cpu_platform: spec.minimal_cpu_platform.clone(),
            password: spec.password.clone(),
        },
    })
}
