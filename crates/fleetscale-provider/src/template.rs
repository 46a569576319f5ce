//! TemplateBuilder — synthetic node description for capacity simulation.
//!
//! Given a group descriptor, produces what a freshly provisioned node of
//! that group will look like to the orchestrator: capacity, allocatable
//! resources after system reservations, labels and a Ready condition.
//!
//! Allocatable memory is
//! `(physical - kernel_reserved(physical)) * EVICTION_HARD_RATIO - EVICTION_BUFFER`,
//! saturating at zero, so it never overstates what a real node offers.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use fleetscale_registry::GroupDescriptor;
use serde::{Serialize, Serializer};

use crate::error::{ProviderError, ProviderResult};

pub const MIB: u64 = 1024 * 1024;
pub const GIB: u64 = 1024 * MIB;

pub const DEFAULT_MAX_PODS: u32 = 110;
/// CPU kept back for system daemons, in millicores.
pub const CPU_RESERVED_MILLI: u64 = 200;
pub const EVICTION_HARD_RATIO: f64 = 0.95;
pub const EVICTION_BUFFER_BYTES: u64 = 1000 * MIB;

pub const RESOURCE_CPU: &str = "cpu";
pub const RESOURCE_MEMORY: &str = "memory";
pub const RESOURCE_PODS: &str = "pods";
pub const RESOURCE_GPU: &str = "nvidia.com/gpu";

/// Label carrying the GPU model of a node.
pub const GPU_LABEL: &str = "accelerator";

/// Labels parsed from a group's free-form label string, at most.
pub const MAX_PARSED_LABELS: usize = 5;

// ── Quantity ──────────────────────────────────────────────────────

/// A resource amount, stored in thousandths of a unit.
///
/// Serializes like an orchestrator quantity: `"4"`, `"3800m"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Quantity {
    milli: u64,
}

impl Quantity {
    pub fn from_units(units: u64) -> Self {
        Self {
            milli: units.saturating_mul(1000),
        }
    }

    pub fn from_milli(milli: u64) -> Self {
        Self { milli }
    }

    pub fn milli_value(&self) -> u64 {
        self.milli
    }

    /// Whole units, rounded up.
    pub fn value(&self) -> u64 {
        self.milli.div_ceil(1000)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.milli % 1000 == 0 {
            write!(f, "{}", self.milli / 1000)
        } else {
            write!(f, "{}m", self.milli)
        }
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ── Kernel reservation ────────────────────────────────────────────

/// Memory the kernel keeps for itself on a node with `physical_bytes`.
/// Must be monotonic in its input.
pub trait KernelReservation: Send + Sync {
    fn reserved_bytes(&self, physical_bytes: u64) -> u64;
}

/// 1/64 of physical memory for page tables and structs, 16 MiB for the
/// kernel image, and 64 MiB of software IO TLB above 4 GiB.
#[derive(Debug, Clone, Copy, Default)]
pub struct TieredKernelReservation;

impl TieredKernelReservation {
    pub const BASE_BYTES: u64 = 16 * MIB;
    pub const SWIOTLB_BYTES: u64 = 64 * MIB;
    pub const SWIOTLB_THRESHOLD: u64 = 4 * GIB;
}

impl KernelReservation for TieredKernelReservation {
    fn reserved_bytes(&self, physical_bytes: u64) -> u64 {
        let mut reserved = physical_bytes / 64 + Self::BASE_BYTES;
        if physical_bytes > Self::SWIOTLB_THRESHOLD {
            reserved += Self::SWIOTLB_BYTES;
        }
        reserved
    }
}

// ── Template node ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeCondition {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
}

impl NodeCondition {
    fn new(kind: &str, status: bool) -> Self {
        Self {
            kind: kind.to_string(),
            status: if status { "True" } else { "False" }.to_string(),
        }
    }
}

/// Conditions of a healthy node that is ready for pods.
pub fn ready_conditions() -> Vec<NodeCondition> {
    vec![
        NodeCondition::new("Ready", true),
        NodeCondition::new("NetworkUnavailable", false),
        NodeCondition::new("DiskPressure", false),
        NodeCondition::new("MemoryPressure", false),
    ]
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateNode {
    pub name: String,
    pub self_link: String,
    pub group_id: String,
    pub labels: BTreeMap<String, String>,
    pub capacity: BTreeMap<String, Quantity>,
    pub allocatable: BTreeMap<String, Quantity>,
    pub conditions: Vec<NodeCondition>,
}

impl TemplateNode {
    pub fn capacity_of(&self, resource: &str) -> Quantity {
        self.capacity.get(resource).copied().unwrap_or_default()
    }

    pub fn allocatable_of(&self, resource: &str) -> Quantity {
        self.allocatable.get(resource).copied().unwrap_or_default()
    }

    pub fn is_ready(&self) -> bool {
        self.conditions
            .iter()
            .any(|c| c.kind == "Ready" && c.status == "True")
    }
}

// ── Builder ───────────────────────────────────────────────────────

#[derive(Clone)]
pub struct TemplateBuilder {
    reservation: Arc<dyn KernelReservation>,
}

impl Default for TemplateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateBuilder {
    pub fn new() -> Self {
        Self {
            reservation: Arc::new(TieredKernelReservation),
        }
    }

    pub fn with_reservation(mut self, reservation: Arc<dyn KernelReservation>) -> Self {
        self.reservation = reservation;
        self
    }

    pub fn allocatable_memory_bytes(&self, physical_bytes: u64) -> u64 {
        let usable = physical_bytes.saturating_sub(self.reservation.reserved_bytes(physical_bytes));
        let after_eviction = usable as f64 * EVICTION_HARD_RATIO - EVICTION_BUFFER_BYTES as f64;
        if after_eviction <= 0.0 {
            0
        } else {
            after_eviction as u64
        }
    }

    pub fn build(&self, group: &GroupDescriptor) -> ProviderResult<TemplateNode> {
        let res = &group.resources;
        if group.id.is_empty() || res.cpu_cores == 0 || res.memory_mib == 0 {
            return Err(ProviderError::Template(format!(
                "group {:?} needs an id, CPU and memory",
                group.id
            )));
        }

        let max_pods = if res.max_pods > 0 {
            res.max_pods
        } else {
            DEFAULT_MAX_PODS
        };
        let physical = res.memory_mib.saturating_mul(MIB);
        let cpu_milli = u64::from(res.cpu_cores) * 1000;
        let gpus = Quantity::from_units(u64::from(res.gpu_count));

        let capacity = BTreeMap::from([
            (RESOURCE_PODS.to_string(), Quantity::from_units(u64::from(max_pods))),
            (RESOURCE_CPU.to_string(), Quantity::from_units(u64::from(res.cpu_cores))),
            (RESOURCE_MEMORY.to_string(), Quantity::from_units(physical)),
            (RESOURCE_GPU.to_string(), gpus),
        ]);
        let allocatable = BTreeMap::from([
            (RESOURCE_PODS.to_string(), Quantity::from_units(u64::from(max_pods))),
            (
                RESOURCE_CPU.to_string(),
                Quantity::from_milli(cpu_milli.saturating_sub(CPU_RESERVED_MILLI)),
            ),
            (
                RESOURCE_MEMORY.to_string(),
                Quantity::from_units(self.allocatable_memory_bytes(physical)),
            ),
            (RESOURCE_GPU.to_string(), gpus),
        ]);

        // Parsed first so generated labels win on collision.
        let mut labels = parse_labels(&res.labels);
        labels.extend(generated_labels(group));

        let name = format!("{}-template-{}", group.id, rand::random::<u64>());
        Ok(TemplateNode {
            self_link: format!("/api/v1/nodes/{name}"),
            name,
            group_id: group.id.clone(),
            labels,
            capacity,
            allocatable,
            conditions: ready_conditions(),
        })
    }
}

/// Up to the first five `key=value` pairs of a comma-separated string.
/// Malformed pairs are skipped but still count towards the five.
pub fn parse_labels(raw: &str) -> BTreeMap<String, String> {
    raw.split(',')
        .take(MAX_PARSED_LABELS)
        .filter_map(|pair| {
            let mut parts = pair.split('=');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(key), Some(value), None) if !key.is_empty() => {
                    Some((key.to_string(), value.to_string()))
                }
                _ => None,
            }
        })
        .collect()
}

pub fn generated_labels(group: &GroupDescriptor) -> BTreeMap<String, String> {
    let res = &group.resources;
    let mut labels: BTreeMap<String, String> = [
        ("kubernetes.io/arch", "amd64"),
        ("kubernetes.io/os", "linux"),
        ("beta.kubernetes.io/arch", "amd64"),
        ("beta.kubernetes.io/os", "linux"),
        ("failure-domain.beta.kubernetes.io/region", group.region.as_str()),
        ("failure-domain.beta.kubernetes.io/zone", group.zone.as_str()),
        ("topology.kubernetes.io/region", group.region.as_str()),
        ("topology.kubernetes.io/zone", group.zone.as_str()),
        ("topology.disk.csi.fleetscale.io/region", group.region.as_str()),
        ("topology.disk.csi.fleetscale.io/zone", group.zone.as_str()),
        ("node.fleetscale.io/machine-type", res.machine_type.as_str()),
        ("role.node.kubernetes.io/k8s-node", "true"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    if res.machine_type.eq_ignore_ascii_case("G") {
        labels.insert(
            GPU_LABEL.to_string(),
            format!("nvidia-tesla-{}", res.gpu_type.to_lowercase()),
        );
    }
    labels
}
