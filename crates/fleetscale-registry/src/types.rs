//! Domain types mirrored from the remote control plane.
//!
//! A `GroupDescriptor` is an immutable snapshot of one autoscaling group
//! for one refresh cycle. `NodeRecord`s are the live (or transitioning)
//! nodes the remote side reports for a group.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// Identifier of an autoscaling group.
pub type GroupId = String;

// ── Group ─────────────────────────────────────────────────────────

/// One autoscaling group as reported by the remote control plane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupDescriptor {
    pub id: GroupId,
    pub name: String,
    pub region: String,
    pub zone: String,
    pub min_size: u32,
    pub max_size: u32,
    pub resources: ResourceSpec,
}

/// Everything needed to provision one node of a group.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceSpec {
    pub cpu_cores: u32,
    /// Memory in MiB, as the remote API reports it.
    pub memory_mib: u64,
    pub gpu_count: u32,
    pub gpu_type: String,
    pub boot_disk_type: String,
    pub data_disk_type: String,
    pub data_disk_size_gb: u32,
    pub machine_type: String,
    /// Raw charge type; normalised when a scale-up request is built.
    pub charge_type: String,
    /// Free-form `k=v,k=v` node labels.
    pub labels: String,
    pub taints: String,
    pub image_id: String,
    pub user_data: String,
    pub init_script: String,
    pub isolation_group: String,
    pub tag: String,
    /// Pod capacity override; 0 means the default.
    pub max_pods: u32,
    pub minimal_cpu_platform: String,
    /// Login password for new nodes. Never serialized outward.
    #[serde(default, skip_serializing)]
    pub password: String,
}

impl GroupDescriptor {
    pub fn debug_string(&self) -> String {
        format!("{} ({}:{})", self.id, self.min_size, self.max_size)
    }
}

// ── Node ──────────────────────────────────────────────────────────

/// Remote lifecycle status of a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeStatus {
    Ready,
    Running,
    Deleting,
    Deleted,
    ToBeDeleted,
    /// Any other state the remote side reports (installing, not ready, ...).
    Other(String),
}

impl NodeStatus {
    /// Terminal states are excluded from a group's active membership.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeStatus::Deleting | NodeStatus::Deleted | NodeStatus::ToBeDeleted
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            NodeStatus::Ready => "Ready",
            NodeStatus::Running => "Running",
            NodeStatus::Deleting => "Deleting",
            NodeStatus::Deleted => "Deleted",
            NodeStatus::ToBeDeleted => "ToBeDeleted",
            NodeStatus::Other(s) => s,
        }
    }
}

impl From<&str> for NodeStatus {
    fn from(s: &str) -> Self {
        match s {
            "Ready" => NodeStatus::Ready,
            "Running" => NodeStatus::Running,
            "Deleting" => NodeStatus::Deleting,
            "Deleted" => NodeStatus::Deleted,
            "ToBeDeleted" => NodeStatus::ToBeDeleted,
            other => NodeStatus::Other(other.to_string()),
        }
    }
}

impl From<String> for NodeStatus {
    fn from(s: String) -> Self {
        NodeStatus::from(s.as_str())
    }
}

impl From<NodeStatus> for String {
    fn from(status: NodeStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured form of a node provider id: `<scheme>://<zone>//<node-id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProviderId {
    pub scheme: String,
    pub zone: String,
    pub node_id: String,
}

impl ProviderId {
    pub fn new(scheme: &str, zone: &str, node_id: &str) -> Self {
        Self {
            scheme: scheme.to_string(),
            zone: zone.to_string(),
            node_id: node_id.to_string(),
        }
    }
}

impl FromStr for ProviderId {
    type Err = RegistryError;

    /// Splits on `//`; exactly three segments and a non-empty node id
    /// are required.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split("//").collect();
        let [scheme, zone, node_id] = parts.as_slice() else {
            return Err(RegistryError::InvalidProviderId(s.to_string()));
        };
        if node_id.is_empty() {
            return Err(RegistryError::InvalidProviderId(s.to_string()));
        }
        Ok(Self {
            scheme: scheme.strip_suffix(':').unwrap_or(*scheme).to_string(),
            zone: zone.to_string(),
            node_id: node_id.to_string(),
        })
    }
}

impl TryFrom<String> for ProviderId {
    type Error = RegistryError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ProviderId> for String {
    fn from(id: ProviderId) -> Self {
        id.to_string()
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}//{}", self.scheme, self.zone, self.node_id)
    }
}

/// One node the remote side reports as belonging to a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub provider_id: ProviderId,
    pub name: String,
    pub group_id: GroupId,
    pub status: NodeStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_id_round_trip() {
        let id: ProviderId = "fleetscale://cn-bj2-04//uhost-abc".parse().unwrap();
        assert_eq!(id.scheme, "fleetscale");
        assert_eq!(id.zone, "cn-bj2-04");
        assert_eq!(id.node_id, "uhost-abc");
        assert_eq!(id.to_string(), "fleetscale://cn-bj2-04//uhost-abc");
    }

    #[test]
    fn provider_id_needs_three_segments() {
        for bad in ["uhost-abc", "fleetscale://uhost-abc", "a//b//c//d", "fleetscale://zone//"] {
            assert!(
                matches!(bad.parse::<ProviderId>(), Err(RegistryError::InvalidProviderId(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn terminal_statuses() {
        for s in ["Deleting", "Deleted", "ToBeDeleted"] {
            assert!(NodeStatus::from(s).is_terminal(), "{s}");
        }
        for s in ["Ready", "Running", "Installing", "NotReady"] {
            assert!(!NodeStatus::from(s).is_terminal(), "{s}");
        }
    }

    #[test]
    fn status_serializes_as_plain_string() {
        let json = serde_json::to_string(&NodeStatus::from("Installing")).unwrap();
        assert_eq!(json, "\"Installing\"");
        let back: NodeStatus = serde_json::from_str("\"ToBeDeleted\"").unwrap();
        assert_eq!(back, NodeStatus::ToBeDeleted);
    }

    #[test]
    fn password_is_not_serialized() {
        let spec = ResourceSpec {
            password: "hunter2".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_string(&spec).unwrap();
        assert!(!json.contains("hunter2"));
    }
}
