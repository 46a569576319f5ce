//! Request and response shapes of the remote compute API.
//!
//! Field names on the wire are PascalCase; the remote side also keeps a
//! few historical spellings (`MinmalCpuPlatform`, `NodeUHostType`).

use serde::{Deserialize, Serialize};

use crate::error::{CloudError, CloudResult};

/// Maximum number of nodes a single scale-up call may request.
pub const MAX_NODES_PER_SCALE_UP: u32 = 10;

pub const ACTION_DESCRIBE_GROUPS: &str = "DescribeAutoscalerGroup";
pub const ACTION_LIST_NODES: &str = "ListClusterNodeV2";
pub const ACTION_SCALE_UP: &str = "AddClusterNode";
pub const ACTION_SCALE_DOWN: &str = "DelClusterNodeV2";

// ── Groups ────────────────────────────────────────────────────────

/// Region and cluster addressed by describe / list calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClusterRef {
    pub region: String,
    pub cluster_id: String,
}

impl ClusterRef {
    pub fn new(region: impl Into<String>, cluster_id: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            cluster_id: cluster_id.into(),
        }
    }

    pub fn validate(&self) -> CloudResult<()> {
        require(&self.region, "Region")?;
        require(&self.cluster_id, "ClusterId")
    }
}

/// Result of `DescribeAutoscalerGroup`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutoscalerGroups {
    /// Whether the remote autoscaler feature is switched on for the cluster.
    pub enabled: bool,
    pub groups: Vec<GroupSpec>,
}

/// One autoscaling group as the remote side describes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct GroupSpec {
    pub id: String,
    pub name: String,
    #[serde(rename = "CPU")]
    pub cpu: u32,
    /// MiB.
    pub mem: u64,
    pub data_disk_type: String,
    pub boot_disk_type: String,
    pub data_disk_size: u32,
    pub zone: String,
    pub min: u32,
    pub max: u32,
    pub current_node_num: u32,
    pub create_time: i64,
    pub update_time: i64,
    pub password: String,
    #[serde(rename = "MinmalCpuPlatform")]
    pub minimal_cpu_platform: String,
    pub max_pods: u32,
    pub machine_type: String,
    #[serde(rename = "GPU")]
    pub gpu: u32,
    pub gpu_type: String,
    pub labels: String,
    pub taints: String,
    pub image_id: String,
    pub user_data: String,
    pub init_script: String,
    pub charge_type: String,
    pub isolation_group: String,
    pub tag: String,

    // Older group versions only fill these.
    #[serde(rename = "NodeCPU")]
    pub node_cpu: u32,
    pub node_mem: u64,
    #[serde(rename = "NodeUHostType")]
    pub node_machine_type: String,
    pub node_data_disk_type: String,
    pub node_boot_disk_type: String,
    pub node_data_disk_size: u32,
}

impl GroupSpec {
    pub fn effective_cpu(&self) -> u32 {
        if self.cpu != 0 { self.cpu } else { self.node_cpu }
    }

    pub fn effective_mem(&self) -> u64 {
        if self.mem != 0 { self.mem } else { self.node_mem }
    }

    pub fn effective_machine_type(&self) -> &str {
        or_legacy(&self.machine_type, &self.node_machine_type)
    }

    pub fn effective_boot_disk_type(&self) -> &str {
        or_legacy(&self.boot_disk_type, &self.node_boot_disk_type)
    }

    pub fn effective_data_disk_type(&self) -> &str {
        or_legacy(&self.data_disk_type, &self.node_data_disk_type)
    }

    pub fn effective_data_disk_size(&self) -> u32 {
        if self.data_disk_size != 0 {
            self.data_disk_size
        } else {
            self.node_data_disk_size
        }
    }
}

fn or_legacy<'a>(modern: &'a str, legacy: &'a str) -> &'a str {
    if modern.is_empty() { legacy } else { modern }
}

// ── Nodes ─────────────────────────────────────────────────────────

/// One node from `ListClusterNodeV2`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RemoteNode {
    pub zone: String,
    pub node_id: String,
    pub node_role: String,
    pub node_status: String,
    pub instance_type: String,
    pub instance_name: String,
    pub instance_id: String,
    pub machine_type: String,
    pub os_type: String,
    pub os_name: String,
    #[serde(rename = "CPU")]
    pub cpu: u32,
    pub memory: u64,
    #[serde(rename = "GPU")]
    pub gpu: u32,
    pub create_time: i64,
    pub expire_time: i64,
    /// Owning autoscaling group; empty for nodes outside any group.
    pub asg_id: String,
    pub unschedulable: bool,
}

// ── Scaling ───────────────────────────────────────────────────────

/// Billing mode of newly provisioned nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeType {
    Year,
    Month,
    Dynamic,
}

impl ChargeType {
    /// Normalise a configured charge type. Empty means pay-as-you-go.
    pub fn from_config(raw: &str) -> Option<Self> {
        match raw {
            "" | "Dynamic" => Some(ChargeType::Dynamic),
            "Year" => Some(ChargeType::Year),
            "Month" => Some(ChargeType::Month),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeType::Year => "Year",
            ChargeType::Month => "Month",
            ChargeType::Dynamic => "Dynamic",
        }
    }

    /// The on-demand quantity field that goes with this charge type.
    pub fn quantity(&self) -> u32 {
        match self {
            ChargeType::Month => 0,
            _ => 1,
        }
    }
}

/// `AddClusterNode` parameters. `count` is at most
/// [`MAX_NODES_PER_SCALE_UP`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScaleUpRequest {
    pub region: String,
    pub cluster_id: String,
    pub zone: String,
    pub password: String,
    pub charge_type: String,
    pub machine_type: String,
    #[serde(rename = "MinmalCpuPlatform")]
    pub minimal_cpu_platform: String,
    pub gpu_type: String,
    #[serde(rename = "GPU")]
    pub gpu: u32,
    #[serde(rename = "CPU")]
    pub cpu: u32,
    pub mem: u64,
    pub boot_disk_type: String,
    pub data_disk_type: String,
    pub data_disk_size: u32,
    pub labels: String,
    pub taints: String,
    pub max_pods: u32,
    pub count: u32,
    pub asg_id: String,
    pub image_id: String,
    pub user_data: String,
    pub init_script: String,
    pub isolation_group: String,
    pub tag: String,
    pub quantity: u32,
}

impl ScaleUpRequest {
    pub fn validate(&self) -> CloudResult<()> {
        require(&self.region, "Region")?;
        require(&self.cluster_id, "ClusterId")?;
        if self.cpu == 0 {
            return Err(missing("CPU"));
        }
        if self.mem == 0 {
            return Err(missing("Mem"));
        }
        require(&self.boot_disk_type, "BootDiskType")?;
        require(&self.machine_type, "MachineType")?;
        if self.count < 1 {
            return Err(missing("Count"));
        }
        if self.count > MAX_NODES_PER_SCALE_UP {
            return Err(CloudError::InvalidRequest(format!(
                "Count {} exceeds {MAX_NODES_PER_SCALE_UP}",
                self.count
            )));
        }
        require(&self.password, "Password")?;
        require(&self.asg_id, "AsgId")?;
        if !matches!(self.charge_type.as_str(), "Year" | "Month" | "Dynamic") {
            return Err(CloudError::InvalidRequest(format!(
                "invalid ChargeType {:?}",
                self.charge_type
            )));
        }
        Ok(())
    }
}

/// `DelClusterNodeV2` parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScaleDownRequest {
    pub region: String,
    pub cluster_id: String,
    pub node_id: String,
}

impl ScaleDownRequest {
    pub fn validate(&self) -> CloudResult<()> {
        require(&self.region, "Region")?;
        require(&self.cluster_id, "ClusterId")?;
        require(&self.node_id, "NodeId")
    }
}

fn require(value: &str, field: &str) -> CloudResult<()> {
    if value.is_empty() {
        Err(missing(field))
    } else {
        Ok(())
    }
}

fn missing(field: &str) -> CloudError {
    CloudError::InvalidRequest(format!("{field} is required"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scale_up() -> ScaleUpRequest {
        ScaleUpRequest {
            region: "cn-bj2".into(),
            cluster_id: "cluster-abc".into(),
            password: "cGFzcw==".into(),
            charge_type: "Dynamic".into(),
            machine_type: "N".into(),
            cpu: 4,
            mem: 8192,
            boot_disk_type: "CLOUD_SSD".into(),
            count: 3,
            asg_id: "asg-1".into(),
            quantity: 1,
            ..Default::default()
        }
    }

    fn assert_rejects(field: &str, mutate: impl FnOnce(&mut ScaleUpRequest)) {
        let mut req = scale_up();
        mutate(&mut req);
        match req.validate() {
            Err(CloudError::InvalidRequest(msg)) => assert!(msg.contains(field), "{msg}"),
            other => panic!("{field}: expected InvalidRequest, got {other:?}"),
        }
    }

    #[test]
    fn scale_up_validation() {
        scale_up().validate().unwrap();

        assert_rejects("Region", |r| r.region.clear());
        assert_rejects("ClusterId", |r| r.cluster_id.clear());
        assert_rejects("CPU", |r| r.cpu = 0);
        assert_rejects("Mem", |r| r.mem = 0);
        assert_rejects("BootDiskType", |r| r.boot_disk_type.clear());
        assert_rejects("MachineType", |r| r.machine_type.clear());
        assert_rejects("Count", |r| r.count = 0);
        assert_rejects("Count", |r| r.count = 11);
        assert_rejects("Password", |r| r.password.clear());
        assert_rejects("AsgId", |r| r.asg_id.clear());
        assert_rejects("ChargeType", |r| r.charge_type = "Weekly".into());
    }

    #[test]
    fn scale_down_and_cluster_validation() {
        let req = ScaleDownRequest {
            region: "cn-bj2".into(),
            cluster_id: "c".into(),
            node_id: String::new(),
        };
        assert!(matches!(req.validate(), Err(CloudError::InvalidRequest(_))));
        assert!(ClusterRef::new("", "c").validate().is_err());
        ClusterRef::new("cn-bj2", "c").validate().unwrap();
    }

    #[test]
    fn charge_type_normalisation() {
        assert_eq!(ChargeType::from_config(""), Some(ChargeType::Dynamic));
        assert_eq!(ChargeType::from_config("Month").map(|c| c.quantity()), Some(0));
        assert_eq!(ChargeType::from_config("Year").map(|c| c.quantity()), Some(1));
        assert_eq!(ChargeType::from_config("Weekly"), None);
    }

    #[test]
    fn group_spec_decodes_wire_names_and_legacy_fields() {
        let json = r#"{
            "Id": "asg-1", "Min": 1, "Max": 5, "Zone": "cn-bj2-04",
            "NodeCPU": 8, "NodeMem": 16384, "NodeUHostType": "O",
            "NodeBootDiskType": "CLOUD_RSSD", "MinmalCpuPlatform": "Intel/Auto",
            "GPU": 0, "Unknown": true
        }"#;
        let spec: GroupSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.id, "asg-1");
        assert_eq!(spec.cpu, 0);
        assert_eq!(spec.effective_cpu(), 8);
        assert_eq!(spec.effective_mem(), 16384);
        assert_eq!(spec.effective_machine_type(), "O");
        assert_eq!(spec.effective_boot_disk_type(), "CLOUD_RSSD");
        assert_eq!(spec.minimal_cpu_platform, "Intel/Auto");
    }

    #[test]
    fn modern_fields_win_over_legacy() {
        let spec = GroupSpec {
            cpu: 2,
            node_cpu: 8,
            machine_type: "N".into(),
            node_machine_type: "O".into(),
            data_disk_size: 100,
            node_data_disk_size: 20,
            ..Default::default()
        };
        assert_eq!(spec.effective_cpu(), 2);
        assert_eq!(spec.effective_machine_type(), "N");
        assert_eq!(spec.effective_data_disk_size(), 100);
    }

    #[test]
    fn scale_up_serializes_wire_names() {
        let json = serde_json::to_value(scale_up()).unwrap();
        assert_eq!(json["CPU"], 4);
        assert_eq!(json["AsgId"], "asg-1");
        assert_eq!(json["ClusterId"], "cluster-abc");
        assert!(json.get("MinmalCpuPlatform").is_some());
    }
}
