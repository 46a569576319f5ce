//! InMemoryComputeApi — a scriptable stand-in for the remote control plane.
//!
//! Holds groups and nodes in memory, applies scale calls to its own node
//! list, and records every call that passed validation. Failures can be
//! injected per action, optionally after a number of successful calls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use fleetscale_metrics::{ApiCallSample, MetricsSink};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::{ApiFuture, ComputeApi, ComputeApiFactory};
use crate::credentials::CredentialBundle;
use crate::error::{CloudError, CloudResult};
use crate::types::*;

/// Code returned when a scale-down names a node the fake does not know.
pub const NODE_NOT_FOUND_CODE: i64 = 8404;

/// A call that reached the fake "remote" side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    DescribeGroups { cluster_id: String },
    ListNodes { cluster_id: String },
    ScaleUp { asg_id: String, count: u32 },
    ScaleDown { node_id: String },
}

/// Initial contents, typically loaded from a JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSeed {
    pub enabled: bool,
    pub groups: Vec<GroupSpec>,
    pub nodes: Vec<RemoteNode>,
}

impl Default for ClusterSeed {
    fn default() -> Self {
        Self {
            enabled: true,
            groups: Vec::new(),
            nodes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct Failure {
    remaining_ok: usize,
    code: i64,
    message: String,
}

#[derive(Debug)]
struct State {
    enabled: bool,
    groups: Vec<GroupSpec>,
    nodes: Vec<RemoteNode>,
    calls: Vec<RecordedCall>,
    failures: HashMap<String, Failure>,
    new_node_status: String,
    next_node: u64,
}

/// In-memory [`ComputeApi`]. `Clone` shares state.
#[derive(Clone)]
pub struct InMemoryComputeApi {
    state: Arc<Mutex<State>>,
    sink: Option<Arc<dyn MetricsSink>>,
}

impl Default for InMemoryComputeApi {
    fn default() -> Self {
        Self::from_seed(ClusterSeed::default())
    }
}

impl InMemoryComputeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: ClusterSeed) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                enabled: seed.enabled,
                groups: seed.groups,
                nodes: seed.nodes,
                calls: Vec::new(),
                failures: HashMap::new(),
                new_node_status: "Ready".to_string(),
                next_node: 1,
            })),
            sink: None,
        }
    }

    /// Report a sample for every call, like the HTTP client does.
    pub fn with_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Factory handing out clients that share this fake's state. The
    /// credential bundle is ignored.
    pub fn factory(&self) -> ComputeApiFactory {
        let api = self.clone();
        Arc::new(
            move |_bundle: &CredentialBundle,
                  sink: Arc<dyn MetricsSink>|
                  -> CloudResult<Arc<dyn ComputeApi>> {
                let client: Arc<dyn ComputeApi> = Arc::new(api.clone().with_sink(sink));
                Ok(client)
            },
        )
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.lock().enabled = enabled;
    }

    pub fn set_groups(&self, groups: Vec<GroupSpec>) {
        self.lock().groups = groups;
    }

    pub fn set_nodes(&self, nodes: Vec<RemoteNode>) {
        self.lock().nodes = nodes;
    }

    pub fn add_node(&self, node: RemoteNode) {
        self.lock().nodes.push(node);
    }

    pub fn nodes(&self) -> Vec<RemoteNode> {
        self.lock().nodes.clone()
    }

    /// Status given to nodes created by scale-up calls.
    pub fn set_new_node_status(&self, status: &str) {
        self.lock().new_node_status = status.to_string();
    }

    /// Fail every call of `action` with a remote error.
    pub fn fail_action(&self, action: &str, code: i64, message: &str) {
        self.fail_after(action, 0, code, message);
    }

    /// Let `successes` calls of `action` through, then fail the rest.
    pub fn fail_after(&self, action: &str, successes: usize, code: i64, message: &str) {
        self.lock().failures.insert(
            action.to_string(),
            Failure {
                remaining_ok: successes,
                code,
                message: message.to_string(),
            },
        );
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Node counts of every recorded scale-up call, in order.
    pub fn scale_up_counts(&self) -> Vec<u32> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                RecordedCall::ScaleUp { count, .. } => Some(*count),
                _ => None,
            })
            .collect()
    }

    /// Node ids of every recorded scale-down call, in order.
    pub fn scale_down_ids(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                RecordedCall::ScaleDown { node_id } => Some(node_id.clone()),
                _ => None,
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("compute api state lock")
    }

    /// Record the call and apply any injected failure.
    fn admit(state: &mut State, action: &str, call: RecordedCall) -> CloudResult<()> {
        state.calls.push(call);
        if let Some(failure) = state.failures.get_mut(action) {
            if failure.remaining_ok > 0 {
                failure.remaining_ok -= 1;
            } else {
                return Err(CloudError::Remote {
                    action: action.to_string(),
                    code: failure.code,
                    message: failure.message.clone(),
                });
            }
        }
        Ok(())
    }

    fn report<T>(&self, action: &str, cluster: &ClusterRef, started: Instant, result: &CloudResult<T>) {
        if let Some(sink) = &self.sink {
            sink.report(ApiCallSample {
                cluster_id: cluster.cluster_id.clone(),
                action: action.to_string(),
                region: cluster.region.clone(),
                request_id: String::new(),
                status_code: match result {
                    Ok(_) => 0,
                    Err(e) => e.status_code(),
                },
                latency_ms: started.elapsed().as_secs_f64() * 1000.0,
            });
        }
    }

    fn do_describe(&self, cluster: &ClusterRef) -> CloudResult<AutoscalerGroups> {
        cluster.validate()?;
        let mut state = self.lock();
        let call = RecordedCall::DescribeGroups {
            cluster_id: cluster.cluster_id.clone(),
        };
        Self::admit(&mut state, ACTION_DESCRIBE_GROUPS, call)?;
        Ok(AutoscalerGroups {
            enabled: state.enabled,
            groups: state.groups.clone(),
        })
    }

    fn do_list(&self, cluster: &ClusterRef) -> CloudResult<Vec<RemoteNode>> {
        cluster.validate()?;
        let mut state = self.lock();
        let call = RecordedCall::ListNodes {
            cluster_id: cluster.cluster_id.clone(),
        };
        Self::admit(&mut state, ACTION_LIST_NODES, call)?;
        Ok(state.nodes.clone())
    }

    fn do_scale_up(&self, req: &ScaleUpRequest) -> CloudResult<()> {
        req.validate()?;
        let mut state = self.lock();
        let call = RecordedCall::ScaleUp {
            asg_id: req.asg_id.clone(),
            count: req.count,
        };
        Self::admit(&mut state, ACTION_SCALE_UP, call)?;

        for _ in 0..req.count {
            let node_id = format!("node-{}-{:04}", req.asg_id, state.next_node);
            state.next_node += 1;
            let node = RemoteNode {
                zone: req.zone.clone(),
                instance_name: node_id.clone(),
                node_id,
                node_role: "node".to_string(),
                node_status: state.new_node_status.clone(),
                machine_type: req.machine_type.clone(),
                cpu: req.cpu,
                memory: req.mem,
                gpu: req.gpu,
                asg_id: req.asg_id.clone(),
                ..Default::default()
            };
            state.nodes.push(node);
        }
        debug!(asg = %req.asg_id, count = req.count, "fake scale-up applied");
        Ok(())
    }

    fn do_scale_down(&self, req: &ScaleDownRequest) -> CloudResult<()> {
        req.validate()?;
        let mut state = self.lock();
        let call = RecordedCall::ScaleDown {
            node_id: req.node_id.clone(),
        };
        Self::admit(&mut state, ACTION_SCALE_DOWN, call)?;

        let before = state.nodes.len();
        state.nodes.retain(|n| n.node_id != req.node_id);
        if state.nodes.len() == before {
            return Err(CloudError::Remote {
                action: ACTION_SCALE_DOWN.to_string(),
                code: NODE_NOT_FOUND_CODE,
                message: format!("node {} not found", req.node_id),
            });
        }
        debug!(node = %req.node_id, "fake scale-down applied");
        Ok(())
    }
}

impl ComputeApi for InMemoryComputeApi {
    fn describe_autoscaler_groups(&self, cluster: ClusterRef) -> ApiFuture<'_, AutoscalerGroups> {
        Box::pin(async move {
            let started = Instant::now();
            let result = self.do_describe(&cluster);
            self.report(ACTION_DESCRIBE_GROUPS, &cluster, started, &result);
            result
        })
    }

    fn list_nodes(&self, cluster: ClusterRef) -> ApiFuture<'_, Vec<RemoteNode>> {
        Box::pin(async move {
            let started = Instant::now();
            let result = self.do_list(&cluster);
            self.report(ACTION_LIST_NODES, &cluster, started, &result);
            result
        })
    }

    fn scale_up(&self, req: ScaleUpRequest) -> ApiFuture<'_, ()> {
        Box::pin(async move {
            let started = Instant::now();
            let result = self.do_scale_up(&req);
            let cluster = ClusterRef::new(req.region.clone(), req.cluster_id.clone());
            self.report(ACTION_SCALE_UP, &cluster, started, &result);
            result
        })
    }

    fn scale_down(&self, req: ScaleDownRequest) -> ApiFuture<'_, ()> {
        Box::pin(async move {
            let started = Instant::now();
            let result = self.do_scale_down(&req);
            let cluster = ClusterRef::new(req.region.clone(), req.cluster_id.clone());
            self.report(ACTION_SCALE_DOWN, &cluster, started, &result);
            result
        })
    }
}
