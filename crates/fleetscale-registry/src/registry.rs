//! NodeGroupRegistry — the concurrent group → nodes map.
//!
//! All operations take one exclusive lock for their whole duration and
//! never across network calls. Bulk operations build a fresh map and swap
//! it in, so readers see either the old snapshot or the new one.
//!
//! `find_group_for_provider_id` scans every group linearly; group and node
//! counts are in the tens to low hundreds.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::debug;

use crate::types::*;

/// Per-group registry entry.
#[derive(Debug, Clone)]
struct GroupEntry {
    descriptor: Arc<GroupDescriptor>,
    /// Non-terminal nodes only, in remote list order.
    nodes: Vec<NodeRecord>,
}

impl GroupEntry {
    fn new(descriptor: GroupDescriptor) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            nodes: Vec::new(),
        }
    }
}

/// Read-only copy of one group and its active nodes.
#[derive(Debug, Clone, Serialize)]
pub struct GroupView {
    pub descriptor: Arc<GroupDescriptor>,
    pub nodes: Vec<NodeRecord>,
}

impl GroupView {
    pub fn target_size(&self) -> usize {
        self.nodes.len()
    }
}

/// Thread-safe registry of autoscaling groups.
///
/// `Clone` shares the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct NodeGroupRegistry {
    groups: Arc<Mutex<HashMap<GroupId, GroupEntry>>>,
}

impl NodeGroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Groups ─────────────────────────────────────────────────────

    /// Register (or replace) a group. A replaced group starts with no nodes.
    pub fn register(&self, descriptor: GroupDescriptor) {
        let mut groups = self.groups.lock().expect("registry lock");
        debug!(group = %descriptor.id, "group registered");
        groups.insert(descriptor.id.clone(), GroupEntry::new(descriptor));
    }

    /// Remove a group and its nodes. Returns true if it was registered.
    pub fn unregister(&self, group_id: &str) -> bool {
        let mut groups = self.groups.lock().expect("registry lock");
        let existed = groups.remove(group_id).is_some();
        debug!(group = %group_id, existed, "group unregistered");
        existed
    }

    /// Unregister every group. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut groups = self.groups.lock().expect("registry lock");
        let removed = groups.len();
        *groups = HashMap::new();
        debug!(removed, "registry flushed");
        removed
    }

    /// Replace the whole group set with `descriptors`.
    ///
    /// Every previous group and node is discarded; no field of an old
    /// descriptor survives. Returns the ids that were dropped.
    pub fn replace_groups(&self, descriptors: Vec<GroupDescriptor>) -> Vec<GroupId> {
        let fresh: HashMap<GroupId, GroupEntry> = descriptors
            .into_iter()
            .map(|d| (d.id.clone(), GroupEntry::new(d)))
            .collect();

        let mut groups = self.groups.lock().expect("registry lock");
        let old = std::mem::replace(&mut *groups, fresh);
        let mut dropped: Vec<GroupId> = old.into_keys().collect();
        dropped.sort();
        debug!(unregistered = dropped.len(), registered = groups.len(), "group set replaced");
        dropped
    }

    /// Descriptor of a registered group.
    pub fn descriptor(&self, group_id: &str) -> Option<Arc<GroupDescriptor>> {
        let groups = self.groups.lock().expect("registry lock");
        groups.get(group_id).map(|e| e.descriptor.clone())
    }

    /// All registered descriptors, sorted by id.
    pub fn groups(&self) -> Vec<Arc<GroupDescriptor>> {
        let groups = self.groups.lock().expect("registry lock");
        let mut out: Vec<_> = groups.values().map(|e| e.descriptor.clone()).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Whether `group_id` is registered.
    pub fn contains(&self, group_id: &str) -> bool {
        self.groups.lock().expect("registry lock").contains_key(group_id)
    }

    /// Number of registered groups.
    pub fn len(&self) -> usize {
        self.groups.lock().expect("registry lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ── Nodes ──────────────────────────────────────────────────────

    /// Replace one group's node set.
    ///
    /// Records for other groups and terminal records are dropped. Returns
    /// false (and changes nothing) if the group is not registered.
    pub fn replace_nodes(&self, group_id: &str, records: Vec<NodeRecord>) -> bool {
        let mut groups = self.groups.lock().expect("registry lock");
        let Some(entry) = groups.get_mut(group_id) else {
            debug!(group = %group_id, "node replace skipped, group not registered");
            return false;
        };
        entry.nodes = records
            .into_iter()
            .filter(|r| r.group_id == group_id && !r.status.is_terminal())
            .collect();
        debug!(group = %group_id, nodes = entry.nodes.len(), "group nodes replaced");
        true
    }

    /// Rebuild every registered group's node set from one remote node list.
    ///
    /// Records for unregistered groups are ignored. Returns the number of
    /// active records kept across all groups.
    pub fn apply_node_list(&self, records: Vec<NodeRecord>) -> usize {
        let mut groups = self.groups.lock().expect("registry lock");

        let mut per_group: HashMap<GroupId, Vec<NodeRecord>> =
            groups.keys().map(|id| (id.clone(), Vec::new())).collect();
        for record in records {
            if record.status.is_terminal() {
                continue;
            }
            if let Some(nodes) = per_group.get_mut(&record.group_id) {
                nodes.push(record);
            }
        }

        let fresh: HashMap<GroupId, GroupEntry> = groups
            .iter()
            .map(|(id, entry)| {
                let nodes = per_group.remove(id).unwrap_or_default();
                (
                    id.clone(),
                    GroupEntry {
                        descriptor: entry.descriptor.clone(),
                        nodes,
                    },
                )
            })
            .collect();

        let kept = fresh.values().map(|e| e.nodes.len()).sum();
        *groups = fresh;
        debug!(groups = groups.len(), nodes = kept, "node list applied");
        kept
    }

    /// Active nodes of a group, or `None` if it is not registered.
    pub fn nodes(&self, group_id: &str) -> Option<Vec<NodeRecord>> {
        let groups = self.groups.lock().expect("registry lock");
        groups.get(group_id).map(|e| e.nodes.clone())
    }

    /// Number of non-terminal nodes in a group.
    pub fn target_size(&self, group_id: &str) -> Option<usize> {
        let groups = self.groups.lock().expect("registry lock");
        groups.get(group_id).map(|e| e.nodes.len())
    }

    /// The group owning a node, if any. Absence is not an error.
    pub fn find_group_for_provider_id(&self, provider_id: &str) -> Option<Arc<GroupDescriptor>> {
        let groups = self.groups.lock().expect("registry lock");
        groups
            .values()
            .find(|e| {
                e.nodes
                    .iter()
                    .any(|n| n.provider_id.to_string() == provider_id)
            })
            .map(|e| e.descriptor.clone())
    }

    /// Copy of one group and its active nodes.
    pub fn view(&self, group_id: &str) -> Option<GroupView> {
        let groups = self.groups.lock().expect("registry lock");
        groups.get(group_id).map(|e| GroupView {
            descriptor: e.descriptor.clone(),
            nodes: e.nodes.clone(),
        })
    }

    /// Consistent copy of every group, sorted by id.
    pub fn snapshot(&self) -> Vec<GroupView> {
        let groups = self.groups.lock().expect("registry lock");
        let mut out: Vec<GroupView> = groups
            .values()
            .map(|e| GroupView {
                descriptor: e.descriptor.clone(),
                nodes: e.nodes.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.descriptor.id.cmp(&b.descriptor.id));
        out
    }
}
