//! Dirty-state bookkeeping
//!
//! Records which nodes must re-execute and why. A node keeps the strongest
//! reason it has been given since it was last cleared.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use super::graph::{Edge, NodeId};

/// Why a node needs to re-execute, ordered by priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirtyReason {
    /// An upstream node changed
    InputChange,
    /// An edge into this node was added, replaced or removed
    ConnectionChange,
    /// The node's own parameters changed
    ParamChange,
}

#[derive(Debug, Default, Clone)]
pub struct DirtyTracker {
    dirty: HashMap<NodeId, DirtyReason>,
}

impl DirtyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a node dirty, keeping the stronger of the old and new reasons
    pub fn mark_dirty(&mut self, node_id: &str, reason: DirtyReason) {
        self.dirty
            .entry(node_id.to_string())
            .and_modify(|current| *current = (*current).max(reason))
            .or_insert(reason);
    }

    /// Mark everything reachable from `node_id` as `InputChange` and return it
    pub fn mark_downstream_dirty(&mut self, node_id: &str, edges: &[Edge]) -> Vec<NodeId> {
        let downstream = Self::downstream_nodes(node_id, edges);
        for id in &downstream {
            self.mark_dirty(id, DirtyReason::InputChange);
        }
        downstream
    }

    /// Breadth-first walk along edges, excluding `node_id` itself
    pub fn downstream_nodes(node_id: &str, edges: &[Edge]) -> Vec<NodeId> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        let mut found = Vec::new();
        visited.insert(node_id);
        queue.push_back(node_id);

        while let Some(current) = queue.pop_front() {
            for edge in edges.iter().filter(|e| e.source == current) {
                if visited.insert(edge.target.as_str()) {
                    found.push(edge.target.clone());
                    queue.push_back(edge.target.as_str());
                }
            }
        }
        found
    }

    pub fn clear(&mut self, node_id: &str) {
        self.dirty.remove(node_id);
    }

    pub fn clear_all(&mut self) {
        self.dirty.clear();
    }

    pub fn is_dirty(&self, node_id: &str) -> bool {
        self.dirty.contains_key(node_id)
    }

    pub fn reason(&self, node_id: &str) -> Option<DirtyReason> {
        self.dirty.get(node_id).copied()
    }

    pub fn dirty_node_ids(&self) -> HashSet<NodeId> {
        self.dirty.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.dirty.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirty.is_empty()
    }
}
