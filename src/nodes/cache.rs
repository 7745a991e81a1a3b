//! Result cache for node execution
//!
//! Holds the last successful outputs of every node, addressed by
//! `(node, port)`. The cache is the owner of record for result textures:
//! anything it no longer references is swept by the engine after a batch.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::graph::NodeId;
use super::value::{NodeOutputs, OutputValue};
use crate::gpu::TextureId;

/// Address of one cached output port
#[derive(Hash, Eq, PartialEq, Clone, Debug, Serialize, Deserialize)]
pub struct CacheKey {
    pub node_id: NodeId,
    pub port: String,
}

impl CacheKey {
    pub fn new(node_id: &str, port: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            port: port.to_string(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct CacheStatistics {
    /// Cached output ports across all nodes
    pub total_entries: usize,
    /// Nodes with at least one cached output
    pub cached_nodes: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    /// Ports dropped by removal or retention
    pub cache_invalidations: usize,
}

impl CacheStatistics {
    pub fn hit_ratio(&self) -> f32 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f32 / total as f32
        }
    }
}

#[derive(Debug, Default)]
pub struct ResultCache {
    entries: HashMap<NodeId, NodeOutputs>,
    stats: CacheStatistics,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything cached for `node_id` with `outputs`
    pub fn insert(&mut self, node_id: &str, outputs: NodeOutputs) {
        self.entries.insert(node_id.to_string(), outputs);
        self.update_structure_stats();
    }

    /// Look up one port, counting the access as a hit or a miss
    pub fn get(&mut self, key: &CacheKey) -> Option<&OutputValue> {
        let found = self
            .entries
            .get(&key.node_id)
            .and_then(|outputs| outputs.get(&key.port));
        if found.is_some() {
            self.stats.cache_hits += 1;
        } else {
            self.stats.cache_misses += 1;
        }
        found
    }

    pub fn outputs(&self, node_id: &str) -> Option<&NodeOutputs> {
        self.entries.get(node_id)
    }

    /// Drop every output of a node, returning them
    pub fn remove_node(&mut self, node_id: &str) -> Option<NodeOutputs> {
        let removed = self.entries.remove(node_id);
        if let Some(outputs) = &removed {
            self.stats.cache_invalidations += outputs.len();
        }
        self.update_structure_stats();
        removed
    }

    /// Keep only the nodes for which `keep` returns true
    pub fn retain_nodes(&mut self, mut keep: impl FnMut(&str) -> bool) -> usize {
        let before = self.stats.total_entries;
        self.entries.retain(|node_id, _| keep(node_id));
        self.update_structure_stats();
        let removed = before - self.stats.total_entries;
        self.stats.cache_invalidations += removed;
        removed
    }

    /// Every texture referenced by a cached output
    pub fn texture_ids(&self) -> HashSet<TextureId> {
        self.entries
            .values()
            .flat_map(|outputs| outputs.values())
            .filter_map(OutputValue::texture)
            .collect()
    }

    pub fn clear(&mut self) {
        self.stats.cache_invalidations += self.stats.total_entries;
        self.entries.clear();
        self.update_structure_stats();
    }

    pub fn statistics(&self) -> &CacheStatistics {
        &self.stats
    }

    fn update_structure_stats(&mut self) {
        self.stats.cached_nodes = self.entries.len();
        self.stats.total_entries = self.entries.values().map(HashMap::len).sum();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::OutputSize;
    use crate::nodes::value::ImageValue;

    fn image(id: u64) -> OutputValue {
        OutputValue::Image(ImageValue::new(TextureId(id), OutputSize::new(2, 2)))
    }

    fn outputs(entries: &[(&str, OutputValue)]) -> NodeOutputs {
        entries
            .iter()
            .map(|(port, value)| (port.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn test_get_counts_hits_and_misses() {
        let mut cache = ResultCache::new();
        cache.insert("a", outputs(&[("image", image(1))]));

        assert_eq!(cache.get(&CacheKey::new("a", "image")), Some(&image(1)));
        assert!(cache.get(&CacheKey::new("a", "mask")).is_none());

        let stats = cache.statistics();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(stats.hit_ratio(), 0.5);
    }

    #[test]
    fn test_insert_replaces_all_ports_of_node() {
        let mut cache = ResultCache::new();
        cache.insert("a", outputs(&[("image", image(1)), ("mask", image(2))]));
        cache.insert("a", outputs(&[("image", image(3))]));
        assert!(cache.get(&CacheKey::new("a", "mask")).is_none());
        assert_eq!(cache.statistics().total_entries, 1);
    }

    #[test]
    fn test_texture_ids_follow_contents() {
        let mut cache = ResultCache::new();
        cache.insert("a", outputs(&[("image", image(1))]));
        cache.insert("b", outputs(&[("image", image(2)), ("value", OutputValue::Number { value: 1.0 })]));
        assert_eq!(cache.texture_ids(), HashSet::from([TextureId(1), TextureId(2)]));

        assert!(cache.remove_node("a").is_some());
        assert_eq!(cache.texture_ids(), HashSet::from([TextureId(2)]));
        assert_eq!(cache.statistics().cache_invalidations, 1);
    }

    #[test]
    fn test_retain_nodes_drops_vanished() {
        let mut cache = ResultCache::new();
        cache.insert("a", outputs(&[("image", image(1))]));
        cache.insert("b", outputs(&[("image", image(2))]));
        assert_eq!(cache.retain_nodes(|id| id == "b"), 1);
        assert!(cache.outputs("a").is_none());
        assert_eq!(cache.statistics().cached_nodes, 1);
        assert_eq!(cache.statistics().cache_invalidations, 1);
    }
}
