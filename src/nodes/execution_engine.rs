//! Node graph execution engine
//!
//! Owns the graph snapshot, the kind registry and the GPU context, and turns
//! invalidations into batches:
//! - edits mark nodes dirty and arm a debounce timer
//! - a due batch schedules the dirty closure and runs each node in order
//! - successful outputs are cached, failures are reported and retried
//! - textures no longer referenced by the cache are released
//! - observers receive every result of the batch at once

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::cache::{CacheKey, CacheStatistics, ResultCache};
use super::debounce::{PendingBatch, DEFAULT_DEBOUNCE};
use super::dirty::{DirtyReason, DirtyTracker};
use super::graph::{Edge, Node, NodeGraph, NodeId};
use super::params::Parameters;
use super::registry::{ExecutionContext, NodeKindRegistry, NodeMetadata};
use super::scheduler;
use super::value::{ImageValue, NodeInputs, NodeOutputs, OutputValue};
use crate::error::{GpuResult, GraphError, NodeError};
use crate::gpu::shader_library::load_all_shaders;
use crate::gpu::{GpuContext, OutputSize};

/// Outcome of one node in one batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub node_id: NodeId,
    pub outputs: NodeOutputs,
    pub error: Option<String>,
}

impl ExecutionResult {
    fn success(node_id: &str, outputs: NodeOutputs) -> Self {
        Self {
            node_id: node_id.to_string(),
            outputs,
            error: None,
        }
    }

    fn failure(node_id: &str, error: &NodeError) -> Self {
        Self {
            node_id: node_id.to_string(),
            outputs: NodeOutputs::new(),
            error: Some(error.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// How often a failing node is retried before it stops triggering batches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Consecutive failures before suspension; 0 retries forever
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Quiet window before a batch runs, in milliseconds
    pub debounce_ms: u64,
    /// Target size when neither the kind nor its inputs decide one
    pub default_canvas: OutputSize,
    pub retry: RetryPolicy,
}

impl EngineConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE.as_millis() as u64,
            default_canvas: OutputSize::DEFAULT_CANVAS,
            retry: RetryPolicy::default(),
        }
    }
}

/// Execution state of a node as seen by an editor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Up to date
    Clean,
    /// Waiting for the next batch
    Dirty,
    /// Last execution failed; will be retried
    Failed,
    /// Failed too often; waits for an edit before running again
    Suspended,
}

/// Statistics about the execution engine state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionStats {
    pub total_nodes: usize,
    pub clean_nodes: usize,
    pub dirty_nodes: usize,
    pub failed_nodes: usize,
    pub suspended_nodes: usize,
    pub cached_outputs: usize,
    pub batches_run: u64,
}

type Observer = Box<dyn FnMut(&[ExecutionResult])>;

#[derive(Default)]
struct ObserverList {
    entries: Vec<(u64, Observer)>,
    removed: HashSet<u64>,
    next_id: u64,
}

/// Handle returned by `on_execute`
pub struct Subscription {
    id: u64,
    observers: Weak<RefCell<ObserverList>>,
}

impl Subscription {
    /// Stop receiving results. Safe to call from inside the callback.
    pub fn unsubscribe(&self) {
        let Some(observers) = self.observers.upgrade() else {
            return;
        };
        let mut list = observers.borrow_mut();
        list.removed.insert(self.id);
        list.entries.retain(|(id, _)| *id != self.id);
    }
}

pub struct ExecutionEngine<G: GpuContext> {
    config: EngineConfig,
    graph: NodeGraph,
    registry: NodeKindRegistry,
    gpu: G,
    dirty: DirtyTracker,
    cache: ResultCache,
    last_results: HashMap<NodeId, ExecutionResult>,
    /// Consecutive failures per node
    failures: HashMap<NodeId, u32>,
    timer: PendingBatch,
    observers: Rc<RefCell<ObserverList>>,
    batches_run: u64,
}

impl<G: GpuContext> ExecutionEngine<G> {
    pub fn new(gpu: G, registry: NodeKindRegistry, config: EngineConfig) -> Self {
        Self {
            timer: PendingBatch::new(config.debounce()),
            config,
            graph: NodeGraph::new(),
            registry,
            gpu,
            dirty: DirtyTracker::new(),
            cache: ResultCache::new(),
            last_results: HashMap::new(),
            failures: HashMap::new(),
            observers: Rc::new(RefCell::new(ObserverList::default())),
            batches_run: 0,
        }
    }

    /// Engine with every built-in kind registered and their programs loaded
    pub fn with_builtins(mut gpu: G, config: EngineConfig) -> GpuResult<Self> {
        load_all_shaders(&mut gpu)?;
        Ok(Self::new(gpu, NodeKindRegistry::with_builtins(), config))
    }

    // ---- graph snapshot ----

    /// Replace the whole graph and schedule a full re-execution
    pub fn set_graph(&mut self, nodes: Vec<Node>, edges: Vec<Edge>) -> Result<(), GraphError> {
        let edges = edges
            .into_iter()
            .map(|edge| resolve_edge_ports(&self.registry, &nodes, edge))
            .collect();
        self.graph = NodeGraph::from_parts(nodes, edges)?;
        let graph = &self.graph;
        let dropped = self.cache.retain_nodes(|id| graph.contains(id));
        self.last_results.retain(|id, _| graph.contains(id));

        self.dirty.clear_all();
        for node in self.graph.nodes() {
            self.dirty.mark_dirty(&node.id, DirtyReason::ParamChange);
        }
        self.failures.clear();
        info!(
            "Graph replaced: {} nodes, {} edges ({} cached outputs dropped)",
            self.graph.nodes().len(),
            self.graph.edges().len(),
            dropped
        );
        self.arm();
        Ok(())
    }

    pub fn mark_node_dirty(&mut self, node_id: &str, reason: DirtyReason) {
        self.dirty.mark_dirty(node_id, reason);
        self.failures.remove(node_id);
        self.arm();
    }

    pub fn mark_downstream_dirty(&mut self, node_id: &str) {
        for id in self.dirty.mark_downstream_dirty(node_id, self.graph.edges()) {
            self.failures.remove(&id);
        }
        self.arm();
    }

    // ---- editing ----

    pub fn add_node(&mut self, node: Node) -> Result<(), GraphError> {
        let id = node.id.clone();
        if !self.registry.contains(&node.kind) {
            warn!("Node {} uses unregistered kind '{}'", id, node.kind);
        }
        self.graph.add_node(node)?;
        self.mark_node_dirty(&id, DirtyReason::ParamChange);
        Ok(())
    }

    /// Remove a node and its edges; former consumers re-execute without it
    pub fn remove_node(&mut self, node_id: &str) -> Result<Node, GraphError> {
        let (node, edges) = self.graph.remove_node(node_id)?;
        self.dirty.clear(node_id);
        self.failures.remove(node_id);
        self.last_results.remove(node_id);
        self.cache.remove_node(node_id);

        for edge in edges.iter().filter(|e| e.source == node_id) {
            self.mark_node_dirty(&edge.target, DirtyReason::ConnectionChange);
            self.mark_downstream_dirty(&edge.target);
        }
        let freed = self.sweep_textures();
        debug!("Removed node {} ({} textures freed)", node_id, freed);
        self.arm();
        Ok(node)
    }

    pub fn set_parameter(&mut self, node_id: &str, key: &str, value: serde_json::Value) -> Result<(), GraphError> {
        let node = self
            .graph
            .node_mut(node_id)
            .ok_or_else(|| GraphError::UnknownNode(node_id.to_string()))?;
        node.parameters.insert(key.to_string(), value);
        self.mark_parameters_changed(node_id);
        Ok(())
    }

    /// Merge several parameter values at once
    pub fn update_parameters(&mut self, node_id: &str, parameters: Parameters) -> Result<(), GraphError> {
        let node = self
            .graph
            .node_mut(node_id)
            .ok_or_else(|| GraphError::UnknownNode(node_id.to_string()))?;
        node.parameters.extend(parameters);
        self.mark_parameters_changed(node_id);
        Ok(())
    }

    /// Insert an edge, replacing whatever fed the same input. Returns the replaced edge.
    pub fn connect(&mut self, edge: Edge) -> Result<Option<Edge>, GraphError> {
        let edge = resolve_edge_ports(&self.registry, self.graph.nodes(), edge);
        let target = edge.target.clone();
        let replaced = self.graph.add_edge(edge)?;
        if scheduler::has_cycle(&self.graph) {
            warn!("Connection into {} closes a cycle; the cyclic nodes will not run", target);
        }
        self.mark_connection_changed(&target);
        Ok(replaced)
    }

    pub fn disconnect(&mut self, edge_id: &str) -> Result<Edge, GraphError> {
        let edge = self.graph.remove_edge(edge_id)?;
        self.mark_connection_changed(&edge.target);
        Ok(edge)
    }

    fn mark_parameters_changed(&mut self, node_id: &str) {
        self.mark_node_dirty(node_id, DirtyReason::ParamChange);
        self.mark_downstream_dirty(node_id);
    }

    fn mark_connection_changed(&mut self, target: &str) {
        self.mark_node_dirty(target, DirtyReason::ConnectionChange);
        self.mark_downstream_dirty(target);
    }

    // ---- batching ----

    fn arm(&mut self) {
        self.timer.arm(Instant::now());
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    /// Run the pending batch if its debounce window has passed
    pub fn poll(&mut self) -> Option<Vec<ExecutionResult>> {
        self.poll_at(Instant::now())
    }

    pub fn poll_at(&mut self, now: Instant) -> Option<Vec<ExecutionResult>> {
        if !self.timer.is_due(now) {
            return None;
        }
        Some(self.run_batch())
    }

    /// Run a batch immediately, ignoring the debounce window
    pub fn flush(&mut self) -> Vec<ExecutionResult> {
        self.run_batch()
    }

    fn is_suspended(&self, node_id: &str) -> bool {
        let max = self.config.retry.max_attempts;
        max > 0 && self.failures.get(node_id).is_some_and(|count| *count >= max)
    }

    #[instrument(skip(self))]
    fn run_batch(&mut self) -> Vec<ExecutionResult> {
        self.timer.cancel();

        let mut triggers: HashSet<NodeId> = self
            .dirty
            .dirty_node_ids()
            .into_iter()
            .filter(|id| !self.is_suspended(id))
            .collect();
        if triggers.is_empty() {
            return Vec::new();
        }
        // Consumers of a retried node saw an absent input last time
        let retried: Vec<NodeId> = triggers
            .iter()
            .filter(|id| self.failures.contains_key(*id))
            .cloned()
            .collect();
        for node_id in retried {
            triggers.extend(self.dirty.mark_downstream_dirty(&node_id, self.graph.edges()));
        }

        let schedule = scheduler::schedule(&self.graph, &triggers);
        debug!(
            "Batch: {} dirty, {} scheduled, {} blocked",
            triggers.len(),
            schedule.order.len(),
            schedule.blocked.len()
        );

        let mut results = Vec::with_capacity(schedule.order.len() + schedule.blocked.len());
        let mut failed: HashSet<NodeId> = HashSet::new();

        for node_id in &schedule.order {
            if self.is_suspended(node_id) {
                let attempts = self.failures.get(node_id).copied().unwrap_or_default();
                results.push(ExecutionResult::failure(node_id, &NodeError::Suspended(attempts)));
                failed.insert(node_id.clone());
                continue;
            }

            match self.execute_single_node(node_id, &failed) {
                Ok(outputs) => {
                    self.cache.insert(node_id, outputs.clone());
                    self.dirty.clear(node_id);
                    self.failures.remove(node_id);
                    results.push(ExecutionResult::success(node_id, outputs));
                }
                Err(err) => {
                    let attempts = {
                        let count = self.failures.entry(node_id.clone()).or_insert(0);
                        *count += 1;
                        *count
                    };
                    warn!("Node {} failed (attempt {}): {}", node_id, attempts, err);
                    if self.is_suspended(node_id) {
                        warn!("Node {} suspended after {} consecutive failures", node_id, attempts);
                    }
                    // Clean ancestors pulled in by the closure become dirty here too
                    self.dirty.mark_dirty(node_id, DirtyReason::InputChange);
                    results.push(ExecutionResult::failure(node_id, &err));
                    failed.insert(node_id.clone());
                }
            }
        }

        for node_id in &schedule.blocked {
            let err = NodeError::Graph(GraphError::Cycle(node_id.clone()));
            results.push(ExecutionResult::failure(node_id, &err));
        }

        let freed = self.sweep_textures();
        if freed > 0 {
            debug!("Released {} unreferenced textures", freed);
        }

        for result in &results {
            self.last_results.insert(result.node_id.clone(), result.clone());
        }
        self.batches_run += 1;
        self.notify(&results);
        results
    }

    #[instrument(skip(self, failed))]
    fn execute_single_node(&mut self, node_id: &str, failed: &HashSet<NodeId>) -> Result<NodeOutputs, NodeError> {
        let node = self
            .graph
            .node(node_id)
            .ok_or_else(|| GraphError::UnknownNode(node_id.to_string()))?;
        let kind = self
            .registry
            .get(&node.kind)
            .ok_or_else(|| NodeError::UnknownKind(node.kind.clone()))?;
        let Some(metadata) = self.registry.metadata(&node.kind) else {
            return Err(NodeError::UnknownKind(node.kind.clone()));
        };

        let inputs = Self::collect_node_inputs(&self.graph, &self.registry, &mut self.cache, node_id, failed);

        let mut parameters = metadata.default_parameters();
        parameters.extend(node.parameters.iter().map(|(k, v)| (k.clone(), v.clone())));

        let output_size = kind
            .output_size(&inputs, &parameters)
            .filter(|size| !size.is_empty())
            .or_else(|| {
                metadata
                    .inputs
                    .iter()
                    .filter(|port| port.data_type.is_texture())
                    .find_map(|port| inputs.get(port.key).and_then(OutputValue::as_image).and_then(ImageValue::size))
            })
            .unwrap_or(self.config.default_canvas);

        let mut ctx = ExecutionContext {
            node_id,
            inputs: &inputs,
            parameters: &parameters,
            gpu: &mut self.gpu,
            output_size,
        };
        let mut outputs = kind.execute(&mut ctx)?;

        for port in &metadata.outputs {
            outputs
                .entry(port.key.to_string())
                .or_insert_with(|| OutputValue::empty(port.data_type));
        }
        Ok(outputs)
    }

    /// Resolve a node's inputs from the cache. Unconnected ports, missing
    /// results and producers that failed this batch all leave the port empty.
    fn collect_node_inputs(
        graph: &NodeGraph,
        registry: &NodeKindRegistry,
        cache: &mut ResultCache,
        node_id: &str,
        failed: &HashSet<NodeId>,
    ) -> NodeInputs {
        let mut inputs = NodeInputs::new();
        let target_meta = graph.node(node_id).and_then(|n| registry.metadata(&n.kind));

        for edge in graph.incoming(node_id) {
            if failed.contains(&edge.source) {
                continue;
            }
            let target_port = match target_meta {
                Some(meta) => meta.resolve_input(edge.target_port.as_deref()),
                None => edge.target_port.as_deref(),
            };
            let source_meta = graph.node(&edge.source).and_then(|n| registry.metadata(&n.kind));
            let source_port = match source_meta {
                Some(meta) => meta.resolve_output(edge.source_port.as_deref()),
                None => edge.source_port.as_deref(),
            };
            let (Some(target_port), Some(source_port)) = (target_port, source_port) else {
                continue;
            };
            if let Some(value) = cache.get(&CacheKey::new(&edge.source, source_port)) {
                inputs.insert(target_port.to_string(), value.clone());
            }
        }
        inputs
    }

    /// Release every texture the result cache no longer references
    fn sweep_textures(&mut self) -> usize {
        let live = self.cache.texture_ids();
        for id in self.gpu.texture_ids() {
            if !live.contains(&id) {
                self.gpu.mark_unused(id);
            }
        }
        self.gpu.collect_garbage()
    }

    // ---- observers ----

    /// Receive the results of every batch that did work
    pub fn on_execute(&mut self, callback: impl FnMut(&[ExecutionResult]) + 'static) -> Subscription {
        let mut list = self.observers.borrow_mut();
        let id = list.next_id;
        list.next_id += 1;
        list.entries.push((id, Box::new(callback)));
        Subscription {
            id,
            observers: Rc::downgrade(&self.observers),
        }
    }

    fn notify(&self, results: &[ExecutionResult]) {
        let mut entries = std::mem::take(&mut self.observers.borrow_mut().entries);
        for (id, callback) in entries.iter_mut() {
            if self.observers.borrow().removed.contains(id) {
                continue;
            }
            callback(results);
        }

        let mut list = self.observers.borrow_mut();
        let added = std::mem::take(&mut list.entries);
        entries.extend(added);
        let removed = std::mem::take(&mut list.removed);
        entries.retain(|(id, _)| !removed.contains(id));
        list.entries = entries;
    }

    // ---- queries ----

    pub fn get_node_result(&self, node_id: &str) -> Option<&NodeOutputs> {
        self.cache.outputs(node_id)
    }

    pub fn last_result(&self, node_id: &str) -> Option<&ExecutionResult> {
        self.last_results.get(node_id)
    }

    pub fn node_state(&self, node_id: &str) -> NodeState {
        if self.is_suspended(node_id) {
            NodeState::Suspended
        } else if self.failures.contains_key(node_id) {
            NodeState::Failed
        } else if self.dirty.is_dirty(node_id) {
            NodeState::Dirty
        } else {
            NodeState::Clean
        }
    }

    pub fn stats(&self) -> ExecutionStats {
        let mut stats = ExecutionStats {
            total_nodes: self.graph.nodes().len(),
            cached_outputs: self.cache.statistics().total_entries,
            batches_run: self.batches_run,
            ..ExecutionStats::default()
        };
        for node in self.graph.nodes() {
            match self.node_state(&node.id) {
                NodeState::Clean => stats.clean_nodes += 1,
                NodeState::Dirty => stats.dirty_nodes += 1,
                NodeState::Failed => stats.failed_nodes += 1,
                NodeState::Suspended => stats.suspended_nodes += 1,
            }
        }
        stats
    }

    pub fn dirty_nodes(&self) -> HashSet<NodeId> {
        self.dirty.dirty_node_ids()
    }

    pub fn cache_statistics(&self) -> &CacheStatistics {
        self.cache.statistics()
    }

    pub fn graph(&self) -> &NodeGraph {
        &self.graph
    }

    pub fn registry(&self) -> &NodeKindRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    pub fn gpu_mut(&mut self) -> &mut G {
        &mut self.gpu
    }

    /// Drop cached results and release every GPU resource
    pub fn dispose(&mut self) {
        self.cache.clear();
        self.timer.cancel();
        self.gpu.dispose();
    }
}

fn kind_metadata<'a>(registry: &'a NodeKindRegistry, nodes: &[Node], node_id: &str) -> Option<&'a NodeMetadata> {
    nodes
        .iter()
        .find(|node| node.id == node_id)
        .and_then(|node| registry.metadata(&node.kind))
}

/// Name unnamed ports after the kind's first declared port, so an edge without
/// a port and one naming that port land on the same input
fn resolve_edge_ports(registry: &NodeKindRegistry, nodes: &[Node], mut edge: Edge) -> Edge {
    if edge.source_port.is_none() {
        edge.source_port = kind_metadata(registry, nodes, &edge.source)
            .and_then(|meta| meta.resolve_output(None))
            .map(str::to_string);
    }
    if edge.target_port.is_none() {
        edge.target_port = kind_metadata(registry, nodes, &edge.target)
            .and_then(|meta| meta.resolve_input(None))
            .map(str::to_string);
    }
    edge
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{CopyOptions, MemoryGpu};
    use crate::nodes::registry::{NodeCategory, NodeKind, NodeMetadata, PortSpec};
    use crate::nodes::value::DataType;
    use serde_json::json;

    fn engine() -> ExecutionEngine<MemoryGpu> {
        ExecutionEngine::with_builtins(MemoryGpu::new(), EngineConfig::default()).unwrap()
    }

    fn solid(id: &str, rgba: [f32; 4]) -> Node {
        Node::new(id, "solid_color")
            .with_parameter("color", json!({ "r": rgba[0], "g": rgba[1], "b": rgba[2], "a": rgba[3] }))
            .with_parameter("width", 4)
            .with_parameter("height", 4)
    }

    fn executed(results: &[ExecutionResult]) -> Vec<&str> {
        results.iter().map(|r| r.node_id.as_str()).collect()
    }

    fn first_pixel(engine: &mut ExecutionEngine<MemoryGpu>, node_id: &str) -> [u8; 4] {
        let texture = engine.get_node_result(node_id).unwrap()["image"].texture().unwrap();
        let pixels = engine.gpu_mut().read_pixels(texture, 1, 1).unwrap();
        [pixels[0], pixels[1], pixels[2], pixels[3]]
    }

    #[test]
    fn test_solid_color_to_preview_tracks_parameter_edits() {
        let mut engine = engine();
        engine
            .set_graph(
                vec![solid("color", [1.0, 0.0, 0.0, 1.0]), Node::new("preview", "preview_output")],
                vec![Edge::new("color", "preview")],
            )
            .unwrap();
        let results = engine.flush();
        assert_eq!(executed(&results), vec!["color", "preview"]);
        assert!(results.iter().all(ExecutionResult::is_ok));
        assert_eq!(first_pixel(&mut engine, "preview"), [255, 0, 0, 255]);

        engine
            .set_parameter("color", "color", json!({ "r": 0.0, "g": 0.0, "b": 1.0, "a": 1.0 }))
            .unwrap();
        let results = engine.flush();
        assert_eq!(executed(&results), vec!["color", "preview"]);
        assert_eq!(first_pixel(&mut engine, "preview"), [0, 0, 255, 255]);
    }

    #[test]
    fn test_import_blur_zero_preview_is_identity() {
        let path = std::env::temp_dir().join(format!("pixelgraph-engine-{}.png", uuid::Uuid::new_v4()));
        let mut source = image::RgbaImage::new(3, 2);
        for (i, px) in source.pixels_mut().enumerate() {
            *px = image::Rgba([i as u8 * 40, 255 - i as u8 * 30, 7, 255]);
        }
        source.save(&path).unwrap();

        let mut engine = engine();
        engine
            .set_graph(
                vec![
                    Node::new("import", "image_import").with_parameter("filePath", path.to_string_lossy()),
                    Node::new("blur", "gaussian_blur").with_parameter("radius", 0),
                    Node::new("preview", "preview_output"),
                ],
                vec![Edge::new("import", "blur"), Edge::new("blur", "preview")],
            )
            .unwrap();
        let results = engine.flush();
        std::fs::remove_file(&path).ok();
        assert!(results.iter().all(ExecutionResult::is_ok), "{results:?}");

        let texture = engine.get_node_result("preview").unwrap()["image"].texture().unwrap();
        let copied = engine
            .gpu_mut()
            .copy_to_image(texture, &CopyOptions::default())
            .unwrap();
        assert_eq!(copied, source);
    }

    #[test]
    fn test_only_affected_branch_recomputes() {
        let mut engine = engine();
        engine
            .set_graph(
                vec![
                    solid("a", [1.0, 0.0, 0.0, 1.0]),
                    Node::new("blur_a", "gaussian_blur"),
                    solid("b", [0.0, 1.0, 0.0, 1.0]),
                    Node::new("blur_b", "gaussian_blur"),
                ],
                vec![Edge::new("a", "blur_a"), Edge::new("b", "blur_b")],
            )
            .unwrap();
        engine.flush();
        engine.gpu_mut().clear_render_log();

        engine.set_parameter("blur_b", "radius", json!(1)).unwrap();
        let results = engine.flush();
        assert_eq!(executed(&results), vec!["b", "blur_b"]);
        let solid_renders = engine
            .gpu()
            .render_log()
            .iter()
            .filter(|call| call.program == "solid_color")
            .count();
        assert_eq!(solid_renders, 1);
    }

    #[test]
    fn test_no_dirty_nodes_means_no_batch() {
        let mut engine = engine();
        let calls = Rc::new(RefCell::new(0));
        let seen = calls.clone();
        engine.on_execute(move |_| *seen.borrow_mut() += 1);

        assert!(engine.flush().is_empty());
        assert_eq!(*calls.borrow(), 0);

        engine.add_node(solid("a", [1.0; 4])).unwrap();
        engine.flush();
        engine.flush();
        assert_eq!(*calls.borrow(), 1);
    }

    #[test]
    fn test_failing_node_stays_dirty_then_suspends() {
        let mut engine = engine();
        engine
            .set_graph(
                vec![solid("a", [1.0; 4]), Node::new("preview", "preview_output")],
                vec![Edge::new("a", "preview")],
            )
            .unwrap();
        engine.gpu_mut().fail_program("solid_color");

        let results = engine.flush();
        assert!(results[0].error.is_some());
        assert!(results[1].is_ok(), "consumer runs with an absent input");
        assert!(!engine.get_node_result("preview").unwrap()["image"].as_image().unwrap().is_present());
        assert_eq!(engine.node_state("a"), NodeState::Failed);
        assert!(engine.dirty_nodes().contains("a"));

        engine.flush();
        engine.flush();
        assert_eq!(engine.node_state("a"), NodeState::Suspended);
        assert!(engine.flush().is_empty(), "suspended nodes no longer trigger batches");

        engine.gpu_mut().heal_program("solid_color");
        engine.set_parameter("a", "width", json!(2)).unwrap();
        let results = engine.flush();
        assert!(results.iter().all(ExecutionResult::is_ok));
        assert_eq!(engine.node_state("a"), NodeState::Clean);
        assert!(engine.get_node_result("preview").unwrap()["image"].as_image().unwrap().is_present());
    }

    #[test]
    fn test_recovered_node_refreshes_consumers() {
        let mut engine = engine();
        engine
            .set_graph(
                vec![solid("a", [1.0; 4]), Node::new("preview", "preview_output")],
                vec![Edge::new("a", "preview")],
            )
            .unwrap();
        engine.gpu_mut().fail_program("solid_color");
        engine.flush();
        engine.gpu_mut().heal_program("solid_color");

        let results = engine.flush();
        assert_eq!(executed(&results), vec!["a", "preview"]);
        assert!(engine.get_node_result("preview").unwrap()["image"].texture().is_some());
        assert!(engine.dirty_nodes().is_empty());
    }

    #[test]
    fn test_cycle_blocks_only_cyclic_nodes() {
        let mut engine = engine();
        engine
            .set_graph(
                vec![
                    Node::new("x", "flip"),
                    Node::new("y", "flip"),
                    solid("free", [1.0; 4]),
                ],
                vec![Edge::new("x", "y"), Edge::new("y", "x")],
            )
            .unwrap();
        let results = engine.flush();
        let free = results.iter().find(|r| r.node_id == "free").unwrap();
        assert!(free.is_ok());
        for id in ["x", "y"] {
            let result = results.iter().find(|r| r.node_id == id).unwrap();
            assert!(result.error.as_deref().is_some_and(|e| e.contains("cycle")));
            assert!(engine.dirty_nodes().contains(id));
        }
    }

    #[test]
    fn test_debounce_coalesces_edits() {
        let mut engine = engine();
        let calls = Rc::new(RefCell::new(Vec::new()));
        let seen = calls.clone();
        engine.on_execute(move |results| seen.borrow_mut().push(results.len()));

        engine.add_node(solid("a", [1.0; 4])).unwrap();
        engine.set_parameter("a", "width", json!(2)).unwrap();
        engine.set_parameter("a", "width", json!(3)).unwrap();

        let deadline = engine.next_deadline().unwrap();
        assert!(engine.poll_at(deadline - Duration::from_millis(1)).is_none());
        let results = engine.poll_at(deadline).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(*calls.borrow(), vec![1]);
        assert!(engine.next_deadline().is_none());
        assert_eq!(
            engine.get_node_result("a").unwrap()["image"].as_image().unwrap().width,
            3
        );
    }

    #[test]
    fn test_unsubscribe_inside_callback() {
        let mut engine = engine();
        let calls = Rc::new(RefCell::new(0));
        let slot: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

        let (seen, own) = (calls.clone(), slot.clone());
        let subscription = engine.on_execute(move |_| {
            *seen.borrow_mut() += 1;
            if let Some(sub) = own.borrow().as_ref() {
                sub.unsubscribe();
            }
        });
        *slot.borrow_mut() = Some(subscription);

        engine.add_node(solid("a", [1.0; 4])).unwrap();
        engine.flush();
        engine.set_parameter("a", "width", json!(2)).unwrap();
        engine.flush();
        assert_eq!(*calls.borrow(), 1);
    }

    #[test]
    fn test_superseded_textures_are_released() {
        let mut engine = engine();
        engine
            .set_graph(
                vec![solid("a", [1.0; 4]), Node::new("blur", "gaussian_blur").with_parameter("radius", 2)],
                vec![Edge::new("a", "blur")],
            )
            .unwrap();
        engine.flush();
        assert_eq!(engine.gpu().texture_count(), 2, "blur intermediate is swept");

        for width in [5, 6, 7] {
            engine.set_parameter("a", "width", json!(width)).unwrap();
            engine.flush();
        }
        assert_eq!(engine.gpu().texture_count(), 2);

        engine.remove_node("blur").unwrap();
        assert_eq!(engine.gpu().texture_count(), 1);
    }

    #[test]
    fn test_connect_replaces_existing_input() {
        let mut engine = engine();
        engine
            .set_graph(
                vec![
                    solid("red", [1.0, 0.0, 0.0, 1.0]),
                    solid("green", [0.0, 1.0, 0.0, 1.0]),
                    Node::new("preview", "preview_output"),
                ],
                vec![Edge::new("red", "preview").to_port("image").with_id("first")],
            )
            .unwrap();
        engine.flush();

        let replaced = engine
            .connect(Edge::new("green", "preview").to_port("image"))
            .unwrap();
        assert_eq!(replaced.map(|e| e.id), Some("first".to_string()));
        assert_eq!(engine.graph().incoming("preview").count(), 1);
        assert_eq!(engine.dirty_nodes(), HashSet::from(["preview".to_string()]));

        let results = engine.flush();
        assert_eq!(executed(&results), vec!["green", "preview"]);
        assert_eq!(first_pixel(&mut engine, "preview"), [0, 255, 0, 255]);
    }

    #[test]
    fn test_unnamed_port_collides_with_named_port() {
        let mut engine = engine();
        engine
            .set_graph(
                vec![
                    solid("red", [1.0, 0.0, 0.0, 1.0]),
                    solid("green", [0.0, 1.0, 0.0, 1.0]),
                    Node::new("preview", "preview_output"),
                ],
                vec![Edge::new("red", "preview").with_id("unnamed")],
            )
            .unwrap();
        engine.flush();
        let stored = engine.graph().incoming("preview").next().unwrap();
        assert_eq!(stored.source_port.as_deref(), Some("image"));
        assert_eq!(stored.target_port.as_deref(), Some("image"));

        let replaced = engine
            .connect(Edge::new("green", "preview").to_port("image"))
            .unwrap();
        assert_eq!(replaced.map(|e| e.id), Some("unnamed".to_string()));
        assert_eq!(engine.graph().incoming("preview").count(), 1);

        engine.flush();
        assert_eq!(first_pixel(&mut engine, "preview"), [0, 255, 0, 255]);
    }

    #[test]
    fn test_set_graph_keeps_one_producer_per_input() {
        let mut engine = engine();
        engine
            .set_graph(
                vec![
                    solid("red", [1.0, 0.0, 0.0, 1.0]),
                    solid("green", [0.0, 1.0, 0.0, 1.0]),
                    Node::new("preview", "preview_output"),
                ],
                vec![
                    Edge::new("red", "preview"),
                    Edge::new("green", "preview").to_port("image"),
                ],
            )
            .unwrap();
        let incoming: Vec<_> = engine.graph().incoming("preview").map(|e| e.source.clone()).collect();
        assert_eq!(incoming, vec!["green".to_string()]);
    }

    #[test]
    fn test_failing_clean_ancestor_is_retried() {
        let mut engine = engine();
        engine
            .set_graph(
                vec![solid("a", [1.0; 4]), Node::new("blur", "gaussian_blur")],
                vec![Edge::new("a", "blur")],
            )
            .unwrap();
        engine.flush();
        engine.gpu_mut().fail_program("solid_color");

        engine.set_parameter("blur", "radius", json!(1)).unwrap();
        let results = engine.flush();
        assert_eq!(executed(&results), vec!["a", "blur"]);
        assert!(results[0].error.is_some());
        assert!(results[1].is_ok());
        assert_eq!(engine.node_state("a"), NodeState::Failed);
        assert!(engine.dirty_nodes().contains("a"));

        engine.gpu_mut().heal_program("solid_color");
        let results = engine.flush();
        assert_eq!(executed(&results), vec!["a", "blur"]);
        assert!(results.iter().all(ExecutionResult::is_ok));
        assert!(engine.get_node_result("blur").unwrap()["image"].texture().is_some());
    }

    #[test]
    fn test_disconnect_and_remove_mark_consumers() {
        let mut engine = engine();
        engine
            .set_graph(
                vec![solid("a", [1.0; 4]), Node::new("flip", "flip"), Node::new("preview", "preview_output")],
                vec![Edge::new("a", "flip").with_id("e1"), Edge::new("flip", "preview")],
            )
            .unwrap();
        engine.flush();

        engine.disconnect("e1").unwrap();
        assert_eq!(engine.dirty.reason("flip"), Some(DirtyReason::ConnectionChange));
        assert_eq!(engine.dirty.reason("preview"), Some(DirtyReason::InputChange));
        engine.flush();
        assert!(!engine.get_node_result("preview").unwrap()["image"].as_image().unwrap().is_present());

        engine.remove_node("flip").unwrap();
        assert!(engine.get_node_result("flip").is_none());
        assert_eq!(engine.dirty.reason("preview"), Some(DirtyReason::ConnectionChange));
    }

    #[test]
    fn test_set_graph_drops_vanished_results() {
        let mut engine = engine();
        engine.set_graph(vec![solid("a", [1.0; 4]), solid("b", [1.0; 4])], vec![]).unwrap();
        engine.flush();
        engine.set_graph(vec![solid("b", [1.0; 4])], vec![]).unwrap();
        assert!(engine.get_node_result("a").is_none());
        assert_eq!(engine.dirty_nodes(), HashSet::from(["b".to_string()]));
        assert_eq!(engine.dirty.reason("b"), Some(DirtyReason::ParamChange));
    }

    struct Bounds;

    impl NodeKind for Bounds {
        fn metadata(&self) -> NodeMetadata {
            NodeMetadata::new("bounds", "Bounds", NodeCategory::new(&["Analyze"]), "")
                .with_inputs(vec![PortSpec::required("image", "Image", DataType::Image)])
                .with_outputs(vec![
                    PortSpec::required("area", "Area", DataType::Number),
                    PortSpec::optional("box", "Box", DataType::BoundingBox),
                ])
        }

        fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<NodeOutputs, NodeError> {
            let area = (ctx.output_size.width * ctx.output_size.height) as f32;
            Ok(NodeOutputs::from([("area".to_string(), OutputValue::Number { value: area })]))
        }
    }

    #[test]
    fn test_output_size_follows_first_image_input_and_missing_ports_are_filled() {
        let mut gpu = MemoryGpu::new();
        load_all_shaders(&mut gpu).unwrap();
        let mut registry = NodeKindRegistry::with_builtins();
        registry.register(Bounds);
        let mut engine = ExecutionEngine::new(gpu, registry, EngineConfig::default());

        engine
            .set_graph(
                vec![solid("a", [1.0; 4]), Node::new("m", "bounds"), Node::new("lonely", "bounds")],
                vec![Edge::new("a", "m")],
            )
            .unwrap();
        engine.flush();

        let outputs = engine.get_node_result("m").unwrap();
        assert_eq!(outputs["area"], OutputValue::Number { value: 16.0 });
        assert_eq!(outputs["box"].data_type(), DataType::BoundingBox);

        let lonely = engine.get_node_result("lonely").unwrap();
        assert_eq!(lonely["area"], OutputValue::Number { value: 1920.0 * 1080.0 });
    }

    #[test]
    fn test_unknown_kind_reports_error() {
        let mut engine = engine();
        engine.add_node(Node::new("mystery", "does_not_exist")).unwrap();
        let results = engine.flush();
        assert!(results[0].error.as_deref().is_some_and(|e| e.contains("does_not_exist")));
        assert_eq!(engine.last_result("mystery"), Some(&results[0]));
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{ "debounce_ms": 20 }"#).unwrap();
        assert_eq!(config.debounce(), Duration::from_millis(20));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.default_canvas, OutputSize::DEFAULT_CANVAS);
    }

    #[test]
    fn test_stats_count_states() {
        let mut engine = engine();
        engine.set_graph(vec![solid("a", [1.0; 4]), solid("b", [1.0; 4])], vec![]).unwrap();
        assert_eq!(engine.stats().dirty_nodes, 2);
        engine.flush();
        let stats = engine.stats();
        assert_eq!((stats.clean_nodes, stats.cached_outputs, stats.batches_run), (2, 2, 1));
    }
}
