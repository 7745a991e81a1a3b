//! Execution ordering
//!
//! Works out the minimal set of nodes a batch has to run (dirty nodes plus
//! every ancestor they read from) and orders it with Kahn's algorithm.
//! Ties are broken by the graph's node order so schedules are deterministic.

use std::collections::{HashMap, HashSet, VecDeque};

use super::graph::{NodeGraph, NodeId};

/// Outcome of scheduling a batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schedule {
    /// Nodes to execute, producers before consumers
    pub order: Vec<NodeId>,
    /// Closure members that could not be ordered: cycle members and
    /// everything downstream of one
    pub blocked: Vec<NodeId>,
}

impl Schedule {
    pub fn has_cycle(&self) -> bool {
        !self.blocked.is_empty()
    }
}

/// Dirty nodes plus all of their transitive ancestors
pub fn closure_to_execute(graph: &NodeGraph, dirty: &HashSet<NodeId>) -> HashSet<NodeId> {
    let mut closure: HashSet<NodeId> = HashSet::new();
    let mut stack: Vec<&str> = dirty
        .iter()
        .filter(|id| graph.contains(id))
        .map(|id| id.as_str())
        .collect();

    while let Some(current) = stack.pop() {
        if !closure.insert(current.to_string()) {
            continue;
        }
        for edge in graph.incoming(current) {
            if !closure.contains(&edge.source) {
                stack.push(edge.source.as_str());
            }
        }
    }
    closure
}

/// Order the closure of `dirty`, reporting nodes a cycle kept from being ordered
pub fn schedule(graph: &NodeGraph, dirty: &HashSet<NodeId>) -> Schedule {
    let closure = closure_to_execute(graph, dirty);
    if closure.is_empty() {
        return Schedule::default();
    }

    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    for node in graph.nodes().iter().filter(|n| closure.contains(&n.id)) {
        in_degree.insert(node.id.as_str(), 0);
    }
    for edge in graph.edges() {
        if closure.contains(&edge.source) && closure.contains(&edge.target) {
            *in_degree.entry(edge.target.as_str()).or_insert(0) += 1;
        }
    }

    let mut queue: VecDeque<&str> = graph
        .nodes()
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| in_degree.get(id) == Some(&0))
        .collect();
    let mut order = Vec::with_capacity(closure.len());

    while let Some(current) = queue.pop_front() {
        order.push(current.to_string());
        for edge in graph.outgoing(current) {
            if let Some(degree) = in_degree.get_mut(edge.target.as_str()) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(edge.target.as_str());
                }
            }
        }
    }

    let blocked = if order.len() == closure.len() {
        Vec::new()
    } else {
        let ordered: HashSet<&str> = order.iter().map(String::as_str).collect();
        graph
            .nodes()
            .iter()
            .filter(|n| closure.contains(&n.id) && !ordered.contains(n.id.as_str()))
            .map(|n| n.id.clone())
            .collect()
    };

    Schedule { order, blocked }
}

/// Topological order of the nodes a batch must run for `dirty`.
/// An empty dirty set yields an empty order; nodes caught in a cycle are left out.
pub fn topological_sort(graph: &NodeGraph, dirty: &HashSet<NodeId>) -> Vec<NodeId> {
    schedule(graph, dirty).order
}

/// Depth-first search for a back edge anywhere in the graph
pub fn has_cycle(graph: &NodeGraph) -> bool {
    fn visit<'a>(
        node: &'a str,
        graph: &'a NodeGraph,
        visited: &mut HashSet<&'a str>,
        on_stack: &mut HashSet<&'a str>,
    ) -> bool {
        visited.insert(node);
        on_stack.insert(node);
        for edge in graph.outgoing(node) {
            let next = edge.target.as_str();
            if on_stack.contains(next) {
                return true;
            }
            if !visited.contains(next) && visit(next, graph, visited, on_stack) {
                return true;
            }
        }
        on_stack.remove(node);
        false
    }

    let mut visited = HashSet::new();
    let mut on_stack = HashSet::new();
    graph.nodes().iter().any(|node| {
        !visited.contains(node.id.as_str()) && visit(node.id.as_str(), graph, &mut visited, &mut on_stack)
    })
}
