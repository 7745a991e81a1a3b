//! Node graph data structures and operations

use glam::Vec2;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::params::Parameters;
use crate::error::GraphError;

pub type NodeId = String;

/// A node instance: its kind, editor position and parameter values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: String,
    #[serde(default)]
    pub position: Vec2,
    #[serde(default)]
    pub parameters: Parameters,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            position: Vec2::ZERO,
            parameters: Parameters::new(),
        }
    }

    pub fn at(mut self, position: Vec2) -> Self {
        self.position = position;
        self
    }

    pub fn with_parameter(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }
}

/// A directed connection from an output port to an input port.
/// `None` ports refer to the kind's first declared port on that side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: NodeId,
    #[serde(default)]
    pub source_port: Option<String>,
    pub target: NodeId,
    #[serde(default)]
    pub target_port: Option<String>,
}

impl Edge {
    /// Connect the default ports of two nodes
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source: source.into(),
            source_port: None,
            target: target.into(),
            target_port: None,
        }
    }

    pub fn from_port(mut self, port: &str) -> Self {
        self.source_port = Some(port.to_string());
        self
    }

    pub fn to_port(mut self, port: &str) -> Self {
        self.target_port = Some(port.to_string());
        self
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    /// Whether this edge occupies the given input slot
    pub fn feeds(&self, target: &str, target_port: Option<&str>) -> bool {
        self.target == target && self.target_port.as_deref() == target_port
    }
}

/// Nodes and edges, with at most one edge per `(target, target_port)`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeGraph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl NodeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from snapshots. Edges are inserted in order, so a later
    /// edge into an occupied input replaces the earlier one.
    pub fn from_parts(nodes: Vec<Node>, edges: Vec<Edge>) -> Result<Self, GraphError> {
        let mut graph = Self::new();
        for node in nodes {
            graph.add_node(node)?;
        }
        for edge in edges {
            graph.add_edge(edge)?;
        }
        Ok(graph)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.node(id).is_some()
    }

    pub fn add_node(&mut self, node: Node) -> Result<(), GraphError> {
        if self.contains(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        self.nodes.push(node);
        Ok(())
    }

    /// Remove a node together with every edge touching it
    pub fn remove_node(&mut self, id: &str) -> Result<(Node, Vec<Edge>), GraphError> {
        let index = self
            .nodes
            .iter()
            .position(|n| n.id == id)
            .ok_or_else(|| GraphError::UnknownNode(id.to_string()))?;
        let node = self.nodes.remove(index);
        let (removed, kept): (Vec<Edge>, Vec<Edge>) = std::mem::take(&mut self.edges)
            .into_iter()
            .partition(|e| e.source == id || e.target == id);
        self.edges = kept;
        Ok((node, removed))
    }

    /// Insert an edge, replacing whatever fed the same input. Returns the replaced edge.
    pub fn add_edge(&mut self, edge: Edge) -> Result<Option<Edge>, GraphError> {
        if edge.source == edge.target {
            return Err(GraphError::SelfConnection(edge.source));
        }
        if !self.contains(&edge.source) {
            return Err(GraphError::UnknownNode(edge.source));
        }
        if !self.contains(&edge.target) {
            return Err(GraphError::UnknownNode(edge.target));
        }

        let replaced = self
            .edges
            .iter()
            .position(|e| e.feeds(&edge.target, edge.target_port.as_deref()))
            .map(|index| self.edges.remove(index));
        self.edges.push(edge);
        Ok(replaced)
    }

    pub fn remove_edge(&mut self, id: &str) -> Result<Edge, GraphError> {
        let index = self
            .edges
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| GraphError::UnknownEdge(id.to_string()))?;
        Ok(self.edges.remove(index))
    }

    pub fn incoming<'a>(&'a self, target: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.target == target)
    }

    pub fn outgoing<'a>(&'a self, source: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.source == source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_abc() -> NodeGraph {
        NodeGraph::from_parts(
            vec![Node::new("a", "solid_color"), Node::new("b", "gaussian_blur"), Node::new("c", "preview_output")],
            vec![Edge::new("a", "b").with_id("e1"), Edge::new("b", "c").with_id("e2")],
        )
        .unwrap()
    }

    #[test]
    fn test_second_edge_into_same_port_replaces_first() {
        let mut graph = NodeGraph::from_parts(
            vec![Node::new("a", "k"), Node::new("b", "k"), Node::new("c", "k")],
            vec![],
        )
        .unwrap();
        graph.add_edge(Edge::new("a", "c").to_port("image").with_id("first")).unwrap();
        let replaced = graph
            .add_edge(Edge::new("b", "c").to_port("image").with_id("second"))
            .unwrap();

        assert_eq!(replaced.map(|e| e.id), Some("first".to_string()));
        let incoming: Vec<_> = graph.incoming("c").map(|e| e.source.as_str()).collect();
        assert_eq!(incoming, vec!["b"]);
    }

    #[test]
    fn test_different_ports_coexist() {
        let mut graph = NodeGraph::from_parts(
            vec![Node::new("a", "k"), Node::new("b", "k"), Node::new("c", "blend")],
            vec![],
        )
        .unwrap();
        graph.add_edge(Edge::new("a", "c").to_port("base")).unwrap();
        assert!(graph.add_edge(Edge::new("b", "c").to_port("blend")).unwrap().is_none());
        assert_eq!(graph.incoming("c").count(), 2);
    }

    #[test]
    fn test_invalid_edges_are_rejected() {
        let mut graph = graph_abc();
        assert_eq!(
            graph.add_edge(Edge::new("a", "a")),
            Err(GraphError::SelfConnection("a".into()))
        );
        assert_eq!(
            graph.add_edge(Edge::new("a", "zz")),
            Err(GraphError::UnknownNode("zz".into()))
        );
        assert!(matches!(graph.add_node(Node::new("a", "k")), Err(GraphError::DuplicateNode(_))));
    }

    #[test]
    fn test_remove_node_drops_its_edges() {
        let mut graph = graph_abc();
        let (node, removed) = graph.remove_node("b").unwrap();
        assert_eq!(node.id, "b");
        assert_eq!(removed.len(), 2);
        assert!(graph.edges().is_empty());
        assert_eq!(graph.nodes().len(), 2);
    }

    #[test]
    fn test_remove_edge_by_id() {
        let mut graph = graph_abc();
        assert_eq!(graph.remove_edge("e1").unwrap().target, "b");
        assert!(matches!(graph.remove_edge("e1"), Err(GraphError::UnknownEdge(_))));
        assert_eq!(graph.outgoing("b").count(), 1);
    }

    #[test]
    fn test_graph_deserializes_with_optional_fields() {
        let json = r#"{
            "nodes": [{ "id": "a", "kind": "solid_color" }, { "id": "b", "kind": "preview_output" }],
            "edges": [{ "id": "e", "source": "a", "target": "b", "target_port": "image" }]
        }"#;
        let graph: NodeGraph = serde_json::from_str(json).unwrap();
        assert_eq!(graph.edges()[0].source_port, None);
        assert!(graph.node("a").unwrap().parameters.is_empty());
    }
}
