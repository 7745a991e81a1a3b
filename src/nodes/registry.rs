//! Node kind registry with rich metadata
//!
//! A node kind is a named operator: its declared ports and parameters plus an
//! `execute` function run by the engine. Kinds are registered once and looked
//! up by the `kind` string stored on each graph node.

use std::collections::BTreeMap;

use log::{debug, warn};
use serde::Serialize;
use serde_json::{json, Value};

use super::kinds;
use super::params::Parameters;
use super::value::{DataType, ImageValue, NodeInputs, NodeOutputs, OutputValue};
use crate::error::{GpuResult, NodeError};
use crate::gpu::{GpuContext, OutputSize, TextureId, Uniforms};

/// Hierarchical category used to group kinds in a library
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeCategory {
    path: Vec<String>,
}

impl NodeCategory {
    pub fn new(path: &[&str]) -> Self {
        Self {
            path: path.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Last path component
    pub fn name(&self) -> &str {
        self.path.last().map(|s| s.as_str()).unwrap_or("")
    }

    pub fn parent(&self) -> Option<NodeCategory> {
        (self.path.len() > 1).then(|| NodeCategory {
            path: self.path[..self.path.len() - 1].to_vec(),
        })
    }

    pub fn is_child_of(&self, other: &NodeCategory) -> bool {
        self.path.len() > other.path.len() && self.path[..other.path.len()] == other.path
    }

    pub fn display_string(&self) -> String {
        self.path.join(" > ")
    }
}

// Standard categories
impl NodeCategory {
    pub fn input() -> Self {
        Self::new(&["Input"])
    }
    pub fn adjust() -> Self {
        Self::new(&["Adjust"])
    }
    pub fn filter() -> Self {
        Self::new(&["Filter"])
    }
    pub fn composite() -> Self {
        Self::new(&["Composite"])
    }
    pub fn transform() -> Self {
        Self::new(&["Transform"])
    }
    pub fn output() -> Self {
        Self::new(&["Output"])
    }
}

/// Declared input or output port
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortSpec {
    pub key: &'static str,
    pub label: &'static str,
    pub data_type: DataType,
    pub required: bool,
}

impl PortSpec {
    pub fn required(key: &'static str, label: &'static str, data_type: DataType) -> Self {
        Self {
            key,
            label,
            data_type,
            required: true,
        }
    }

    pub fn optional(key: &'static str, label: &'static str, data_type: DataType) -> Self {
        Self {
            key,
            label,
            data_type,
            required: false,
        }
    }
}

/// Editor control hint for a parameter
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "control", rename_all = "snake_case")]
pub enum ParamControl {
    Slider { min: f64, max: f64, step: f64 },
    Number { min: Option<f64>, max: Option<f64> },
    Select { options: Vec<&'static str> },
    Color,
    Checkbox,
    Text,
    File { accept: &'static str },
}

/// Declared parameter with its default value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamSpec {
    pub key: &'static str,
    pub label: &'static str,
    pub control: ParamControl,
    pub default: Value,
}

impl ParamSpec {
    pub fn slider(key: &'static str, label: &'static str, min: f64, max: f64, step: f64, default: f64) -> Self {
        Self {
            key,
            label,
            control: ParamControl::Slider { min, max, step },
            default: json!(default),
        }
    }

    pub fn number(key: &'static str, label: &'static str, min: Option<f64>, max: Option<f64>, default: f64) -> Self {
        Self {
            key,
            label,
            control: ParamControl::Number { min, max },
            default: json!(default),
        }
    }

    pub fn select(key: &'static str, label: &'static str, options: &[&'static str], default: &str) -> Self {
        Self {
            key,
            label,
            control: ParamControl::Select {
                options: options.to_vec(),
            },
            default: json!(default),
        }
    }

    pub fn color(key: &'static str, label: &'static str, default: Value) -> Self {
        Self {
            key,
            label,
            control: ParamControl::Color,
            default,
        }
    }

    pub fn checkbox(key: &'static str, label: &'static str, default: bool) -> Self {
        Self {
            key,
            label,
            control: ParamControl::Checkbox,
            default: json!(default),
        }
    }

    pub fn text(key: &'static str, label: &'static str, default: &str) -> Self {
        Self {
            key,
            label,
            control: ParamControl::Text,
            default: json!(default),
        }
    }

    pub fn file(key: &'static str, label: &'static str, accept: &'static str) -> Self {
        Self {
            key,
            label,
            control: ParamControl::File { accept },
            default: json!(""),
        }
    }
}

/// Everything the engine and an editor need to know about a kind
#[derive(Debug, Clone, Serialize)]
pub struct NodeMetadata {
    pub kind: &'static str,
    pub name: &'static str,
    pub category: NodeCategory,
    pub description: &'static str,
    pub inputs: Vec<PortSpec>,
    pub outputs: Vec<PortSpec>,
    pub parameters: Vec<ParamSpec>,
}

impl NodeMetadata {
    pub fn new(kind: &'static str, name: &'static str, category: NodeCategory, description: &'static str) -> Self {
        Self {
            kind,
            name,
            category,
            description,
            inputs: vec![],
            outputs: vec![],
            parameters: vec![],
        }
    }

    pub fn with_inputs(mut self, inputs: Vec<PortSpec>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_outputs(mut self, outputs: Vec<PortSpec>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn with_parameters(mut self, parameters: Vec<ParamSpec>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn input(&self, key: &str) -> Option<&PortSpec> {
        self.inputs.iter().find(|p| p.key == key)
    }

    pub fn output(&self, key: &str) -> Option<&PortSpec> {
        self.outputs.iter().find(|p| p.key == key)
    }

    /// Resolve an edge's input port, `None` meaning the first declared input
    pub fn resolve_input<'a>(&'a self, port: Option<&'a str>) -> Option<&'a str> {
        port.or_else(|| self.inputs.first().map(|p| p.key))
    }

    /// Resolve an edge's output port, `None` meaning the first declared output
    pub fn resolve_output<'a>(&'a self, port: Option<&'a str>) -> Option<&'a str> {
        port.or_else(|| self.outputs.first().map(|p| p.key))
    }

    pub fn default_parameters(&self) -> Parameters {
        self.parameters
            .iter()
            .map(|p| (p.key.to_string(), p.default.clone()))
            .collect()
    }
}

/// Everything a kind sees while executing one node
pub struct ExecutionContext<'a> {
    pub node_id: &'a str,
    pub inputs: &'a NodeInputs,
    /// Node parameters with declared defaults filled in
    pub parameters: &'a Parameters,
    pub gpu: &'a mut dyn GpuContext,
    pub output_size: OutputSize,
}

impl ExecutionContext<'_> {
    /// A connected input that actually carries a texture
    pub fn image(&self, port: &str) -> Option<&ImageValue> {
        self.inputs
            .get(port)
            .and_then(OutputValue::as_image)
            .filter(|image| image.is_present())
    }

    pub fn texture(&self, port: &str) -> Option<TextureId> {
        self.image(port).and_then(|image| image.texture)
    }

    /// Run `program` at the node's output size
    pub fn render(&mut self, program: &str, uniforms: &Uniforms) -> GpuResult<TextureId> {
        self.gpu.render_shader(program, uniforms, self.output_size)
    }
}

/// Single-port image output map
pub fn image_output(port: &str, image: ImageValue) -> NodeOutputs {
    NodeOutputs::from([(port.to_string(), OutputValue::Image(image))])
}

/// Uniform execution contract for node kinds
pub trait NodeKind {
    fn metadata(&self) -> NodeMetadata;

    /// Size of the render target, when the kind decides it
    fn output_size(&self, _inputs: &NodeInputs, _parameters: &Parameters) -> Option<OutputSize> {
        None
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<NodeOutputs, NodeError>;
}

struct RegisteredKind {
    metadata: NodeMetadata,
    kind: Box<dyn NodeKind>,
}

/// Registry of node kinds keyed by kind name
#[derive(Default)]
pub struct NodeKindRegistry {
    kinds: BTreeMap<String, RegisteredKind>,
}

impl NodeKindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with every built-in kind
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        kinds::register_builtins(&mut registry);
        registry
    }

    /// Register a kind, replacing any earlier kind with the same name
    pub fn register<K: NodeKind + 'static>(&mut self, kind: K) {
        let metadata = kind.metadata();
        let name = metadata.kind.to_string();
        if self.kinds.contains_key(&name) {
            warn!("Node kind '{}' is already registered, overwriting", name);
        }
        debug!("Registered node kind: {}", name);
        self.kinds.insert(
            name,
            RegisteredKind {
                metadata,
                kind: Box::new(kind),
            },
        );
    }

    pub fn get(&self, kind: &str) -> Option<&dyn NodeKind> {
        self.kinds.get(kind).map(|entry| entry.kind.as_ref())
    }

    pub fn metadata(&self, kind: &str) -> Option<&NodeMetadata> {
        self.kinds.get(kind).map(|entry| &entry.metadata)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }

    /// Kinds in `category` or any of its subcategories
    pub fn by_category(&self, category: &NodeCategory) -> Vec<&NodeMetadata> {
        self.all()
            .into_iter()
            .filter(|m| m.category == *category || m.category.is_child_of(category))
            .collect()
    }

    /// Distinct categories in sorted order
    pub fn categories(&self) -> Vec<&NodeCategory> {
        let mut categories: Vec<&NodeCategory> = self.kinds.values().map(|e| &e.metadata.category).collect();
        categories.sort();
        categories.dedup();
        categories
    }

    /// Metadata of every kind, ordered by kind name
    pub fn all(&self) -> Vec<&NodeMetadata> {
        self.kinds.values().map(|entry| &entry.metadata).collect()
    }

    pub fn kind_names(&self) -> Vec<&str> {
        self.kinds.keys().map(String::as_str).collect()
    }

    /// Declared defaults of a kind, empty for unknown kinds
    pub fn default_parameters(&self, kind: &str) -> Parameters {
        self.metadata(kind)
            .map(NodeMetadata::default_parameters)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}
