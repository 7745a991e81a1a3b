//! pixelgraph core library
//!
//! An incremental node-graph engine for image compositing. Edits mark nodes
//! dirty, a debounced batch re-executes the minimal set of nodes in dependency
//! order, and every node renders through a [`gpu::GpuContext`].

pub mod error;
pub mod gpu;
pub mod nodes;

pub use error::{GpuError, GraphError, NodeError};
pub use gpu::{GpuConfig, GpuContext, MemoryGpu, OutputSize, TextureId, WgpuContext};
pub use nodes::{Edge, EngineConfig, ExecutionEngine, ExecutionResult, Node, NodeKindRegistry};
