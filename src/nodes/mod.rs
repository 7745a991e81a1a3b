//! Node system - graph model, incremental execution and the built-in kinds

// Graph model and invalidation
pub mod graph;
pub mod dirty;
pub mod scheduler;

// Execution
pub mod cache;
pub mod debounce;
pub mod execution_engine;

// Kinds and the values they exchange
pub mod kinds;
pub mod params;
pub mod registry;
pub mod value;

pub use graph::{Edge, Node, NodeGraph, NodeId};
pub use dirty::{DirtyReason, DirtyTracker};
pub use scheduler::Schedule;

pub use cache::{CacheKey, CacheStatistics, ResultCache};
pub use execution_engine::{
    EngineConfig, ExecutionEngine, ExecutionResult, ExecutionStats, NodeState, RetryPolicy, Subscription,
};

pub use registry::{
    ExecutionContext, NodeCategory, NodeKind, NodeKindRegistry, NodeMetadata, ParamControl, ParamSpec, PortSpec,
};
pub use params::Parameters;
pub use value::{DataType, ImageValue, NodeInputs, NodeOutputs, OutputValue};
