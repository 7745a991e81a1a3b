//! Error types shared by the graph, the engine and the GPU layer

use crate::gpu::{PixelFormat, TextureId};

pub type GpuResult<T> = Result<T, GpuError>;

/// Structural errors raised while editing a graph
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("node already exists: {0}")]
    DuplicateNode(String),

    #[error("cannot connect node {0} to itself")]
    SelfConnection(String),

    #[error("unknown edge: {0}")]
    UnknownEdge(String),

    #[error("cycle detected involving node {0}")]
    Cycle(String),
}

/// Failures from shader, texture and render-target management
#[derive(thiserror::Error, Debug)]
pub enum GpuError {
    #[error("{stage} shader compilation failed:\n{log}")]
    ShaderCompile { stage: &'static str, log: String },

    #[error("program '{name}' failed to link: {log}")]
    ProgramLink { name: String, log: String },

    #[error("program not found: {0}")]
    ProgramNotFound(String),

    #[error("framebuffer {width}x{height} ({format:?}) incomplete: {reason}")]
    IncompleteFramebuffer {
        width: u32,
        height: u32,
        format: PixelFormat,
        reason: String,
    },

    #[error("texture not found: {0:?}")]
    TextureNotFound(TextureId),

    #[error("invalid pixel data: {0}")]
    InvalidPixelData(String),

    #[error("uniform '{name}' does not match the shader declaration: {reason}")]
    UniformMismatch { name: String, reason: String },

    #[error("gpu device unavailable: {0}")]
    Device(String),

    #[error("pixel readback failed: {0}")]
    Readback(String),

    #[error("image encoding failed: {0}")]
    Encode(String),

    #[error("gpu context has been disposed")]
    Disposed,
}

impl GpuError {
    pub fn invalid_pixels(msg: impl Into<String>) -> Self {
        Self::InvalidPixelData(msg.into())
    }

    pub fn device(msg: impl Into<String>) -> Self {
        Self::Device(msg.into())
    }

    pub fn readback(msg: impl Into<String>) -> Self {
        Self::Readback(msg.into())
    }

    pub fn link(name: &str, log: impl Into<String>) -> Self {
        Self::ProgramLink {
            name: name.to_string(),
            log: log.into(),
        }
    }
}

/// Errors a node kind reports from `execute`
#[derive(thiserror::Error, Debug)]
pub enum NodeError {
    #[error(transparent)]
    Gpu(#[from] GpuError),

    #[error("invalid parameter '{key}': {reason}")]
    InvalidParameter { key: String, reason: String },

    #[error("unknown node kind: {0}")]
    UnknownKind(String),

    #[error("failed to load image '{path}': {reason}")]
    ImageLoad { path: String, reason: String },

    #[error("execution suspended after {0} consecutive failures")]
    Suspended(u32),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("{0}")]
    Failed(String),
}

impl NodeError {
    pub fn invalid_parameter(key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_prefixes_are_stable() {
        assert!(GraphError::Cycle("a".into()).to_string().contains("cycle detected"));
        assert!(GpuError::ProgramNotFound("blur".into())
            .to_string()
            .contains("program not found: blur"));
        assert!(NodeError::invalid_parameter("radius", "negative")
            .to_string()
            .contains("invalid parameter 'radius'"));
    }

    #[test]
    fn test_gpu_error_converts_into_node_error() {
        let err: NodeError = GpuError::readback("map failed").into();
        assert!(matches!(err, NodeError::Gpu(GpuError::Readback(_))));
        assert!(err.to_string().contains("map failed"));
    }

    #[test]
    fn test_shader_compile_error_carries_log() {
        let err = GpuError::ShaderCompile {
            stage: "fragment",
            log: "expected ';'".into(),
        };
        let text = err.to_string();
        assert!(text.starts_with("fragment shader compilation failed"));
        assert!(text.contains("expected ';'"));
    }
}
