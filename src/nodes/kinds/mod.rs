//! Built-in node kinds, grouped by category

pub mod adjust;
pub mod composite;
pub mod filter;
pub mod input;
pub mod output;
pub mod transform;

use super::registry::{NodeKindRegistry, PortSpec};
use super::value::{DataType, NodeInputs};
use crate::gpu::OutputSize;

pub use adjust::{BrightnessContrastNode, HslNode};
pub use composite::{BlendMode, BlendNode};
pub use filter::GaussianBlurNode;
pub use input::{ImageImportNode, SolidColorNode};
pub use output::{ExportSettings, ImageExportNode, PreviewOutputNode};
pub use transform::FlipNode;

pub fn register_builtins(registry: &mut NodeKindRegistry) {
    registry.register(SolidColorNode);
    registry.register(ImageImportNode);
    registry.register(BrightnessContrastNode);
    registry.register(HslNode);
    registry.register(GaussianBlurNode);
    registry.register(BlendNode);
    registry.register(FlipNode);
    registry.register(PreviewOutputNode);
    registry.register(ImageExportNode);
}

fn image_in() -> PortSpec {
    PortSpec::required("image", "Image", DataType::Image)
}

fn mask_in() -> PortSpec {
    PortSpec::optional("mask", "Mask", DataType::Mask)
}

fn image_out() -> PortSpec {
    PortSpec::required("image", "Image", DataType::Image)
}

/// Size of an input image, when it has one
fn input_size(inputs: &NodeInputs, port: &str) -> Option<OutputSize> {
    inputs
        .get(port)
        .and_then(|value| value.as_image())
        .and_then(|image| image.size())
}
