//! Source nodes: solid fills and decoded image files

use glam::Vec4;
use log::debug;
use serde_json::json;

use super::image_out;
use crate::error::NodeError;
use crate::gpu::{OutputSize, PixelSource, UploadOptions, Uniforms};
use crate::nodes::params::{color_or, str_or, u32_or, Parameters};
use crate::nodes::registry::{image_output, ExecutionContext, NodeCategory, NodeKind, NodeMetadata, ParamSpec};
use crate::nodes::value::{ImageValue, NodeInputs, NodeOutputs};

const MAX_CANVAS: u32 = 8192;
const DEFAULT_FILL: Vec4 = Vec4::new(0.5, 0.5, 0.5, 1.0);

/// Fills the whole target with one colour
pub struct SolidColorNode;

impl NodeKind for SolidColorNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new("solid_color", "Solid Color", NodeCategory::input(), "Fills an image with a single colour")
            .with_outputs(vec![image_out()])
            .with_parameters(vec![
                ParamSpec::color("color", "Color", json!({ "r": 0.5, "g": 0.5, "b": 0.5, "a": 1.0 })),
                ParamSpec::number("width", "Width", Some(1.0), Some(MAX_CANVAS as f64), 1920.0),
                ParamSpec::number("height", "Height", Some(1.0), Some(MAX_CANVAS as f64), 1080.0),
            ])
    }

    fn output_size(&self, _inputs: &NodeInputs, parameters: &Parameters) -> Option<OutputSize> {
        let width = u32_or(parameters, "width", 1920).clamp(1, MAX_CANVAS);
        let height = u32_or(parameters, "height", 1080).clamp(1, MAX_CANVAS);
        Some(OutputSize::new(width, height))
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<NodeOutputs, NodeError> {
        let color = color_or(ctx.parameters, "color", DEFAULT_FILL);
        let texture = ctx.render("solid_color", &Uniforms::new().vec4("u_color", color))?;
        Ok(image_output("image", ImageValue::new(texture, ctx.output_size)))
    }
}

/// Decodes an image file and keeps it in the texture pool under a per-node name
pub struct ImageImportNode;

impl ImageImportNode {
    pub fn pool_name(node_id: &str) -> String {
        format!("image_import:{node_id}")
    }
}

impl NodeKind for ImageImportNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new("image_import", "Image Import", NodeCategory::input(), "Loads an image from disk")
            .with_outputs(vec![image_out()])
            .with_parameters(vec![ParamSpec::file("filePath", "File", "image/png,image/jpeg")])
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<NodeOutputs, NodeError> {
        let path = str_or(ctx.parameters, "filePath", "").trim();
        if path.is_empty() {
            return Ok(image_output("image", ImageValue::default()));
        }

        let decoded = image::open(path)
            .map_err(|e| NodeError::ImageLoad {
                path: path.to_string(),
                reason: e.to_string(),
            })?
            .to_rgba8();
        debug!("Decoded {} ({}x{})", path, decoded.width(), decoded.height());

        let texture = ctx.gpu.upload_texture(
            &PixelSource::from_image(&decoded),
            &UploadOptions::named(Self::pool_name(ctx.node_id)),
        )?;
        let size = OutputSize::new(decoded.width(), decoded.height());
        Ok(image_output("image", ImageValue::new(texture, size)))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{first_pixel, gpu, run};
    use super::*;
    use crate::gpu::GpuContext;

    #[test]
    fn test_solid_color_uses_params_for_size() {
        let mut gpu = gpu();
        let outputs = run(
            &SolidColorNode,
            &mut gpu,
            NodeInputs::new(),
            json!({ "color": { "r": 1.0, "g": 0.0, "b": 0.0, "a": 1.0 }, "width": 8, "height": 4 }),
        )
        .unwrap();
        let image = outputs["image"].as_image().unwrap();
        assert_eq!((image.width, image.height), (8, 4));
        assert_eq!(first_pixel(&mut gpu, &outputs), [255, 0, 0, 255]);
    }

    #[test]
    fn test_solid_color_defaults_to_gray_canvas() {
        let size = SolidColorNode.output_size(&NodeInputs::new(), &SolidColorNode.metadata().default_parameters());
        assert_eq!(size, Some(OutputSize::DEFAULT_CANVAS));
    }

    #[test]
    fn test_import_without_path_is_absent() {
        let mut gpu = gpu();
        let outputs = run(&ImageImportNode, &mut gpu, NodeInputs::new(), json!({})).unwrap();
        assert!(!outputs["image"].as_image().unwrap().is_present());
    }

    #[test]
    fn test_import_missing_file_fails() {
        let mut gpu = gpu();
        let result = run(
            &ImageImportNode,
            &mut gpu,
            NodeInputs::new(),
            json!({ "filePath": "/nonexistent/pixelgraph/none.png" }),
        );
        assert!(matches!(result, Err(NodeError::ImageLoad { .. })));
    }

    #[test]
    fn test_import_decodes_and_pools_by_node() {
        let path = std::env::temp_dir().join(format!("pixelgraph-import-{}.png", uuid::Uuid::new_v4()));
        image::RgbaImage::from_pixel(3, 2, image::Rgba([10, 20, 30, 255]))
            .save(&path)
            .unwrap();

        let mut gpu = gpu();
        let params = json!({ "filePath": path.to_string_lossy() });
        let first = run(&ImageImportNode, &mut gpu, NodeInputs::new(), params.clone()).unwrap();
        let second = run(&ImageImportNode, &mut gpu, NodeInputs::new(), params).unwrap();
        std::fs::remove_file(&path).ok();

        let image = first["image"].as_image().unwrap();
        assert_eq!((image.width, image.height), (3, 2));
        assert_eq!(first["image"].texture(), second["image"].texture());
        let info = gpu.texture_info(image.texture.unwrap()).unwrap();
        assert_eq!(info.name.as_deref(), Some("image_import:test"));
        assert_eq!(first_pixel(&mut gpu, &first), [10, 20, 30, 255]);
    }
}
