//! Terminal nodes read by the preview and export collaborators

use super::{image_in, image_out, input_size};
use crate::error::NodeError;
use crate::gpu::{ExportFormat, OutputSize, Uniforms};
use crate::nodes::params::{f32_clamped, str_or, Parameters};
use crate::nodes::registry::{image_output, ExecutionContext, NodeCategory, NodeKind, NodeMetadata, ParamSpec};
use crate::nodes::value::{ImageValue, NodeInputs, NodeOutputs};

/// Marks the image shown in the preview, optionally downscaled
pub struct PreviewOutputNode;

impl PreviewOutputNode {
    /// Size the preview is shown at for `resolution` ("720", "1080", "1440" or "full")
    pub fn preview_size(input: OutputSize, resolution: &str) -> OutputSize {
        let Ok(max) = resolution.parse::<u32>() else {
            return input;
        };
        if input.is_empty() || max == 0 {
            return input;
        }
        let scale = (max as f32 / input.width as f32)
            .min(max as f32 / input.height as f32)
            .min(1.0);
        OutputSize::new(
            ((input.width as f32 * scale).floor() as u32).max(1),
            ((input.height as f32 * scale).floor() as u32).max(1),
        )
    }
}

impl NodeKind for PreviewOutputNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new("preview_output", "Preview", NodeCategory::output(), "Shows its input in the preview")
            .with_inputs(vec![image_in()])
            .with_outputs(vec![image_out()])
            .with_parameters(vec![ParamSpec::select(
                "previewResolution",
                "Resolution",
                &["720", "1080", "1440", "full"],
                "1080",
            )])
    }

    fn output_size(&self, inputs: &NodeInputs, _parameters: &Parameters) -> Option<OutputSize> {
        input_size(inputs, "image")
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<NodeOutputs, NodeError> {
        let Some(input) = ctx.image("image").cloned() else {
            return Ok(image_output("image", ImageValue::absent(ctx.output_size)));
        };
        let Some(source) = input.texture else {
            return Ok(image_output("image", ImageValue::absent(ctx.output_size)));
        };
        let input_size = input.size().unwrap_or(ctx.output_size);
        let target = Self::preview_size(input_size, str_or(ctx.parameters, "previewResolution", "full"));
        if target == input_size {
            return Ok(image_output("image", ImageValue::new(source, input_size)));
        }

        let uniforms = Uniforms::new().texture("u_texture", Some(source));
        let texture = ctx.gpu.render_shader("copy_texture", &uniforms, target)?;
        Ok(image_output("image", ImageValue::new(texture, target)))
    }
}

/// Encoder settings carried by an export node
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSettings {
    pub format: ExportFormat,
    pub file_name: String,
}

impl ExportSettings {
    pub fn from_parameters(parameters: &Parameters) -> Self {
        let quality = f32_clamped(parameters, "quality", 0.92, 0.1, 1.0);
        let format = ExportFormat::from_name(str_or(parameters, "format", "png"), quality);
        let file_name = str_or(parameters, "fileName", "output").trim();
        Self {
            format,
            file_name: if file_name.is_empty() { "output" } else { file_name }.to_string(),
        }
    }

    /// File name with the encoder's extension appended
    pub fn file_name_with_extension(&self) -> String {
        format!("{}.{}", self.file_name, self.format.extension())
    }
}

/// Pass-through node whose parameters describe how to encode its input
pub struct ImageExportNode;

impl NodeKind for ImageExportNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new("image_export", "Image Export", NodeCategory::output(), "Marks an image for export")
            .with_inputs(vec![image_in()])
            .with_outputs(vec![image_out()])
            .with_parameters(vec![
                ParamSpec::select("format", "Format", &["png", "jpeg"], "png"),
                ParamSpec::slider("quality", "Quality", 0.1, 1.0, 0.01, 0.92),
                ParamSpec::text("fileName", "File Name", "output"),
            ])
    }

    fn output_size(&self, inputs: &NodeInputs, _parameters: &Parameters) -> Option<OutputSize> {
        input_size(inputs, "image")
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<NodeOutputs, NodeError> {
        let image = match ctx.image("image") {
            Some(image) => image.clone(),
            None => ImageValue::absent(ctx.output_size),
        };
        Ok(image_output("image", image))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{flat_image, gpu, run};
    use super::*;
    use serde_json::json;

    #[test]
    fn test_preview_size_scales_down_only() {
        let hd = OutputSize::new(1920, 1080);
        assert_eq!(PreviewOutputNode::preview_size(hd, "720"), OutputSize::new(720, 405));
        assert_eq!(PreviewOutputNode::preview_size(hd, "1080"), OutputSize::new(1080, 607));
        assert_eq!(PreviewOutputNode::preview_size(hd, "full"), hd);
        let small = OutputSize::new(64, 32);
        assert_eq!(PreviewOutputNode::preview_size(small, "720"), small);
    }

    #[test]
    fn test_preview_passes_small_images_through() {
        let mut gpu = gpu();
        let image = flat_image(&mut gpu, OutputSize::new(4, 4), [1, 2, 3, 255]);
        let source = image.texture();
        let outputs = run(&PreviewOutputNode, &mut gpu, NodeInputs::from([("image".to_string(), image)]), json!({}))
            .unwrap();
        assert_eq!(outputs["image"].texture(), source);
        assert!(gpu.render_log().is_empty());
    }

    #[test]
    fn test_preview_downscales_large_images() {
        let mut gpu = gpu();
        let image = flat_image(&mut gpu, OutputSize::new(2000, 1000), [1, 2, 3, 255]);
        let outputs = run(
            &PreviewOutputNode,
            &mut gpu,
            NodeInputs::from([("image".to_string(), image)]),
            json!({ "previewResolution": "720" }),
        )
        .unwrap();
        assert_eq!(outputs["image"].as_image().unwrap().size(), Some(OutputSize::new(720, 360)));
        assert_eq!(gpu.render_log()[0].program, "copy_texture");
    }

    #[test]
    fn test_export_is_pass_through() {
        let mut gpu = gpu();
        let image = flat_image(&mut gpu, OutputSize::new(2, 2), [1, 2, 3, 255]);
        let outputs = run(&ImageExportNode, &mut gpu, NodeInputs::from([("image".to_string(), image.clone())]), json!({}))
            .unwrap();
        assert_eq!(outputs["image"], image);
    }

    #[test]
    fn test_export_settings_from_parameters() {
        let params: Parameters = serde_json::from_value(json!({
            "format": "jpeg", "quality": 0.5, "fileName": "final"
        }))
        .unwrap();
        let settings = ExportSettings::from_parameters(&params);
        assert_eq!(settings.format, ExportFormat::Jpeg { quality: 50 });
        assert_eq!(settings.file_name_with_extension(), "final.jpg");

        let defaults = ExportSettings::from_parameters(&ImageExportNode.metadata().default_parameters());
        assert_eq!(defaults.format, ExportFormat::Png);
        assert_eq!(defaults.file_name_with_extension(), "output.png");
    }
}
