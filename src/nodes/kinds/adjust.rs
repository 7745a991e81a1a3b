//! Per-pixel colour adjustments

use super::{image_in, image_out, mask_in};
use crate::error::NodeError;
use crate::gpu::Uniforms;
use crate::nodes::params::f32_clamped;
use crate::nodes::registry::{image_output, ExecutionContext, NodeCategory, NodeKind, NodeMetadata, ParamSpec};
use crate::nodes::value::{ImageValue, NodeOutputs};

/// Absent output at the node's size, for when there is nothing to adjust
fn passthrough_absent(ctx: &ExecutionContext<'_>) -> NodeOutputs {
    image_output("image", ImageValue::absent(ctx.output_size))
}

/// Bind the optional mask input, flagging whether one is present
fn with_mask(uniforms: Uniforms, ctx: &ExecutionContext<'_>) -> Uniforms {
    let mask = ctx.texture("mask");
    uniforms
        .texture("u_mask", mask)
        .float("u_has_mask", if mask.is_some() { 1.0 } else { 0.0 })
}

pub struct BrightnessContrastNode;

impl NodeKind for BrightnessContrastNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new(
            "brightness_contrast",
            "Brightness / Contrast",
            NodeCategory::adjust(),
            "Shifts brightness and scales contrast around mid-gray",
        )
        .with_inputs(vec![image_in(), mask_in()])
        .with_outputs(vec![image_out()])
        .with_parameters(vec![
            ParamSpec::slider("brightness", "Brightness", -1.0, 1.0, 0.01, 0.0),
            ParamSpec::slider("contrast", "Contrast", 0.0, 3.0, 0.01, 1.0),
        ])
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<NodeOutputs, NodeError> {
        let Some(source) = ctx.texture("image") else {
            return Ok(passthrough_absent(ctx));
        };
        let uniforms = Uniforms::new()
            .texture("u_texture", Some(source))
            .float("u_brightness", f32_clamped(ctx.parameters, "brightness", 0.0, -1.0, 1.0))
            .float("u_contrast", f32_clamped(ctx.parameters, "contrast", 1.0, 0.0, 3.0));
        let uniforms = with_mask(uniforms, ctx);
        let texture = ctx.render("brightness_contrast", &uniforms)?;
        Ok(image_output("image", ImageValue::new(texture, ctx.output_size)))
    }
}

/// Hue rotation plus saturation and lightness offsets
pub struct HslNode;

impl NodeKind for HslNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new("hsl", "Hue / Saturation / Lightness", NodeCategory::adjust(), "Adjusts colours in HSL space")
            .with_inputs(vec![image_in()])
            .with_outputs(vec![image_out()])
            .with_parameters(vec![
                ParamSpec::slider("hue", "Hue", -180.0, 180.0, 1.0, 0.0),
                ParamSpec::slider("saturation", "Saturation", -1.0, 1.0, 0.01, 0.0),
                ParamSpec::slider("lightness", "Lightness", -1.0, 1.0, 0.01, 0.0),
            ])
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<NodeOutputs, NodeError> {
        let Some(source) = ctx.texture("image") else {
            return Ok(passthrough_absent(ctx));
        };
        let uniforms = Uniforms::new()
            .texture("u_texture", Some(source))
            .float("u_hue", f32_clamped(ctx.parameters, "hue", 0.0, -180.0, 180.0))
            .float("u_saturation", f32_clamped(ctx.parameters, "saturation", 0.0, -1.0, 1.0))
            .float("u_lightness", f32_clamped(ctx.parameters, "lightness", 0.0, -1.0, 1.0));
        let texture = ctx.render("hsl", &uniforms)?;
        Ok(image_output("image", ImageValue::new(texture, ctx.output_size)))
    }
}
