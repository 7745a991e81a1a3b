//! Convolution filters

use glam::Vec2;

use super::{image_in, image_out, input_size, mask_in};
use crate::error::NodeError;
use crate::gpu::{OutputSize, Uniforms};
use crate::nodes::params::{f32_clamped, Parameters};
use crate::nodes::registry::{image_output, ExecutionContext, NodeCategory, NodeKind, NodeMetadata, ParamSpec};
use crate::nodes::value::{ImageValue, NodeInputs, NodeOutputs};

pub const MAX_BLUR_RADIUS: f32 = 50.0;

/// Separable gaussian blur, horizontal pass then vertical pass.
/// The optional mask blends the blurred result back over the source.
pub struct GaussianBlurNode;

impl NodeKind for GaussianBlurNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new("gaussian_blur", "Gaussian Blur", NodeCategory::filter(), "Softens an image")
            .with_inputs(vec![image_in(), mask_in()])
            .with_outputs(vec![image_out()])
            .with_parameters(vec![ParamSpec::slider("radius", "Radius", 0.0, MAX_BLUR_RADIUS as f64, 0.5, 5.0)])
    }

    fn output_size(&self, inputs: &NodeInputs, _parameters: &Parameters) -> Option<OutputSize> {
        input_size(inputs, "image")
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<NodeOutputs, NodeError> {
        let Some(source) = ctx.texture("image") else {
            return Ok(image_output("image", ImageValue::absent(ctx.output_size)));
        };
        let radius = f32_clamped(ctx.parameters, "radius", 5.0, 0.0, MAX_BLUR_RADIUS);
        if radius <= 0.0 {
            let texture = ctx.render("copy_texture", &Uniforms::new().texture("u_texture", Some(source)))?;
            return Ok(image_output("image", ImageValue::new(texture, ctx.output_size)));
        }

        let size = ctx.output_size;
        let horizontal = Uniforms::new()
            .texture("u_texture", Some(source))
            .texture("u_original", Some(source))
            .texture("u_mask", None)
            .vec2("u_direction", Vec2::new(1.0 / size.width as f32, 0.0))
            .float("u_radius", radius)
            .float("u_has_mask", 0.0);
        let first_pass = ctx.render("gaussian_blur", &horizontal)?;

        let mask = ctx.texture("mask");
        let vertical = Uniforms::new()
            .texture("u_texture", Some(first_pass))
            .texture("u_original", Some(source))
            .texture("u_mask", mask)
            .vec2("u_direction", Vec2::new(0.0, 1.0 / size.height as f32))
            .float("u_radius", radius)
            .float("u_has_mask", if mask.is_some() { 1.0 } else { 0.0 });
        let texture = ctx.render("gaussian_blur", &vertical)?;
        Ok(image_output("image", ImageValue::new(texture, size)))
    }
}
