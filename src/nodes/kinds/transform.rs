//! Geometric transforms

use glam::Vec2;

use super::{image_in, image_out, input_size};
use crate::error::NodeError;
use crate::gpu::{OutputSize, Uniforms};
use crate::nodes::params::{bool_or, Parameters};
use crate::nodes::registry::{image_output, ExecutionContext, NodeCategory, NodeKind, NodeMetadata, ParamSpec};
use crate::nodes::value::{ImageValue, NodeInputs, NodeOutputs};

pub struct FlipNode;

impl NodeKind for FlipNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new("flip", "Flip", NodeCategory::transform(), "Mirrors an image horizontally and/or vertically")
            .with_inputs(vec![image_in()])
            .with_outputs(vec![image_out()])
            .with_parameters(vec![
                ParamSpec::checkbox("horizontal", "Horizontal", false),
                ParamSpec::checkbox("vertical", "Vertical", false),
            ])
    }

    fn output_size(&self, inputs: &NodeInputs, _parameters: &Parameters) -> Option<OutputSize> {
        input_size(inputs, "image")
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<NodeOutputs, NodeError> {
        let Some(source) = ctx.texture("image") else {
            return Ok(image_output("image", ImageValue::absent(ctx.output_size)));
        };
        let axes = Vec2::new(
            if bool_or(ctx.parameters, "horizontal", false) { 1.0 } else { 0.0 },
            if bool_or(ctx.parameters, "vertical", false) { 1.0 } else { 0.0 },
        );
        let uniforms = Uniforms::new().texture("u_texture", Some(source)).vec2("u_flip", axes);
        let texture = ctx.render("flip", &uniforms)?;
        Ok(image_output("image", ImageValue::new(texture, ctx.output_size)))
    }
}
