//! Layer compositing

use log::warn;
use serde::{Deserialize, Serialize};

use super::{image_out, input_size, mask_in};
use crate::error::NodeError;
use crate::gpu::{OutputSize, Uniforms};
use crate::nodes::params::{f32_clamped, str_or, Parameters};
use crate::nodes::registry::{
    image_output, ExecutionContext, NodeCategory, NodeKind, NodeMetadata, ParamSpec, PortSpec,
};
use crate::nodes::value::{DataType, ImageValue, NodeInputs, NodeOutputs};

/// Blend modes in the order the blend program indexes them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    ColorDodge,
    ColorBurn,
    SoftLight,
    HardLight,
    Difference,
    Exclusion,
}

impl BlendMode {
    pub const ALL: [BlendMode; 12] = [
        BlendMode::Normal,
        BlendMode::Multiply,
        BlendMode::Screen,
        BlendMode::Overlay,
        BlendMode::Darken,
        BlendMode::Lighten,
        BlendMode::ColorDodge,
        BlendMode::ColorBurn,
        BlendMode::SoftLight,
        BlendMode::HardLight,
        BlendMode::Difference,
        BlendMode::Exclusion,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::Normal => "normal",
            BlendMode::Multiply => "multiply",
            BlendMode::Screen => "screen",
            BlendMode::Overlay => "overlay",
            BlendMode::Darken => "darken",
            BlendMode::Lighten => "lighten",
            BlendMode::ColorDodge => "color_dodge",
            BlendMode::ColorBurn => "color_burn",
            BlendMode::SoftLight => "soft_light",
            BlendMode::HardLight => "hard_light",
            BlendMode::Difference => "difference",
            BlendMode::Exclusion => "exclusion",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|mode| mode.name() == name)
    }

    /// Value of `u_mode` in the blend program
    pub fn index(&self) -> i32 {
        *self as i32
    }
}

pub struct BlendNode;

impl NodeKind for BlendNode {
    fn metadata(&self) -> NodeMetadata {
        let modes: Vec<&'static str> = BlendMode::ALL.iter().map(BlendMode::name).collect();
        NodeMetadata::new("blend", "Blend", NodeCategory::composite(), "Composites one image over another")
            .with_inputs(vec![
                PortSpec::required("base", "Base", DataType::Image),
                PortSpec::required("blend", "Blend", DataType::Image),
                mask_in(),
            ])
            .with_outputs(vec![image_out()])
            .with_parameters(vec![
                ParamSpec::select("mode", "Mode", &modes, "normal"),
                ParamSpec::slider("opacity", "Opacity", 0.0, 1.0, 0.01, 1.0),
            ])
    }

    /// Base size, falling back to the blend layer's
    fn output_size(&self, inputs: &NodeInputs, _parameters: &Parameters) -> Option<OutputSize> {
        input_size(inputs, "base").or_else(|| input_size(inputs, "blend"))
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<NodeOutputs, NodeError> {
        let Some(base) = ctx.texture("base") else {
            return Ok(image_output("image", ImageValue::absent(ctx.output_size)));
        };
        let top = ctx.texture("blend").unwrap_or(base);

        let mode_name = str_or(ctx.parameters, "mode", "normal");
        let mode = BlendMode::from_name(mode_name).unwrap_or_else(|| {
            warn!("Unknown blend mode '{}' on node {}, using normal", mode_name, ctx.node_id);
            BlendMode::Normal
        });
        let mask = ctx.texture("mask");

        let uniforms = Uniforms::new()
            .texture("u_base", Some(base))
            .texture("u_blend", Some(top))
            .texture("u_mask", mask)
            .int("u_mode", mode.index())
            .float("u_opacity", f32_clamped(ctx.parameters, "opacity", 1.0, 0.0, 1.0))
            .float("u_has_mask", if mask.is_some() { 1.0 } else { 0.0 });
        let texture = ctx.render("blend", &uniforms)?;
        Ok(image_output("image", ImageValue::new(texture, ctx.output_size)))
    }
}
