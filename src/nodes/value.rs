//! Values that flow between nodes

use std::collections::HashMap;

use glam::Vec4;
use serde::{Deserialize, Serialize};

use crate::gpu::{OutputSize, TextureId};

/// Data types that can flow through ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Image,
    Mask,
    Number,
    Color,
    BoundingBox,
}

impl DataType {
    /// Images and masks are both textures and may feed each other
    pub fn can_connect_to(&self, other: &DataType) -> bool {
        self == other || (self.is_texture() && other.is_texture())
    }

    pub fn is_texture(&self) -> bool {
        matches!(self, DataType::Image | DataType::Mask)
    }

    pub fn name(&self) -> &'static str {
        match self {
            DataType::Image => "Image",
            DataType::Mask => "Mask",
            DataType::Number => "Number",
            DataType::Color => "Color",
            DataType::BoundingBox => "BoundingBox",
        }
    }
}

/// A texture-backed image, possibly absent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageValue {
    pub texture: Option<TextureId>,
    pub width: u32,
    pub height: u32,
    /// Embeddable encoding for results that have no GPU backing yet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

impl ImageValue {
    pub fn new(texture: TextureId, size: OutputSize) -> Self {
        Self {
            texture: Some(texture),
            width: size.width,
            height: size.height,
            preview: None,
        }
    }

    /// No texture, but a known nominal size
    pub fn absent(size: OutputSize) -> Self {
        Self {
            texture: None,
            width: size.width,
            height: size.height,
            preview: None,
        }
    }

    pub fn size(&self) -> Option<OutputSize> {
        let size = OutputSize::new(self.width, self.height);
        (!size.is_empty()).then_some(size)
    }

    pub fn is_present(&self) -> bool {
        self.texture.is_some()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Tagged output of a node port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputValue {
    Image(ImageValue),
    Mask(ImageValue),
    Number { value: f32 },
    Color { rgba: Vec4 },
    BoundingBox(BoundingBox),
}

impl OutputValue {
    /// The empty value a port of `data_type` yields when nothing was produced
    pub fn empty(data_type: DataType) -> Self {
        match data_type {
            DataType::Image => OutputValue::Image(ImageValue::default()),
            DataType::Mask => OutputValue::Mask(ImageValue::default()),
            DataType::Number => OutputValue::Number { value: 0.0 },
            DataType::Color => OutputValue::Color { rgba: Vec4::ZERO },
            DataType::BoundingBox => OutputValue::BoundingBox(BoundingBox::default()),
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            OutputValue::Image(_) => DataType::Image,
            OutputValue::Mask(_) => DataType::Mask,
            OutputValue::Number { .. } => DataType::Number,
            OutputValue::Color { .. } => DataType::Color,
            OutputValue::BoundingBox(_) => DataType::BoundingBox,
        }
    }

    /// Image or mask payload
    pub fn as_image(&self) -> Option<&ImageValue> {
        match self {
            OutputValue::Image(image) | OutputValue::Mask(image) => Some(image),
            _ => None,
        }
    }

    pub fn texture(&self) -> Option<TextureId> {
        self.as_image().and_then(|image| image.texture)
    }
}

pub type NodeOutputs = HashMap<String, OutputValue>;

/// Resolved inputs keyed by input port; unconnected ports are simply missing
pub type NodeInputs = HashMap<String, OutputValue>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_and_mask_interconnect() {
        assert!(DataType::Image.can_connect_to(&DataType::Mask));
        assert!(DataType::Number.can_connect_to(&DataType::Number));
        assert!(!DataType::Color.can_connect_to(&DataType::Image));
    }

    #[test]
    fn test_empty_values_match_type() {
        for ty in [
            DataType::Image,
            DataType::Mask,
            DataType::Number,
            DataType::Color,
            DataType::BoundingBox,
        ] {
            assert_eq!(OutputValue::empty(ty).data_type(), ty);
        }
        assert_eq!(OutputValue::empty(DataType::Image).texture(), None);
    }

    #[test]
    fn test_image_size_requires_both_dimensions() {
        assert_eq!(ImageValue::absent(OutputSize::new(4, 0)).size(), None);
        assert_eq!(
            ImageValue::absent(OutputSize::new(4, 2)).size(),
            Some(OutputSize::new(4, 2))
        );
    }

    #[test]
    fn test_output_value_serializes_with_type_tag() {
        let value = OutputValue::Number { value: 2.0 };
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json["type"], "number");
        assert_eq!(json["value"], 2.0);
    }
}
