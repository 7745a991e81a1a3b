//! Settings for creating a GPU context

use serde::{Deserialize, Serialize};

use super::pool::DEFAULT_POOL_LIMIT;

/// Adapter preference, mirrored so the config stays serialisable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerPreference {
    LowPower,
    #[default]
    HighPerformance,
}

impl PowerPreference {
    pub fn to_wgpu(self) -> wgpu::PowerPreference {
        match self {
            PowerPreference::LowPower => wgpu::PowerPreference::LowPower,
            PowerPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
        }
    }
}

/// GPU context configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuConfig {
    /// Named uploads kept before the oldest unused one is evicted
    pub texture_pool_limit: usize,
    pub power_preference: PowerPreference,
    /// Debug label for the device
    pub label: String,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            texture_pool_limit: DEFAULT_POOL_LIMIT,
            power_preference: PowerPreference::default(),
            label: "pixelgraph".to_string(),
        }
    }
}

/// Color target used by every compositing pipeline
pub fn color_target_state() -> wgpu::ColorTargetState {
    wgpu::ColorTargetState {
        format: wgpu::TextureFormat::Rgba8Unorm,
        blend: Some(wgpu::BlendState::REPLACE),
        write_mask: wgpu::ColorWrites::ALL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: GpuConfig = serde_json::from_str(r#"{ "texture_pool_limit": 8 }"#).unwrap();
        assert_eq!(config.texture_pool_limit, 8);
        assert_eq!(config.power_preference, PowerPreference::HighPerformance);
        assert_eq!(config.label, "pixelgraph");
    }

    #[test]
    fn test_power_preference_names() {
        let pref: PowerPreference = serde_json::from_str(r#""low_power""#).unwrap();
        assert_eq!(pref.to_wgpu(), wgpu::PowerPreference::LowPower);
    }
}
