//! Lenient readers for JSON node parameters
//!
//! Parameters are opaque to the engine; node kinds read them through these
//! helpers, falling back to the given default when a key is missing or has
//! the wrong shape.

use std::collections::HashMap;

use glam::Vec4;
use serde_json::Value;

pub type Parameters = HashMap<String, Value>;

pub fn f32_or(params: &Parameters, key: &str, default: f32) -> f32 {
    match params.get(key) {
        Some(Value::Number(n)) => n.as_f64().map(|v| v as f32).unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        Some(Value::Bool(b)) => f32::from(u8::from(*b)),
        _ => default,
    }
}

/// `f32_or`, clamped into `min..=max`
pub fn f32_clamped(params: &Parameters, key: &str, default: f32, min: f32, max: f32) -> f32 {
    let value = f32_or(params, key, default);
    if value.is_nan() {
        default
    } else {
        value.clamp(min, max)
    }
}

pub fn u32_or(params: &Parameters, key: &str, default: u32) -> u32 {
    let value = f32_or(params, key, default as f32);
    if value.is_finite() && value >= 0.0 {
        value.round() as u32
    } else {
        default
    }
}

pub fn bool_or(params: &Parameters, key: &str, default: bool) -> bool {
    match params.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|v| v != 0.0).unwrap_or(default),
        Some(Value::String(s)) => match s.as_str() {
            "true" => true,
            "false" => false,
            _ => default,
        },
        _ => default,
    }
}

pub fn str_or<'a>(params: &'a Parameters, key: &str, default: &'a str) -> &'a str {
    match params.get(key) {
        Some(Value::String(s)) => s.as_str(),
        _ => default,
    }
}

/// Read a colour given as `{r,g,b,a}` (0..1), `[r,g,b,a]` or `#rrggbb[aa]`
pub fn color_or(params: &Parameters, key: &str, default: Vec4) -> Vec4 {
    match params.get(key) {
        Some(Value::Object(map)) => {
            let channel = |name: &str, fallback: f32| {
                map.get(name)
                    .and_then(Value::as_f64)
                    .map(|v| v as f32)
                    .unwrap_or(fallback)
            };
            Vec4::new(
                channel("r", default.x),
                channel("g", default.y),
                channel("b", default.z),
                channel("a", 1.0),
            )
        }
        Some(Value::Array(items)) => {
            let mut rgba = [default.x, default.y, default.z, 1.0];
            for (slot, item) in rgba.iter_mut().zip(items) {
                if let Some(v) = item.as_f64() {
                    *slot = v as f32;
                }
            }
            Vec4::from_array(rgba)
        }
        Some(Value::String(hex)) => parse_hex(hex).unwrap_or(default),
        _ => default,
    }
}

fn parse_hex(hex: &str) -> Option<Vec4> {
    let digits = hex.strip_prefix('#').unwrap_or(hex);
    if !matches!(digits.len(), 6 | 8) || !digits.is_ascii() {
        return None;
    }
    let byte = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok().map(|b| b as f32 / 255.0);
    let alpha = if digits.len() == 8 { byte(6)? } else { 1.0 };
    Some(Vec4::new(byte(0)?, byte(2)?, byte(4)?, alpha))
}
