//! Built-in compositing programs

use log::info;

use super::GpuContext;
use crate::error::GpuResult;

/// Vertex stage shared by every program
pub const FULLSCREEN_VERTEX: &str = include_str!("./shaders/fullscreen.wgsl");

/// `(program name, fragment source)` for every built-in program
pub const BUILTIN_PROGRAMS: &[(&str, &str)] = &[
    ("copy_texture", include_str!("./shaders/copy_texture.wgsl")),
    ("solid_color", include_str!("./shaders/solid_color.wgsl")),
    ("brightness_contrast", include_str!("./shaders/brightness_contrast.wgsl")),
    ("hsl", include_str!("./shaders/hsl.wgsl")),
    ("gaussian_blur", include_str!("./shaders/gaussian_blur.wgsl")),
    ("blend", include_str!("./shaders/blend.wgsl")),
    ("flip", include_str!("./shaders/flip.wgsl")),
];

/// Compile and link every built-in program on `gpu`
pub fn load_all_shaders<G: GpuContext + ?Sized>(gpu: &mut G) -> GpuResult<()> {
    for (name, fragment) in BUILTIN_PROGRAMS {
        gpu.create_program(name, FULLSCREEN_VERTEX, fragment)?;
    }
    info!("Loaded {} built-in programs", BUILTIN_PROGRAMS.len());
    Ok(())
}
