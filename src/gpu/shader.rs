//! Shader compilation, program linking and uniform reflection
//!
//! WGSL sources are parsed and validated with naga before wgpu sees them, so
//! compile failures carry naga's annotated diagnostics. The fragment module is
//! reflected to learn which uniform struct members, textures and samplers the
//! program expects; uniforms are then bound by name.

use std::collections::HashMap;

use log::{debug, info};

use super::config::color_target_state;
use super::context::validation_scope;
use super::{ShaderStage, UniformValue, Uniforms};
use crate::error::{GpuError, GpuResult};

/// Parse and validate a WGSL source for one stage
pub fn parse_and_validate(source: &str, stage: ShaderStage) -> GpuResult<naga::Module> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| GpuError::ShaderCompile {
        stage: stage.label(),
        log: e.emit_to_string(source),
    })?;

    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| GpuError::ShaderCompile {
        stage: stage.label(),
        log: e.emit_to_string(source),
    })?;

    let has_entry = module
        .entry_points
        .iter()
        .any(|ep| ep.stage == stage.to_naga() && ep.name == stage.entry_point());
    if !has_entry {
        return Err(GpuError::ShaderCompile {
            stage: stage.label(),
            log: format!("missing @{} entry point `{}`", stage.label(), stage.entry_point()),
        });
    }
    Ok(module)
}

/// Scalar type of a uniform member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Float,
    Sint,
    Uint,
}

/// One member of the uniform block
#[derive(Debug, Clone, PartialEq)]
pub struct UniformMember {
    pub name: String,
    pub offset: u32,
    pub components: usize,
    pub scalar: ScalarKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BindingKind {
    Uniform { size: u32, members: Vec<UniformMember> },
    Texture,
    Sampler,
}

/// A reflected `@group(0) @binding(n)` resource
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceBinding {
    pub name: String,
    pub binding: u32,
    pub kind: BindingKind,
}

/// Everything the render pass needs to know about a program's inputs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgramBindings {
    pub resources: Vec<ResourceBinding>,
}

impl ProgramBindings {
    /// Reflect the resources declared by a validated module
    pub fn reflect(module: &naga::Module) -> GpuResult<Self> {
        let mut resources = Vec::new();

        for (_, var) in module.global_variables.iter() {
            let Some(binding) = var.binding.as_ref() else {
                continue;
            };
            let name = var.name.clone().unwrap_or_else(|| format!("binding{}", binding.binding));
            if binding.group != 0 {
                return Err(GpuError::link(&name, "only @group(0) resources are supported"));
            }

            let kind = match var.space {
                naga::AddressSpace::Uniform => {
                    if resources.iter().any(|r: &ResourceBinding| matches!(r.kind, BindingKind::Uniform { .. })) {
                        return Err(GpuError::link(&name, "only one uniform block per program is supported"));
                    }
                    reflect_uniform_block(module, var.ty, &name)?
                }
                naga::AddressSpace::Handle => match module.types[var.ty].inner {
                    naga::TypeInner::Image { .. } => BindingKind::Texture,
                    naga::TypeInner::Sampler { .. } => BindingKind::Sampler,
                    _ => return Err(GpuError::link(&name, "unsupported handle type")),
                },
                _ => return Err(GpuError::link(&name, "unsupported address space")),
            };

            resources.push(ResourceBinding {
                name,
                binding: binding.binding,
                kind,
            });
        }

        resources.sort_by_key(|r| r.binding);
        Ok(Self { resources })
    }

    pub fn uniform_block(&self) -> Option<(u32, u32, &[UniformMember])> {
        self.resources.iter().find_map(|r| match &r.kind {
            BindingKind::Uniform { size, members } => Some((r.binding, *size, members.as_slice())),
            _ => None,
        })
    }

    /// Texture bindings in binding order, i.e. their texture unit order
    pub fn textures(&self) -> impl Iterator<Item = &ResourceBinding> {
        self.resources.iter().filter(|r| r.kind == BindingKind::Texture)
    }

    pub fn samplers(&self) -> impl Iterator<Item = &ResourceBinding> {
        self.resources.iter().filter(|r| r.kind == BindingKind::Sampler)
    }

    /// Pack non-texture uniforms into the std140-style block naga laid out.
    /// Names the program does not declare are skipped.
    pub fn encode_uniforms(&self, uniforms: &Uniforms) -> GpuResult<Vec<u8>> {
        let Some((_, size, members)) = self.uniform_block() else {
            return Ok(Vec::new());
        };
        let padded = (size as usize).div_ceil(16) * 16;
        let mut bytes = vec![0u8; padded.max(16)];

        for (name, value) in uniforms.iter() {
            if matches!(value, UniformValue::Texture(_)) {
                continue;
            }
            let Some(member) = members.iter().find(|m| m.name == name) else {
                debug!("Uniform '{}' not declared by program, skipping", name);
                continue;
            };
            if member.components != value.components() {
                return Err(GpuError::UniformMismatch {
                    name: name.to_string(),
                    reason: format!(
                        "shader expects {} components, got {}",
                        member.components,
                        value.components()
                    ),
                });
            }

            let mut offset = member.offset as usize;
            for component in value.as_f32s() {
                let word = match member.scalar {
                    ScalarKind::Float => component.to_le_bytes(),
                    ScalarKind::Sint => (component as i32).to_le_bytes(),
                    ScalarKind::Uint => (component.max(0.0) as u32).to_le_bytes(),
                };
                bytes[offset..offset + 4].copy_from_slice(&word);
                offset += 4;
            }
        }
        Ok(bytes)
    }
}

fn reflect_uniform_block(
    module: &naga::Module,
    ty: naga::Handle<naga::Type>,
    name: &str,
) -> GpuResult<BindingKind> {
    match &module.types[ty].inner {
        naga::TypeInner::Struct { members, span } => {
            let mut reflected = Vec::with_capacity(members.len());
            for member in members {
                let member_name = member.name.clone().unwrap_or_default();
                let (components, scalar) = reflect_member_type(&module.types[member.ty].inner)
                    .ok_or_else(|| GpuError::link(name, format!("unsupported type for member '{member_name}'")))?;
                reflected.push(UniformMember {
                    name: member_name,
                    offset: member.offset,
                    components,
                    scalar,
                });
            }
            Ok(BindingKind::Uniform {
                size: *span,
                members: reflected,
            })
        }
        inner => {
            // A bare `var<uniform> u_time: f32;` is a one-member block
            let (components, scalar) = reflect_member_type(inner)
                .ok_or_else(|| GpuError::link(name, "unsupported uniform type"))?;
            Ok(BindingKind::Uniform {
                size: (components * 4) as u32,
                members: vec![UniformMember {
                    name: name.to_string(),
                    offset: 0,
                    components,
                    scalar,
                }],
            })
        }
    }
}

fn reflect_member_type(inner: &naga::TypeInner) -> Option<(usize, ScalarKind)> {
    fn scalar_kind(scalar: naga::Scalar) -> Option<ScalarKind> {
        if scalar.width != 4 {
            return None;
        }
        match scalar.kind {
            naga::ScalarKind::Float => Some(ScalarKind::Float),
            naga::ScalarKind::Sint => Some(ScalarKind::Sint),
            naga::ScalarKind::Uint => Some(ScalarKind::Uint),
            _ => None,
        }
    }

    match *inner {
        naga::TypeInner::Scalar(scalar) => Some((1, scalar_kind(scalar)?)),
        naga::TypeInner::Vector { size, scalar } => Some((size as usize, scalar_kind(scalar)?)),
        naga::TypeInner::Matrix {
            columns: naga::VectorSize::Quad,
            rows: naga::VectorSize::Quad,
            scalar,
        } => Some((16, scalar_kind(scalar)?)),
        _ => None,
    }
}

/// Handle into the shader manager's compiled module table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderHandle(usize);

struct CompiledShader {
    stage: ShaderStage,
    module: wgpu::ShaderModule,
    reflection: naga::Module,
}

/// A linked program: pipeline, layout and reflected bindings
pub struct Program {
    pub name: String,
    pub pipeline: wgpu::RenderPipeline,
    pub bind_group_layout: wgpu::BindGroupLayout,
    pub bindings: ProgramBindings,
}

/// Compiles shaders once per exact source and links programs once per name
pub struct ShaderManager {
    device: wgpu::Device,
    shaders: Vec<CompiledShader>,
    shader_cache: HashMap<(ShaderStage, String), ShaderHandle>,
    programs: HashMap<String, Program>,
}

impl ShaderManager {
    pub fn new(device: wgpu::Device) -> Self {
        Self {
            device,
            shaders: Vec::new(),
            shader_cache: HashMap::new(),
            programs: HashMap::new(),
        }
    }

    /// Compile a shader, reusing an identical earlier compile
    pub fn compile(&mut self, source: &str, stage: ShaderStage) -> GpuResult<ShaderHandle> {
        let key = (stage, source.to_string());
        if let Some(handle) = self.shader_cache.get(&key) {
            return Ok(*handle);
        }

        let reflection = parse_and_validate(source, stage)?;
        let (module, scope_error) = validation_scope(&self.device, || {
            self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(stage.label()),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            })
        });
        if let Some(log) = scope_error {
            return Err(GpuError::ShaderCompile {
                stage: stage.label(),
                log,
            });
        }

        let handle = ShaderHandle(self.shaders.len());
        self.shaders.push(CompiledShader {
            stage,
            module,
            reflection,
        });
        self.shader_cache.insert(key, handle);
        Ok(handle)
    }

    /// Link a program. A name that already exists keeps its first program.
    pub fn create_program(&mut self, name: &str, vertex_source: &str, fragment_source: &str) -> GpuResult<()> {
        if self.programs.contains_key(name) {
            debug!("Program '{}' already linked", name);
            return Ok(());
        }

        let vertex = self.compile(vertex_source, ShaderStage::Vertex)?;
        let fragment = self.compile(fragment_source, ShaderStage::Fragment)?;
        let vs = &self.shaders[vertex.0];
        let fs = &self.shaders[fragment.0];
        debug_assert!(vs.stage == ShaderStage::Vertex && fs.stage == ShaderStage::Fragment);

        if !ProgramBindings::reflect(&vs.reflection)?.resources.is_empty() {
            return Err(GpuError::link(name, "vertex stage must not declare resources"));
        }
        let bindings = ProgramBindings::reflect(&fs.reflection)?;
        let entries = layout_entries(&bindings);

        let (linked, scope_error) = validation_scope(&self.device, || {
            let bind_group_layout = self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(name),
                entries: &entries,
            });
            let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(name),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });
            let pipeline = self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(name),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &vs.module,
                    entry_point: Some(ShaderStage::Vertex.entry_point()),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    buffers: &[QUAD_VERTEX_LAYOUT],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &fs.module,
                    entry_point: Some(ShaderStage::Fragment.entry_point()),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    targets: &[Some(color_target_state())],
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });
            (bind_group_layout, pipeline)
        });
        if let Some(log) = scope_error {
            return Err(GpuError::link(name, log));
        }

        let (bind_group_layout, pipeline) = linked;
        info!("Linked program '{}' ({} bindings)", name, bindings.resources.len());
        self.programs.insert(
            name.to_string(),
            Program {
                name: name.to_string(),
                pipeline,
                bind_group_layout,
                bindings,
            },
        );
        Ok(())
    }

    pub fn program(&self, name: &str) -> Option<&Program> {
        self.programs.get(name)
    }

    pub fn delete_program(&mut self, name: &str) -> bool {
        self.programs.remove(name).is_some()
    }

    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    pub fn dispose(&mut self) {
        self.programs.clear();
        self.shader_cache.clear();
        self.shaders.clear();
    }
}

/// Interleaved `position: vec2<f32>, uv: vec2<f32>`
pub const QUAD_VERTEX_LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
    array_stride: 16,
    step_mode: wgpu::VertexStepMode::Vertex,
    attributes: &[
        wgpu::VertexAttribute {
            format: wgpu::VertexFormat::Float32x2,
            offset: 0,
            shader_location: 0,
        },
        wgpu::VertexAttribute {
            format: wgpu::VertexFormat::Float32x2,
            offset: 8,
            shader_location: 1,
        },
    ],
};

fn layout_entries(bindings: &ProgramBindings) -> Vec<wgpu::BindGroupLayoutEntry> {
    bindings
        .resources
        .iter()
        .map(|resource| wgpu::BindGroupLayoutEntry {
            binding: resource.binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: match resource.kind {
                BindingKind::Uniform { .. } => wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                BindingKind::Texture => wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                BindingKind::Sampler => wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            },
            count: None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Vec2, Vec4};

    const FRAGMENT: &str = r#"
struct Params {
    u_radius: f32,
    u_mode: i32,
    u_direction: vec2<f32>,
    u_color: vec4<f32>,
};

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var u_sampler: sampler;
@group(0) @binding(2) var u_texture: texture_2d<f32>;
@group(0) @binding(3) var u_mask: texture_2d<f32>;

@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    let base = textureSample(u_texture, u_sampler, uv);
    let mask = textureSample(u_mask, u_sampler, uv);
    return base * mask.r * params.u_radius + params.u_color * f32(params.u_mode) + vec4<f32>(params.u_direction, 0.0, 0.0);
}
"#;

    #[test]
    fn test_valid_fragment_parses() {
        assert!(parse_and_validate(FRAGMENT, ShaderStage::Fragment).is_ok());
    }

    #[test]
    fn test_syntax_error_reports_log() {
        let err = parse_and_validate("fn fs_main( -> {", ShaderStage::Fragment).unwrap_err();
        match err {
            GpuError::ShaderCompile { stage, log } => {
                assert_eq!(stage, "fragment");
                assert!(!log.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_wrong_stage_entry_point_is_rejected() {
        let err = parse_and_validate(FRAGMENT, ShaderStage::Vertex).unwrap_err();
        assert!(err.to_string().contains("vs_main"));
    }

    #[test]
    fn test_reflects_uniform_members_and_textures() {
        let module = parse_and_validate(FRAGMENT, ShaderStage::Fragment).unwrap();
        let bindings = ProgramBindings::reflect(&module).unwrap();

        let (binding, size, members) = bindings.uniform_block().unwrap();
        assert_eq!(binding, 0);
        assert_eq!(size, 32);
        let names: Vec<_> = members.iter().map(|m| (m.name.as_str(), m.offset)).collect();
        assert_eq!(
            names,
            vec![("u_radius", 0), ("u_mode", 4), ("u_direction", 8), ("u_color", 16)]
        );

        let textures: Vec<_> = bindings.textures().map(|t| t.name.as_str()).collect();
        assert_eq!(textures, vec!["u_texture", "u_mask"]);
        assert_eq!(bindings.samplers().count(), 1);
    }

    #[test]
    fn test_encode_uniforms_by_name() {
        let module = parse_and_validate(FRAGMENT, ShaderStage::Fragment).unwrap();
        let bindings = ProgramBindings::reflect(&module).unwrap();
        let uniforms = Uniforms::new()
            .float("u_radius", 2.5)
            .int("u_mode", 3)
            .vec2("u_direction", Vec2::new(1.0, 0.0))
            .vec4("u_color", Vec4::new(0.1, 0.2, 0.3, 0.4))
            .float("u_unknown", 9.0);

        let bytes = bindings.encode_uniforms(&uniforms).unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(f32::from_le_bytes(bytes[0..4].try_into().unwrap()), 2.5);
        assert_eq!(i32::from_le_bytes(bytes[4..8].try_into().unwrap()), 3);
        assert_eq!(f32::from_le_bytes(bytes[8..12].try_into().unwrap()), 1.0);
        assert_eq!(f32::from_le_bytes(bytes[28..32].try_into().unwrap()), 0.4);
    }

    #[test]
    fn test_encode_rejects_shape_mismatch() {
        let module = parse_and_validate(FRAGMENT, ShaderStage::Fragment).unwrap();
        let bindings = ProgramBindings::reflect(&module).unwrap();
        let err = bindings
            .encode_uniforms(&Uniforms::new().vec2("u_radius", Vec2::ONE))
            .unwrap_err();
        assert!(matches!(err, GpuError::UniformMismatch { .. }));
    }

    #[test]
    fn test_bare_uniform_is_single_member_block() {
        let source = r#"
@group(0) @binding(0) var<uniform> u_time: f32;
@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(u_time);
}
"#;
        let module = parse_and_validate(source, ShaderStage::Fragment).unwrap();
        let bindings = ProgramBindings::reflect(&module).unwrap();
        let (_, _, members) = bindings.uniform_block().unwrap();
        assert_eq!(members[0].name, "u_time");
    }

    #[test]
    fn test_second_uniform_block_fails_to_link() {
        let source = r#"
@group(0) @binding(0) var<uniform> u_time: f32;
@group(0) @binding(1) var<uniform> u_gain: f32;
@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(u_time * u_gain);
}
"#;
        let module = parse_and_validate(source, ShaderStage::Fragment).unwrap();
        match ProgramBindings::reflect(&module) {
            Err(GpuError::ProgramLink { log, .. }) => assert!(log.contains("one uniform block")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("two uniform blocks were accepted"),
        }
    }
}
