// gpu/program.rs — Shading programs for the three edge stages.
//
// A program is a vertex stage plus a fragment stage compiled into one render
// pipeline for one target format. All three stages share `quad.wgsl` (vertex
// stage, bindings, sampling helpers); each adds its own fragment stage:
//
//   CONVOLUTION  — log_step.wgsl       → intermediate format
//   THRESHOLD    — zero_crossing.wgsl  → intermediate format
//   PASSTHROUGH  — passthrough.wgsl    → surface format
//
// `ProgramSource` is the immutable text. `Program` is the compiled result and
// is what stage descriptors reference; compile it once, use it every run.
//
// BINDINGS (group 0, identical for every program)
// ───────────────────────────────────────────────
//   0  u_image    texture_2d<f32>, non-filterable (Rgba32Float is not filterable)
//   1  u_sampler  nearest, clamp-to-edge on U and V
//   2  params     StageUniforms (64 bytes), visible to vertex + fragment
//
// VERTEX LAYOUT
// ─────────────
//   stride 16:  a_vertex    Float32x2 @ offset 0 (location 0)
//               a_texCoord  Float32x2 @ offset 8 (location 1)

use bytemuck::{Pod, Zeroable};
use tracing::debug;

use crate::gpu::device::{GpuDevice, GpuError};

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

const QUAD_WGSL: &str = include_str!("../shaders/quad.wgsl");

/// Immutable WGSL text of one program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramSource {
    pub label: &'static str,
    pub vertex: &'static str,
    pub fragment: &'static str,
}

impl ProgramSource {
    pub const CONVOLUTION: ProgramSource = ProgramSource {
        label: "log_step",
        vertex: QUAD_WGSL,
        fragment: include_str!("../shaders/log_step.wgsl"),
    };

    pub const THRESHOLD: ProgramSource = ProgramSource {
        label: "zero_crossing",
        vertex: QUAD_WGSL,
        fragment: include_str!("../shaders/zero_crossing.wgsl"),
    };

    pub const PASSTHROUGH: ProgramSource = ProgramSource {
        label: "passthrough",
        vertex: QUAD_WGSL,
        fragment: include_str!("../shaders/passthrough.wgsl"),
    };

    /// Both stages as one WGSL module.
    pub fn wgsl(&self) -> String {
        format!("{}\n{}", self.vertex, self.fragment)
    }
}

// ---------------------------------------------------------------------------
// Uniforms and vertices (layouts must match quad.wgsl exactly)
// ---------------------------------------------------------------------------

/// Uniform block shared by all stages.
///
/// Layout of `StageUniforms` in `quad.wgsl`:
///   offset  0: u_resolution (vec2<f32>)
///   offset  8: pad          (vec2<f32>)
///   offset 16: u_kernel_H   (3 × vec4<f32>; 9 weights + 3 zero lanes)
///   total:  64 bytes
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct StageUniforms {
    pub resolution: [f32; 2],
    pub pad: [f32; 2],
    pub kernel: [[f32; 4]; 3],
}

impl StageUniforms {
    /// Resolution set to (1/width, 1/height), kernel zeroed.
    pub fn for_size(width: u32, height: u32) -> Self {
        StageUniforms {
            resolution: [1.0 / width as f32, 1.0 / height as f32],
            ..Zeroable::zeroed()
        }
    }

    pub fn set_kernel(&mut self, weights: &[f32; 9]) {
        self.kernel = [[0.0; 4]; 3];
        for (i, &w) in weights.iter().enumerate() {
            self.kernel[i / 4][i % 4] = w;
        }
    }

    pub fn kernel_weights(&self) -> [f32; 9] {
        let mut out = [0.0; 9];
        for (i, w) in out.iter_mut().enumerate() {
            *w = self.kernel[i / 4][i % 4];
        }
        out
    }
}

/// One interleaved vertex: pixel-space position and texture coordinate.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 2],
    pub tex_coord: [f32; 2],
}

/// A named vertex attribute: component count, buffer stride and offset in bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSpec {
    pub name: String,
    pub components: u32,
    pub stride: u64,
    pub offset: u64,
}

const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];

/// Attribute names in shader-location order.
const ATTRIBUTE_NAMES: [&str; 2] = ["a_vertex", "a_texCoord"];

impl Vertex {
    pub const STRIDE: u64 = std::mem::size_of::<Vertex>() as u64;

    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: Self::STRIDE,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &VERTEX_ATTRIBUTES,
        }
    }

    /// The layout as named specs, for checking a stage's `attribute` calls.
    pub fn attribute_specs() -> Vec<AttributeSpec> {
        ATTRIBUTE_NAMES
            .iter()
            .zip(VERTEX_ATTRIBUTES.iter())
            .map(|(name, attr)| AttributeSpec {
                name: (*name).to_owned(),
                components: 2,
                stride: Self::STRIDE,
                offset: attr.offset,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Program
// ---------------------------------------------------------------------------

/// A compiled program: render pipeline, its bind group layout and sampler.
pub struct Program {
    label: &'static str,
    target_format: wgpu::TextureFormat,
    pub(crate) pipeline: wgpu::RenderPipeline,
    pub(crate) bind_group_layout: wgpu::BindGroupLayout,
    pub(crate) sampler: wgpu::Sampler,
}

impl Program {
    /// Compile `source` for targets of `target_format`.
    ///
    /// # Errors
    /// [`GpuError::ProgramCompilation`] if WGSL parsing, validation or
    /// pipeline creation fails.
    pub fn compile(
        gpu: &GpuDevice,
        source: &ProgramSource,
        target_format: wgpu::TextureFormat,
    ) -> Result<Self, GpuError> {
        debug!(program = source.label, format = ?target_format, "compiling program");
        let wgsl = source.wgsl();

        gpu.validation_scope(|device| {
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(source.label),
                source: wgpu::ShaderSource::Wgsl(wgsl.as_str().into()),
            });

            let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(source.label),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            multisampled: false,
                            view_dimension: wgpu::TextureViewDimension::D2,
                            sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 2,
                        visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: wgpu::BufferSize::new(
                                std::mem::size_of::<StageUniforms>() as u64,
                            ),
                        },
                        count: None,
                    },
                ],
            });

            let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(source.label),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });

            let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(source.label),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: "vs_main",
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    buffers: &[Vertex::layout()],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: "fs_main",
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: target_format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });

            // Texture borders are clamp-to-edge: out-of-range neighbours
            // repeat the nearest edge texel.
            let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(source.label),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                mag_filter: wgpu::FilterMode::Nearest,
                min_filter: wgpu::FilterMode::Nearest,
                mipmap_filter: wgpu::FilterMode::Nearest,
                ..Default::default()
            });

            Program {
                label: source.label,
                target_format,
                pipeline,
                bind_group_layout,
                sampler,
            }
        })
        .map_err(|message| GpuError::ProgramCompilation {
            label: source.label.to_owned(),
            message,
        })
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn target_format(&self) -> wgpu::TextureFormat {
        self.target_format
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::LAPLACIAN_3X3;

    #[test]
    fn test_stage_uniforms_layout() {
        assert_eq!(std::mem::size_of::<StageUniforms>(), 64);
        assert_eq!(std::mem::offset_of!(StageUniforms, kernel), 16);
    }

    #[test]
    fn test_stage_uniforms_resolution_is_reciprocal() {
        let u = StageUniforms::for_size(4, 5);
        assert_eq!(u.resolution, [0.25, 0.2]);
        assert_eq!(u.kernel, [[0.0; 4]; 3]);
    }

    #[test]
    fn test_kernel_packing_row_major() {
        let mut u = StageUniforms::for_size(1, 1);
        u.set_kernel(&LAPLACIAN_3X3);
        // Center weight (index 4) is the first lane of the second vec4.
        assert_eq!(u.kernel[1][0], -8.0);
        assert_eq!(u.kernel[2], [1.0, 0.0, 0.0, 0.0]);
        assert_eq!(u.kernel_weights(), LAPLACIAN_3X3);
    }

    #[test]
    fn test_vertex_layout() {
        assert_eq!(Vertex::STRIDE, 16);
        let specs = Vertex::attribute_specs();
        assert_eq!(specs[0].name, "a_vertex");
        assert_eq!(specs[0].offset, 0);
        assert_eq!(specs[1].name, "a_texCoord");
        assert_eq!(specs[1].offset, 8);
        assert!(specs.iter().all(|s| s.stride == 16 && s.components == 2));
    }

    #[test]
    fn test_sources_share_vertex_stage() {
        for src in [ProgramSource::CONVOLUTION, ProgramSource::THRESHOLD, ProgramSource::PASSTHROUGH] {
            let wgsl = src.wgsl();
            assert!(wgsl.contains("fn vs_main"));
            assert!(wgsl.contains("fn fs_main"));
        }
        assert!(ProgramSource::CONVOLUTION.fragment.contains("step(0.0, response)"));
    }
}
