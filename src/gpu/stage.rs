// gpu/stage.rs — One full-screen rendering pass.
//
// A `PipelineStage` is a descriptor assembled with builder calls and consumed
// by `run`:
//
//   PipelineStage::new(ctx, &program)
//       .size(w, h)
//       .geometry(Geometry::rectangle(w, h))
//       .attribute("a_vertex", 2, 16, 0)
//       .attribute("a_texCoord", 2, 16, 8)
//       .texture(&input)
//       .uniform("u_kernel_H", UniformValue::FloatArray(weights))?
//       .redirect_to("fbo1", PixelFormat::Float32, 0)?
//       .clear_canvas(color)
//       .run()?                      // -> Some(Framebuffer)
//
// Descriptors are not reusable: `run` takes `self`. A stage that redirects
// returns the framebuffer it created; a stage that presents returns `None`.
//
// COMPLETION
// ──────────
// `run` submits exactly one render pass and blocks on
// `poll(WaitForSubmissionIndex)` before returning, so the output attachment
// is fully written when the caller binds it as the next stage's input.
// Submission happens under `GpuDevice::lock_submission`.
//
// UNIFORMS
// ────────
//   u_resolution  Vec2          defaults to (1/width, 1/height) from `size`
//   u_image       TextureUnit   only unit 0 exists
//   u_kernel_H    FloatArray    exactly 9 weights, row-major
// Any other name is rejected.

use tracing::debug;
use wgpu::util::DeviceExt;

use crate::gpu::device::{GpuDevice, GpuError};
use crate::gpu::image::{Framebuffer, PixelFormat, SurfaceTarget, TextureSource};
use crate::gpu::program::{AttributeSpec, Program, StageUniforms, Vertex};

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// Vertices drawn as a triangle list.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    vertices: Vec<Vertex>,
}

impl Geometry {
    /// Two triangles covering pixel space (0,0)-(width,height), texture
    /// coordinates (0,0)-(1,1).
    pub fn rectangle(width: u32, height: u32) -> Self {
        let (w, h) = (width as f32, height as f32);
        let v = |x: f32, y: f32, u: f32, t: f32| Vertex { position: [x, y], tex_coord: [u, t] };
        Geometry {
            vertices: vec![
                v(0.0, 0.0, 0.0, 0.0),
                v(w, 0.0, 1.0, 0.0),
                v(0.0, h, 0.0, 1.0),
                v(0.0, h, 0.0, 1.0),
                v(w, 0.0, 1.0, 0.0),
                v(w, h, 1.0, 1.0),
            ],
        }
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }
}

// ---------------------------------------------------------------------------
// Uniform values and targets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    Vec2([f32; 2]),
    TextureUnit(u32),
    FloatArray(Vec<f32>),
}

/// Where a stage draws.
#[derive(Clone, Copy)]
pub enum Target<'a> {
    /// A new framebuffer created by the stage.
    Offscreen { name: &'a str, format: PixelFormat, attachment: u32 },
    /// The visible surface.
    Surface(SurfaceTarget<'a>),
}

// ---------------------------------------------------------------------------
// PipelineStage
// ---------------------------------------------------------------------------

pub struct PipelineStage<'a> {
    ctx: &'a GpuDevice,
    program: &'a Program,
    size: Option<(u32, u32)>,
    geometry: Option<Geometry>,
    attributes: Vec<AttributeSpec>,
    texture: Option<&'a dyn TextureSource>,
    target: Option<Target<'a>>,
    clear: wgpu::Color,
    uniforms: StageUniforms,
    resolution_override: Option<[f32; 2]>,
}

impl<'a> PipelineStage<'a> {
    pub fn new(ctx: &'a GpuDevice, program: &'a Program) -> Self {
        PipelineStage {
            ctx,
            program,
            size: None,
            geometry: None,
            attributes: Vec::new(),
            texture: None,
            target: None,
            clear: wgpu::Color::TRANSPARENT,
            uniforms: bytemuck::Zeroable::zeroed(),
            resolution_override: None,
        }
    }

    /// Output size in pixels. Also sets `u_resolution` unless it is given
    /// explicitly.
    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.size = Some((width, height));
        self
    }

    pub fn geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    /// Declare one vertex attribute. Checked against the program's vertex
    /// layout at `run`.
    pub fn attribute(mut self, name: &str, components: u32, stride: u64, offset: u64) -> Self {
        self.attributes.push(AttributeSpec {
            name: name.to_owned(),
            components,
            stride,
            offset,
        });
        self
    }

    /// Bind the input texture to unit 0.
    pub fn texture(mut self, source: &'a dyn TextureSource) -> Self {
        self.texture = Some(source);
        self
    }

    pub fn uniform(mut self, name: &str, value: UniformValue) -> Result<Self, GpuError> {
        match (name, value) {
            ("u_resolution", UniformValue::Vec2(v)) => self.resolution_override = Some(v),
            ("u_resolution", _) => {
                return Err(GpuError::UniformType { name: name.to_owned(), expected: "vec2" })
            }
            ("u_image", UniformValue::TextureUnit(0)) => {}
            ("u_image", UniformValue::TextureUnit(unit)) => return Err(GpuError::TextureUnit(unit)),
            ("u_image", _) => {
                return Err(GpuError::UniformType { name: name.to_owned(), expected: "texture unit" })
            }
            ("u_kernel_H", UniformValue::FloatArray(weights)) => {
                let weights: [f32; 9] = weights
                    .as_slice()
                    .try_into()
                    .map_err(|_| GpuError::KernelLength(weights.len()))?;
                self.uniforms.set_kernel(&weights);
            }
            ("u_kernel_H", _) => {
                return Err(GpuError::UniformType { name: name.to_owned(), expected: "float array" })
            }
            (other, _) => return Err(GpuError::UnknownUniform(other.to_owned())),
        }
        Ok(self)
    }

    /// Draw into a new framebuffer instead of the visible surface.
    pub fn redirect_to(mut self, name: &'a str, format: PixelFormat, attachment: u32) -> Result<Self, GpuError> {
        if attachment != 0 {
            return Err(GpuError::UnsupportedAttachment(attachment));
        }
        self.target = Some(Target::Offscreen { name, format, attachment });
        Ok(self)
    }

    pub fn present_to(mut self, surface: SurfaceTarget<'a>) -> Self {
        self.target = Some(Target::Surface(surface));
        self
    }

    /// Colour the target is cleared to before the draw.
    pub fn clear_canvas(mut self, color: wgpu::Color) -> Self {
        self.clear = color;
        self
    }

    /// Execute the pass and wait for it to complete.
    ///
    /// # Errors
    /// `MissingInput` for an unset size, geometry, texture or target;
    /// `AttributeLayout` if the declared attributes differ from the program's
    /// vertex layout; `SizeMismatch`/`FormatMismatch` for an incompatible
    /// input or target; `Validation` for anything wgpu rejects.
    pub fn run(self) -> Result<Option<Framebuffer>, GpuError> {
        let label = self.program.label();
        let (width, height) = self.size.ok_or(GpuError::MissingInput("size"))?;
        let geometry = self.geometry.as_ref().ok_or(GpuError::MissingInput("geometry"))?;
        let input = self.texture.ok_or(GpuError::MissingInput("input texture"))?;
        let target = self.target.ok_or(GpuError::MissingInput("target"))?;
        check_attributes(&self.attributes)?;

        if input.size() != (width, height) {
            return Err(GpuError::SizeMismatch { expected: (width, height), got: input.size() });
        }

        let mut uniforms = self.uniforms;
        uniforms.resolution = self
            .resolution_override
            .unwrap_or(StageUniforms::for_size(width, height).resolution);

        let _guard = self.ctx.lock_submission();

        let (framebuffer, surface_view) = match target {
            Target::Offscreen { name, format, attachment } => {
                target_format_matches(self.program, format.texture_format())?;
                let fb = Framebuffer::new(self.ctx, name, format, attachment, width, height)?;
                (Some(fb), None)
            }
            Target::Surface(surface) => {
                target_format_matches(self.program, surface.format)?;
                if (surface.width, surface.height) != (width, height) {
                    return Err(GpuError::SizeMismatch {
                        expected: (width, height),
                        got: (surface.width, surface.height),
                    });
                }
                (None, Some(surface.view))
            }
        };
        let (target_name, target_view) = match (&framebuffer, surface_view) {
            (Some(fb), _) => (fb.name.as_str(), &fb.view),
            (None, Some(view)) => ("surface", view),
            (None, None) => return Err(GpuError::MissingInput("target")),
        };

        debug!(stage = label, target = target_name, width, height, "stage begin");

        let index = self
            .ctx
            .validation_scope(|device| {
                let vertex_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(label),
                    contents: bytemuck::cast_slice(geometry.vertices()),
                    usage: wgpu::BufferUsages::VERTEX,
                });
                let uniform_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(label),
                    contents: bytemuck::bytes_of(&uniforms),
                    usage: wgpu::BufferUsages::UNIFORM,
                });
                let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(label),
                    layout: &self.program.bind_group_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::TextureView(input.view()),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::Sampler(&self.program.sampler),
                        },
                        wgpu::BindGroupEntry { binding: 2, resource: uniform_buf.as_entire_binding() },
                    ],
                });

                let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some(label),
                });
                {
                    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                        label: Some(label),
                        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                            view: target_view,
                            resolve_target: None,
                            ops: wgpu::Operations {
                                load: wgpu::LoadOp::Clear(self.clear),
                                store: wgpu::StoreOp::Store,
                            },
                        })],
                        depth_stencil_attachment: None,
                        timestamp_writes: None,
                        occlusion_query_set: None,
                    });
                    pass.set_pipeline(&self.program.pipeline);
                    pass.set_bind_group(0, &bind_group, &[]);
                    pass.set_vertex_buffer(0, vertex_buf.slice(..));
                    pass.draw(0..geometry.vertex_count(), 0..1);
                }
                self.ctx.queue.submit(std::iter::once(encoder.finish()))
            })
            .map_err(|message| GpuError::Validation { label: label.to_owned(), message })?;

        self.ctx.device.poll(wgpu::Maintain::WaitForSubmissionIndex(index));
        debug!(stage = label, target = target_name, "stage done");

        Ok(framebuffer)
    }
}

fn target_format_matches(program: &Program, got: wgpu::TextureFormat) -> Result<(), GpuError> {
    if program.target_format() != got {
        return Err(GpuError::FormatMismatch { expected: program.target_format(), got });
    }
    Ok(())
}

/// The declared attributes must be exactly the program's vertex layout
/// (any order).
fn check_attributes(declared: &[AttributeSpec]) -> Result<(), GpuError> {
    let expected = Vertex::attribute_specs();
    if declared.is_empty() {
        return Err(GpuError::MissingInput("vertex attributes"));
    }
    for attr in declared {
        if !expected.contains(attr) {
            return Err(GpuError::AttributeLayout(attr.name.clone()));
        }
    }
    if let Some(missing) = expected.iter().find(|e| !declared.contains(e)) {
        return Err(GpuError::AttributeLayout(missing.name.clone()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
