// gpu/edge.rs — Three-pass LoG edge detection.
//
//   raster ──► [1] log_step ──► fbo1 ──► [2] zero_crossing ──► fbo2 ──► [3] passthrough ──► surface
//
// Stage 1 convolves channel 0 with the 3×3 kernel and keeps only the sign
// (1.0 where the response is ≥ 0). Stage 2 marks pixels that are 0 in the
// mask but touch a 1 among their eight neighbours. Stage 3 copies the edge
// map to the visible surface with alpha 1.
//
// Programs are compiled once in `new`. Stage descriptors and both
// intermediate framebuffers are rebuilt on every `run` and released when it
// returns (`run_with_buffers` hands them to the caller instead).
//
// The whole sequence holds the context's submission lock, so two pipelines
// sharing one `GpuDevice` never interleave their stages. Each stage waits for
// its own submission before the next one is recorded.

use tracing::debug;

use crate::config::{EdgeConfig, KernelSource};
use crate::gpu::device::{GpuDevice, GpuError};
use crate::gpu::image::{Framebuffer, GpuRaster, SurfaceTarget, TextureSource};
use crate::gpu::program::{Program, ProgramSource};
use crate::gpu::stage::{Geometry, PipelineStage, UniformValue};

/// The two intermediate framebuffers of one run.
pub struct StageOutputs {
    /// Step-thresholded convolution response.
    pub fbo1: Framebuffer,
    /// Zero-crossing edge map.
    pub fbo2: Framebuffer,
}

pub struct EdgePipeline<'ctx> {
    ctx: &'ctx GpuDevice,
    config: EdgeConfig,
    weights: [f32; 9],
    convolution: Program,
    threshold: Program,
    present: Program,
}

impl<'ctx> EdgePipeline<'ctx> {
    /// Resolve the kernel and compile the three programs. The last stage is
    /// compiled for `surface_format`; every `run` must present to a surface
    /// of that format.
    ///
    /// # Errors
    /// `Kernel` if the configured kernel cannot be built,
    /// `ProgramCompilation` if any program fails to compile.
    pub fn new(
        ctx: &'ctx GpuDevice,
        config: EdgeConfig,
        surface_format: wgpu::TextureFormat,
    ) -> Result<Self, GpuError> {
        let weights = config.kernel.weights()?;
        if config.kernel == KernelSource::Laplacian {
            debug!(?weights, "using the literal Laplacian kernel");
        }

        let intermediate = config.intermediate_format.texture_format();
        let convolution = Program::compile(ctx, &ProgramSource::CONVOLUTION, intermediate)?;
        let threshold = Program::compile(ctx, &ProgramSource::THRESHOLD, intermediate)?;
        let present = Program::compile(ctx, &ProgramSource::PASSTHROUGH, surface_format)?;

        Ok(EdgePipeline { ctx, config, weights, convolution, threshold, present })
    }

    pub fn config(&self) -> &EdgeConfig {
        &self.config
    }

    /// The nine weights uploaded as `u_kernel_H`.
    pub fn weights(&self) -> &[f32; 9] {
        &self.weights
    }

    /// Run all three stages and present the edge map to `surface`.
    ///
    /// Returns `raster` itself; the result is on the surface. Read it back
    /// separately (e.g. [`crate::gpu::image::DisplaySurface::readback_luma`]).
    pub fn run<'r>(&self, raster: &'r GpuRaster, surface: SurfaceTarget<'_>) -> Result<&'r GpuRaster, GpuError> {
        self.run_with_buffers(raster, surface)?;
        Ok(raster)
    }

    /// Like [`run`](Self::run), but keeps the intermediate framebuffers.
    pub fn run_with_buffers(&self, raster: &GpuRaster, surface: SurfaceTarget<'_>) -> Result<StageOutputs, GpuError> {
        let (width, height) = raster.size();
        if (surface.width, surface.height) != (width, height) {
            return Err(GpuError::SizeMismatch {
                expected: (width, height),
                got: (surface.width, surface.height),
            });
        }
        if surface.format != self.present.target_format() {
            return Err(GpuError::FormatMismatch {
                expected: self.present.target_format(),
                got: surface.format,
            });
        }

        let _guard = self.ctx.lock_submission();
        let format = self.config.intermediate_format;
        let clear = self.config.clear_color();

        let fbo1 = self
            .stage(&self.convolution, raster)
            .uniform("u_resolution", UniformValue::Vec2([1.0 / width as f32, 1.0 / height as f32]))?
            .uniform("u_image", UniformValue::TextureUnit(0))?
            .uniform("u_kernel_H", UniformValue::FloatArray(self.weights.to_vec()))?
            .redirect_to("fbo1", format, 0)?
            .clear_canvas(clear)
            .run()?
            .ok_or(GpuError::MissingInput("fbo1"))?;

        let fbo2 = self
            .stage(&self.threshold, &fbo1)
            .redirect_to("fbo2", format, 0)?
            .clear_canvas(clear)
            .run()?
            .ok_or(GpuError::MissingInput("fbo2"))?;

        self.stage(&self.present, &fbo2)
            .present_to(surface)
            .clear_canvas(clear)
            .run()?;

        debug!(width, height, "edge pipeline done");
        Ok(StageOutputs { fbo1, fbo2 })
    }

    /// A stage with the shared size, geometry and vertex layout.
    fn stage<'s>(&'s self, program: &'s Program, input: &'s dyn TextureSource) -> PipelineStage<'s> {
        let (width, height) = input.size();
        PipelineStage::new(self.ctx, program)
            .size(width, height)
            .geometry(Geometry::rectangle(width, height))
            .attribute("a_vertex", 2, 16, 0)
            .attribute("a_texCoord", 2, 16, 8)
            .texture(input)
    }
}
