// config.rs — Edge pipeline configuration.
//
// `EdgeConfig` deserializes from JSON (or any serde format) and every field
// has a default, so `{}` is a valid configuration:
//
//   {
//     "kernel": { "log": { "size": 3, "sigma": 1.0 } },
//     "clear_color": [0.0, 1.0, 1.0, 1.0],
//     "intermediate_format": "float32"
//   }
//
// The default kernel is the literal 8-neighbour Laplacian, not a generated
// LoG kernel. Both are available; pick one explicitly with `kernel`.

use serde::Deserialize;

use crate::gpu::image::PixelFormat;
use crate::kernel::{log_kernel, KernelError, LAPLACIAN_3X3};

/// Where the stage-1 convolution weights come from.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KernelSource {
    /// [`LAPLACIAN_3X3`], used verbatim.
    #[default]
    Laplacian,
    /// `log_kernel(size, sigma)`. The GPU pass only accepts `size == 3`.
    Log { size: usize, sigma: f64 },
    /// Caller-supplied row-major 3×3 weights.
    Custom([f32; 9]),
}

impl KernelSource {
    /// Resolve to the nine weights uploaded as `u_kernel_H`.
    pub fn weights(&self) -> Result<[f32; 9], KernelError> {
        match self {
            KernelSource::Laplacian => Ok(LAPLACIAN_3X3),
            KernelSource::Log { size, sigma } => log_kernel(*size, *sigma)?.to_3x3(),
            KernelSource::Custom(w) => Ok(*w),
        }
    }
}

/// Settings for [`crate::gpu::edge::EdgePipeline`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EdgeConfig {
    pub kernel: KernelSource,
    /// RGBA each stage clears its target to before drawing.
    pub clear_color: [f64; 4],
    /// Format of the two intermediate framebuffers.
    pub intermediate_format: PixelFormat,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            kernel: KernelSource::Laplacian,
            clear_color: [0.0, 1.0, 1.0, 1.0],
            intermediate_format: PixelFormat::Float32,
        }
    }
}

impl EdgeConfig {
    pub fn clear_color(&self) -> wgpu::Color {
        let [r, g, b, a] = self.clear_color;
        wgpu::Color { r, g, b, a }
    }
}
