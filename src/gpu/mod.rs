// gpu/mod.rs — wgpu rendering layer.
//
// Everything that touches the device lives here. The CPU modules of the
// parent crate (`kernel`, `stencil`) define the numbers and per-pixel
// semantics; the GPU tests check the rendered output against
// `stencil::reference_edges` pixel-for-pixel.
//
//   device   rendering context, submission lock, error type
//   image    source raster, framebuffers, visible surface, readback
//   program  the three compiled shading programs and their layouts
//   stage    one full-screen pass (descriptor + run)
//   edge     the three-stage LoG edge pipeline

pub mod device;
pub mod image;
pub mod program;
pub mod stage;
pub mod edge;

pub use device::{DeviceOptions, GpuDevice, GpuError};
pub use edge::{EdgePipeline, StageOutputs};
