// logedge: Laplacian-of-Gaussian edge detection on the GPU
//
// CPU side: kernel generation and the per-pixel reference semantics.
// GPU side (`gpu`): three full-screen render passes over wgpu.

pub mod image;
pub mod kernel;
pub mod stencil;
pub mod config;
pub mod gpu;

pub use config::{EdgeConfig, KernelSource};
pub use kernel::{log_kernel, Kernel, KernelError, LAPLACIAN_3X3};
