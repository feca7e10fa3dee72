// gpu/device.rs — wgpu rendering context.
//
// Responsibilities:
//   - Enumerate adapters and pick the best one for the requested backends.
//   - Own the device, queue and instance for the lifetime of the context.
//   - Serialize GPU command submission per context (`lock_submission`).
//   - Turn wgpu validation errors into `GpuError` values (`validation_scope`).
//
// ADAPTER SELECTION:
// `request_adapter` may return a software rasterizer (llvmpipe, WARP) even
// when real hardware is present. We enumerate explicitly and rank hardware
// first. Software adapters are used only when nothing else exists and the
// caller allows it (`DeviceOptions::allow_software`, default on so that
// headless CI machines can still run the pipeline).
//
// VALIDATION ERRORS:
// By default wgpu reports validation failures to an uncaptured-error handler
// that panics. Shader compilation and render-pass recording are wrapped in
// `push_error_scope(Validation)` / `pop_error_scope()` instead, so a bad WGSL
// program or a format mismatch becomes a `Result::Err` the caller can handle.
// Error scopes are a stack owned by the device, not by the calling thread,
// so `validation_scope` holds the submission lock from push to pop. Without
// it a compile on one thread could pop the scope of a stage on another.
//
// SUBMISSION LOCK:
// The edge pipeline's stages must not interleave with another pipeline's
// stages on the same queue. `lock_submission` returns a guard on a reentrant
// mutex: `EdgePipeline::run` holds it across all three stages and each
// `PipelineStage::run` takes it again (reentrantly) around its own submit
// and error scope.

use std::fmt;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use thiserror::Error;
use tracing::info;

use crate::kernel::KernelError;

/// How to select and configure the adapter.
#[derive(Debug, Clone)]
pub struct DeviceOptions {
    pub backends: wgpu::Backends,
    pub power_preference: wgpu::PowerPreference,
    /// Accept a CPU/software adapter when no hardware adapter exists.
    pub allow_software: bool,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            backends: wgpu::Backends::PRIMARY,
            power_preference: wgpu::PowerPreference::HighPerformance,
            allow_software: true,
        }
    }
}

/// Cached adapter information for logging and debugging.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub name: String,
    pub vendor: u32,
    pub device: u32,
    pub device_type: wgpu::DeviceType,
    pub backend: wgpu::Backend,
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}, {:?})", self.name, self.backend, self.device_type)
    }
}

impl From<wgpu::AdapterInfo> for AdapterInfo {
    fn from(raw: wgpu::AdapterInfo) -> Self {
        AdapterInfo {
            name: raw.name,
            vendor: raw.vendor,
            device: raw.device,
            device_type: raw.device_type,
            backend: raw.backend,
        }
    }
}

/// The rendering context: device, queue, and the per-context submission lock.
///
/// Every pipeline and stage takes a `&GpuDevice` explicitly; there is no
/// global context.
///
/// # Field drop order
/// `_instance` is declared last so the `wgpu::Instance` outlives `device`
/// and `queue` (Rust drops fields top to bottom).
pub struct GpuDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: AdapterInfo,
    pub limits: wgpu::Limits,
    submission: ReentrantMutex<()>,
    _instance: wgpu::Instance,
}

impl GpuDevice {
    /// Create a context with [`DeviceOptions::default`].
    pub fn new() -> Result<Self, GpuError> {
        Self::new_with_options(&DeviceOptions::default())
    }

    pub fn new_with_options(options: &DeviceOptions) -> Result<Self, GpuError> {
        pollster::block_on(Self::init_async(options))
    }

    async fn init_async(options: &DeviceOptions) -> Result<Self, GpuError> {
        let flags = if cfg!(debug_assertions) {
            wgpu::InstanceFlags::VALIDATION
        } else {
            wgpu::InstanceFlags::empty()
        };

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: options.backends,
            flags,
            ..Default::default()
        });

        let all_adapters = instance.enumerate_adapters(options.backends);
        for a in &all_adapters {
            let info = a.get_info();
            info!(
                name = %info.name,
                backend = ?info.backend,
                device_type = ?info.device_type,
                "adapter found"
            );
        }

        let adapter = select_adapter(all_adapters, options)?;
        let adapter_info = AdapterInfo::from(adapter.get_info());
        info!(adapter = %adapter_info, "adapter selected");

        // Downlevel defaults keep the pipeline usable on GL/WebGL-class
        // hardware; width/height limits are taken from the adapter so large
        // rasters are not rejected needlessly.
        let adapter_limits = adapter.limits();
        let limits = wgpu::Limits {
            max_texture_dimension_2d: adapter_limits.max_texture_dimension_2d,
            ..wgpu::Limits::downlevel_defaults()
        };

        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("logedge"),
                    required_features: wgpu::Features::empty(),
                    required_limits: limits.clone(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .map_err(GpuError::DeviceRequest)?;

        Ok(GpuDevice {
            device,
            queue,
            adapter_info,
            limits,
            submission: ReentrantMutex::new(()),
            _instance: instance,
        })
    }

    /// Acquire the per-context submission lock.
    ///
    /// Reentrant: a thread already holding the guard may lock again.
    pub fn lock_submission(&self) -> ReentrantMutexGuard<'_, ()> {
        self.submission.lock()
    }

    /// Run `f` inside a validation error scope. Any validation error raised
    /// by wgpu while `f` runs is returned as `Err(message)`.
    ///
    /// Holds the submission lock for the whole scope, so `f` must not block
    /// on another thread that needs the lock.
    pub fn validation_scope<T>(&self, f: impl FnOnce(&wgpu::Device) -> T) -> Result<T, String> {
        let _guard = self.lock_submission();
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let out = f(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(err.to_string()),
            None => Ok(out),
        }
    }

    /// Reject textures the device cannot allocate; returns the size as `u32`.
    pub fn check_texture_size(&self, width: usize, height: usize) -> Result<(u32, u32), GpuError> {
        if width == 0 || height == 0 {
            return Err(GpuError::EmptyRaster);
        }
        let max = self.limits.max_texture_dimension_2d;
        if width > max as usize || height > max as usize {
            return Err(GpuError::TextureTooLarge { width, height, max });
        }
        Ok((width as u32, height as u32))
    }
}

impl fmt::Display for GpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GpuDevice {{ adapter: {}, max_texture: {} }}",
            self.adapter_info, self.limits.max_texture_dimension_2d
        )
    }
}

// ============================================================
// Adapter ranking
// ============================================================

/// Lower is better. `None` means "never pick".
fn adapter_rank(device_type: wgpu::DeviceType, allow_software: bool, prefer_low_power: bool) -> Option<u8> {
    use wgpu::DeviceType::*;
    let (discrete, integrated) = if prefer_low_power { (1, 0) } else { (0, 1) };
    match device_type {
        DiscreteGpu => Some(discrete),
        IntegratedGpu => Some(integrated),
        VirtualGpu => Some(2),
        Other => Some(3),
        Cpu if allow_software => Some(4),
        Cpu => None,
    }
}

fn select_adapter(adapters: Vec<wgpu::Adapter>, options: &DeviceOptions) -> Result<wgpu::Adapter, GpuError> {
    let prefer_low_power = options.power_preference == wgpu::PowerPreference::LowPower;
    adapters
        .into_iter()
        .filter_map(|a| {
            adapter_rank(a.get_info().device_type, options.allow_software, prefer_low_power)
                .map(|rank| (rank, a))
        })
        .min_by_key(|(rank, _)| *rank)
        .map(|(_, a)| a)
        .ok_or(GpuError::NoSuitableAdapter)
}

// ============================================================
// Error type
// ============================================================

/// Errors from the GPU layer: context creation, program compilation and
/// stage execution. Every variant aborts the current `EdgePipeline::run`.
#[derive(Debug, Error)]
pub enum GpuError {
    #[error("no suitable GPU adapter found")]
    NoSuitableAdapter,

    #[error("device request failed: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    #[error("program `{label}` failed to compile: {message}")]
    ProgramCompilation { label: String, message: String },

    #[error("stage `{label}` failed validation: {message}")]
    Validation { label: String, message: String },

    #[error("raster has zero width or height")]
    EmptyRaster,

    #[error("texture {width}×{height} exceeds device limit of {max}")]
    TextureTooLarge { width: usize, height: usize, max: u32 },

    #[error("size mismatch: expected {expected:?}, got {got:?}")]
    SizeMismatch { expected: (u32, u32), got: (u32, u32) },

    #[error("target format {got:?} does not match program format {expected:?}")]
    FormatMismatch { expected: wgpu::TextureFormat, got: wgpu::TextureFormat },

    #[error("only color attachment 0 is supported, got {0}")]
    UnsupportedAttachment(u32),

    #[error("vertex attribute `{0}` does not match the program's vertex layout")]
    AttributeLayout(String),

    #[error("stage is missing its {0}")]
    MissingInput(&'static str),

    #[error("unknown uniform `{0}`")]
    UnknownUniform(String),

    #[error("uniform `{name}` expects {expected}")]
    UniformType { name: String, expected: &'static str },

    #[error("u_kernel_H needs 9 weights, got {0}")]
    KernelLength(usize),

    #[error("texture unit {0} is not bound; stages sample unit 0 only")]
    TextureUnit(u32),

    #[error("readback failed: {0}")]
    Readback(String),

    #[error(transparent)]
    Kernel(#[from] KernelError),
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_prefers_discrete_for_high_performance() {
        let d = adapter_rank(wgpu::DeviceType::DiscreteGpu, true, false).unwrap();
        let i = adapter_rank(wgpu::DeviceType::IntegratedGpu, true, false).unwrap();
        assert!(d < i);
    }

    #[test]
    fn test_rank_prefers_integrated_for_low_power() {
        let d = adapter_rank(wgpu::DeviceType::DiscreteGpu, true, true).unwrap();
        let i = adapter_rank(wgpu::DeviceType::IntegratedGpu, true, true).unwrap();
        assert!(i < d);
    }

    #[test]
    fn test_rank_software_last_or_rejected() {
        let cpu = adapter_rank(wgpu::DeviceType::Cpu, true, false).unwrap();
        let other = adapter_rank(wgpu::DeviceType::Other, true, false).unwrap();
        assert!(other < cpu);
        assert_eq!(adapter_rank(wgpu::DeviceType::Cpu, false, false), None);
    }

    #[test]
    fn test_default_options() {
        let opts = DeviceOptions::default();
        assert!(opts.allow_software);
        assert_eq!(opts.backends, wgpu::Backends::PRIMARY);
    }

    fn run_gpu_test_in_subprocess(test_name: &str) -> String {
        let output = std::process::Command::new("cargo")
            .args(["test", "--lib", "--", test_name, "--exact", "--ignored", "--nocapture"])
            .output()
            .unwrap_or_else(|e| panic!("subprocess failed for {test_name}: {e}"));
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        print!("{stdout}"); eprint!("{stderr}");
        stdout + &stderr
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_validation_scope_excludes_other_threads() {
        let gpu = GpuDevice::new().expect("need a GPU adapter");
        let (inside, nested) = gpu
            .validation_scope(|_| {
                let inside = std::thread::scope(|s| {
                    s.spawn(|| gpu.submission.try_lock().is_some()).join().unwrap()
                });
                // Same thread: the lock is reentrant.
                let nested = gpu.validation_scope(|_| ()).is_ok();
                (inside, nested)
            })
            .unwrap();
        assert!(!inside, "another thread took the lock inside an error scope");
        assert!(nested);
        assert!(gpu.submission.try_lock().is_some(), "lock released after the scope");
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_concurrent_compiles_keep_their_own_errors() {
        use crate::gpu::program::{Program, ProgramSource};

        let gpu = GpuDevice::new().expect("need a GPU adapter");
        let broken = ProgramSource {
            label: "broken",
            vertex: ProgramSource::PASSTHROUGH.vertex,
            fragment: "@fragment fn fs_main( -> @location(0) vec4<f32> {",
        };
        let format = wgpu::TextureFormat::Rgba8Unorm;
        std::thread::scope(|s| {
            let bad = s.spawn(|| {
                (0..8).all(|_| Program::compile(&gpu, &broken, format).is_err())
            });
            let good = s.spawn(|| {
                (0..8).all(|_| Program::compile(&gpu, &ProgramSource::PASSTHROUGH, format).is_ok())
            });
            assert!(bad.join().unwrap(), "a broken program compiled");
            assert!(good.join().unwrap(), "a valid program was blamed for another's error");
        });
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "requires a real GPU adapter"]
    fn test_validation_scope_excludes_other_threads() {
        let out = run_gpu_test_in_subprocess("gpu::device::tests::inner_validation_scope_excludes_other_threads");
        assert!(out.contains("GPU_TEST_OK"), "inner test failed:\n{out}");
    }

    #[test]
    #[ignore = "requires a real GPU adapter"]
    fn test_concurrent_compiles_keep_their_own_errors() {
        let out = run_gpu_test_in_subprocess("gpu::device::tests::inner_concurrent_compiles_keep_their_own_errors");
        assert!(out.contains("GPU_TEST_OK"), "inner test failed:\n{out}");
    }

    #[test]
    fn test_error_messages() {
        let e = GpuError::SizeMismatch { expected: (5, 5), got: (4, 5) };
        assert_eq!(e.to_string(), "size mismatch: expected (5, 5), got (4, 5)");
        let e: GpuError = KernelError::ZeroSum.into();
        assert!(e.to_string().contains("sum to zero"));
    }
}
