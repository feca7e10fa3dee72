// gpu/image.rs — Textures the edge pipeline reads from and renders into.
//
// THREE KINDS OF IMAGE
// ────────────────────
//   GpuRaster      — the caller's source raster, an R8Unorm texture uploaded
//                    from an `Image<u8>`. Stages sample channel 0 (`.r`).
//   Framebuffer    — an off-screen colour attachment created by a stage that
//                    redirects its output. Tagged with a stable name ("fbo1",
//                    "fbo2"), a `PixelFormat` and an attachment index. The
//                    next stage binds it as its input texture.
//   SurfaceTarget  — the visible surface the last stage presents to. Any
//                    caller-owned view works (e.g. a swapchain frame);
//                    `DisplaySurface` is an owned, readable stand-in for
//                    headless use.
//
// STRIDE COMPACTION (upload)
// ──────────────────────────
// `Image<u8>` rows may carry padding (stride > width), and
// `copy_buffer_to_texture` wants rows at a multiple of
// `COPY_BYTES_PER_ROW_ALIGNMENT` (256) bytes. The upload copies each row's
// active pixels into a staging buffer laid out at that alignment.
//
// READBACK
// ────────
// Readback is synchronous: copy texture → MAP_READ buffer, submit, poll until
// the map callback fires, strip row padding. Tests and the demo use it; the
// pipeline itself never reads pixels back.

use serde::Deserialize;
use wgpu::util::DeviceExt;

use crate::gpu::device::{GpuDevice, GpuError};
use crate::image::Image;

const COPY_ALIGNMENT: u32 = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

// ---------------------------------------------------------------------------
// TextureSource: anything a stage can sample
// ---------------------------------------------------------------------------

/// A texture a stage can bind as its input (`u_image`, texture unit 0).
pub trait TextureSource {
    fn view(&self) -> &wgpu::TextureView;
    fn size(&self) -> (u32, u32);
}

// ---------------------------------------------------------------------------
// PixelFormat
// ---------------------------------------------------------------------------

/// Pixel format of an off-screen framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// 32-bit float per channel (`Rgba32Float`).
    Float32,
    /// 8-bit normalized per channel (`Rgba8Unorm`).
    Unorm8,
}

impl PixelFormat {
    pub fn texture_format(self) -> wgpu::TextureFormat {
        match self {
            PixelFormat::Float32 => wgpu::TextureFormat::Rgba32Float,
            PixelFormat::Unorm8 => wgpu::TextureFormat::Rgba8Unorm,
        }
    }

    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Float32 => 16,
            PixelFormat::Unorm8 => 4,
        }
    }
}

// ---------------------------------------------------------------------------
// GpuRaster
// ---------------------------------------------------------------------------

/// A single-channel `u8` raster resident on the GPU (`R8Unorm`).
pub struct GpuRaster {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
}

impl GpuRaster {
    /// Upload a CPU image, compacting stride padding away.
    ///
    /// # Errors
    /// [`GpuError::EmptyRaster`] for a zero-sized image,
    /// [`GpuError::TextureTooLarge`] past the device's 2D texture limit.
    pub fn upload(gpu: &GpuDevice, src: &Image<u8>) -> Result<Self, GpuError> {
        let (width, height) = gpu.check_texture_size(src.width(), src.height())?;

        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("GpuRaster"),
            size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let staging = compact_rows(src, align_to(width, COPY_ALIGNMENT));
        let staging_buf = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("GpuRaster::staging"),
            contents: &staging,
            usage: wgpu::BufferUsages::COPY_SRC,
        });

        let mut encoder = gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("GpuRaster::upload"),
        });
        encoder.copy_buffer_to_texture(
            wgpu::ImageCopyBuffer {
                buffer: &staging_buf,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(align_to(width, COPY_ALIGNMENT)),
                    rows_per_image: Some(height),
                },
            },
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        );
        let _guard = gpu.lock_submission();
        gpu.queue.submit(std::iter::once(encoder.finish()));

        Ok(GpuRaster { texture, view, width, height })
    }

    /// Read the raster back as a compact `Image<u8>`.
    pub fn readback(&self, gpu: &GpuDevice) -> Result<Image<u8>, GpuError> {
        let bytes = read_texture(gpu, &self.texture, self.width, self.height, 1)?;
        Ok(Image::from_vec(self.width as usize, self.height as usize, bytes))
    }
}

impl TextureSource for GpuRaster {
    fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

// ---------------------------------------------------------------------------
// Framebuffer
// ---------------------------------------------------------------------------

/// An off-screen render target owned by the stage that created it.
pub struct Framebuffer {
    pub name: String,
    pub format: PixelFormat,
    pub attachment: u32,
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
}

impl Framebuffer {
    pub(crate) fn new(
        gpu: &GpuDevice,
        name: &str,
        format: PixelFormat,
        attachment: u32,
        width: u32,
        height: u32,
    ) -> Result<Self, GpuError> {
        if attachment != 0 {
            return Err(GpuError::UnsupportedAttachment(attachment));
        }
        gpu.check_texture_size(width as usize, height as usize)?;
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(name),
            size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: format.texture_format(),
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(Framebuffer {
            name: name.to_owned(),
            format,
            attachment,
            texture,
            view,
            width,
            height,
        })
    }

    /// Read channel 0 back as unit-range floats.
    pub fn readback_red(&self, gpu: &GpuDevice) -> Result<Image<f32>, GpuError> {
        let bpp = self.format.bytes_per_pixel();
        let bytes = read_texture(gpu, &self.texture, self.width, self.height, bpp)?;
        let red: Vec<f32> = bytes
            .chunks_exact(bpp as usize)
            .map(|px| match self.format {
                PixelFormat::Float32 => bytemuck::pod_read_unaligned::<f32>(&px[..4]),
                PixelFormat::Unorm8 => f32::from(px[0]) / 255.0,
            })
            .collect();
        Ok(Image::from_vec(self.width as usize, self.height as usize, red))
    }
}

impl TextureSource for Framebuffer {
    fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

// ---------------------------------------------------------------------------
// Visible surface
// ---------------------------------------------------------------------------

/// A borrowed presentation target: a view, its format and its size.
#[derive(Clone, Copy)]
pub struct SurfaceTarget<'a> {
    pub view: &'a wgpu::TextureView,
    pub format: wgpu::TextureFormat,
    pub width: u32,
    pub height: u32,
}

/// An owned, readable `Rgba8Unorm` surface for headless rendering.
pub struct DisplaySurface {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
}

impl DisplaySurface {
    pub const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

    pub fn new(gpu: &GpuDevice, width: u32, height: u32) -> Result<Self, GpuError> {
        gpu.check_texture_size(width as usize, height as usize)?;
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("DisplaySurface"),
            size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(DisplaySurface { texture, view, width, height })
    }

    pub fn target(&self) -> SurfaceTarget<'_> {
        SurfaceTarget {
            view: &self.view,
            format: Self::FORMAT,
            width: self.width,
            height: self.height,
        }
    }

    /// Read the presented pixels back as RGBA8 rows (compact, 4 bytes per pixel).
    pub fn readback_rgba(&self, gpu: &GpuDevice) -> Result<Vec<u8>, GpuError> {
        read_texture(gpu, &self.texture, self.width, self.height, 4)
    }

    /// Channel 0 of the presented pixels.
    pub fn readback_luma(&self, gpu: &GpuDevice) -> Result<Image<u8>, GpuError> {
        let rgba = self.readback_rgba(gpu)?;
        let red: Vec<u8> = rgba.chunks_exact(4).map(|px| px[0]).collect();
        Ok(Image::from_vec(self.width as usize, self.height as usize, red))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Round `value` up to the next multiple of `alignment`.
#[inline]
pub(crate) fn align_to(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

/// Copy the active pixels of each row into rows of `aligned_row` bytes.
fn compact_rows(src: &Image<u8>, aligned_row: u32) -> Vec<u8> {
    let width = src.width();
    let mut staging = vec![0u8; aligned_row as usize * src.height()];
    for y in 0..src.height() {
        let dst = y * aligned_row as usize;
        staging[dst..dst + width].copy_from_slice(src.row(y));
    }
    staging
}

/// Synchronously copy a whole texture into CPU memory, stripping row padding.
fn read_texture(
    gpu: &GpuDevice,
    texture: &wgpu::Texture,
    width: u32,
    height: u32,
    bytes_per_pixel: u32,
) -> Result<Vec<u8>, GpuError> {
    let row_bytes = width * bytes_per_pixel;
    let aligned_bytes_per_row = align_to(row_bytes, COPY_ALIGNMENT);

    let readback_buf = gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback"),
        size: u64::from(aligned_bytes_per_row) * u64::from(height),
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("readback"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::ImageCopyBuffer {
            buffer: &readback_buf,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(aligned_bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
    );

    let _guard = gpu.lock_submission();
    let index = gpu.queue.submit(std::iter::once(encoder.finish()));

    let slice = readback_buf.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        // The receiver only disappears if this function already returned.
        let _ = tx.send(result);
    });
    gpu.device.poll(wgpu::Maintain::WaitForSubmissionIndex(index));
    rx.recv()
        .map_err(|_| GpuError::Readback("map callback never fired".into()))?
        .map_err(|e| GpuError::Readback(e.to_string()))?;

    let mapped = slice.get_mapped_range();
    let mut out = Vec::with_capacity((row_bytes * height) as usize);
    for y in 0..height as usize {
        let start = y * aligned_bytes_per_row as usize;
        out.extend_from_slice(&mapped[start..start + row_bytes as usize]);
    }
    drop(mapped);
    readback_buf.unmap();
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_to() {
        assert_eq!(align_to(0, 256), 0);
        assert_eq!(align_to(1, 256), 256);
        assert_eq!(align_to(256, 256), 256);
        assert_eq!(align_to(257, 256), 512);
        // 5 px of Rgba32Float
        assert_eq!(align_to(5 * 16, 256), 256);
    }

    #[test]
    fn test_pixel_format_mapping() {
        assert_eq!(PixelFormat::Float32.texture_format(), wgpu::TextureFormat::Rgba32Float);
        assert_eq!(PixelFormat::Unorm8.texture_format(), wgpu::TextureFormat::Rgba8Unorm);
        assert_eq!(PixelFormat::Float32.bytes_per_pixel(), 16);
    }

    #[test]
    fn test_compact_rows_strips_padding() {
        let img = Image::<u8>::from_vec_with_stride(3, 2, 4, vec![10, 20, 30, 0, 40, 50, 60, 0]);
        let staging = compact_rows(&img, 256);
        assert_eq!(staging.len(), 512);
        assert_eq!(&staging[0..3], &[10, 20, 30]);
        assert_eq!(&staging[256..259], &[40, 50, 60]);
        assert!(staging[3..256].iter().all(|&b| b == 0));
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
    fn inner_raster_readback_drops_stride() {
        let gpu = GpuDevice::new().expect("need a GPU adapter");
        // 300 px rows need 512-byte aligned copies; stride 301 adds host padding.
        let (w, h, stride) = (300usize, 3usize, 301usize);
        let data: Vec<u8> = (0..h * stride)
            .map(|i| if i % stride == w { 0xEE } else { (i % 251) as u8 })
            .collect();
        let strided = Image::from_vec_with_stride(w, h, stride, data);
        let compact = Image::from_fn(w, h, |x, y| strided.get(x, y));

        let raster = GpuRaster::upload(&gpu, &strided).unwrap();
        let back = raster.readback(&gpu).unwrap();
        assert_eq!(back.stride(), w);
        assert_eq!(back, compact);
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "requires a real GPU adapter"]
    fn test_raster_readback_drops_stride() {
        let out = run_gpu_test_in_subprocess("gpu::image::tests::inner_raster_readback_drops_stride");
        assert!(out.contains("GPU_TEST_OK"), "inner test failed:\n{out}");
    }
}
