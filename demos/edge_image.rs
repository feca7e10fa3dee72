// demos/edge_image.rs — Run the edge pipeline on an image file.
//
// Loads an image as 8-bit luma, runs the three-stage LoG edge pipeline into a
// headless surface, reads the surface back and writes it as a PNG. The GPU
// result is compared with the CPU reference and the mismatch count printed.
//
// USAGE
// ─────
//   cargo run --example edge_image                               # generated checkerboard
//   cargo run --example edge_image -- in.png                     # writes edges.png
//   cargo run --example edge_image -- in.png out.png config.json # EdgeConfig as JSON
//
//   RUST_LOG=logedge=debug cargo run --example edge_image -- in.png

use std::error::Error;

use logedge::config::EdgeConfig;
use logedge::gpu::device::GpuDevice;
use logedge::gpu::edge::EdgePipeline;
use logedge::gpu::image::{DisplaySurface, GpuRaster};
use logedge::image::Image;
use logedge::stencil::reference_edges;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let output = args.get(2).map(String::as_str).unwrap_or("edges.png");
    let config: EdgeConfig = match args.get(3) {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => EdgeConfig::default(),
    };

    let src = match args.get(1) {
        Some(path) => load_image(path)?,
        None => {
            eprintln!("[edge_image] no image path given, using generated checkerboard");
            checkerboard(640, 480, 32)
        }
    };
    eprintln!("[edge_image] source: {}×{}, kernel {:?}", src.width(), src.height(), config.kernel);

    let gpu = GpuDevice::new()?;
    eprintln!("[edge_image] GPU: {}", gpu.adapter_info);

    let raster = GpuRaster::upload(&gpu, &src)?;
    let surface = DisplaySurface::new(&gpu, raster.width, raster.height)?;
    let pipeline = EdgePipeline::new(&gpu, config, DisplaySurface::FORMAT)?;

    let t0 = std::time::Instant::now();
    pipeline.run(&raster, surface.target())?;
    eprintln!("[edge_image] pipeline: {:.2} ms", t0.elapsed().as_secs_f64() * 1e3);

    let shown = surface.readback_luma(&gpu)?;
    let (_, edges) = reference_edges(&src, pipeline.weights());
    let mismatches = edges
        .pixels()
        .filter(|&(x, y, v)| (shown.get(x, y) == 255) != (v == 1.0))
        .count();
    let edge_count = shown.pixels().filter(|&(_, _, v)| v == 255).count();
    eprintln!("[edge_image] {edge_count} edge pixels, {mismatches} differ from the CPU reference");

    image::GrayImage::from_raw(raster.width, raster.height, shown.as_slice().to_vec())
        .ok_or("surface readback has the wrong length")?
        .save(output)?;
    eprintln!("[edge_image] wrote {output}");
    Ok(())
}

fn load_image(path: &str) -> Result<Image<u8>, image::ImageError> {
    let img = image::open(path)?.to_luma8();
    let (w, h) = img.dimensions();
    Ok(Image::from_vec(w as usize, h as usize, img.into_raw()))
}

fn checkerboard(width: usize, height: usize, tile: usize) -> Image<u8> {
    Image::from_fn(width, height, |x, y| if (x / tile + y / tile) % 2 == 0 { 255 } else { 0 })
}
