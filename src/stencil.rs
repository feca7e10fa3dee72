// stencil.rs — Per-pixel semantics of the three edge stages, on the CPU.
//
// Every function here computes exactly what one fragment invocation of the
// matching WGSL program computes, in the same order of operations:
//
//   convolve_step   ↔  shaders/log_step.wgsl       (stage 1)
//   zero_crossing   ↔  shaders/zero_crossing.wgsl  (stage 2)
//   passthrough     ↔  shaders/passthrough.wgsl    (stage 3)
//
// `reference_edges` runs stages 1 and 2 over a whole image. It is the oracle
// the GPU tests compare against pixel-for-pixel; the crate has no CPU
// execution path for `EdgePipeline`.
//
// BORDER POLICY
// ─────────────
// Neighbours outside the image are clamp-to-edge: the nearest edge texel is
// repeated. This matches `AddressMode::ClampToEdge` on the stage sampler.
// Consequence: a flat field has no border artifacts at any stage.

use crate::image::{Image, Pixel};

/// Row-major 3×3 neighbourhood of unit intensities. Index 4 is the center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighborhood(pub [f32; 9]);

impl Neighborhood {
    /// Every sample equal to `value`.
    pub fn flat(value: f32) -> Self {
        Neighborhood([value; 9])
    }

    /// Sample channel 0 around (x, y) with clamp-to-edge addressing.
    pub fn sample<T: Pixel>(img: &Image<T>, x: usize, y: usize) -> Self {
        let mut out = [0.0f32; 9];
        let (cx, cy) = (x as isize, y as isize);
        let mut i = 0;
        for dy in -1..=1 {
            for dx in -1..=1 {
                out[i] = img.get_clamped(cx + dx, cy + dy).to_unit();
                i += 1;
            }
        }
        Neighborhood(out)
    }

    #[inline]
    pub fn center(&self) -> f32 {
        self.0[4]
    }

    /// The eight samples around the center.
    pub fn ring(&self) -> impl Iterator<Item = f32> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != 4)
            .map(|(_, &v)| v)
    }
}

/// Weighted sum of the neighbourhood, then a unit step inclusive at zero.
///
/// Returns 1.0 when `Σ kernel[i]·n[i] ≥ 0`, else 0.0. The sum is taken as
///
/// ```text
/// Σ_{i≠4} k[i]·(n[i] − n[4])  +  n[4]·Σ k[i]
/// ```
///
/// which is the same value, but exactly `n[4]·Σk` on a flat neighbourhood:
/// every difference is 0, so a zero-sum kernel gives exactly 0 at any level.
/// `log_step.wgsl` evaluates the same expression in the same order.
pub fn convolve_step(n: &Neighborhood, kernel: &[f32; 9]) -> f32 {
    let center = n.center();
    let kernel_sum = kernel.iter().fold(0.0f32, |acc, &k| acc + k);
    let ring = kernel
        .iter()
        .zip(n.0.iter())
        .enumerate()
        .filter(|&(i, _)| i != 4)
        .fold(0.0f32, |acc, (_, (&k, &a))| acc + k * (a - center));
    let response = ring + center * kernel_sum;
    if response >= 0.0 { 1.0 } else { 0.0 }
}

/// 1.0 iff the center is 0.0 and at least one of the eight neighbours is 1.0.
pub fn zero_crossing(n: &Neighborhood) -> f32 {
    if n.center() == 0.0 && n.ring().any(|v| v == 1.0) {
        1.0
    } else {
        0.0
    }
}

/// RGB copied verbatim, alpha forced to 1.
pub fn passthrough(rgba: [f32; 4]) -> [f32; 4] {
    [rgba[0], rgba[1], rgba[2], 1.0]
}

/// Run stage 1 then stage 2 over `src`.
///
/// Returns `(mask, edges)`: the step-thresholded Laplacian response and the
/// zero-crossing map, both binary and the same size as `src`.
pub fn reference_edges<T: Pixel>(src: &Image<T>, kernel: &[f32; 9]) -> (Image<f32>, Image<f32>) {
    let (w, h) = (src.width(), src.height());
    let mask = Image::from_fn(w, h, |x, y| convolve_step(&Neighborhood::sample(src, x, y), kernel));
    let edges = Image::from_fn(w, h, |x, y| zero_crossing(&Neighborhood::sample(&mask, x, y)));
    (mask, edges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::LAPLACIAN_3X3;

    #[test]
    fn test_sample_order_matches_kernel_layout() {
        // Pixel value encodes its position so the sample order is visible.
        let img = Image::<f32>::from_fn(3, 3, |x, y| (y * 3 + x) as f32);
        let n = Neighborhood::sample(&img, 1, 1);
        assert_eq!(n.0, [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn test_sample_clamps_at_corner() {
        let img = Image::<f32>::from_fn(3, 3, |x, y| (y * 3 + x) as f32);
        let n = Neighborhood::sample(&img, 0, 0);
        assert_eq!(n.0, [0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 3.0, 3.0, 4.0]);
    }

    #[test]
    fn test_convolve_step_flat_is_inclusive_at_zero() {
        for v in [0.0, 0.25, 1.0] {
            assert_eq!(convolve_step(&Neighborhood::flat(v), &LAPLACIAN_3X3), 1.0);
        }
    }

    #[test]
    fn test_convolve_step_flat_is_exact_at_every_level() {
        for level in 0..=255u8 {
            let n = Neighborhood::flat(level.to_unit());
            assert_eq!(convolve_step(&n, &LAPLACIAN_3X3), 1.0, "level {level}");
        }
        for v in [0.1f32, 1.0 / 3.0, 0.7] {
            assert_eq!(convolve_step(&Neighborhood::flat(v), &LAPLACIAN_3X3), 1.0, "value {v}");
        }
    }

    #[test]
    fn test_convolve_step_bright_center_is_negative() {
        let mut n = Neighborhood::flat(0.0);
        n.0[4] = 1.0;
        assert_eq!(convolve_step(&n, &LAPLACIAN_3X3), 0.0);
    }

    #[test]
    fn test_zero_crossing_truth_table() {
        let mut n = Neighborhood::flat(0.0);
        assert_eq!(zero_crossing(&n), 0.0);
        n.0[8] = 1.0;
        assert_eq!(zero_crossing(&n), 1.0);
        n.0[4] = 1.0;
        assert_eq!(zero_crossing(&n), 0.0);
        assert_eq!(zero_crossing(&Neighborhood::flat(1.0)), 0.0);
    }

    #[test]
    fn test_passthrough_forces_opaque() {
        assert_eq!(passthrough([0.2, 0.4, 0.6, 0.0]), [0.2, 0.4, 0.6, 1.0]);
    }
}
