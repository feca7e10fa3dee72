// kernel.rs — Discretized 2D kernels: Laplacian of Gaussian and friends.
//
// A kernel is a flat, row-major sequence of `size²` weights centered at index
// `size² / 2`. It is produced by sampling a point function f(x, y, σ) at the
// integer offsets −r..=r on both axes (r = size / 2), y outer and x inner:
//
//   size = 3:   index:  0        1        2
//                       (-1,-1)  ( 0,-1)  ( 1,-1)
//                       3        4        5
//                       (-1, 0)  ( 0, 0)  ( 1, 0)
//                       6        7        8
//                       (-1, 1)  ( 0, 1)  ( 1, 1)
//
// This is the same order the convolution shader reads its nine neighbours in,
// so a 3×3 kernel can be uploaded as-is.
//
// NORMALIZATION
// ─────────────
// `normalize` scales a sequence so it sums to 1. A LoG kernel is a second
// derivative and its continuous integral is zero, so for some (size, σ) the
// discrete sum lands on or near zero. An exact zero sum is reported as
// `KernelError::ZeroSum`; a sum so small that the scaled weights overflow is
// reported as `KernelError::NonFinite`. Neither case yields a kernel.
//
// The literal 8-neighbour Laplacian `LAPLACIAN_3X3` sums to zero on purpose.
// It cannot go through `normalize` and is used verbatim.

use std::f64::consts::PI;

use thiserror::Error;

/// The plain 8-neighbour discrete Laplacian, row-major. Sums to 0.
pub const LAPLACIAN_3X3: [f32; 9] = [1.0, 1.0, 1.0, 1.0, -8.0, 1.0, 1.0, 1.0, 1.0];

/// Errors from kernel construction. All of them are caller errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum KernelError {
    #[error("kernel size must be odd, got {0}")]
    EvenKernelSize(usize),

    #[error("sigma must be a finite positive number, got {0}")]
    NonPositiveSigma(f64),

    #[error("kernel weights sum to zero and cannot be normalized")]
    ZeroSum,

    #[error("kernel normalization produced non-finite weights")]
    NonFinite,

    #[error("kernel size {0} is too large to sample")]
    TooLarge(usize),

    #[error("expected a {expected}×{expected} kernel, got {got}×{got}")]
    SizeMismatch { expected: usize, got: usize },
}

// ---------------------------------------------------------------------------
// Point functions
// ---------------------------------------------------------------------------

/// Laplacian of Gaussian evaluated at integer offset (x, y) from the center:
///
/// ```text
/// LoG(x, y) = −1/(πσ⁴) · (1 − (x²+y²)/(2σ²)) · exp(−(x²+y²)/(2σ²))
/// ```
///
/// Only x² and y² appear, so the value is unchanged when either sign flips.
pub fn unitary_log(x: i32, y: i32, sigma: f64) -> f64 {
    let r2 = radius_sq(x, y);
    let two_sigma_sq = 2.0 * sigma * sigma;
    (-r2 / two_sigma_sq).exp() * (-1.0 / (PI * sigma.powi(4))) * (1.0 - r2 / two_sigma_sq)
}

/// Isotropic 2D Gaussian at integer offset (x, y).
pub fn gaussian(x: i32, y: i32, sigma: f64) -> f64 {
    let r2 = radius_sq(x, y);
    let two_sigma_sq = 2.0 * sigma * sigma;
    (-r2 / two_sigma_sq).exp() / (PI * two_sigma_sq)
}

/// x² + y², squared in f64 so no integer offset can overflow.
#[inline]
fn radius_sq(x: i32, y: i32) -> f64 {
    let (fx, fy) = (f64::from(x), f64::from(y));
    fx * fx + fy * fy
}

// ---------------------------------------------------------------------------
// Kernel
// ---------------------------------------------------------------------------

/// A square, row-major kernel of odd side length.
#[derive(Debug, Clone, PartialEq)]
pub struct Kernel {
    size: usize,
    weights: Vec<f64>,
}

impl Kernel {
    /// Side length.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Half the side length, rounded down.
    pub fn radius(&self) -> usize {
        self.size / 2
    }

    /// Flat row-major weights, length `size²`.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn into_weights(self) -> Vec<f64> {
        self.weights
    }

    /// Flat index of the (0, 0) offset.
    pub fn center_index(&self) -> usize {
        self.weights.len() / 2
    }

    /// Weight at signed offset (x, y) from the center, or `None` outside the window.
    pub fn at(&self, x: i32, y: i32) -> Option<f64> {
        let r = self.radius() as i32;
        if x.abs() > r || y.abs() > r {
            return None;
        }
        let idx = (y + r) as usize * self.size + (x + r) as usize;
        Some(self.weights[idx])
    }

    pub fn sum(&self) -> f64 {
        self.weights.iter().sum()
    }

    /// Narrow a 3×3 kernel to the `f32` array the convolution stage uploads.
    pub fn to_3x3(&self) -> Result<[f32; 9], KernelError> {
        if self.size != 3 {
            return Err(KernelError::SizeMismatch { expected: 3, got: self.size });
        }
        let mut out = [0.0f32; 9];
        for (dst, &w) in out.iter_mut().zip(&self.weights) {
            *dst = w as f32;
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// Sample `point_fn(x, y, sigma)` over a `kernel_size × kernel_size` window
/// centered on the origin, in row-major order (y outer, x inner).
///
/// `point_fn` can be any real function of an integer offset and a scale, e.g.
/// [`unitary_log`] or [`gaussian`].
///
/// # Errors
/// [`KernelError::EvenKernelSize`] for an even size (including 0) and
/// [`KernelError::NonPositiveSigma`] when sigma is not finite and positive,
/// [`KernelError::TooLarge`] when the radius does not fit an `i32` offset or
/// `size²` overflows.
pub fn generate_kernel<F>(kernel_size: usize, sigma: f64, point_fn: F) -> Result<Kernel, KernelError>
where
    F: Fn(i32, i32, f64) -> f64,
{
    if kernel_size % 2 == 0 {
        return Err(KernelError::EvenKernelSize(kernel_size));
    }
    if !(sigma.is_finite() && sigma > 0.0) {
        return Err(KernelError::NonPositiveSigma(sigma));
    }

    let radius = i32::try_from(kernel_size / 2).map_err(|_| KernelError::TooLarge(kernel_size))?;
    let len = kernel_size
        .checked_mul(kernel_size)
        .ok_or(KernelError::TooLarge(kernel_size))?;
    let mut weights = Vec::with_capacity(len);
    for y in -radius..=radius {
        for x in -radius..=radius {
            weights.push(point_fn(x, y, sigma));
        }
    }
    Ok(Kernel { size: kernel_size, weights })
}

/// Scale `values` by `1 / Σ values` so the result sums to 1.
///
/// # Errors
/// [`KernelError::ZeroSum`] when the sum is exactly zero,
/// [`KernelError::NonFinite`] when the sum or any scaled value is not finite.
pub fn normalize(values: &[f64]) -> Result<Vec<f64>, KernelError> {
    let sum: f64 = values.iter().sum();
    if sum == 0.0 {
        return Err(KernelError::ZeroSum);
    }
    let z = 1.0 / sum;
    if !z.is_finite() {
        return Err(KernelError::NonFinite);
    }
    let out: Vec<f64> = values.iter().map(|v| v * z).collect();
    if out.iter().any(|v| !v.is_finite()) {
        return Err(KernelError::NonFinite);
    }
    Ok(out)
}

/// Normalized Laplacian-of-Gaussian kernel: `normalize(generate_kernel(size, σ, unitary_log))`.
pub fn log_kernel(kernel_size: usize, sigma: f64) -> Result<Kernel, KernelError> {
    let raw = generate_kernel(kernel_size, sigma, unitary_log)?;
    let weights = normalize(raw.weights())?;
    Ok(Kernel { size: kernel_size, weights })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
