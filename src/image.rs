// image.rs — CPU-side raster container, generic over pixel type.
//
// The edge pipeline consumes a single-channel raster. On the CPU it lives in
// an `Image<T>`: a row-major buffer with an explicit stride, so rows can carry
// alignment padding without affecting pixel addressing.
//
//   data index:  0  1  2  3 [4]  5  6  7  8 [9]
//   pixel:       ■  ■  ■  ■  ·   ■  ■  ■  ■  ·
//   row:         |--- row 0 ---|  |--- row 1 ---|
//
// `gpu::image::GpuRaster::upload` strips the padding when copying to a
// texture, and every readback helper returns a compact image (stride == width).
//
// BORDER ACCESS
// ─────────────
// `get_clamped` takes signed coordinates and replicates the nearest edge
// pixel for anything outside the image. This is the CPU twin of a sampler with
// `AddressMode::ClampToEdge`, which is what the three GPU stages use.

use std::fmt;

// ---------------------------------------------------------------------------
// Pixel trait
// ---------------------------------------------------------------------------

/// Types that can be stored in an [`Image`].
pub trait Pixel: Copy + Default + Send + Sync + PartialOrd + 'static {
    /// Intensity in [0, 1], the value a unorm texture presents to a shader.
    fn to_unit(self) -> f32;

    /// Inverse of [`Pixel::to_unit`], clamping and rounding where needed.
    fn from_unit(v: f32) -> Self;
}

impl Pixel for u8 {
    #[inline]
    fn to_unit(self) -> f32 {
        self as f32 / 255.0
    }

    #[inline]
    fn from_unit(v: f32) -> Self {
        (v.clamp(0.0, 1.0) * 255.0).round() as u8
    }
}

impl Pixel for f32 {
    #[inline]
    fn to_unit(self) -> f32 {
        self
    }

    #[inline]
    fn from_unit(v: f32) -> Self {
        v
    }
}

// ---------------------------------------------------------------------------
// Image<T>
// ---------------------------------------------------------------------------

/// A 2D image with runtime dimensions, generic over pixel type `T`.
#[derive(Clone, PartialEq)]
pub struct Image<T: Pixel> {
    /// Pixel data in row-major order. Length = height * stride.
    data: Vec<T>,
    width: usize,
    height: usize,
    /// Row stride in elements. stride >= width.
    stride: usize,
}

impl<T: Pixel> Image<T> {
    /// Create a zero-initialized image. Stride equals width.
    pub fn new(width: usize, height: usize) -> Self {
        Self::new_with_stride(width, height, width)
    }

    /// Create an image where every pixel holds `value`.
    pub fn filled(width: usize, height: usize, value: T) -> Self {
        Image {
            data: vec![value; width * height],
            width,
            height,
            stride: width,
        }
    }

    /// Create a zero-initialized image with an explicit stride.
    ///
    /// # Panics
    /// Panics if `stride < width`.
    pub fn new_with_stride(width: usize, height: usize, stride: usize) -> Self {
        assert!(
            stride >= width,
            "stride ({stride}) must be >= width ({width})"
        );
        Image {
            data: vec![T::default(); height * stride],
            width,
            height,
            stride,
        }
    }

    /// Create an image from a compact pixel vector (stride == width).
    ///
    /// # Panics
    /// Panics if `data.len() != width * height`.
    pub fn from_vec(width: usize, height: usize, data: Vec<T>) -> Self {
        assert_eq!(
            data.len(),
            width * height,
            "data length ({}) must equal width * height ({})",
            data.len(),
            width * height,
        );
        Image {
            data,
            width,
            height,
            stride: width,
        }
    }

    /// Create an image from raw data with explicit stride.
    ///
    /// # Panics
    /// Panics if `data.len() != height * stride` or `stride < width`.
    pub fn from_vec_with_stride(
        width: usize,
        height: usize,
        stride: usize,
        data: Vec<T>,
    ) -> Self {
        assert!(stride >= width, "stride ({stride}) must be >= width ({width})");
        assert_eq!(
            data.len(),
            height * stride,
            "data length ({}) must equal height * stride ({})",
            data.len(),
            height * stride,
        );
        Image {
            data,
            width,
            height,
            stride,
        }
    }

    /// Build an image by evaluating `f(x, y)` at every pixel.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Image::from_vec(width, height, data)
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Get the pixel value at (x, y). x is column, y is row.
    ///
    /// # Panics
    /// Panics if (x, y) is out of bounds.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> T {
        self.bounds_check(x, y);
        self.data[y * self.stride + x]
    }

    /// Get the pixel at signed coordinates, replicating edge pixels for
    /// out-of-range positions (clamp-to-edge addressing).
    ///
    /// # Panics
    /// Panics if the image is empty.
    #[inline]
    pub fn get_clamped(&self, x: isize, y: isize) -> T {
        assert!(!self.is_empty(), "get_clamped on an empty image");
        let cx = x.clamp(0, self.width as isize - 1) as usize;
        let cy = y.clamp(0, self.height as isize - 1) as usize;
        self.data[cy * self.stride + cx]
    }

    /// Set the pixel at (x, y).
    ///
    /// # Panics
    /// Panics if (x, y) is out of bounds.
    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: T) {
        self.bounds_check(x, y);
        let idx = y * self.stride + x;
        self.data[idx] = value;
    }

    /// Borrow a single row, without stride padding.
    #[inline]
    pub fn row(&self, y: usize) -> &[T] {
        assert!(y < self.height, "row {y} out of bounds (height {})", self.height);
        let start = y * self.stride;
        &self.data[start..start + self.width]
    }

    /// Iterate over all pixels as `(x, y, value)` tuples, skipping padding.
    pub fn pixels(&self) -> impl Iterator<Item = (usize, usize, T)> + '_ {
        (0..self.height).flat_map(move |y| {
            (0..self.width).map(move |x| (x, y, self.data[y * self.stride + x]))
        })
    }

    /// Map every pixel into a new compact image.
    pub fn map<U: Pixel>(&self, mut f: impl FnMut(T) -> U) -> Image<U> {
        Image::from_fn(self.width, self.height, |x, y| f(self.get(x, y)))
    }

    /// Convert to unit-range `f32` intensities, as a shader samples them.
    pub fn to_unit(&self) -> Image<f32> {
        self.map(Pixel::to_unit)
    }

    /// The underlying buffer, including stride padding.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    #[inline]
    fn bounds_check(&self, x: usize, y: usize) {
        assert!(
            x < self.width && y < self.height,
            "pixel ({x},{y}) out of bounds for image {}×{}",
            self.width,
            self.height,
        );
    }
}

impl<T: Pixel + fmt::Debug> fmt::Debug for Image<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Image<{}> {{ {}×{}, stride={} }}",
            std::any::type_name::<T>(),
            self.width,
            self.height,
            self.stride,
        )?;
        for y in 0..self.height.min(8) {
            write!(f, "  row {y}: [")?;
            for x in 0..self.width.min(16) {
                if x > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{:?}", self.get(x, y))?;
            }
            if self.width > 16 {
                write!(f, ", ...")?;
            }
            writeln!(f, "]")?;
        }
        if self.height > 8 {
            writeln!(f, "  ...")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u8_unit_round_trip() {
        for v in [0u8, 1, 127, 128, 254, 255] {
            assert_eq!(u8::from_unit(v.to_unit()), v);
        }
        assert_eq!(u8::from_unit(-0.5), 0);
        assert_eq!(u8::from_unit(3.0), 255);
    }

    #[test]
    fn test_get_clamped_replicates_edges() {
        // 3×2:
        //  [1, 2, 3]
        //  [4, 5, 6]
        let img = Image::from_vec(3, 2, vec![1u8, 2, 3, 4, 5, 6]);
        assert_eq!(img.get_clamped(-1, -1), 1);
        assert_eq!(img.get_clamped(3, -5), 3);
        assert_eq!(img.get_clamped(-2, 1), 4);
        assert_eq!(img.get_clamped(9, 9), 6);
        assert_eq!(img.get_clamped(1, 0), 2);
    }

    #[test]
    fn test_get_clamped_ignores_padding() {
        let img = Image::from_vec_with_stride(2, 2, 4, vec![1u8, 2, 99, 99, 3, 4, 99, 99]);
        assert_eq!(img.get_clamped(5, 0), 2);
        assert_eq!(img.get_clamped(5, 1), 4);
    }

    #[test]
    fn test_from_fn_row_major() {
        let img = Image::<u8>::from_fn(3, 2, |x, y| (y * 10 + x) as u8);
        assert_eq!(img.row(0), &[0, 1, 2]);
        assert_eq!(img.row(1), &[10, 11, 12]);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_get_out_of_bounds_panics() {
        let img: Image<u8> = Image::new(2, 2);
        img.get(2, 0);
    }
}
