//! Summed-area tables for O(1) window sums.
//!
//! Tables are accumulated in f64 regardless of the pixel type; window sums of
//! third and fourth powers lose too much precision in f32.

use ndarray::{Array2, ArrayView2};

use crate::float_trait::NlfFloat;
use crate::parallel::{fill_rows, Execution};

/// Summed-area table with one row/column of zero padding.
///
/// `table[[r, c]]` holds the sum of `f(image[i, j])` for `i < r`, `j < c`.
#[derive(Debug, Clone)]
pub struct IntegralImage {
    table: Array2<f64>,
}

impl IntegralImage {
    /// Build the table of raw pixel values.
    pub fn new<F: NlfFloat>(image: ArrayView2<F>) -> Self {
        Self::with_map(image, |v| v)
    }

    /// Build the table of `map(pixel)`.
    pub fn with_map<F: NlfFloat>(image: ArrayView2<F>, map: impl Fn(f64) -> f64) -> Self {
        let (h, w) = image.dim();
        let mut table = Array2::<f64>::zeros((h + 1, w + 1));

        for r in 0..h {
            let mut row_sum = 0.0;
            for c in 0..w {
                row_sum += map(image[[r, c]].as_f64());
                table[[r + 1, c + 1]] = table[[r, c + 1]] + row_sum;
            }
        }
        Self { table }
    }

    /// Image dimensions `(rows, cols)` covered by the table.
    pub fn dim(&self) -> (usize, usize) {
        let (h, w) = self.table.dim();
        (h - 1, w - 1)
    }

    /// Sum over rows `r0..r1` and columns `c0..c1` (end exclusive).
    #[inline(always)]
    pub fn sum(&self, r0: usize, c0: usize, r1: usize, c1: usize) -> f64 {
        self.table[[r1, c1]] - self.table[[r0, c1]] - self.table[[r1, c0]] + self.table[[r0, c0]]
    }

    /// Window bounds around `(r, c)` with the given radius, cut to the image.
    #[inline(always)]
    pub fn clamped_window(&self, r: usize, c: usize, radius: usize) -> (usize, usize, usize, usize) {
        let (h, w) = self.dim();
        (
            r.saturating_sub(radius),
            c.saturating_sub(radius),
            (r + radius + 1).min(h),
            (c + radius + 1).min(w),
        )
    }

    /// Mean over the in-bounds part of the window centred on `(r, c)`.
    #[inline(always)]
    pub fn window_mean(&self, r: usize, c: usize, radius: usize) -> f64 {
        let (r0, c0, r1, c1) = self.clamped_window(r, c, radius);
        let count = ((r1 - r0) * (c1 - c0)) as f64;
        self.sum(r0, c0, r1, c1) / count
    }
}

/// Box mean with a `(2·radius + 1)²` window.
///
/// Out-of-bounds pixels are excluded, so border outputs average over fewer
/// samples instead of replicated edges.
pub fn box_mean<F: NlfFloat>(image: ArrayView2<F>, radius: usize, execution: Execution) -> Array2<F> {
    let integral = IntegralImage::new(image);
    let mut output = Array2::<F>::zeros(image.raw_dim());
    fill_rows(output.view_mut(), execution, |r, row| {
        for (c, out) in row.iter_mut().enumerate() {
            *out = F::from_f64_c(integral.window_mean(r, c, radius));
        }
    });
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn naive_sum(image: &Array2<f64>, r0: usize, c0: usize, r1: usize, c1: usize) -> f64 {
        let mut s = 0.0;
        for r in r0..r1 {
            for c in c0..c1 {
                s += image[[r, c]];
            }
        }
        s
    }

    #[test]
    fn test_sums_match_naive() {
        let image = Array2::from_shape_fn((7, 9), |(r, c)| (r * 9 + c) as f64 * 0.01);
        let integral = IntegralImage::new(image.view());

        assert_eq!(integral.dim(), (7, 9));
        for &(r0, c0, r1, c1) in &[(0, 0, 7, 9), (1, 2, 4, 8), (3, 3, 4, 4), (2, 0, 2, 5)] {
            let expected = naive_sum(&image, r0, c0, r1, c1);
            assert!((integral.sum(r0, c0, r1, c1) - expected).abs() < 1e-10);
        }
    }

    #[test]
    fn test_mapped_table_squares() {
        let image = Array2::from_elem((4, 4), 0.5f32);
        let squares = IntegralImage::with_map(image.view(), |v| v * v);
        assert!((squares.sum(0, 0, 4, 4) - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_box_mean_excludes_out_of_bounds() {
        let mut image = Array2::<f64>::zeros((5, 5));
        image[[0, 0]] = 4.0;
        let mean = box_mean(image.view(), 1, Execution::Sequential);

        // Corner window has 2×2 in-bounds pixels.
        assert!((mean[[0, 0]] - 1.0).abs() < 1e-12);
        // Interior window touching the corner has 3×3 pixels.
        assert!((mean[[1, 1]] - 4.0 / 9.0).abs() < 1e-12);
        assert_eq!(mean[[4, 4]], 0.0);
    }

    #[test]
    fn test_box_mean_preserves_constant() {
        let image = Array2::from_elem((16, 11), 0.37f64);
        let mean = box_mean(image.view(), 3, Execution::Parallel);
        for v in mean.iter() {
            assert!((v - 0.37).abs() < 1e-12);
        }
    }
}
