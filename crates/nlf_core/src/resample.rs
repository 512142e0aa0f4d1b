//! 2× box reduction and bilinear resampling of planar images.

use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};

use crate::float_trait::NlfFloat;
use crate::parallel::{fill_rows, Execution};

/// Bilinear sample of `plane` at continuous pixel coordinates `(x, y)`.
///
/// Pixel centres sit on integer coordinates; positions outside the image are
/// clamped to the nearest edge.
#[inline]
pub fn sample_bilinear<F: NlfFloat>(plane: &ArrayView2<F>, x: f64, y: f64) -> f64 {
    let (rows, cols) = plane.dim();
    let x = x.clamp(0.0, (cols - 1) as f64);
    let y = y.clamp(0.0, (rows - 1) as f64);

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(cols - 1);
    let y1 = (y0 + 1).min(rows - 1);
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let top = plane[[y0, x0]].as_f64() * (1.0 - fx) + plane[[y0, x1]].as_f64() * fx;
    let bottom = plane[[y1, x0]].as_f64() * (1.0 - fx) + plane[[y1, x1]].as_f64() * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Average 2×2 blocks. Output dims are `floor(rows / 2) × floor(cols / 2)`;
/// a trailing odd row or column is dropped.
pub fn downsample_plane<F: NlfFloat>(plane: ArrayView2<F>, execution: Execution) -> Array2<F> {
    let (rows, cols) = plane.dim();
    let mut out = Array2::<F>::zeros((rows / 2, cols / 2));
    let quarter = F::from_f64_c(0.25);
    fill_rows(out.view_mut(), execution, |r, row| {
        for (c, v) in row.iter_mut().enumerate() {
            let (sr, sc) = (2 * r, 2 * c);
            *v = (plane[[sr, sc]] + plane[[sr, sc + 1]] + plane[[sr + 1, sc]] + plane[[sr + 1, sc + 1]])
                * quarter;
        }
    });
    out
}

/// Bilinear resize to `rows × cols` with pixel-centre alignment.
pub fn upsample_plane<F: NlfFloat>(
    plane: ArrayView2<F>,
    rows: usize,
    cols: usize,
    execution: Execution,
) -> Array2<F> {
    let (src_rows, src_cols) = plane.dim();
    let mut out = Array2::<F>::zeros((rows, cols));
    if src_rows == 0 || src_cols == 0 {
        return out;
    }
    let sy = src_rows as f64 / rows.max(1) as f64;
    let sx = src_cols as f64 / cols.max(1) as f64;
    fill_rows(out.view_mut(), execution, |r, row| {
        let y = (r as f64 + 0.5) * sy - 0.5;
        for (c, v) in row.iter_mut().enumerate() {
            let x = (c as f64 + 0.5) * sx - 0.5;
            *v = F::from_f64_c(sample_bilinear(&plane, x, y));
        }
    });
    out
}

/// [`downsample_plane`] on every channel of a `(C, H, W)` image.
pub fn downsample<F: NlfFloat>(image: ArrayView3<F>, execution: Execution) -> Array3<F> {
    let (channels, rows, cols) = image.dim();
    let mut out = Array3::<F>::zeros((channels, rows / 2, cols / 2));
    for (plane, mut dst) in image.axis_iter(Axis(0)).zip(out.axis_iter_mut(Axis(0))) {
        dst.assign(&downsample_plane(plane, execution));
    }
    out
}

/// [`upsample_plane`] on every channel of a `(C, H, W)` image.
pub fn upsample<F: NlfFloat>(
    image: ArrayView3<F>,
    rows: usize,
    cols: usize,
    execution: Execution,
) -> Array3<F> {
    let channels = image.len_of(Axis(0));
    let mut out = Array3::<F>::zeros((channels, rows, cols));
    for (plane, mut dst) in image.axis_iter(Axis(0)).zip(out.axis_iter_mut(Axis(0))) {
        dst.assign(&upsample_plane(plane, rows, cols, execution));
    }
    out
}
