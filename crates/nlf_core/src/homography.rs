//! Projective warping of burst frames into reference coordinates.

use nalgebra::{Matrix3, Vector3};
use ndarray::{Array3, ArrayView3, Axis};

use crate::error::{NlfError, Result};
use crate::float_trait::NlfFloat;
use crate::parallel::{fill_rows, Execution};
use crate::resample::sample_bilinear;

/// Homogeneous scale below which a point is treated as mapped to infinity.
const MIN_HOMOGENEOUS_W: f64 = 1e-12;

/// Registration of one burst frame against the reference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Alignment {
    /// Maps reference pixel coordinates `(x, y, 1)` to frame coordinates.
    pub homography: Matrix3<f64>,
    /// Linear gain bringing the frame to the reference exposure.
    pub exposure_multiplier: f64,
}

impl Default for Alignment {
    fn default() -> Self {
        Self::identity()
    }
}

impl Alignment {
    /// Validated alignment.
    pub fn new(homography: Matrix3<f64>, exposure_multiplier: f64) -> Result<Self> {
        let alignment = Self {
            homography,
            exposure_multiplier,
        };
        alignment.validate()?;
        Ok(alignment)
    }

    /// Check an alignment assembled from its public fields.
    pub fn validate(&self) -> Result<()> {
        if self.homography.iter().any(|v| !v.is_finite()) {
            return Err(NlfError::InvalidConfig(
                "homography has non-finite entries".to_string(),
            ));
        }
        if !(self.exposure_multiplier > 0.0 && self.exposure_multiplier.is_finite()) {
            return Err(NlfError::InvalidConfig(format!(
                "exposure multiplier must be positive, got {}",
                self.exposure_multiplier
            )));
        }
        Ok(())
    }

    pub fn identity() -> Self {
        Self {
            homography: Matrix3::identity(),
            exposure_multiplier: 1.0,
        }
    }

    /// Pure translation: reference `(x, y)` samples the frame at `(x + dx, y + dy)`.
    pub fn translation(dx: f64, dy: f64) -> Self {
        Self {
            homography: Matrix3::new(1.0, 0.0, dx, 0.0, 1.0, dy, 0.0, 0.0, 1.0),
            exposure_multiplier: 1.0,
        }
    }

    pub fn with_exposure(mut self, exposure_multiplier: f64) -> Self {
        self.exposure_multiplier = exposure_multiplier;
        self
    }

    /// Frame coordinates of reference pixel `(x, y)`, `None` at infinity.
    #[inline]
    pub fn map_point(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let p = self.homography * Vector3::new(x, y, 1.0);
        if p.z.abs() < MIN_HOMOGENEOUS_W {
            None
        } else {
            Some((p.x / p.z, p.y / p.z))
        }
    }

    pub fn is_identity(&self) -> bool {
        self.homography == Matrix3::identity()
    }
}

/// Resample `frame` onto the reference grid and scale it by the exposure
/// multiplier.
///
/// Samples outside the frame are clamped to its edge. A reference pixel
/// mapped to infinity keeps the frame value at its own position.
pub fn warp_frame<F: NlfFloat>(
    frame: ArrayView3<F>,
    alignment: &Alignment,
    execution: Execution,
) -> Array3<F> {
    let gain = alignment.exposure_multiplier;
    let mut out = Array3::<F>::zeros(frame.raw_dim());

    if alignment.is_identity() {
        out.zip_mut_with(&frame, |o, &v| *o = F::from_f64_c(v.as_f64() * gain));
        return out;
    }

    for (plane, mut dst) in frame.axis_iter(Axis(0)).zip(out.axis_iter_mut(Axis(0))) {
        fill_rows(dst.view_mut(), execution, |r, row| {
            for (c, v) in row.iter_mut().enumerate() {
                let (x, y) = alignment
                    .map_point(c as f64, r as f64)
                    .unwrap_or((c as f64, r as f64));
                *v = F::from_f64_c(sample_bilinear(&plane, x, y) * gain);
            }
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_warp_applies_exposure_only() {
        let frame = Array3::from_shape_fn((2, 4, 5), |(ch, r, c)| (ch + r + c) as f64 * 0.01);
        let warped = warp_frame(frame.view(), &Alignment::identity().with_exposure(2.0), Execution::Sequential);
        for (a, b) in warped.iter().zip(frame.iter()) {
            assert!((a - 2.0 * b).abs() < 1e-15);
        }
    }

    #[test]
    fn test_translation_shifts_content() {
        let frame = Array3::from_shape_fn((1, 6, 6), |(_, r, c)| (r * 10 + c) as f64);
        let warped = warp_frame(frame.view(), &Alignment::translation(1.0, 2.0), Execution::Sequential);
        assert_eq!(warped[[0, 0, 0]], frame[[0, 2, 1]]);
        assert_eq!(warped[[0, 3, 4]], frame[[0, 5, 5]]);
        // Clamped past the right and bottom edges.
        assert_eq!(warped[[0, 5, 5]], frame[[0, 5, 5]]);
    }

    #[test]
    fn test_half_pixel_translation_interpolates() {
        let frame = Array3::from_shape_fn((1, 3, 3), |(_, _, c)| c as f64);
        let warped = warp_frame(frame.view(), &Alignment::translation(0.5, 0.0), Execution::Sequential);
        assert!((warped[[0, 1, 0]] - 0.5).abs() < 1e-12);
        assert!((warped[[0, 1, 1]] - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_map_point_projective() {
        let h = Matrix3::new(2.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 2.0);
        let alignment = Alignment::new(h, 1.0).unwrap();
        assert_eq!(alignment.map_point(3.0, 4.0), Some((3.0, 4.0)));

        let degenerate = Alignment::new(Matrix3::zeros(), 1.0).unwrap();
        assert_eq!(degenerate.map_point(1.0, 1.0), None);
    }

    #[test]
    fn test_new_validates() {
        assert!(Alignment::new(Matrix3::identity(), 0.0).is_err());
        let mut h = Matrix3::identity();
        h[(0, 2)] = f64::NAN;
        assert!(Alignment::new(h, 1.0).is_err());
        assert!(Alignment::identity().with_exposure(-1.0).validate().is_err());
        assert!(Alignment::translation(2.0, 1.0).with_exposure(0.5).validate().is_ok());
    }
}
