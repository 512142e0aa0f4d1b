//! Noise-model-driven denoising of a single pyramid level.
//!
//! Each channel is smoothed with an edge-aware window average whose range
//! kernel is scaled by the predicted noise variance at the pixel: neighbours
//! that differ by less than the noise envelope are averaged, larger
//! differences (texture, edges) drop out of the window. Strong gradients
//! additionally reduce the correction applied to the pixel.

use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};

use crate::config::DenoiseConfig;
use crate::error::{NlfError, Result};
use crate::float_trait::NlfFloat;
use crate::guided::noise_weighted_detail_mask;
use crate::noise_model::NoiseModel;
use crate::parallel::{fill_rows, Execution};

/// Denoised level and, on request, its detail confidence mask.
#[derive(Debug, Clone)]
pub struct LevelOutput<F> {
    pub image: Array3<F>,
    pub mask: Option<Array2<F>>,
}

/// Threshold multiplier for `channel`.
#[inline]
fn boost(config: &DenoiseConfig, channel: usize) -> f64 {
    if channel == 0 {
        config.luma_boost
    } else {
        config.chroma_boost
    }
}

/// Correction weight for gradient magnitude `g` given the luma noise sigma.
#[inline]
fn gradient_correction(g: f64, sigma_luma: f64, threshold: f64) -> f64 {
    let limit = threshold * sigma_luma;
    if g <= limit {
        1.0
    } else {
        limit / g
    }
}

fn check_plane<F>(plane: &ArrayView2<F>, channels: usize, rows: usize, cols: usize) -> Result<()> {
    if plane.dim() != (rows, cols) {
        return Err(NlfError::DimensionMismatch {
            expected: (channels, rows, cols),
            actual: (channels, plane.nrows(), plane.ncols()),
        });
    }
    Ok(())
}

/// Denoise one `(C, H, W)` level.
///
/// `gradient` is the level's gradient magnitude and `guide` its luminance;
/// both must match the level's spatial size. The mask is the self-guided
/// filter gain of `guide`, regularized by `ltm_eps` plus the model's
/// predicted variance, and is only computed when `want_mask` is set.
pub fn denoise_level<F: NlfFloat>(
    image: ArrayView3<F>,
    gradient: ArrayView2<F>,
    guide: ArrayView2<F>,
    model: &NoiseModel,
    config: &DenoiseConfig,
    want_mask: bool,
    execution: Execution,
) -> Result<LevelOutput<F>> {
    config.validate()?;
    let (channels, rows, cols) = image.dim();
    model.ensure_channels(channels)?;
    check_plane(&gradient, channels, rows, cols)?;
    check_plane(&guide, channels, rows, cols)?;

    let radius = config.radius as isize;
    let luma_source = image.index_axis(Axis(0), model.intensity_channel(0));
    let mut output = Array3::<F>::zeros(image.raw_dim());

    for (channel, mut out_plane) in output.axis_iter_mut(Axis(0)).enumerate() {
        let plane = image.index_axis(Axis(0), channel);
        let intensity = image.index_axis(Axis(0), model.intensity_channel(channel));
        let k2 = boost(config, channel).powi(2);

        fill_rows(out_plane.view_mut(), execution, |r, row| {
            let r0 = (r as isize - radius).max(0) as usize;
            let r1 = ((r as isize + radius) as usize).min(rows - 1);
            for (c, out) in row.iter_mut().enumerate() {
                let c0 = (c as isize - radius).max(0) as usize;
                let c1 = ((c as isize + radius) as usize).min(cols - 1);

                let x = plane[[r, c]].as_f64();
                let variance = model.variance(channel, intensity[[r, c]].as_f64());
                let band = k2 * variance;

                let mut weight_sum = 0.0;
                let mut value_sum = 0.0;
                for nr in r0..=r1 {
                    for nc in c0..=c1 {
                        let v = plane[[nr, nc]].as_f64();
                        let d = v - x;
                        let w = if band > 0.0 {
                            (1.0 - d * d / band).max(0.0)
                        } else if d == 0.0 {
                            1.0
                        } else {
                            0.0
                        };
                        weight_sum += w;
                        value_sum += w * v;
                    }
                }
                // The centre pixel always has weight 1.
                let smoothed = value_sum / weight_sum;

                let sigma_luma = model.variance(0, luma_source[[r, c]].as_f64()).sqrt();
                let correction = gradient_correction(
                    gradient[[r, c]].as_f64(),
                    sigma_luma,
                    config.gradient_threshold,
                );
                *out = F::from_f64_c(x + correction * (smoothed - x));
            }
        });
    }

    let mask = if want_mask {
        Some(noise_weighted_detail_mask(
            guide,
            model,
            config.guided_radius,
            config.ltm_eps,
            execution,
        ))
    } else {
        None
    };

    Ok(LevelOutput {
        image: output,
        mask,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn zeros2(rows: usize, cols: usize) -> Array2<f64> {
        Array2::zeros((rows, cols))
    }

    fn luma(image: &Array3<f64>) -> Array2<f64> {
        image.mean_axis(Axis(0)).unwrap()
    }

    #[test]
    fn test_flat_field_is_unchanged() {
        let image = Array3::from_elem((3, 16, 16), 0.35f64);
        let model = NoiseModel::uniform(3, 1e-4, 1e-3);
        let out = denoise_level(
            image.view(),
            zeros2(16, 16).view(),
            luma(&image).view(),
            &model,
            &DenoiseConfig::default(),
            false,
            Execution::Sequential,
        )
        .unwrap();

        for (a, b) in out.image.iter().zip(image.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
        assert!(out.mask.is_none());
    }

    #[test]
    fn test_reduces_noise_matching_the_model() {
        let sigma = 0.01;
        let mut rng = StdRng::seed_from_u64(5);
        let normal = Normal::new(0.0, sigma).unwrap();
        let image = Array3::from_shape_fn((1, 64, 64), |_| 0.3 + normal.sample(&mut rng));
        let model = NoiseModel::uniform(1, sigma * sigma, 1e-8);

        let out = denoise_level(
            image.view(),
            zeros2(64, 64).view(),
            image.index_axis(Axis(0), 0),
            &model,
            &DenoiseConfig::default(),
            false,
            Execution::Parallel,
        )
        .unwrap();

        let var = |a: &Array3<f64>| a.iter().map(|v| (v - 0.3).powi(2)).sum::<f64>() / a.len() as f64;
        assert!(var(&out.image) < 0.7 * var(&image));
    }

    #[test]
    fn test_edges_above_noise_envelope_survive() {
        let image = Array3::from_shape_fn((1, 16, 16), |(_, _, c)| if c < 8 { 0.1 } else { 0.6 });
        let model = NoiseModel::uniform(1, 1e-5, 1e-5);
        let out = denoise_level(
            image.view(),
            zeros2(16, 16).view(),
            image.index_axis(Axis(0), 0),
            &model,
            &DenoiseConfig::default(),
            true,
            Execution::Sequential,
        )
        .unwrap();

        assert!((out.image[[0, 8, 7]] - 0.1).abs() < 1e-12);
        assert!((out.image[[0, 8, 8]] - 0.6).abs() < 1e-12);
        let mask = out.mask.unwrap();
        assert!(mask[[8, 8]] > mask[[8, 0]]);
    }

    #[test]
    fn test_strong_gradient_limits_correction() {
        assert_eq!(gradient_correction(0.01, 0.01, 4.0), 1.0);
        assert!((gradient_correction(0.08, 0.01, 4.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_dimension_checks() {
        let image = Array3::<f64>::zeros((3, 8, 8));
        let model = NoiseModel::uniform(3, 1e-4, 1e-3);
        let bad_gradient = zeros2(8, 7);
        assert!(matches!(
            denoise_level(
                image.view(),
                bad_gradient.view(),
                zeros2(8, 8).view(),
                &model,
                &DenoiseConfig::default(),
                false,
                Execution::Sequential,
            ),
            Err(NlfError::DimensionMismatch { .. })
        ));

        let two_channel = NoiseModel::uniform(2, 1e-4, 1e-3);
        assert!(matches!(
            denoise_level(
                image.view(),
                zeros2(8, 8).view(),
                zeros2(8, 8).view(),
                &two_channel,
                &DenoiseConfig::default(),
                false,
                Execution::Sequential,
            ),
            Err(NlfError::ChannelMismatch { .. })
        ));
    }
}
