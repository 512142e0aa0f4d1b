//! Guided filter (He et al.) on box windows.
//!
//! For a guide `I` and input `p`, each window fits `q = a·I + b` with
//! `a = cov(I, p) / (var(I) + eps)` and `b = p̄ − a·Ī`. The per-pixel
//! coefficients are box-averaged before use, which removes the blockiness a
//! single window would leave.

use ndarray::{Array2, ArrayView2, Zip};

use crate::float_trait::NlfFloat;
use crate::integral::{box_mean, IntegralImage};
use crate::noise_model::NoiseModel;
use crate::parallel::{fill_rows, Execution};

/// `var + eps` at or below this is treated as a zero-range window.
const DEGENERATE_VARIANCE: f64 = 1e-12;

/// Box-averaged guided filter coefficients `(ā, b̄)`.
#[derive(Debug, Clone)]
pub struct GuidedCoefficients<F> {
    pub a: Array2<F>,
    pub b: Array2<F>,
}

impl<F: NlfFloat> GuidedCoefficients<F> {
    /// Evaluate `ā·I + b̄`.
    pub fn apply(&self, guide: ArrayView2<F>) -> Array2<F> {
        let mut out = Array2::<F>::zeros(guide.raw_dim());
        Zip::from(&mut out)
            .and(&guide)
            .and(&self.a)
            .and(&self.b)
            .for_each(|o, &i, &a, &b| *o = a * i + b);
        out
    }
}

/// Compute the box-averaged coefficients of `input` guided by `guide`.
///
/// Windows with `var(I) + eps <= 1e-12` fall back to unity gain (`a = 1`,
/// `b = 0`) instead of dividing by zero.
pub fn guided_coefficients<F: NlfFloat>(
    guide: ArrayView2<F>,
    input: ArrayView2<F>,
    radius: usize,
    eps: f64,
    execution: Execution,
) -> GuidedCoefficients<F> {
    coefficients_with(guide, input, radius, |_| eps, execution)
}

/// Guided filter coefficients whose regularization depends on the window's
/// guide mean.
fn coefficients_with<F, E>(
    guide: ArrayView2<F>,
    input: ArrayView2<F>,
    radius: usize,
    eps_at: E,
    execution: Execution,
) -> GuidedCoefficients<F>
where
    F: NlfFloat,
    E: Fn(f64) -> f64 + Sync,
{
    let guide64 = guide.mapv(|v| v.as_f64());
    let input64 = input.mapv(|v| v.as_f64());
    let cross = &guide64 * &input64;

    let sum_i = IntegralImage::new(guide64.view());
    let sum_p = IntegralImage::new(input64.view());
    let sum_ii = IntegralImage::with_map(guide64.view(), |v| v * v);
    let sum_ip = IntegralImage::new(cross.view());

    let mut coefficients = Array2::<(f64, f64)>::default(guide.raw_dim());
    fill_rows(coefficients.view_mut(), execution, |r, row| {
        for (c, out) in row.iter_mut().enumerate() {
            *out = window_coefficients(&sum_i, &sum_p, &sum_ii, &sum_ip, r, c, radius, &eps_at);
        }
    });
    let a = coefficients.mapv(|(a, _)| a);
    let b = coefficients.mapv(|(_, b)| b);

    let mean_a = box_mean(a.view(), radius, execution);
    let mean_b = box_mean(b.view(), radius, execution);
    GuidedCoefficients {
        a: mean_a.mapv(F::from_f64_c),
        b: mean_b.mapv(F::from_f64_c),
    }
}

#[allow(clippy::too_many_arguments)]
#[inline]
fn window_coefficients(
    sum_i: &IntegralImage,
    sum_p: &IntegralImage,
    sum_ii: &IntegralImage,
    sum_ip: &IntegralImage,
    r: usize,
    c: usize,
    radius: usize,
    eps_at: &impl Fn(f64) -> f64,
) -> (f64, f64) {
    let (r0, c0, r1, c1) = sum_i.clamped_window(r, c, radius);
    let n = ((r1 - r0) * (c1 - c0)) as f64;
    let mean_i = sum_i.sum(r0, c0, r1, c1) / n;
    let mean_p = sum_p.sum(r0, c0, r1, c1) / n;
    let var_i = (sum_ii.sum(r0, c0, r1, c1) / n - mean_i * mean_i).max(0.0);
    let cov_ip = sum_ip.sum(r0, c0, r1, c1) / n - mean_i * mean_p;

    let denominator = var_i + eps_at(mean_i);
    if denominator <= DEGENERATE_VARIANCE {
        return (1.0, 0.0);
    }
    let a = cov_ip / denominator;
    (a, mean_p - a * mean_i)
}

/// Guided filter output `ā·I + b̄`.
pub fn guided_filter<F: NlfFloat>(
    guide: ArrayView2<F>,
    input: ArrayView2<F>,
    radius: usize,
    eps: f64,
    execution: Execution,
) -> Array2<F> {
    guided_coefficients(guide, input, radius, eps, execution).apply(guide)
}

/// Local tone-mapping confidence mask: `ā` of the guide filtered by itself.
///
/// Close to 1 on structure (local variance well above `eps`), close to 0 on
/// flat areas.
pub fn detail_mask<F: NlfFloat>(
    guide: ArrayView2<F>,
    radius: usize,
    eps: f64,
    execution: Execution,
) -> Array2<F> {
    guided_coefficients(guide, guide, radius, eps, execution)
        .a
        .mapv(|a| a.max(F::zero()).min(F::one()))
}

/// Detail mask whose regularization grows with the predicted noise variance
/// of the window (channel 0 of `model` at the guide mean), so texture at the
/// noise floor scores low.
pub fn noise_weighted_detail_mask<F: NlfFloat>(
    guide: ArrayView2<F>,
    model: &NoiseModel,
    radius: usize,
    eps: f64,
    execution: Execution,
) -> Array2<F> {
    let channel = model.intensity_channel(0);
    coefficients_with(
        guide,
        guide,
        radius,
        |mean| eps + model.variance(channel, mean),
        execution,
    )
    .a
    .mapv(|a| a.max(F::zero()).min(F::one()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_edge(rows: usize, cols: usize) -> Array2<f64> {
        Array2::from_shape_fn((rows, cols), |(_, c)| if c < cols / 2 { 0.1 } else { 0.9 })
    }

    #[test]
    fn test_constant_input_passes_through() {
        let guide = step_edge(12, 12);
        let input = Array2::from_elem((12, 12), 0.4f64);
        let out = guided_filter(guide.view(), input.view(), 2, 0.01, Execution::Sequential);
        for v in out.iter() {
            assert!((v - 0.4).abs() < 1e-12);
        }
    }

    #[test]
    fn test_self_guided_preserves_strong_edges() {
        let guide = step_edge(16, 16);
        let out = guided_filter(guide.view(), guide.view(), 2, 1e-4, Execution::Sequential);
        assert!((out[[8, 0]] - 0.1).abs() < 1e-3);
        assert!((out[[8, 15]] - 0.9).abs() < 1e-3);
        // The edge itself stays sharp.
        assert!(out[[8, 7]] < 0.2);
        assert!(out[[8, 8]] > 0.8);
    }

    #[test]
    fn test_large_eps_smooths() {
        let guide = Array2::from_shape_fn((16, 16), |(r, c)| if (r + c) % 2 == 0 { 0.49f64 } else { 0.51 });
        let out = guided_filter(guide.view(), guide.view(), 2, 1.0, Execution::Sequential);
        assert!((out[[8, 8]] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_zero_range_falls_back_to_unity_gain() {
        let flat = Array2::from_elem((8, 8), 0.3f32);
        let coefficients = guided_coefficients(flat.view(), flat.view(), 2, 0.0, Execution::Sequential);
        for (&a, &b) in coefficients.a.iter().zip(coefficients.b.iter()) {
            assert_eq!(a, 1.0);
            assert_eq!(b, 0.0);
        }
        let out = coefficients.apply(flat.view());
        assert!(out.iter().all(|v| v.is_finite() && (*v - 0.3).abs() < 1e-7));
    }

    #[test]
    fn test_detail_mask_range() {
        let guide = step_edge(16, 16);
        let mask = detail_mask(guide.view(), 2, 0.01, Execution::Parallel);
        assert!(mask.iter().all(|&m| (0.0..=1.0).contains(&m)));
        assert!(mask[[8, 8]] > 0.5);
        assert!(mask[[8, 0]] < 1e-9);
    }

    #[test]
    fn test_noise_weighted_mask_ignores_noise_level_texture() {
        // Checkerboard with variance 1e-4, comparable to the predicted noise.
        let texture = Array2::from_shape_fn((16, 16), |(r, c)| if (r + c) % 2 == 0 { 0.29f64 } else { 0.31 });
        let quiet = NoiseModel::uniform(1, 1e-8, 1e-8);
        let noisy = NoiseModel::uniform(1, 1e-3, 1e-8);

        let plain = noise_weighted_detail_mask(texture.view(), &quiet, 2, 0.0, Execution::Sequential);
        let weighted = noise_weighted_detail_mask(texture.view(), &noisy, 2, 0.0, Execution::Sequential);
        assert!(plain[[8, 8]] > 0.9);
        assert!(weighted[[8, 8]] < 0.2);
        assert!(weighted.iter().all(|&m| (0.0..=1.0).contains(&m)));
    }
}
