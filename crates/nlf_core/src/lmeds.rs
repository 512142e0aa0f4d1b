//! Least-median-of-squares line fit.
//!
//! Lines through random sample pairs are scored by the median of their
//! squared residuals, which tolerates up to half of the samples being gross
//! outliers (moving subjects, misregistered burst frames). The winning line
//! selects the inliers for a final least-squares refit.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::LeastMedianConfig;
use crate::error::FitWarning;
use crate::fitter::ChannelFit;
use crate::noise_model::NLF_FLOOR;
use crate::regression::{LineFit, LinearAccumulator};

/// Consistency constant of the median absolute residual for Gaussian noise.
const MAD_TO_SIGMA: f64 = 1.4826;

/// Median of `values`, reordering them in place. NaN when empty.
fn median_in_place(values: &mut [f64]) -> f64 {
    let len = values.len();
    if len == 0 {
        return f64::NAN;
    }
    let mid = len / 2;
    let (left, &mut upper, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    if len % 2 == 1 {
        upper
    } else {
        let lower = left.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        0.5 * (lower + upper)
    }
}

fn squared_residuals(line: &LineFit, points: &[(f64, f64)], out: &mut Vec<f64>) {
    out.clear();
    out.extend(points.iter().map(|&(x, y)| (line.predict(x) - y).powi(2)));
}

/// Fit one channel. `points` must be non-empty.
pub(crate) fn fit_least_median(
    points: &[(f64, f64)],
    channel: usize,
    config: &LeastMedianConfig,
) -> (LineFit, ChannelFit) {
    let all = points.iter().copied().collect::<LinearAccumulator>();
    let fallback = all.solve().unwrap_or(LineFit {
        a: NLF_FLOOR,
        b: NLF_FLOOR,
        singular: true,
    });
    let fallback_report = |line: &LineFit| {
        let warnings = if line.singular {
            vec![FitWarning::SingularModel { channel }]
        } else {
            Vec::new()
        };
        ChannelFit {
            candidates: points.len(),
            samples_used: points.len(),
            mse: line.mean_squared_error(points),
            warnings,
        }
    };

    let n = points.len();
    if n < 2 {
        return (fallback, fallback_report(&fallback));
    }

    // One stream per channel keeps channels independent of evaluation order.
    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(channel as u64));
    let mut residuals = Vec::with_capacity(n);
    let mut best: Option<(LineFit, f64)> = None;

    for _ in 0..config.iterations {
        let i = rng.gen_range(0..n);
        let mut j = rng.gen_range(0..n - 1);
        if j >= i {
            j += 1;
        }
        let (x0, y0) = points[i];
        let (x1, y1) = points[j];
        if x0 == x1 {
            continue;
        }

        let b = ((y1 - y0) / (x1 - x0)).max(NLF_FLOOR);
        let a = (y0 - b * x0).max(NLF_FLOOR);
        let candidate = LineFit {
            a,
            b,
            singular: false,
        };

        squared_residuals(&candidate, points, &mut residuals);
        let score = median_in_place(&mut residuals);
        if best.map_or(true, |(_, s)| score < s) {
            best = Some((candidate, score));
        }
    }

    let (line, median) = match best {
        Some(best) => best,
        None => return (fallback, fallback_report(&fallback)),
    };

    let correction = if n > 2 { 1.0 + 5.0 / (n - 2) as f64 } else { 1.0 };
    let sigma = MAD_TO_SIGMA * correction * median.sqrt();
    let band = (config.inlier_scale * sigma).powi(2);

    let inliers: Vec<(f64, f64)> = points
        .iter()
        .copied()
        .filter(|&(x, y)| (line.predict(x) - y).powi(2) <= band)
        .collect();

    let refit = inliers
        .iter()
        .copied()
        .collect::<LinearAccumulator>()
        .solve()
        .filter(|fit| !fit.singular && inliers.len() >= 2);

    match refit {
        Some(refit) => (
            refit,
            ChannelFit {
                candidates: n,
                samples_used: inliers.len(),
                mse: refit.mean_squared_error(&inliers),
                warnings: Vec::new(),
            },
        ),
        None => (
            line,
            ChannelFit {
                candidates: n,
                samples_used: inliers.len(),
                mse: median,
                warnings: Vec::new(),
            },
        ),
    }
}
