//! Robust fit of the noise level function from windowed statistics.
//!
//! Two strategies share one contract: [`ModelFitter::TwoPass`] runs least
//! squares twice with residual-based outlier rejection in between, and
//! [`ModelFitter::LeastMedian`] scores random two-sample lines by their
//! median squared residual before a final least-squares refit. Both filter
//! the samples to the linear sensor regime first, clamp every coefficient to
//! the floor and scale the model by the squared exposure multiplier.

use serde::{Deserialize, Serialize};

use crate::config::{FitConfig, LeastMedianConfig};
use crate::error::{FitWarning, NlfError, Result};
use crate::events::{EventSink, PipelineEvent};
use crate::lmeds::fit_least_median;
use crate::noise_model::{NoiseModel, Regressor, NLF_FLOOR};
use crate::regression::{LineFit, LinearAccumulator};
use crate::statistics::StatisticsSet;

/// Relative RMS residual below which a first-pass fit counts as exact and
/// the outlier pass is skipped.
const EXACT_FIT_TOLERANCE: f64 = 1e-12;

/// Fitting strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ModelFitter {
    TwoPass(FitConfig),
    LeastMedian(LeastMedianConfig),
}

impl Default for ModelFitter {
    fn default() -> Self {
        ModelFitter::TwoPass(FitConfig::default())
    }
}

/// Outcome of the fit on one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelFit {
    /// Samples that survived the linear-regime filter.
    pub candidates: usize,
    /// Samples used by the line that was kept.
    pub samples_used: usize,
    /// Mean squared residual of the kept line on its samples.
    pub mse: f64,
    pub warnings: Vec<FitWarning>,
}

/// Fitted model plus per-channel diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct FitReport {
    pub model: NoiseModel,
    pub channels: Vec<ChannelFit>,
}

impl FitReport {
    pub fn warnings(&self) -> impl Iterator<Item = &FitWarning> {
        self.channels.iter().flat_map(|c| c.warnings.iter())
    }
}

impl ModelFitter {
    pub fn validate(&self) -> Result<()> {
        match self {
            ModelFitter::TwoPass(config) => config.validate(),
            ModelFitter::LeastMedian(config) => config.validate(),
        }
    }

    /// Linear-regime filter shared by both strategies.
    pub fn regime(&self) -> &FitConfig {
        match self {
            ModelFitter::TwoPass(config) => config,
            ModelFitter::LeastMedian(config) => &config.regime,
        }
    }

    /// Fit one `(A, B)` pair per channel of `stats`.
    ///
    /// # Errors
    /// * `InsufficientSamples` when no sample of a channel survives the
    ///   linear-regime filter
    /// * `InvalidConfig` for an invalid configuration, a non-positive
    ///   exposure multiplier or an out-of-range regressor channel
    pub fn fit(
        &self,
        stats: &StatisticsSet,
        exposure_multiplier: f64,
        sink: &dyn EventSink,
    ) -> Result<FitReport> {
        self.validate()?;
        if !(exposure_multiplier > 0.0 && exposure_multiplier.is_finite()) {
            return Err(NlfError::InvalidConfig(format!(
                "exposure multiplier must be positive, got {}",
                exposure_multiplier
            )));
        }
        if stats.channels() == 0 {
            return Err(NlfError::InvalidConfig(
                "statistics set has no channels".to_string(),
            ));
        }

        let regime = self.regime();
        let mut a = Vec::with_capacity(stats.channels());
        let mut b = Vec::with_capacity(stats.channels());
        let mut channels = Vec::with_capacity(stats.channels());

        for channel in 0..stats.channels() {
            let points = regime_points(stats, channel, regime)?;
            if points.is_empty() {
                return Err(NlfError::InsufficientSamples { channel });
            }

            let (line, report) = match self {
                ModelFitter::TwoPass(config) => fit_two_pass(&points, channel, config),
                ModelFitter::LeastMedian(config) => fit_least_median(&points, channel, config),
            };
            for warning in &report.warnings {
                sink.emit(&PipelineEvent::Fit(*warning));
            }
            a.push(line.a);
            b.push(line.b);
            channels.push(report);
        }

        let model = NoiseModel::new(a, b)?
            .with_regressor(regime.regressor)?
            .scaled(exposure_multiplier * exposure_multiplier);

        sink.emit(&PipelineEvent::ModelFitted {
            model: model.clone(),
            samples_used: channels.iter().map(|c| c.samples_used).collect(),
            mse: channels.iter().map(|c| c.mse).collect(),
        });

        Ok(FitReport { model, channels })
    }
}

/// `(regressor mean, variance)` pairs of `channel` inside the linear regime.
pub(crate) fn regime_points(
    stats: &StatisticsSet,
    channel: usize,
    config: &FitConfig,
) -> Result<Vec<(f64, f64)>> {
    let source = match config.regressor {
        Regressor::OwnMean => channel,
        Regressor::Channel(k) if k < stats.channels() => k,
        Regressor::Channel(k) => {
            return Err(NlfError::InvalidConfig(format!(
                "regressor channel {} out of range for {} channels",
                k,
                stats.channels()
            )))
        }
    };

    let points = stats
        .channel(source)
        .iter()
        .zip(stats.channel(channel))
        .filter(|(reg, s)| {
            let x = reg.mean;
            let y = s.variance;
            if x.is_nan() || y.is_nan() {
                return false;
            }
            if !(x >= config.min_value && x <= config.max_value) {
                return false;
            }
            if !(y > 0.0 && y <= config.variance_ceiling) {
                return false;
            }
            match config.kurtosis_bounds {
                Some((lo, hi)) => s.kurtosis > lo && s.kurtosis < hi,
                None => true,
            }
        })
        .map(|(reg, s)| (reg.mean, s.variance))
        .collect();
    Ok(points)
}

/// Least squares, outlier rejection, least squares again.
fn fit_two_pass(points: &[(f64, f64)], channel: usize, config: &FitConfig) -> (LineFit, ChannelFit) {
    let mut warnings = Vec::new();

    // Non-empty input always solves.
    let first = points
        .iter()
        .copied()
        .collect::<LinearAccumulator>()
        .solve()
        .unwrap_or(LineFit {
            a: NLF_FLOOR,
            b: NLF_FLOOR,
            singular: true,
        });
    let first_mse = first.mean_squared_error(points);

    let first_report = |warnings: Vec<FitWarning>| ChannelFit {
        candidates: points.len(),
        samples_used: points.len(),
        mse: first_mse,
        warnings,
    };

    if first.singular {
        warnings.push(FitWarning::SingularModel { channel });
        return (first, first_report(warnings));
    }
    let mean_y2 = points.iter().map(|&(_, y)| y * y).sum::<f64>() / points.len() as f64;
    if first_mse <= EXACT_FIT_TOLERANCE * EXACT_FIT_TOLERANCE * mean_y2 {
        return (first, first_report(warnings));
    }

    let cut = config.outlier_multiplier * first_mse;
    let inliers: Vec<(f64, f64)> = points
        .iter()
        .copied()
        .filter(|&(x, y)| (first.predict(x) - y).powi(2) <= cut)
        .filter(|&(_, y)| !config.tighten_ceiling_to_slope || y <= first.b)
        .collect();

    let second = inliers
        .iter()
        .copied()
        .collect::<LinearAccumulator>()
        .solve()
        .filter(|fit| !fit.singular);

    match second {
        Some(second) => {
            let second_mse = second.mean_squared_error(&inliers);
            if second_mse <= first_mse {
                (
                    second,
                    ChannelFit {
                        candidates: points.len(),
                        samples_used: inliers.len(),
                        mse: second_mse,
                        warnings,
                    },
                )
            } else {
                warnings.push(FitWarning::DegenerateFit {
                    channel,
                    first_mse,
                    second_mse,
                });
                (first, first_report(warnings))
            }
        }
        None => {
            warnings.push(FitWarning::DegenerateFit {
                channel,
                first_mse,
                second_mse: f64::INFINITY,
            });
            (first, first_report(warnings))
        }
    }
}
