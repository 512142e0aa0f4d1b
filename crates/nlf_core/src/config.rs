//! Configuration for every stage of the engine.
//!
//! All parameters have defaults matching the tuned values of the reference
//! camera pipeline; they are starting points for recalibration, not
//! invariants. Every struct deserializes with missing fields filled from
//! `Default`.

use serde::{Deserialize, Serialize};

use crate::error::{NlfError, Result};
use crate::fitter::ModelFitter;
use crate::noise_model::Regressor;
use crate::parallel::Execution;

// =============================================================================
// Constants
// =============================================================================

/// Default statistics window (pixels per side)
const DEFAULT_WINDOW: usize = 9;

/// Default output stride (1 = one sample per pixel)
const DEFAULT_STRIDE: usize = 1;

/// Lower bound of the linear sensor regime on a [0, 1] scale
const DEFAULT_MIN_VALUE: f64 = 0.001;

/// Upper bound of the linear sensor regime on a [0, 1] scale
const DEFAULT_MAX_VALUE: f64 = 0.5;

/// Only samples with variance below this a-priori ceiling enter the fit
const DEFAULT_VARIANCE_CEILING: f64 = 0.001;

/// Second pass keeps samples whose squared residual is below this fraction
/// of the first-pass MSE
const DEFAULT_OUTLIER_MULTIPLIER: f64 = 0.5;

/// Number of random 2-sample draws for least-median fitting
const DEFAULT_LMEDS_ITERATIONS: usize = 100;

/// Seed for least-median fitting (fixed for reproducible models)
const DEFAULT_LMEDS_SEED: u64 = 0x5eed_f17e;

/// Inlier band for the least-median refit, in robust standard deviations
const DEFAULT_LMEDS_INLIER_SCALE: f64 = 2.5;

/// Default denoise window radius (5×5 window)
const DEFAULT_DENOISE_RADIUS: usize = 2;

/// Threshold multiplier for the luma channel
const DEFAULT_LUMA_BOOST: f64 = 2.0;

/// Threshold multiplier for chroma channels
const DEFAULT_CHROMA_BOOST: f64 = 4.0;

/// Gradient magnitude, in luma noise sigmas, above which correction is reduced
const DEFAULT_GRADIENT_THRESHOLD: f64 = 4.0;

/// Guided filter window radius
const DEFAULT_GUIDED_RADIUS: usize = 2;

/// Guided filter regularization
const DEFAULT_GUIDED_EPS: f64 = 0.01;

/// Regularization of the self-guided filter producing the detail mask
const DEFAULT_LTM_EPS: f64 = 0.01;

/// Default pyramid depth (low/mid/high frequency)
const DEFAULT_LEVELS: usize = 3;

/// Normalized frame/estimate distance above which fusion weights decay
const DEFAULT_GHOST_THRESHOLD: f64 = 2.0;

/// Lowest per-pixel fusion weight; frames are never discarded outright
const DEFAULT_MIN_FUSION_WEIGHT: f64 = 1e-3;

/// Fraction of outlier pixels that marks a frame as misaligned
const DEFAULT_MISALIGNED_FRACTION: f64 = 0.5;

/// Global weight multiplier for misaligned frames
const DEFAULT_MISALIGNED_WEIGHT: f64 = 0.05;

// =============================================================================
// Statistics
// =============================================================================

/// Configuration for the statistics collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsConfig {
    /// Window side length, odd. Default: 9
    pub window: usize,
    /// Sample spacing: 1 for per-pixel, 2 for 2×2 blocks. Default: 1
    pub stride: usize,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            stride: DEFAULT_STRIDE,
        }
    }
}

impl StatisticsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window < 3 || self.window % 2 == 0 {
            return Err(NlfError::InvalidConfig(format!(
                "statistics window must be odd and >= 3, got {}",
                self.window
            )));
        }
        if self.stride == 0 {
            return Err(NlfError::InvalidConfig("stride must be > 0".to_string()));
        }
        Ok(())
    }
}

// =============================================================================
// Fitting
// =============================================================================

/// Configuration for the two-pass least-squares fitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Lower bound of the linear regime. Default: 0.001
    pub min_value: f64,
    /// Upper bound of the linear regime. Default: 0.5
    pub max_value: f64,
    /// A-priori variance ceiling. Default: 0.001
    pub variance_ceiling: f64,
    /// Residual cut for the second pass, as a fraction of the first MSE. Default: 0.5
    pub outlier_multiplier: f64,
    /// Optional excess kurtosis window; samples outside are rejected.
    pub kurtosis_bounds: Option<(f64, f64)>,
    /// Second pass also requires `variance <= B` from the first pass.
    pub tighten_ceiling_to_slope: bool,
    /// Intensity the variance is regressed on. Default: own channel mean
    pub regressor: Regressor,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            min_value: DEFAULT_MIN_VALUE,
            max_value: DEFAULT_MAX_VALUE,
            variance_ceiling: DEFAULT_VARIANCE_CEILING,
            outlier_multiplier: DEFAULT_OUTLIER_MULTIPLIER,
            kurtosis_bounds: None,
            tighten_ceiling_to_slope: false,
            regressor: Regressor::OwnMean,
        }
    }
}

impl FitConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.min_value < self.max_value) {
            return Err(NlfError::InvalidConfig(format!(
                "min_value ({}) must be < max_value ({})",
                self.min_value, self.max_value
            )));
        }
        if !(self.variance_ceiling > 0.0) {
            return Err(NlfError::InvalidConfig(
                "variance_ceiling must be > 0".to_string(),
            ));
        }
        if !(self.outlier_multiplier > 0.0) {
            return Err(NlfError::InvalidConfig(
                "outlier_multiplier must be > 0".to_string(),
            ));
        }
        if let Some((lo, hi)) = self.kurtosis_bounds {
            if !(lo < hi) {
                return Err(NlfError::InvalidConfig(format!(
                    "kurtosis bounds ({}, {}) are empty",
                    lo, hi
                )));
            }
        }
        Ok(())
    }
}

/// Configuration for the least-median-of-squares fitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeastMedianConfig {
    /// Linear-regime filter shared with the two-pass fitter.
    pub regime: FitConfig,
    /// Random 2-sample draws. Default: 100
    pub iterations: usize,
    pub seed: u64,
    /// Inlier band for the final refit, in robust sigmas. Default: 2.5
    pub inlier_scale: f64,
}

impl Default for LeastMedianConfig {
    fn default() -> Self {
        Self {
            regime: FitConfig::default(),
            iterations: DEFAULT_LMEDS_ITERATIONS,
            seed: DEFAULT_LMEDS_SEED,
            inlier_scale: DEFAULT_LMEDS_INLIER_SCALE,
        }
    }
}

impl LeastMedianConfig {
    pub fn validate(&self) -> Result<()> {
        self.regime.validate()?;
        if self.iterations == 0 {
            return Err(NlfError::InvalidConfig(
                "iterations must be > 0".to_string(),
            ));
        }
        if !(self.inlier_scale > 0.0) {
            return Err(NlfError::InvalidConfig(
                "inlier_scale must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Denoising
// =============================================================================

/// Configuration for the per-level denoiser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DenoiseConfig {
    /// Smoothing window radius. Default: 2
    pub radius: usize,
    /// Threshold multiplier on channel 0. Default: 2.0
    pub luma_boost: f64,
    /// Threshold multiplier on the remaining channels. Default: 4.0
    pub chroma_boost: f64,
    /// Edge protection threshold in luma sigmas. Default: 4.0
    pub gradient_threshold: f64,
    /// Guided filter radius. Default: 2
    pub guided_radius: usize,
    /// Guided filter regularization. Default: 0.01
    pub eps: f64,
    /// Regularization of the detail mask filter. Default: 0.01
    pub ltm_eps: f64,
}

impl Default for DenoiseConfig {
    fn default() -> Self {
        Self {
            radius: DEFAULT_DENOISE_RADIUS,
            luma_boost: DEFAULT_LUMA_BOOST,
            chroma_boost: DEFAULT_CHROMA_BOOST,
            gradient_threshold: DEFAULT_GRADIENT_THRESHOLD,
            guided_radius: DEFAULT_GUIDED_RADIUS,
            eps: DEFAULT_GUIDED_EPS,
            ltm_eps: DEFAULT_LTM_EPS,
        }
    }
}

impl DenoiseConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.luma_boost >= 0.0) || !(self.chroma_boost >= 0.0) {
            return Err(NlfError::InvalidConfig(
                "luma_boost and chroma_boost must be >= 0".to_string(),
            ));
        }
        if !(self.gradient_threshold > 0.0) {
            return Err(NlfError::InvalidConfig(
                "gradient_threshold must be > 0".to_string(),
            ));
        }
        if !(self.eps >= 0.0) || !(self.ltm_eps >= 0.0) {
            return Err(NlfError::InvalidConfig(
                "eps and ltm_eps must be >= 0".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Pyramid
// =============================================================================

/// Configuration for the multiscale decomposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PyramidConfig {
    /// Number of levels including full resolution. Default: 3
    pub levels: usize,
    /// Detail gain per level, finest first. 1.0 leaves a level untouched.
    pub detail_weights: Vec<f64>,
    /// Channel used as guide/luma. `None` averages all channels.
    pub guide_channel: Option<usize>,
}

impl Default for PyramidConfig {
    fn default() -> Self {
        Self {
            levels: DEFAULT_LEVELS,
            detail_weights: vec![1.0; DEFAULT_LEVELS],
            guide_channel: None,
        }
    }
}

impl PyramidConfig {
    pub fn validate(&self) -> Result<()> {
        if self.levels == 0 {
            return Err(NlfError::InvalidConfig("levels must be > 0".to_string()));
        }
        if self.detail_weights.len() != self.levels {
            return Err(NlfError::InvalidConfig(format!(
                "expected {} detail weights, got {}",
                self.levels,
                self.detail_weights.len()
            )));
        }
        if self.detail_weights.iter().any(|w| !w.is_finite()) {
            return Err(NlfError::InvalidConfig(
                "detail weights must be finite".to_string(),
            ));
        }
        Ok(())
    }

    /// Detail weight for `level`, 1.0 when out of range.
    pub fn detail_weight(&self, level: usize) -> f64 {
        self.detail_weights.get(level).copied().unwrap_or(1.0)
    }
}

// =============================================================================
// Fusion
// =============================================================================

/// Configuration for the burst fuser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Normalized distance (in predicted sigmas) tolerated before
    /// down-weighting. Default: 2.0
    pub ghost_threshold: f64,
    /// Lower bound for per-pixel weights. Default: 1e-3
    pub min_weight: f64,
    /// Outlier fraction that flags a frame as misaligned. Default: 0.5
    pub misaligned_fraction: f64,
    /// Weight multiplier applied to a misaligned frame. Default: 0.05
    pub misaligned_weight: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            ghost_threshold: DEFAULT_GHOST_THRESHOLD,
            min_weight: DEFAULT_MIN_FUSION_WEIGHT,
            misaligned_fraction: DEFAULT_MISALIGNED_FRACTION,
            misaligned_weight: DEFAULT_MISALIGNED_WEIGHT,
        }
    }
}

impl FusionConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.ghost_threshold > 0.0) {
            return Err(NlfError::InvalidConfig(
                "ghost_threshold must be > 0".to_string(),
            ));
        }
        if !(self.min_weight > 0.0 && self.min_weight <= 1.0) {
            return Err(NlfError::InvalidConfig(
                "min_weight must be in (0, 1]".to_string(),
            ));
        }
        if !(self.misaligned_fraction > 0.0 && self.misaligned_fraction <= 1.0) {
            return Err(NlfError::InvalidConfig(
                "misaligned_fraction must be in (0, 1]".to_string(),
            ));
        }
        if !(self.misaligned_weight > 0.0 && self.misaligned_weight <= 1.0) {
            return Err(NlfError::InvalidConfig(
                "misaligned_weight must be in (0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Aggregate
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NlfConfig {
    pub statistics: StatisticsConfig,
    pub fitter: ModelFitter,
    pub denoise: DenoiseConfig,
    pub pyramid: PyramidConfig,
    pub fusion: FusionConfig,
    pub execution: Execution,
}

impl NlfConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document; missing sections and fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: NlfConfig = serde_json::from_str(json)
            .map_err(|e| NlfError::InvalidConfig(format!("malformed configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.statistics.validate()?;
        self.fitter.validate()?;
        self.denoise.validate()?;
        self.pyramid.validate()?;
        self.fusion.validate()
    }
}

#[cfg(test)]
#[allow(clippy::field_reassign_with_default)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_reference_tuning() {
        let config = NlfConfig::default();

        assert_eq!(config.statistics.window, 9);
        assert_eq!(config.statistics.stride, 1);
        assert_eq!(config.pyramid.levels, 3);
        assert_eq!(config.pyramid.detail_weights, vec![1.0, 1.0, 1.0]);
        match &config.fitter {
            ModelFitter::TwoPass(fit) => {
                assert_eq!(fit.min_value, 0.001);
                assert_eq!(fit.max_value, 0.5);
                assert_eq!(fit.variance_ceiling, 0.001);
                assert_eq!(fit.outlier_multiplier, 0.5);
            }
            other => panic!("unexpected default fitter {:?}", other),
        }
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_statistics_validation() {
        let mut config = StatisticsConfig::default();
        config.window = 8;
        assert!(config.validate().is_err());
        config.window = 1;
        assert!(config.validate().is_err());
        config.window = 5;
        config.stride = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fit_validation() {
        let mut config = FitConfig::default();
        config.min_value = 0.6;
        assert!(config.validate().is_err());

        let mut config = FitConfig::default();
        config.kurtosis_bounds = Some((1.0, -1.0));
        assert!(config.validate().is_err());

        let mut config = FitConfig::default();
        config.variance_ceiling = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pyramid_weight_count_validation() {
        let mut config = PyramidConfig::default();
        config.levels = 4;
        assert!(config.validate().is_err());
        config.detail_weights = vec![1.0, 1.5, 1.0, 1.0];
        assert!(config.validate().is_ok());
        assert_eq!(config.detail_weight(1), 1.5);
        assert_eq!(config.detail_weight(9), 1.0);
    }

    #[test]
    fn test_fusion_validation() {
        let mut config = FusionConfig::default();
        config.min_weight = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_json_partial_document() {
        let json = r#"{
            "statistics": { "window": 7 },
            "fitter": { "strategy": "least_median", "iterations": 50 },
            "pyramid": { "levels": 2, "detail_weights": [1.2, 1.0] },
            "execution": "sequential"
        }"#;
        let config = NlfConfig::from_json_str(json).unwrap();

        assert_eq!(config.statistics.window, 7);
        assert_eq!(config.statistics.stride, 1);
        assert_eq!(config.execution, Execution::Sequential);
        match config.fitter {
            ModelFitter::LeastMedian(lmeds) => {
                assert_eq!(lmeds.iterations, 50);
                assert_eq!(lmeds.regime.max_value, 0.5);
            }
            other => panic!("expected least-median fitter, got {:?}", other),
        }
    }

    #[test]
    fn test_from_json_rejects_invalid_values() {
        let json = r#"{ "pyramid": { "levels": 2 } }"#;
        assert!(matches!(
            NlfConfig::from_json_str(json),
            Err(NlfError::InvalidConfig(_))
        ));
        assert!(NlfConfig::from_json_str("not json").is_err());
    }
}
