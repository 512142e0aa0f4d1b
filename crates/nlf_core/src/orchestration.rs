//! End-to-end entry points.
//!
//! This module wires the stages together so callers do not have to:
//! - Statistics collection and NLF fit, with fallback to a prior model
//! - Per-level NLF measurement and multiscale denoising of a single frame
//! - Burst fusion followed by multiscale denoising of the fused result
//!
//! ## Fallback policy
//!
//! A fit that cannot produce a model (flat field, everything clipped, image
//! smaller than the statistics window) never fails the pipeline. The
//! caller-supplied prior is used instead and a `FallbackToPrior` event is
//! emitted.

use ndarray::{Array2, Array3, ArrayView3};

use crate::config::NlfConfig;
use crate::error::{NlfError, Result};
use crate::events::{EventSink, PipelineEvent};
use crate::float_trait::NlfFloat;
use crate::fusion::{FrameFusion, FrameReport};
use crate::homography::Alignment;
use crate::noise_model::NoiseModel;
use crate::pyramid::{denoise_pyramid, Pyramid};
use crate::statistics::collect_statistics;

// =============================================================================
// Types
// =============================================================================

/// Result of [`denoise_image`].
#[derive(Debug, Clone)]
pub struct DenoiseOutput<F> {
    pub image: Array3<F>,
    /// Model used on each pyramid level, finest first.
    pub level_models: Vec<NoiseModel>,
    /// Detail mask per level; always present at full resolution.
    pub masks: Vec<Option<Array2<F>>>,
}

/// Result of [`process_burst`].
#[derive(Debug, Clone)]
pub struct BurstOutput<F> {
    /// Denoised fused image.
    pub image: Array3<F>,
    /// Fused image before denoising.
    pub fused: Array3<F>,
    /// Reference-frame model.
    pub reference_model: NoiseModel,
    /// Model of the fused image (reference model over mean accumulated weight).
    pub fused_model: NoiseModel,
    pub frames: Vec<FrameReport>,
    pub masks: Vec<Option<Array2<F>>>,
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Fit errors that the pipeline recovers from with a prior model.
fn is_recoverable(error: &NlfError) -> bool {
    matches!(
        error,
        NlfError::InsufficientSamples { .. } | NlfError::ImageTooSmall { .. }
    )
}

fn fit_or_fallback<F: NlfFloat>(
    image: ArrayView3<F>,
    config: &NlfConfig,
    exposure_multiplier: f64,
    prior: &NoiseModel,
    level: Option<usize>,
    sink: &dyn EventSink,
) -> Result<NoiseModel> {
    let fitted = collect_statistics(image, &config.statistics, config.execution)
        .and_then(|stats| config.fitter.fit(&stats, exposure_multiplier, sink));

    match fitted {
        Ok(report) => Ok(report.model),
        Err(error) if is_recoverable(&error) => {
            sink.emit(&PipelineEvent::FallbackToPrior {
                level,
                reason: error.to_string(),
            });
            Ok(prior.clone())
        }
        Err(error) => Err(error),
    }
}

// =============================================================================
// Main Entry Points
// =============================================================================

/// Measure the NLF of `image`, falling back to `prior` when no model can be
/// fitted.
///
/// # Errors
/// Configuration errors, and `ChannelMismatch` when `prior` does not have one
/// entry per image channel.
pub fn estimate_noise_model<F: NlfFloat>(
    image: ArrayView3<F>,
    config: &NlfConfig,
    exposure_multiplier: f64,
    prior: &NoiseModel,
    sink: &dyn EventSink,
) -> Result<NoiseModel> {
    config.validate()?;
    prior.ensure_channels(image.dim().0)?;
    fit_or_fallback(image, config, exposure_multiplier, prior, None, sink)
}

/// Denoise a single frame.
///
/// The NLF is measured on every pyramid level; a level whose fit fails uses
/// the level-0 model scaled for the level's reduction instead.
pub fn denoise_image<F: NlfFloat>(
    image: ArrayView3<F>,
    config: &NlfConfig,
    prior: &NoiseModel,
    sink: &dyn EventSink,
) -> Result<DenoiseOutput<F>> {
    config.validate()?;
    prior.ensure_channels(image.dim().0)?;

    let pyramid = Pyramid::build(
        image,
        config.pyramid.levels,
        config.pyramid.guide_channel,
        config.execution,
    )?;

    let base = fit_or_fallback(image, config, 1.0, prior, Some(0), sink)?;
    let mut level_models = Vec::with_capacity(pyramid.len());
    level_models.push(base.clone());
    for k in 1..pyramid.len() {
        let scaled = base.for_pyramid_level(k);
        let model = fit_or_fallback(
            pyramid.level(k).image.view(),
            config,
            1.0,
            &scaled,
            Some(k),
            sink,
        )?;
        level_models.push(model);
    }

    let output = denoise_pyramid(
        &pyramid,
        &level_models,
        &config.denoise,
        &config.pyramid,
        config.execution,
        sink,
    )?;

    Ok(DenoiseOutput {
        image: output.image,
        level_models,
        masks: output.masks,
    })
}

/// Fuse a registered burst and denoise the result.
///
/// `frames[0]` is the reference; `alignments[i]` registers `frames[i]`
/// against it (the reference alignment is ignored). The NLF is measured on
/// the reference and divided by the mean accumulated weight for the fused
/// image, since fusing `n` frames divides the noise variance by about `n`.
pub fn process_burst<F: NlfFloat>(
    frames: &[ArrayView3<F>],
    alignments: &[Alignment],
    config: &NlfConfig,
    prior: &NoiseModel,
    sink: &dyn EventSink,
) -> Result<BurstOutput<F>> {
    config.validate()?;
    let reference = match frames.first() {
        Some(reference) => *reference,
        None => return Err(NlfError::InvalidConfig("burst has no frames".to_string())),
    };
    if alignments.len() != frames.len() {
        return Err(NlfError::InvalidConfig(format!(
            "{} frames but {} alignments",
            frames.len(),
            alignments.len()
        )));
    }

    let reference_model = estimate_noise_model(reference, config, 1.0, prior, sink)?;

    let mut fusion = FrameFusion::new(config.fusion.clone(), config.execution)?;
    let mut reports = Vec::with_capacity(frames.len());
    for (frame, alignment) in frames.iter().zip(alignments) {
        reports.push(fusion.add_frame(*frame, alignment, &reference_model, sink)?);
    }

    let fused = fusion
        .snapshot()
        .ok_or_else(|| NlfError::InvalidConfig("burst has no frames".to_string()))?;
    let effective_frames = fusion.mean_weight().unwrap_or(1.0).max(1.0);
    let fused_model = reference_model.scaled(1.0 / effective_frames);

    let level_models: Vec<NoiseModel> = (0..config.pyramid.levels)
        .map(|k| fused_model.for_pyramid_level(k))
        .collect();
    let pyramid = Pyramid::build(
        fused.view(),
        config.pyramid.levels,
        config.pyramid.guide_channel,
        config.execution,
    )?;
    let output = denoise_pyramid(
        &pyramid,
        &level_models,
        &config.denoise,
        &config.pyramid,
        config.execution,
        sink,
    )?;

    Ok(BurstOutput {
        image: output.image,
        fused,
        reference_model,
        fused_model,
        frames: reports,
        masks: output.masks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingSink;
    use crate::parallel::Execution;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    /// Smooth gradient plus signal-dependent Gaussian noise.
    fn noisy_frame(rows: usize, cols: usize, a: f64, b: f64, seed: u64) -> Array3<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let unit = Normal::new(0.0, 1.0).unwrap();
        Array3::from_shape_fn((1, rows, cols), |(_, r, c)| {
            let clean = 0.05 + 0.35 * (r as f64 / rows as f64) + 0.05 * (c as f64 / cols as f64);
            clean + (a + b * clean).sqrt() * unit.sample(&mut rng)
        })
    }

    fn sequential() -> NlfConfig {
        NlfConfig {
            execution: Execution::Sequential,
            ..NlfConfig::default()
        }
    }

    #[test]
    fn test_estimate_recovers_model_on_noisy_frame() {
        let (a, b) = (2e-6, 2e-4);
        let image = noisy_frame(128, 128, a, b, 1);
        let prior = NoiseModel::uniform(1, 1e-3, 1e-3);
        let sink = CollectingSink::new();

        let model = estimate_noise_model(image.view(), &NlfConfig::default(), 1.0, &prior, &sink).unwrap();
        // 9x9 windows also see the signal slope; a loose bound is enough here.
        assert!((model.b()[0] / b - 1.0).abs() < 0.25, "B = {}", model.b()[0]);
        assert!(sink
            .events()
            .iter()
            .all(|e| !matches!(e, PipelineEvent::FallbackToPrior { .. })));
    }

    #[test]
    fn test_flat_field_falls_back_to_prior() {
        let image = Array3::from_elem((2, 32, 32), 0.25f64);
        let prior = NoiseModel::uniform(2, 3e-5, 4e-4);
        let sink = CollectingSink::new();

        let model = estimate_noise_model(image.view(), &sequential(), 1.0, &prior, &sink).unwrap();
        assert_eq!(model, prior);
        assert!(sink
            .events()
            .iter()
            .any(|e| matches!(e, PipelineEvent::FallbackToPrior { level: None, .. })));
    }

    #[test]
    fn test_prior_channel_count_is_checked() {
        let image = Array3::from_elem((3, 16, 16), 0.25f64);
        let prior = NoiseModel::uniform(1, 3e-5, 4e-4);
        assert!(matches!(
            estimate_noise_model(image.view(), &sequential(), 1.0, &prior, &CollectingSink::new()),
            Err(NlfError::ChannelMismatch { .. })
        ));
    }

    #[test]
    fn test_denoise_image_small_levels_use_scaled_base() {
        // Level 2 is 6x6, smaller than the 9x9 statistics window.
        let image = noisy_frame(24, 24, 1e-6, 2e-4, 2);
        let prior = NoiseModel::uniform(1, 1e-5, 1e-4);
        let sink = CollectingSink::new();

        let output = denoise_image(image.view(), &sequential(), &prior, &sink).unwrap();
        assert_eq!(output.image.dim(), image.dim());
        assert_eq!(output.level_models.len(), 3);

        let base = &output.level_models[0];
        assert_eq!(output.level_models[2], base.for_pyramid_level(2));
        assert!(sink
            .events()
            .iter()
            .any(|e| matches!(e, PipelineEvent::FallbackToPrior { level: Some(2), .. })));
    }

    #[test]
    fn test_default_denoise_reports_full_resolution_mask() {
        let image = noisy_frame(32, 32, 1e-6, 2e-4, 3);
        let prior = NoiseModel::uniform(1, 1e-6, 2e-4);
        let output = denoise_image(image.view(), &sequential(), &prior, &CollectingSink::new()).unwrap();

        let mask = output.masks[0].as_ref().unwrap();
        assert_eq!(mask.dim(), (32, 32));
        assert!(mask.iter().all(|&m| (0.0..=1.0).contains(&m)));
        assert!(output.masks[1..].iter().all(|m| m.is_none()));
    }

    #[test]
    fn test_burst_reduces_noise() {
        let (a, b) = (1e-6, 2e-4);
        let frames: Vec<Array3<f64>> = (0..4).map(|i| noisy_frame(48, 48, a, b, 10 + i)).collect();
        let views: Vec<ArrayView3<f64>> = frames.iter().map(|f| f.view()).collect();
        let alignments = vec![Alignment::identity(); 4];
        let prior = NoiseModel::uniform(1, a, b);

        let output = process_burst(&views, &alignments, &sequential(), &prior, &CollectingSink::new()).unwrap();

        assert_eq!(output.frames.len(), 4);
        assert_eq!(output.frames[3].frame_index, 3);
        assert!(output.fused_model.b()[0] < output.reference_model.b()[0]);

        let clean = |r: usize, c: usize| 0.05 + 0.35 * (r as f64 / 48.0) + 0.05 * (c as f64 / 48.0);
        let error = |img: &Array3<f64>| {
            img.indexed_iter()
                .map(|((_, r, c), v)| (v - clean(r, c)).powi(2))
                .sum::<f64>()
                / img.len() as f64
        };
        assert!(error(&output.fused) < 0.5 * error(&frames[0]));
        assert!(error(&output.image) < error(&frames[0]));
    }

    #[test]
    fn test_burst_argument_checks() {
        let prior = NoiseModel::uniform(1, 1e-5, 1e-4);
        let frame = Array3::from_elem((1, 16, 16), 0.2f64);
        assert!(process_burst::<f64>(&[], &[], &sequential(), &prior, &CollectingSink::new()).is_err());
        assert!(process_burst(&[frame.view()], &[], &sequential(), &prior, &CollectingSink::new()).is_err());
    }
}
