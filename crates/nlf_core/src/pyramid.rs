//! Multiscale decomposition, per-level denoising and coarse-to-fine
//! recomposition.
//!
//! Levels are 2× box reductions of each other. Every level is denoised on
//! its own (in parallel); the noise removed at a coarse level is then
//! propagated to the next finer one by subtracting the upsampled coarse
//! correction, so the finest level is integrated last.

use ndarray::{Array2, Array3, ArrayView2, ArrayView3, ArrayViewMut3, Axis, Zip};
use rayon::prelude::*;

use crate::config::{DenoiseConfig, PyramidConfig};
use crate::denoise::{denoise_level, LevelOutput};
use crate::error::{NlfError, Result};
use crate::events::{EventSink, PipelineEvent};
use crate::float_trait::NlfFloat;
use crate::guided::{detail_mask, guided_filter};
use crate::noise_model::NoiseModel;
use crate::parallel::{fill_rows, Execution};
use crate::resample::{downsample, upsample};

/// One resolution tier.
#[derive(Debug, Clone)]
pub struct PyramidLevel<F> {
    pub image: Array3<F>,
    /// Luminance used as guide and for the gradient.
    pub guide: Array2<F>,
    /// Gradient magnitude of `guide`.
    pub gradient: Array2<F>,
    /// Downsampling factor relative to level 0.
    pub scale: usize,
}

/// Levels finest first; level 0 is the input.
#[derive(Debug, Clone)]
pub struct Pyramid<F> {
    levels: Vec<PyramidLevel<F>>,
}

/// Result of [`denoise_multiscale`].
#[derive(Debug, Clone)]
pub struct MultiscaleOutput<F> {
    pub image: Array3<F>,
    /// Detail mask per level. Level 0 always has one; coarser levels only
    /// when their weight differs from 1.
    pub masks: Vec<Option<Array2<F>>>,
}

/// Luminance of a `(C, H, W)` image: one channel, or the channel mean.
pub fn luminance<F: NlfFloat>(image: ArrayView3<F>, guide_channel: Option<usize>) -> Result<Array2<F>> {
    let channels = image.len_of(Axis(0));
    match guide_channel {
        Some(k) if k < channels => Ok(image.index_axis(Axis(0), k).to_owned()),
        Some(k) => Err(NlfError::InvalidConfig(format!(
            "guide channel {} out of range for {} channels",
            k, channels
        ))),
        None => image.mean_axis(Axis(0)).ok_or_else(|| NlfError::ImageTooSmall {
            rows: image.len_of(Axis(1)),
            cols: image.len_of(Axis(2)),
            reason: "image has no channels".to_string(),
        }),
    }
}

/// Central-difference gradient magnitude, clamp-to-edge.
pub fn gradient_magnitude<F: NlfFloat>(plane: ArrayView2<F>, execution: Execution) -> Array2<F> {
    let (rows, cols) = plane.dim();
    let mut out = Array2::<F>::zeros((rows, cols));
    let half = F::from_f64_c(0.5);
    fill_rows(out.view_mut(), execution, |r, row| {
        let up = r.saturating_sub(1);
        let down = (r + 1).min(rows - 1);
        for (c, v) in row.iter_mut().enumerate() {
            let left = c.saturating_sub(1);
            let right = (c + 1).min(cols - 1);
            let gx = (plane[[r, right]] - plane[[r, left]]) * half;
            let gy = (plane[[down, c]] - plane[[up, c]]) * half;
            *v = (gx * gx + gy * gy).sqrt();
        }
    });
    out
}

impl<F: NlfFloat> Pyramid<F> {
    /// Decompose `image` into `levels` tiers.
    ///
    /// # Errors
    /// `ImageTooSmall` when a level would have zero rows or columns.
    pub fn build(
        image: ArrayView3<F>,
        levels: usize,
        guide_channel: Option<usize>,
        execution: Execution,
    ) -> Result<Self> {
        if levels == 0 {
            return Err(NlfError::InvalidConfig("levels must be > 0".to_string()));
        }
        let (_, rows, cols) = image.dim();
        let shift = (levels - 1) as u32;
        let coarsest = |extent: usize| extent.checked_shr(shift).unwrap_or(0);
        if coarsest(rows) == 0 || coarsest(cols) == 0 {
            return Err(NlfError::ImageTooSmall {
                rows,
                cols,
                reason: format!("cannot build {} pyramid levels", levels),
            });
        }

        let mut tiers = Vec::with_capacity(levels);
        let mut current = image.to_owned();
        for k in 0..levels {
            let next = if k + 1 < levels {
                Some(downsample(current.view(), execution))
            } else {
                None
            };
            let guide = luminance(current.view(), guide_channel)?;
            let gradient = gradient_magnitude(guide.view(), execution);
            tiers.push(PyramidLevel {
                image: current,
                guide,
                gradient,
                scale: 1 << k,
            });
            match next {
                Some(next) => current = next,
                None => break,
            }
        }
        Ok(Self { levels: tiers })
    }

    pub fn levels(&self) -> &[PyramidLevel<F>] {
        &self.levels
    }

    pub fn level(&self, k: usize) -> &PyramidLevel<F> {
        &self.levels[k]
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Recompose denoised levels without detail adjustment.
    pub fn compose(&self, denoised: &[Array3<F>], execution: Execution) -> Result<Array3<F>> {
        let masks = vec![None; denoised.len()];
        compose_levels(
            self,
            denoised,
            &masks,
            &PyramidConfig {
                levels: self.len(),
                detail_weights: vec![1.0; self.len()],
                guide_channel: None,
            },
            &DenoiseConfig::default(),
            execution,
            false,
        )
    }
}

/// Scale the detail band `result − base` by `weight` where the mask is
/// confident: `result += (weight − 1)·mask·(result − base)`.
///
/// With `weight == 1` every pixel is left bit-identical.
pub fn apply_detail_weight<F: NlfFloat>(
    mut result: ArrayViewMut3<F>,
    base: ArrayView3<F>,
    mask: ArrayView2<F>,
    weight: f64,
) {
    let gain = F::from_f64_c(weight - 1.0);
    for (mut channel, base_channel) in result.axis_iter_mut(Axis(0)).zip(base.axis_iter(Axis(0))) {
        Zip::from(&mut channel)
            .and(&base_channel)
            .and(&mask)
            .for_each(|r, &b, &m| {
                let delta = gain * m * (*r - b);
                if delta != F::zero() {
                    *r += delta;
                }
            });
    }
}

/// Guided-filter smoothing of each channel, guided by the image luminance.
fn smooth_base<F: NlfFloat>(
    image: ArrayView3<F>,
    config: &DenoiseConfig,
    guide_channel: Option<usize>,
    execution: Execution,
) -> Result<Array3<F>> {
    let guide = luminance(image, guide_channel)?;
    let mut base = Array3::<F>::zeros(image.raw_dim());
    for (plane, mut dst) in image.axis_iter(Axis(0)).zip(base.axis_iter_mut(Axis(0))) {
        dst.assign(&guided_filter(
            guide.view(),
            plane,
            config.guided_radius,
            config.eps,
            execution,
        ));
    }
    Ok(base)
}

fn compose_levels<F: NlfFloat>(
    pyramid: &Pyramid<F>,
    denoised: &[Array3<F>],
    masks: &[Option<Array2<F>>],
    pyramid_config: &PyramidConfig,
    denoise_config: &DenoiseConfig,
    execution: Execution,
    force_detail_pass: bool,
) -> Result<Array3<F>> {
    let levels = pyramid.len();
    if denoised.len() != levels || masks.len() != levels {
        return Err(NlfError::InvalidConfig(format!(
            "expected {} denoised levels, got {}",
            levels,
            denoised.len()
        )));
    }
    for (tier, image) in pyramid.levels.iter().zip(denoised) {
        if tier.image.dim() != image.dim() {
            return Err(NlfError::DimensionMismatch {
                expected: tier.image.dim(),
                actual: image.dim(),
            });
        }
    }

    let detail_pass = |k: usize| force_detail_pass || pyramid_config.detail_weight(k) != 1.0;
    let mask_for = |k: usize| -> Result<Array2<F>> {
        match &masks[k] {
            Some(mask) => Ok(mask.clone()),
            None => Ok(detail_mask(
                pyramid.levels[k].guide.view(),
                denoise_config.guided_radius,
                denoise_config.ltm_eps,
                execution,
            )),
        }
    };

    let coarsest = levels - 1;
    let mut result = denoised[coarsest].clone();
    if detail_pass(coarsest) {
        let base = smooth_base(
            result.view(),
            denoise_config,
            pyramid_config.guide_channel,
            execution,
        )?;
        let mask = mask_for(coarsest)?;
        apply_detail_weight(
            result.view_mut(),
            base.view(),
            mask.view(),
            pyramid_config.detail_weight(coarsest),
        );
    }

    for k in (0..coarsest).rev() {
        let (_, rows, cols) = denoised[k].dim();
        let removed = &pyramid.levels[k + 1].image - &result;
        let removed_up = upsample(removed.view(), rows, cols, execution);
        let mut finer = &denoised[k] - &removed_up;

        if detail_pass(k) {
            let base = upsample(result.view(), rows, cols, execution);
            let mask = mask_for(k)?;
            apply_detail_weight(finer.view_mut(), base.view(), mask.view(), pyramid_config.detail_weight(k));
        }
        result = finer;
    }
    Ok(result)
}

/// Denoise `image` through a freshly built pyramid.
///
/// `models[k]` drives level `k`; there must be one model per level.
pub fn denoise_multiscale<F: NlfFloat>(
    image: ArrayView3<F>,
    models: &[NoiseModel],
    denoise_config: &DenoiseConfig,
    pyramid_config: &PyramidConfig,
    execution: Execution,
    sink: &dyn EventSink,
) -> Result<MultiscaleOutput<F>> {
    pyramid_config.validate()?;
    let pyramid = Pyramid::build(
        image,
        pyramid_config.levels,
        pyramid_config.guide_channel,
        execution,
    )?;
    denoise_pyramid(&pyramid, models, denoise_config, pyramid_config, execution, sink)
}

/// Denoise every level of `pyramid` and recompose.
pub fn denoise_pyramid<F: NlfFloat>(
    pyramid: &Pyramid<F>,
    models: &[NoiseModel],
    denoise_config: &DenoiseConfig,
    pyramid_config: &PyramidConfig,
    execution: Execution,
    sink: &dyn EventSink,
) -> Result<MultiscaleOutput<F>> {
    pyramid_config.validate()?;
    denoise_config.validate()?;
    if pyramid.len() != pyramid_config.levels || models.len() != pyramid.len() {
        return Err(NlfError::InvalidConfig(format!(
            "expected {} level models for {} levels, got {}",
            pyramid_config.levels,
            pyramid.len(),
            models.len()
        )));
    }

    let denoise = |k: usize| -> Result<LevelOutput<F>> {
        let tier = &pyramid.levels[k];
        denoise_level(
            tier.image.view(),
            tier.gradient.view(),
            tier.guide.view(),
            &models[k],
            denoise_config,
            k == 0 || pyramid_config.detail_weight(k) != 1.0,
            execution,
        )
    };

    let outputs: Vec<LevelOutput<F>> = match execution {
        Execution::Parallel => (0..pyramid.len())
            .into_par_iter()
            .map(denoise)
            .collect::<Result<Vec<_>>>()?,
        Execution::Sequential => (0..pyramid.len()).map(denoise).collect::<Result<Vec<_>>>()?,
    };

    for (k, output) in outputs.iter().enumerate() {
        let (_, rows, cols) = output.image.dim();
        sink.emit(&PipelineEvent::LevelDenoised {
            level: k,
            rows,
            cols,
            mask_computed: output.mask.is_some(),
        });
    }

    let (denoised, masks): (Vec<_>, Vec<_>) = outputs.into_iter().map(|o| (o.image, o.mask)).unzip();
    let image = compose_levels(
        pyramid,
        &denoised,
        &masks,
        pyramid_config,
        denoise_config,
        execution,
        false,
    )?;
    Ok(MultiscaleOutput { image, masks })
}
