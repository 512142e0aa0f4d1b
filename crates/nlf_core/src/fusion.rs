//! Burst accumulation with noise-model-derived ghost rejection.
//!
//! The first frame becomes the reference. Every later frame is warped onto
//! it and merged as a per-pixel running weighted mean; pixels whose
//! difference from the running estimate is implausible under the noise model
//! get a reduced weight instead of being rejected, so moving content and
//! registration errors fade out without ever stalling the burst.

use ndarray::{Array2, Array3, ArrayView3, Axis, Zip};

use crate::config::FusionConfig;
use crate::error::{FusionWarning, NlfError, Result};
use crate::events::{EventSink, PipelineEvent};
use crate::float_trait::NlfFloat;
use crate::homography::{warp_frame, Alignment};
use crate::noise_model::NoiseModel;
use crate::parallel::{fill_rows, reduce_rows, Execution};

/// Accumulated burst data.
#[derive(Debug, Clone)]
pub struct FusionState<F> {
    pub fused: Array3<F>,
    /// Accumulated per-pixel weight `W`; 1 after the reference frame.
    pub weight_sum: Array2<f64>,
    pub frame_count: usize,
}

/// Lifecycle of a [`FrameFusion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionPhase {
    Empty,
    Accumulating,
}

/// Outcome of merging one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameReport {
    /// Position of the frame in the burst; the reference is 0.
    pub frame_index: usize,
    pub mean_weight: f64,
    /// Fraction of pixels above the ghost threshold.
    pub outlier_fraction: f64,
    pub warning: Option<FusionWarning>,
}

/// Single-writer accumulator for one burst at a time.
#[derive(Debug, Clone)]
pub struct FrameFusion<F> {
    config: FusionConfig,
    execution: Execution,
    state: Option<FusionState<F>>,
}

impl<F: NlfFloat> FrameFusion<F> {
    pub fn new(config: FusionConfig, execution: Execution) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            execution,
            state: None,
        })
    }

    pub fn phase(&self) -> FusionPhase {
        match self.state {
            None => FusionPhase::Empty,
            Some(_) => FusionPhase::Accumulating,
        }
    }

    pub fn state(&self) -> Option<&FusionState<F>> {
        self.state.as_ref()
    }

    pub fn frame_count(&self) -> usize {
        self.state.as_ref().map_or(0, |s| s.frame_count)
    }

    /// Copy of the current fused image.
    pub fn snapshot(&self) -> Option<Array3<F>> {
        self.state.as_ref().map(|s| s.fused.clone())
    }

    /// Mean accumulated weight, i.e. the effective number of frames.
    pub fn mean_weight(&self) -> Option<f64> {
        self.state
            .as_ref()
            .and_then(|s| s.weight_sum.mean())
    }

    /// Predicted per-pixel variance of the fused image, `σ²(fused) / W`.
    pub fn estimated_variance(&self, model: &NoiseModel) -> Result<Option<Array3<F>>> {
        let state = match &self.state {
            Some(state) => state,
            None => return Ok(None),
        };
        let (channels, _, _) = state.fused.dim();
        model.ensure_channels(channels)?;

        let mut out = Array3::<F>::zeros(state.fused.raw_dim());
        for (c, mut plane) in out.axis_iter_mut(Axis(0)).enumerate() {
            let intensity = state.fused.index_axis(Axis(0), model.intensity_channel(c));
            Zip::from(&mut plane)
                .and(&intensity)
                .and(&state.weight_sum)
                .for_each(|v, &i, &w| *v = F::from_f64_c(model.variance(c, i.as_f64()) / w));
        }
        Ok(Some(out))
    }

    /// Drop the burst; the next frame becomes a new reference.
    pub fn reset(&mut self) {
        self.state = None;
    }

    /// Merge one frame.
    ///
    /// The first frame after construction or [`reset`](Self::reset) is taken
    /// verbatim as the reference and its alignment is ignored.
    ///
    /// # Errors
    /// `DimensionMismatch` when the frame does not match the reference,
    /// `ChannelMismatch` when the model does not match the frame and
    /// `InvalidConfig` for a non-finite homography or a non-positive
    /// exposure. The state is left untouched on error.
    pub fn add_frame(
        &mut self,
        frame: ArrayView3<F>,
        alignment: &Alignment,
        model: &NoiseModel,
        sink: &dyn EventSink,
    ) -> Result<FrameReport> {
        let (channels, rows, cols) = frame.dim();
        model.ensure_channels(channels)?;

        let state = match &mut self.state {
            None => {
                self.state = Some(FusionState {
                    fused: frame.to_owned(),
                    weight_sum: Array2::ones((rows, cols)),
                    frame_count: 1,
                });
                let report = FrameReport {
                    frame_index: 0,
                    mean_weight: 1.0,
                    outlier_fraction: 0.0,
                    warning: None,
                };
                emit_report(&report, sink);
                return Ok(report);
            }
            Some(state) => state,
        };

        alignment.validate()?;
        if state.fused.dim() != frame.dim() {
            return Err(NlfError::DimensionMismatch {
                expected: state.fused.dim(),
                actual: frame.dim(),
            });
        }

        let warped = warp_frame(frame, alignment, self.execution);
        let distances = normalized_distances(state, warped.view(), alignment, model, self.execution);

        let tau2 = self.config.ghost_threshold * self.config.ghost_threshold;
        let outliers = reduce_rows(
            rows,
            self.execution,
            0usize,
            |r| distances.row(r).iter().filter(|&&d2| d2 > tau2).count(),
            |a, b| a + b,
        );
        let outlier_fraction = outliers as f64 / (rows * cols).max(1) as f64;

        let frame_index = state.frame_count;
        let warning = if outlier_fraction > self.config.misaligned_fraction {
            Some(FusionWarning::MisalignedFrame {
                frame_index,
                outlier_fraction,
            })
        } else {
            None
        };
        let frame_scale = if warning.is_some() {
            self.config.misaligned_weight
        } else {
            1.0
        };

        let min_weight = self.config.min_weight;
        let weights = distances.mapv(|d2| {
            let w = if d2 <= tau2 {
                1.0
            } else {
                ((-(d2 - tau2) / tau2).exp()).max(min_weight)
            };
            w * frame_scale
        });

        for (mut fused_plane, frame_plane) in state
            .fused
            .axis_iter_mut(Axis(0))
            .zip(warped.axis_iter(Axis(0)))
        {
            let weight_sum = &state.weight_sum;
            let weights = &weights;
            fill_rows(fused_plane.view_mut(), self.execution, |r, row| {
                for (c, v) in row.iter_mut().enumerate() {
                    let acc = weight_sum[[r, c]];
                    let w = weights[[r, c]];
                    let blended = (acc * v.as_f64() + w * frame_plane[[r, c]].as_f64()) / (acc + w);
                    *v = F::from_f64_c(blended);
                }
            });
        }
        state.weight_sum += &weights;
        state.frame_count += 1;

        let report = FrameReport {
            frame_index,
            mean_weight: weights.mean().unwrap_or(0.0),
            outlier_fraction,
            warning,
        };
        emit_report(&report, sink);
        Ok(report)
    }
}

fn emit_report(report: &FrameReport, sink: &dyn EventSink) {
    if let Some(warning) = report.warning {
        sink.emit(&PipelineEvent::Fusion(warning));
    }
    sink.emit(&PipelineEvent::FrameFused {
        frame_index: report.frame_index,
        mean_weight: report.mean_weight,
        outlier_fraction: report.outlier_fraction,
    });
}

/// Per-pixel squared frame/estimate distance in units of the predicted
/// difference variance, averaged over channels.
fn normalized_distances<F: NlfFloat>(
    state: &FusionState<F>,
    warped: ArrayView3<F>,
    alignment: &Alignment,
    model: &NoiseModel,
    execution: Execution,
) -> Array2<f64> {
    let (channels, rows, cols) = state.fused.dim();
    let gain2 = alignment.exposure_multiplier * alignment.exposure_multiplier;
    let mut distances = Array2::<f64>::zeros((rows, cols));

    fill_rows(distances.view_mut(), execution, |r, row| {
        for (c, d2) in row.iter_mut().enumerate() {
            let w = state.weight_sum[[r, c]];
            let mut total = 0.0;
            for ch in 0..channels {
                let fused = state.fused[[ch, r, c]].as_f64();
                let intensity = state.fused[[model.intensity_channel(ch), r, c]].as_f64();
                let sigma2 = gain2 * model.variance(ch, intensity) * (1.0 + 1.0 / w);
                let diff = warped[[ch, r, c]].as_f64() - fused;
                total += diff * diff / sigma2;
            }
            *d2 = total / channels as f64;
        }
    });
    distances
}
