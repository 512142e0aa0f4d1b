//! Structured diagnostics.
//!
//! Stages never write to process-wide state. Anything worth reporting is
//! handed to an [`EventSink`] supplied by the caller; [`LogSink`] forwards to
//! the `log` facade and [`CollectingSink`] keeps events for inspection.

use std::sync::Mutex;

use crate::error::{FitWarning, FusionWarning};
use crate::noise_model::NoiseModel;

/// A diagnostic event emitted by one of the pipeline stages.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// A noise model was fitted. `mse` holds the final per-channel error.
    ModelFitted {
        model: NoiseModel,
        samples_used: Vec<usize>,
        mse: Vec<f64>,
    },
    Fit(FitWarning),
    /// Fitting failed and the caller-supplied prior was used instead.
    FallbackToPrior { level: Option<usize>, reason: String },
    LevelDenoised {
        level: usize,
        rows: usize,
        cols: usize,
        mask_computed: bool,
    },
    FrameFused {
        frame_index: usize,
        mean_weight: f64,
        outlier_fraction: f64,
    },
    Fusion(FusionWarning),
}

/// Receiver for pipeline diagnostics.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &PipelineEvent);
}

/// Forwards events to the `log` facade. Warnings go to `warn!`, the rest to
/// `debug!`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::ModelFitted {
                model,
                samples_used,
                mse,
            } => {
                log::debug!(
                    "NLF A: {:?}, B: {:?}, RMSE: {:?} on {:?} samples",
                    model.a(),
                    model.b(),
                    mse.iter().map(|e| e.sqrt()).collect::<Vec<_>>(),
                    samples_used
                );
            }
            PipelineEvent::Fit(FitWarning::DegenerateFit {
                channel,
                first_mse,
                second_mse,
            }) => {
                log::warn!(
                    "NLF second pass is worse on channel {}: MSE {:.4e} > {:.4e}, keeping first pass",
                    channel,
                    second_mse,
                    first_mse
                );
            }
            PipelineEvent::Fit(FitWarning::SingularModel { channel }) => {
                log::warn!(
                    "NLF regression is singular on channel {}, slope pinned at floor",
                    channel
                );
            }
            PipelineEvent::FallbackToPrior { level, reason } => {
                log::warn!("NLF fit failed (level {:?}): {}, using prior", level, reason);
            }
            PipelineEvent::LevelDenoised {
                level,
                rows,
                cols,
                mask_computed,
            } => {
                log::debug!(
                    "denoised level {} ({}x{}), mask computed: {}",
                    level,
                    rows,
                    cols,
                    mask_computed
                );
            }
            PipelineEvent::FrameFused {
                frame_index,
                mean_weight,
                outlier_fraction,
            } => {
                log::debug!(
                    "fused frame {}: mean weight {:.3}, outliers {:.1}%",
                    frame_index,
                    mean_weight,
                    100.0 * outlier_fraction
                );
            }
            PipelineEvent::Fusion(FusionWarning::MisalignedFrame {
                frame_index,
                outlier_fraction,
            }) => {
                log::warn!(
                    "frame {} looks misaligned ({:.1}% outliers), down-weighting",
                    frame_index,
                    100.0 * outlier_fraction
                );
            }
        }
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &PipelineEvent) {}
}

/// Keeps every emitted event in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events received so far.
    pub fn events(&self) -> Vec<PipelineEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn fit_warnings(&self) -> Vec<FitWarning> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                PipelineEvent::Fit(w) => Some(w),
                _ => None,
            })
            .collect()
    }

    pub fn fusion_warnings(&self) -> Vec<FusionWarning> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                PipelineEvent::Fusion(w) => Some(w),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: &PipelineEvent) {
        let mut guard = match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push(event.clone());
    }
}
