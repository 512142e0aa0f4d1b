//! NLF Core Library
//!
//! Noise-level-function (NLF) estimation, noise-model-driven multiscale
//! denoising and burst fusion for linear sensor images.
//!
//! Images are `(C, H, W)` arrays of `f32` or `f64` on a normalized [0, 1]
//! scale. The per-channel noise model `variance ≈ A + B·mean` is measured
//! from the image itself, then drives both the denoiser's range kernel and
//! the fuser's ghost rejection.

pub mod config;
pub mod denoise;
pub mod error;
pub mod events;
pub mod fitter;
pub mod float_trait;
pub mod fusion;
pub mod guided;
pub mod homography;
pub mod integral;
mod lmeds;
pub mod noise_model;
pub mod orchestration;
pub mod parallel;
pub mod pyramid;
pub mod regression;
pub mod resample;
pub mod statistics;

// Re-export commonly used types at the crate root
pub use config::{
    DenoiseConfig, FitConfig, FusionConfig, LeastMedianConfig, NlfConfig, PyramidConfig,
    StatisticsConfig,
};
pub use denoise::{denoise_level, LevelOutput};
pub use error::{FitWarning, FusionWarning, NlfError, Result};
pub use events::{CollectingSink, EventSink, LogSink, NullSink, PipelineEvent};
pub use fitter::{ChannelFit, FitReport, ModelFitter};
pub use float_trait::NlfFloat;
pub use fusion::{FrameFusion, FrameReport, FusionPhase, FusionState};
pub use homography::{warp_frame, Alignment};
pub use noise_model::{NoiseModel, Regressor, NLF_FLOOR};
pub use orchestration::{
    denoise_image, estimate_noise_model, process_burst, BurstOutput, DenoiseOutput,
};
pub use parallel::Execution;
pub use pyramid::{denoise_multiscale, denoise_pyramid, MultiscaleOutput, Pyramid};
pub use statistics::{collect_statistics, Sample, StatisticsSet};
