//! Error and warning taxonomy.
//!
//! Only [`NlfError`] values abort an operation. Statistical anomalies that the
//! pipeline recovers from on its own are reported as [`FitWarning`] or
//! [`FusionWarning`] inside the stage reports and through the event sink.

use thiserror::Error;

/// Errors returned by the NLF engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NlfError {
    /// No sample survived the linear-regime filter for a channel.
    ///
    /// Typical for flat fields or all-NaN statistics. Callers are expected to
    /// fall back to a prior model.
    #[error("no valid noise samples for channel {channel} after filtering")]
    InsufficientSamples { channel: usize },

    #[error("dimension mismatch: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        expected: (usize, usize, usize),
        actual: (usize, usize, usize),
    },

    #[error("channel count mismatch: expected {expected}, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },

    #[error("image of size {rows}x{cols} is too small: {reason}")]
    ImageTooSmall {
        rows: usize,
        cols: usize,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, NlfError>;

/// Non-fatal conditions raised by the model fitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FitWarning {
    /// The outlier-rejection pass did not improve the fit; the first-pass
    /// model was kept.
    DegenerateFit {
        channel: usize,
        first_mse: f64,
        second_mse: f64,
    },
    /// The regression denominator vanished (constant means). The slope is
    /// pinned at the floor, so the model should be treated as unreliable.
    SingularModel { channel: usize },
}

/// Non-fatal conditions raised by the frame fuser.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FusionWarning {
    /// Most pixels of the frame disagree with the running estimate. The frame
    /// is heavily down-weighted but still merged.
    MisalignedFrame {
        frame_index: usize,
        outlier_fraction: f64,
    },
}
