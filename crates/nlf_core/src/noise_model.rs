//! Per-channel noise level function `variance ≈ A + B·mean`.

use serde::{Deserialize, Serialize};

use crate::error::{NlfError, Result};

/// Lower bound applied to every A and B coefficient.
/// A non-positive model would turn into zero (or negative) denoise strength.
pub const NLF_FLOOR: f64 = 1e-8;

/// Which intensity a channel's variance is regressed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regressor {
    /// Each channel's variance is a function of its own mean (raw planes).
    #[default]
    OwnMean,
    /// Every channel's variance is a function of one channel's mean, e.g.
    /// luma for YCbCr data.
    Channel(usize),
}

/// Linear noise model, one `(A, B)` pair per channel.
///
/// Immutable once built; every constructor clamps the coefficients to
/// [`NLF_FLOOR`], so `a()[c] >= NLF_FLOOR` and `b()[c] >= NLF_FLOOR` always
/// hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawNoiseModel")]
pub struct NoiseModel {
    a: Vec<f64>,
    b: Vec<f64>,
    regressor: Regressor,
}

#[derive(Deserialize)]
struct RawNoiseModel {
    a: Vec<f64>,
    b: Vec<f64>,
    #[serde(default)]
    regressor: Regressor,
}

impl TryFrom<RawNoiseModel> for NoiseModel {
    type Error = NlfError;

    fn try_from(raw: RawNoiseModel) -> Result<Self> {
        NoiseModel::new(raw.a, raw.b)?.with_regressor(raw.regressor)
    }
}

fn floor(value: f64) -> f64 {
    // NaN compares false, so it is replaced by the floor as well.
    if value >= NLF_FLOOR {
        value
    } else {
        NLF_FLOOR
    }
}

impl NoiseModel {
    /// Build a model from per-channel coefficients, clamping to the floor.
    pub fn new(a: Vec<f64>, b: Vec<f64>) -> Result<Self> {
        if a.len() != b.len() {
            return Err(NlfError::ChannelMismatch {
                expected: a.len(),
                actual: b.len(),
            });
        }
        if a.is_empty() {
            return Err(NlfError::InvalidConfig(
                "noise model needs at least one channel".to_string(),
            ));
        }
        Ok(Self {
            a: a.into_iter().map(floor).collect(),
            b: b.into_iter().map(floor).collect(),
            regressor: Regressor::OwnMean,
        })
    }

    /// Same `(a, b)` on every channel.
    pub fn uniform(channels: usize, a: f64, b: f64) -> Self {
        Self {
            a: vec![floor(a); channels.max(1)],
            b: vec![floor(b); channels.max(1)],
            regressor: Regressor::OwnMean,
        }
    }

    /// Evaluate every channel against the given regressor.
    pub fn with_regressor(mut self, regressor: Regressor) -> Result<Self> {
        if let Regressor::Channel(k) = regressor {
            if k >= self.channels() {
                return Err(NlfError::InvalidConfig(format!(
                    "regressor channel {} out of range for {} channels",
                    k,
                    self.channels()
                )));
            }
        }
        self.regressor = regressor;
        Ok(self)
    }

    pub fn regressor(&self) -> Regressor {
        self.regressor
    }

    /// Index of the channel whose intensity drives `channel`'s variance.
    #[inline]
    pub fn intensity_channel(&self, channel: usize) -> usize {
        match self.regressor {
            Regressor::OwnMean => channel,
            Regressor::Channel(k) => k,
        }
    }

    pub fn channels(&self) -> usize {
        self.a.len()
    }

    pub fn a(&self) -> &[f64] {
        &self.a
    }

    pub fn b(&self) -> &[f64] {
        &self.b
    }

    /// Predicted variance of `channel` at intensity `mean`.
    ///
    /// Negative intensities are evaluated at zero so the prediction never
    /// drops below `A`.
    #[inline]
    pub fn variance(&self, channel: usize, mean: f64) -> f64 {
        self.a[channel] + self.b[channel] * mean.max(0.0)
    }

    /// Multiply both coefficients by `factor` (e.g. `exposure²`).
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            a: self.a.iter().map(|&a| floor(a * factor)).collect(),
            b: self.b.iter().map(|&b| floor(b * factor)).collect(),
            regressor: self.regressor,
        }
    }

    /// Model for pyramid level `level`, assuming white noise whose variance
    /// drops by four with every 2×2 box reduction.
    pub fn for_pyramid_level(&self, level: usize) -> Self {
        self.scaled(0.25f64.powi(level as i32))
    }

    /// True when any coefficient sits on the floor, a hint that the fit
    /// came from unreliable input.
    pub fn is_pinned_at_floor(&self) -> bool {
        self.a.iter().chain(self.b.iter()).any(|&v| v <= NLF_FLOOR)
    }

    pub(crate) fn ensure_channels(&self, channels: usize) -> Result<()> {
        if self.channels() != channels {
            return Err(NlfError::ChannelMismatch {
                expected: channels,
                actual: self.channels(),
            });
        }
        Ok(())
    }
}
