//! Windowed pixel statistics feeding the NLF fit.
//!
//! For every output unit and channel the collector measures the population
//! mean, variance and excess kurtosis of a `window × window` neighbourhood.
//! Units are spaced `stride` pixels apart; only units whose full window lies
//! inside the image produce a sample, so no replicated border data enters
//! the statistics.

use ndarray::{ArrayView2, ArrayView3, Axis};

use crate::config::StatisticsConfig;
use crate::error::{NlfError, Result};
use crate::float_trait::NlfFloat;
use crate::integral::IntegralImage;
use crate::parallel::{reduce_rows, Execution};

/// Statistics of one window on one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub mean: f64,
    pub variance: f64,
    /// Excess kurtosis (`m4 / var² − 3`), NaN when the variance is zero.
    pub kurtosis: f64,
}

impl Sample {
    fn invalid() -> Self {
        Self {
            mean: f64::NAN,
            variance: f64::NAN,
            kurtosis: f64::NAN,
        }
    }
}

/// Per-channel samples, index-aligned: sample `i` of every channel comes
/// from the same window.
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticsSet {
    samples: Vec<Vec<Sample>>,
    grid: (usize, usize),
}

impl StatisticsSet {
    /// Build a set from per-channel samples, checking index alignment.
    pub fn from_samples(samples: Vec<Vec<Sample>>) -> Result<Self> {
        let len = samples.first().map_or(0, |s| s.len());
        if let Some(bad) = samples.iter().find(|s| s.len() != len) {
            return Err(NlfError::InvalidConfig(format!(
                "channel sample counts differ: {} vs {}",
                len,
                bad.len()
            )));
        }
        Ok(Self {
            samples,
            grid: (1, len),
        })
    }

    pub fn channels(&self) -> usize {
        self.samples.len()
    }

    pub fn channel(&self, channel: usize) -> &[Sample] {
        &self.samples[channel]
    }

    /// Samples per channel.
    pub fn len(&self) -> usize {
        self.samples.first().map_or(0, |s| s.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Layout of the units as `(rows, cols)`, row-major.
    pub fn grid(&self) -> (usize, usize) {
        self.grid
    }
}

/// Moment tables of one channel, shifted by the channel mean to keep the
/// higher powers well conditioned.
struct MomentTables {
    shift: f64,
    powers: [IntegralImage; 4],
    invalid: IntegralImage,
}

impl MomentTables {
    fn new<F: NlfFloat>(plane: ArrayView2<F>) -> Self {
        let (sum, count) = plane
            .iter()
            .map(|v| v.as_f64())
            .filter(|v| v.is_finite())
            .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
        let shift = if count > 0 { sum / count as f64 } else { 0.0 };

        let power = |k: i32| {
            IntegralImage::with_map(plane, move |v| {
                if v.is_finite() {
                    (v - shift).powi(k)
                } else {
                    0.0
                }
            })
        };
        Self {
            shift,
            powers: [power(1), power(2), power(3), power(4)],
            invalid: IntegralImage::with_map(plane, |v| if v.is_finite() { 0.0 } else { 1.0 }),
        }
    }

    fn sample(&self, r0: usize, c0: usize, side: usize) -> Sample {
        let (r1, c1) = (r0 + side, c0 + side);
        if self.invalid.sum(r0, c0, r1, c1) > 0.5 {
            return Sample::invalid();
        }

        let n = (side * side) as f64;
        let e1 = self.powers[0].sum(r0, c0, r1, c1) / n;
        let e2 = self.powers[1].sum(r0, c0, r1, c1) / n;
        let e3 = self.powers[2].sum(r0, c0, r1, c1) / n;
        let e4 = self.powers[3].sum(r0, c0, r1, c1) / n;

        let variance = (e2 - e1 * e1).max(0.0);
        let m4 = e4 - 4.0 * e1 * e3 + 6.0 * e1 * e1 * e2 - 3.0 * e1.powi(4);
        let kurtosis = if variance > 0.0 {
            m4.max(0.0) / (variance * variance) - 3.0
        } else {
            f64::NAN
        };

        Sample {
            mean: e1 + self.shift,
            variance,
            kurtosis,
        }
    }
}

/// Number of units along one axis.
fn unit_count(extent: usize, window: usize, stride: usize) -> usize {
    if extent < window {
        0
    } else {
        (extent - window) / stride + 1
    }
}

/// Collect windowed statistics over every channel of a `(C, H, W)` image.
///
/// # Errors
/// * `InvalidConfig` for a bad window or stride
/// * `ImageTooSmall` when no full window fits the image
pub fn collect_statistics<F: NlfFloat>(
    image: ArrayView3<F>,
    config: &StatisticsConfig,
    execution: Execution,
) -> Result<StatisticsSet> {
    config.validate()?;
    let (channels, rows, cols) = image.dim();
    let window = config.window;
    let stride = config.stride;

    let unit_rows = unit_count(rows, window, stride);
    let unit_cols = unit_count(cols, window, stride);
    if channels == 0 || unit_rows == 0 || unit_cols == 0 {
        return Err(NlfError::ImageTooSmall {
            rows,
            cols,
            reason: format!("no {}x{} statistics window fits", window, window),
        });
    }

    let tables: Vec<MomentTables> = image
        .axis_iter(Axis(0))
        .map(|plane| MomentTables::new(plane))
        .collect();

    let samples = reduce_rows(
        unit_rows,
        execution,
        vec![Vec::new(); channels],
        |ur| {
            let r0 = ur * stride;
            tables
                .iter()
                .map(|t| {
                    (0..unit_cols)
                        .map(|uc| t.sample(r0, uc * stride, window))
                        .collect::<Vec<_>>()
                })
                .collect::<Vec<_>>()
        },
        |mut acc, part| {
            for (dst, mut src) in acc.iter_mut().zip(part) {
                dst.append(&mut src);
            }
            acc
        },
    );

    Ok(StatisticsSet {
        samples,
        grid: (unit_rows, unit_cols),
    })
}
