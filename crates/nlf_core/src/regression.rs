//! Closed-form least squares for `y ≈ a + b·x`.

use crate::noise_model::NLF_FLOOR;

/// Relative tolerance on the normal-equation denominator below which the
/// regressor is treated as constant.
const SINGULAR_TOLERANCE: f64 = 1e-12;

/// Running sums of a simple linear regression, accumulated in f64.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LinearAccumulator {
    n: usize,
    sx: f64,
    sy: f64,
    sxx: f64,
    sxy: f64,
}

/// Result of solving the accumulated system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineFit {
    pub a: f64,
    pub b: f64,
    /// The regressor had no spread; `b` is pinned to the floor.
    pub singular: bool,
}

impl LineFit {
    #[inline]
    pub fn predict(&self, x: f64) -> f64 {
        self.a + self.b * x
    }

    /// Mean squared residual over `points`, NaN when empty.
    pub fn mean_squared_error(&self, points: &[(f64, f64)]) -> f64 {
        if points.is_empty() {
            return f64::NAN;
        }
        let total: f64 = points
            .iter()
            .map(|&(x, y)| (self.predict(x) - y).powi(2))
            .sum();
        total / points.len() as f64
    }
}

impl LinearAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn push(&mut self, x: f64, y: f64) {
        self.n += 1;
        self.sx += x;
        self.sy += y;
        self.sxx += x * x;
        self.sxy += x * y;
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Solve for `(a, b)` with both coefficients clamped to [`NLF_FLOOR`].
    ///
    /// Returns `None` when no point was accumulated. The intercept is
    /// computed from the clamped slope so the returned line is the best
    /// intercept for the slope actually used.
    pub fn solve(&self) -> Option<LineFit> {
        if self.n == 0 {
            return None;
        }
        let n = self.n as f64;
        let denominator = n * self.sxx - self.sx * self.sx;

        if denominator.abs() <= SINGULAR_TOLERANCE * n * self.sxx {
            return Some(LineFit {
                a: (self.sy / n).max(NLF_FLOOR),
                b: NLF_FLOOR,
                singular: true,
            });
        }

        let b = ((n * self.sxy - self.sx * self.sy) / denominator).max(NLF_FLOOR);
        let a = ((self.sy - b * self.sx) / n).max(NLF_FLOOR);
        Some(LineFit {
            a,
            b,
            singular: false,
        })
    }
}

impl FromIterator<(f64, f64)> for LinearAccumulator {
    fn from_iter<I: IntoIterator<Item = (f64, f64)>>(iter: I) -> Self {
        let mut acc = LinearAccumulator::new();
        for (x, y) in iter {
            acc.push(x, y);
        }
        acc
    }
}
