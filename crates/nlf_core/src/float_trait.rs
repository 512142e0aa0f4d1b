//! Float trait abstraction for f32/f64 image buffers.
//!
//! Pixel buffers may be stored in either precision; statistics and model
//! fitting always accumulate in f64 through [`NlfFloat::as_f64`].

use num_traits::{Float, FromPrimitive, NumAssign};
use std::fmt::Debug;
use std::iter::Sum;

/// Trait alias for the floating point pixel types supported by the engine.
///
/// This trait combines all the bounds needed by the pipeline stages:
/// - Basic float operations (Float, NumAssign)
/// - Conversion from primitive types (FromPrimitive)
/// - Iteration support (Sum)
/// - Zero-initialized scratch rows (Default)
/// - Thread-safe sharing across rayon workers (Send + Sync)
pub trait NlfFloat:
    Float + FromPrimitive + NumAssign + Sum + Debug + Default + Send + Sync + 'static
{
    /// Create a value from an f64 constant.
    fn from_f64_c(val: f64) -> Self;

    /// Widen to f64 without going through `Option`.
    fn as_f64(self) -> f64;
}

impl NlfFloat for f32 {
    #[inline]
    fn from_f64_c(val: f64) -> Self {
        val as f32
    }

    #[inline]
    fn as_f64(self) -> f64 {
        self as f64
    }
}

impl NlfFloat for f64 {
    #[inline]
    fn from_f64_c(val: f64) -> Self {
        val
    }

    #[inline]
    fn as_f64(self) -> f64 {
        self
    }
}
