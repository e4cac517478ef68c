//! Precision parametrization for energy arithmetic.
//!
//! Every engine and formula kernel is generic over [`Real`] so that the
//! same logic serves single- and double-precision runs without
//! duplication. `f32` and `f64` are the only intended implementors.

use ndarray::NdFloat;
use num_traits::FromPrimitive;
use rand::distributions::uniform::SampleUniform;

/// Floating-point scalar usable in energy kernels: ndarray linear
/// algebra, uniform sampling, and conversions from loop counters.
pub trait Real: NdFloat + FromPrimitive + SampleUniform + std::iter::Sum + Default {
    /// Human-readable precision tag for introspection output.
    fn precision_name() -> &'static str;
}

impl Real for f32 {
    fn precision_name() -> &'static str {
        "float"
    }
}

impl Real for f64 {
    fn precision_name() -> &'static str {
        "double"
    }
}

/// Convert a count (replica or site index bound) into the working
/// precision. Counts in this crate are bounded far below the mantissa
/// limit of `f32`, so the conversion is total in practice.
pub(crate) fn from_count<T: Real>(v: usize) -> T {
    T::from_usize(v).expect("count representable in selected precision")
}
