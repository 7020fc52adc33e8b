//! Min-max rescaling of images, reference spectra and abundance maps.
//!
//! Unmixing is scale-invariant: scaling `y` by `k1` and `R` by `k2` scales the
//! least-squares solution by `k1 / k2`. Rescaling here only affects conditioning
//! and makes estimates and ground truth comparable for metrics.
use ndarray::{Array, ArrayBase, Axis, Data, Dimension, RemoveAxis};

use crate::error::{Result, UnmixError};

/// Global min-max: every element becomes `(x - min) / (max - min)`.
///
/// A constant array maps to all zeros, never NaN.
pub fn normalize<S, D>(array: &ArrayBase<S, D>) -> Array<f64, D>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    let (min, max) = min_max(array.iter().copied());
    let range = max - min;
    if range <= 0.0 || !range.is_finite() {
        return Array::zeros(array.raw_dim());
    }
    array.mapv(|x| (x - min) / range)
}

/// Min-max per leading-axis channel, over all remaining axes.
///
/// The denominator carries `f64::EPSILON`, so a constant channel maps to zeros.
pub fn channel_wise_normalize<S, D>(array: &ArrayBase<S, D>) -> Result<Array<f64, D>>
where
    S: Data<Elem = f64>,
    D: Dimension + RemoveAxis,
{
    if array.ndim() == 0 {
        return Err(UnmixError::shape(array.shape(), "channel axis required"));
    }
    let mut out = array.to_owned();
    for mut channel in out.axis_iter_mut(Axis(0)) {
        let (min, max) = min_max(channel.iter().copied());
        let denom = max - min + f64::EPSILON;
        channel.mapv_inplace(|x| (x - min) / denom);
    }
    Ok(out)
}

/// Divide every pixel's leading-axis vector by its sum, so abundances add to ~1.
pub fn pixel_wise_sum_to_one<S, D>(array: &ArrayBase<S, D>) -> Result<Array<f64, D>>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    if array.ndim() == 0 {
        return Err(UnmixError::shape(array.shape(), "component axis required"));
    }
    let mut out = array.to_owned();
    for mut pixel in out.lanes_mut(Axis(0)) {
        let total = pixel.sum() + f64::EPSILON;
        pixel /= total;
    }
    Ok(out)
}

fn min_max(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)))
}
