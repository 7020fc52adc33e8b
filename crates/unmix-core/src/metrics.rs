//! Evaluation against ground truth: block aggregation, squared error, PSNR.
//!
//! Ground truth is simulated on a finer grid than the measured image. Each
//! coarse pixel collects the fluorophore counts of an `f × f` (or `f × f × f`)
//! block, so aggregation sums rather than averages.
//!
//! Inputs to the error functions must already be spatially aligned and on
//! comparable scales; see [`crate::normalize::channel_wise_normalize`].
use ndarray::{Array1, ArrayBase, ArrayD, Axis, Data, Dimension, IxDyn};

use crate::error::{Result, UnmixError};
use crate::image::spatial_dims;

/// Downsample `(c, ...spatial)` by summing non-overlapping blocks of `factor`
/// along every spatial axis. Each spatial extent must be divisible by `factor`.
pub fn block_sum<S, D>(image: &ArrayBase<S, D>, factor: usize) -> Result<ArrayD<f64>>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    if factor == 0 {
        return Err(UnmixError::DegenerateInput("downscaling factor must be at least 1".into()));
    }
    let spatial = spatial_dims(image)?;
    if let Some(extent) = spatial.iter().find(|&&e| e % factor != 0) {
        return Err(UnmixError::shape(
            image.shape(),
            format!("spatial extent {extent} is not divisible by factor {factor}"),
        ));
    }

    let mut out_shape = image.shape().to_vec();
    for e in &mut out_shape[1..] {
        *e /= factor;
    }
    let mut out = ArrayD::zeros(IxDyn(&out_shape));
    if factor == 1 {
        out.assign(&image.view().into_dyn());
        return Ok(out);
    }

    let mut coarse = vec![0usize; out_shape.len()];
    for (idx, &v) in image.view().into_dyn().indexed_iter() {
        let fine = idx.slice();
        coarse[0] = fine[0];
        for (c, &f) in coarse[1..].iter_mut().zip(&fine[1..]) {
            *c = f / factor;
        }
        out[coarse.as_slice()] += v;
    }
    Ok(out)
}

/// Elementwise `(gt − pred)²`.
pub fn pixel_wise_squared_error<S1, S2, D>(
    gt: &ArrayBase<S1, D>,
    pred: &ArrayBase<S2, D>,
) -> Result<ArrayD<f64>>
where
    S1: Data<Elem = f64>,
    S2: Data<Elem = f64>,
    D: Dimension,
{
    check_same_shape(gt.shape(), pred.shape())?;
    let diff = gt - pred;
    Ok(diff.mapv(|d| d * d).into_dyn())
}

/// Mean squared error of each leading-axis channel.
pub fn mse_per_channel<S1, S2, D>(gt: &ArrayBase<S1, D>, pred: &ArrayBase<S2, D>) -> Result<Array1<f64>>
where
    S1: Data<Elem = f64>,
    S2: Data<Elem = f64>,
    D: Dimension,
{
    let sq = pixel_wise_squared_error(gt, pred)?;
    if sq.ndim() == 0 {
        return Err(UnmixError::shape(sq.shape(), "channel axis required"));
    }
    if sq.len() == 0 {
        return Err(UnmixError::DegenerateInput("cannot average an empty array".into()));
    }
    Ok(sq
        .axis_iter(Axis(0))
        .map(|ch| ch.mean().unwrap_or(0.0))
        .collect())
}

/// Mean squared error over all elements.
pub fn mse<S1, S2, D>(gt: &ArrayBase<S1, D>, pred: &ArrayBase<S2, D>) -> Result<f64>
where
    S1: Data<Elem = f64>,
    S2: Data<Elem = f64>,
    D: Dimension,
{
    pixel_wise_squared_error(gt, pred)?
        .mean()
        .ok_or_else(|| UnmixError::DegenerateInput("cannot average an empty array".into()))
}

/// Peak signal-to-noise ratio in dB, with the peak taken as `max(gt)`.
///
/// `+∞` for a perfect estimate. Ground truth without a positive finite peak
/// has no meaningful PSNR and is rejected.
pub fn psnr<S1, S2, D>(gt: &ArrayBase<S1, D>, pred: &ArrayBase<S2, D>) -> Result<f64>
where
    S1: Data<Elem = f64>,
    S2: Data<Elem = f64>,
    D: Dimension,
{
    let err = mse(gt, pred)?;
    let peak = gt.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if peak <= 0.0 || !peak.is_finite() {
        return Err(UnmixError::DegenerateInput(format!(
            "ground truth peak must be positive and finite, got {peak}"
        )));
    }
    if err == 0.0 {
        return Ok(f64::INFINITY);
    }
    Ok(10.0 * (peak.log10() - err.log10()))
}

fn check_same_shape(a: &[usize], b: &[usize]) -> Result<()> {
    if a != b {
        return Err(UnmixError::DimensionMismatch(format!(
            "ground truth shape {a:?} differs from estimate shape {b:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array3, Array4};

    #[test]
    fn block_sum_2d() {
        // (1 channel, 4 rows, 4 cols), value = row * 4 + col.
        let img = Array3::from_shape_fn((1, 4, 4), |(_, r, c)| (r * 4 + c) as f64);
        let out = block_sum(&img, 2).unwrap();
        assert_eq!(out.shape(), &[1, 2, 2]);
        assert_eq!(out[[0, 0, 0]], 0.0 + 1.0 + 4.0 + 5.0);
        assert_eq!(out[[0, 1, 1]], 10.0 + 11.0 + 14.0 + 15.0);
        assert_abs_diff_eq!(out.sum(), img.sum());
    }

    #[test]
    fn block_sum_3d_keeps_channels_apart() {
        let img = Array4::from_shape_fn((2, 2, 4, 6), |(ch, _, _, _)| (ch + 1) as f64);
        let out = block_sum(&img, 2).unwrap();
        assert_eq!(out.shape(), &[2, 1, 2, 3]);
        assert!(out.index_axis(Axis(0), 0).iter().all(|&v| v == 8.0));
        assert!(out.index_axis(Axis(0), 1).iter().all(|&v| v == 16.0));
    }

    #[test]
    fn block_sum_identity_and_errors() {
        let img = Array3::from_shape_fn((2, 3, 3), |(a, b, c)| (a + b + c) as f64);
        assert_eq!(block_sum(&img, 1).unwrap(), img.clone().into_dyn());
        assert!(matches!(block_sum(&img, 2), Err(UnmixError::InvalidShape { .. })));
        assert!(matches!(block_sum(&img, 0), Err(UnmixError::DegenerateInput(_))));
    }

    #[test]
    fn squared_error_and_means() {
        let gt = array![[1.0, 2.0], [0.0, 0.0]];
        let pred = array![[1.0, 4.0], [1.0, 3.0]];
        let sq = pixel_wise_squared_error(&gt, &pred).unwrap();
        assert_eq!(sq, array![[0.0, 4.0], [1.0, 9.0]].into_dyn());
        let per = mse_per_channel(&gt, &pred).unwrap();
        assert_eq!(per.to_vec(), vec![2.0, 5.0]);
        assert_abs_diff_eq!(mse(&gt, &pred).unwrap(), 3.5);
    }

    #[test]
    fn shape_mismatch_is_an_error() {
        let gt = Array3::<f64>::zeros((2, 2, 2));
        let pred = Array3::<f64>::zeros((2, 2, 3));
        assert!(matches!(mse(&gt, &pred), Err(UnmixError::DimensionMismatch(_))));
    }

    #[test]
    fn psnr_matches_definition() {
        let gt = array![[1.0, 0.0], [0.5, 0.25]];
        let pred = array![[0.9, 0.1], [0.5, 0.25]];
        // mse = (0.01 + 0.01) / 4 = 0.005; peak = 1.
        assert_abs_diff_eq!(psnr(&gt, &pred).unwrap(), -10.0 * 0.005f64.log10(), epsilon = 1e-9);
        assert_eq!(psnr(&gt, &gt).unwrap(), f64::INFINITY);
    }

    #[test]
    fn psnr_needs_a_positive_peak() {
        let zeros = Array3::<f64>::zeros((2, 3, 3));
        let pred = Array3::<f64>::from_elem((2, 3, 3), 0.5);
        assert!(matches!(psnr(&zeros, &pred), Err(UnmixError::DegenerateInput(_))));
        assert!(matches!(psnr(&zeros, &zeros), Err(UnmixError::DegenerateInput(_))));
        assert!(matches!(psnr(&(-&pred), &zeros), Err(UnmixError::DegenerateInput(_))));
    }
}
