//! Pipeline orchestrator: binning → normalization → reference matrix → solve,
//! then evaluation against (block-summed) ground truth.
use ndarray::{ArrayBase, ArrayD, Axis, Data, Dimension};
use serde::{Deserialize, Serialize};

use crate::error::{Result, UnmixError};
use crate::metrics::{block_sum, mse, mse_per_channel, psnr};
use crate::normalize::{channel_wise_normalize, normalize};
use crate::reference::ReferenceMatrix;
use crate::solver::LeastSquaresUnmixer;
use crate::spectrum::{Spectrum, WavelengthBins};

// ── Configuration ─────────────────────────────────────────────────────────────

/// Explicit pipeline parameters. Dataset paths and display options are the
/// caller's business.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnmixConfig {
    /// Min-max the mixed image to [0, 1] before solving. Default true.
    pub normalize_image: bool,
    /// Min-max each reference spectrum to [0, 1] before solving. Default true.
    pub normalize_references: bool,
    /// Relative singular value cutoff; `None` uses `ε · max(n, p)`.
    pub rcond: Option<f64>,
    /// Integer factor between ground-truth and image resolution. Default 1.
    pub downscale_factor: usize,
}

impl Default for UnmixConfig {
    fn default() -> Self {
        Self {
            normalize_image: true,
            normalize_references: true,
            rcond: None,
            downscale_factor: 1,
        }
    }
}

impl UnmixConfig {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

// ── Results ───────────────────────────────────────────────────────────────────

/// Output of [`unmix`].
#[derive(Debug, Clone)]
pub struct UnmixResult {
    /// `(p, ...spatial)` abundances.
    pub abundances: ArrayD<f64>,
    /// Per-pixel residual norm, `(...spatial)`.
    pub residuals: ArrayD<f64>,
    pub labels: Vec<String>,
    /// Numerical rank of the reference matrix.
    pub rank: usize,
}

/// Error of one component map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelScore {
    pub label: String,
    pub mse: f64,
}

/// Comparison of an abundance image with ground truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub channels: Vec<ChannelScore>,
    /// MSE over all components and pixels.
    pub mse: f64,
    /// PSNR (dB) of the normalized maps; `None` for a perfect match, whose
    /// PSNR is unbounded.
    pub psnr: Option<f64>,
}

// ── Entry points ──────────────────────────────────────────────────────────────

/// Bin `spectra` onto `bins` and unmix `image` with them.
pub fn unmix<S, D>(
    image: &ArrayBase<S, D>,
    spectra: &[Spectrum],
    bins: &WavelengthBins,
    config: &UnmixConfig,
) -> Result<UnmixResult>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    if let Some(&bands) = image.shape().first() {
        if bands != bins.n_bins() {
            return Err(UnmixError::DimensionMismatch(format!(
                "image has {} bands but {} wavelength bins were given",
                bands,
                bins.n_bins()
            )));
        }
    }
    let reference = ReferenceMatrix::from_spectra(spectra, bins)?;
    unmix_with_reference(image, &reference, config)
}

/// Unmix `image` against an already built reference matrix.
pub fn unmix_with_reference<S, D>(
    image: &ArrayBase<S, D>,
    reference: &ReferenceMatrix,
    config: &UnmixConfig,
) -> Result<UnmixResult>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    let reference = if config.normalize_references {
        reference.normalized()
    } else {
        reference.clone()
    };
    let unmixer = LeastSquaresUnmixer::with_rcond(&reference, config.rcond)?;

    let image = if config.normalize_image {
        normalize(image).into_dyn()
    } else {
        image.to_owned().into_dyn()
    };
    let abundances = unmixer.solve(&image)?;
    let residuals = unmixer.residuals(&image, &abundances)?;

    Ok(UnmixResult {
        abundances,
        residuals,
        labels: reference.labels().to_vec(),
        rank: unmixer.rank(),
    })
}

/// Block-sum `ground_truth` by `config.downscale_factor`, normalize both maps
/// channel-wise and score them.
pub fn evaluate<S, D>(
    result: &UnmixResult,
    ground_truth: &ArrayBase<S, D>,
    config: &UnmixConfig,
) -> Result<Evaluation>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    let gt = block_sum(ground_truth, config.downscale_factor)?;
    if gt.shape() != result.abundances.shape() {
        return Err(UnmixError::DimensionMismatch(format!(
            "aggregated ground truth {:?} differs from abundances {:?}",
            gt.shape(),
            result.abundances.shape()
        )));
    }
    let gt = channel_wise_normalize(&gt)?;
    let est = channel_wise_normalize(&result.abundances)?;

    let per_channel = mse_per_channel(&gt, &est)?;
    let channels = per_channel
        .iter()
        .zip(&result.labels)
        .map(|(&mse, label)| ChannelScore { label: label.clone(), mse })
        .collect();

    Ok(Evaluation {
        channels,
        mse: mse(&gt, &est)?,
        psnr: Some(psnr(&gt, &est)?).filter(|db| db.is_finite()),
    })
}

impl UnmixResult {
    /// Abundance map of one component, `(...spatial)`.
    pub fn component(&self, index: usize) -> Option<ArrayD<f64>> {
        (index < self.abundances.shape()[0])
            .then(|| self.abundances.index_axis(Axis(0), index).to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, Array3, IxDyn};
    use rand::{rngs::StdRng, Rng, SeedableRng};

    /// Gaussian emission peak sampled every nanometre over [400, 700).
    fn peak(center: f64, width: f64) -> Spectrum {
        Spectrum::from_pairs((400..700).map(|wl| {
            let x = (wl as f64 - center) / width;
            (wl as f64, (-0.5 * x * x).exp())
        }))
        .unwrap()
    }

    fn mixed_image(reference: &ReferenceMatrix, abundances: &ArrayD<f64>) -> ArrayD<f64> {
        let spatial = abundances.shape()[1..].to_vec();
        let c = crate::image::unroll(abundances).unwrap();
        crate::image::roll(&reference.design().dot(&c), &spatial).unwrap()
    }

    #[test]
    fn config_defaults_and_json() {
        let c = UnmixConfig::default();
        assert!(c.normalize_image && c.normalize_references);
        assert_eq!(c.downscale_factor, 1);
        let parsed = UnmixConfig::from_json(r#"{"normalize_image": false, "downscale_factor": 4}"#).unwrap();
        assert!(!parsed.normalize_image);
        assert!(parsed.normalize_references);
        assert_eq!(parsed.downscale_factor, 4);
        let round = UnmixConfig::from_json(&serde_json::to_string(&parsed).unwrap()).unwrap();
        assert_eq!(round, parsed);
    }

    #[test]
    fn unmix_recovers_raw_abundances_without_normalization() {
        let bins = WavelengthBins::uniform(400.0, 700.0, 30).unwrap();
        let spectra = [peak(480.0, 15.0), peak(560.0, 20.0), peak(640.0, 12.0)];
        let reference = ReferenceMatrix::from_spectra(&spectra, &bins).unwrap();

        let mut rng = StdRng::seed_from_u64(3);
        let truth = ArrayD::from_shape_fn(IxDyn(&[3, 6, 5]), |_| rng.gen_range(0.0..10.0));
        let image = mixed_image(&reference, &truth);

        let config = UnmixConfig { normalize_image: false, normalize_references: false, ..Default::default() };
        let result = unmix(&image, &spectra, &bins, &config).unwrap();
        assert_eq!(result.rank, 3);
        assert_eq!(result.labels, vec!["#0", "#1", "#2"]);
        for (e, t) in result.abundances.iter().zip(truth.iter()) {
            assert_abs_diff_eq!(*e, *t, epsilon = 1e-8);
        }
        assert!(result.residuals.iter().all(|&r| r < 1e-8));
        assert_eq!(result.component(2).unwrap().shape(), &[6, 5]);
        assert!(result.component(3).is_none());
    }

    #[test]
    fn normalization_only_rescales_when_minimum_is_zero() {
        // References with a zero band and an image whose minimum is zero: the
        // normalized solve differs from the raw one by per-component scalars.
        let r = ReferenceMatrix::from_array(Array2::from_shape_vec(
            (2, 4),
            vec![0.0, 2.0, 4.0, 1.0, 3.0, 0.0, 1.0, 6.0],
        ).unwrap())
        .unwrap();
        let truth = Array3::from_shape_fn((2, 3, 3), |(k, y, x)| ((k + 1) * (y * 3 + x)) as f64).into_dyn();
        let image = mixed_image(&r, &truth);

        let raw = unmix_with_reference(&image, &r, &UnmixConfig {
            normalize_image: false,
            normalize_references: false,
            ..Default::default()
        })
        .unwrap();
        let norm = unmix_with_reference(&image, &r, &UnmixConfig::default()).unwrap();

        let image_max = image.iter().cloned().fold(0.0, f64::max);
        let ref_max = [4.0, 6.0];
        for k in 0..2 {
            let scale = ref_max[k] / image_max;
            let a = raw.abundances.index_axis(Axis(0), k);
            let b = norm.abundances.index_axis(Axis(0), k);
            for (x, y) in a.iter().zip(b.iter()) {
                assert_abs_diff_eq!(*x * scale, *y, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn unmix_rejects_band_mismatch_eagerly() {
        let bins = WavelengthBins::uniform(400.0, 700.0, 10).unwrap();
        let image = Array3::<f64>::zeros((12, 2, 2));
        let err = unmix(&image, &[peak(500.0, 10.0)], &bins, &UnmixConfig::default()).unwrap_err();
        assert!(matches!(err, UnmixError::DimensionMismatch(_)));
        let err = unmix(&Array3::<f64>::zeros((10, 2, 2)), &[], &bins, &UnmixConfig::default()).unwrap_err();
        assert!(matches!(err, UnmixError::DegenerateInput(_)));
    }

    #[test]
    fn evaluate_against_finer_ground_truth() {
        let bins = WavelengthBins::uniform(400.0, 700.0, 24).unwrap();
        let spectra = [peak(500.0, 18.0), peak(610.0, 18.0)];
        let reference = ReferenceMatrix::from_spectra(&spectra, &bins)
            .unwrap()
            .with_labels(["green", "red"]);

        let mut rng = StdRng::seed_from_u64(5);
        let fine = ArrayD::from_shape_fn(IxDyn(&[2, 8, 12]), |_| rng.gen_range(0..4) as f64);
        let coarse = block_sum(&fine, 2).unwrap();
        let image = mixed_image(&reference, &coarse);

        // Global min-max of the image adds an offset outside the span of R;
        // keep the raw image so the estimate is an exact per-channel rescale.
        let config = UnmixConfig { normalize_image: false, downscale_factor: 2, ..Default::default() };
        let result = unmix_with_reference(&image, &reference, &config).unwrap();
        let eval = evaluate(&result, &fine, &config).unwrap();

        assert_eq!(eval.channels.len(), 2);
        assert_eq!(eval.channels[0].label, "green");
        assert_eq!(eval.channels[1].label, "red");
        // Noiseless data: normalized maps agree up to round-off.
        assert!(eval.mse < 1e-12, "mse = {}", eval.mse);
        assert!(eval.psnr.map_or(true, |db| db > 100.0), "psnr = {:?}", eval.psnr);
        let json = serde_json::to_string(&eval).unwrap();
        assert!(json.contains("\"green\""));
    }

    #[test]
    fn perfect_evaluation_survives_json() {
        let reference = ReferenceMatrix::from_array(Array2::eye(2)).unwrap();
        let truth = Array3::from_shape_fn((2, 3, 3), |(k, r, c)| ((k + 1) * (r + c)) as f64);
        let config = UnmixConfig { normalize_image: false, ..Default::default() };
        let result = unmix_with_reference(&truth, &reference, &config).unwrap();
        let eval = evaluate(&result, &truth, &config).unwrap();
        assert_eq!(eval.mse, 0.0);
        assert_eq!(eval.psnr, None);

        let json = serde_json::to_string(&eval).unwrap();
        let back: Evaluation = serde_json::from_str(&json).unwrap();
        assert_eq!(back.psnr, None);
        assert_eq!(back.channels.len(), 2);
        assert_eq!(back.mse, 0.0);
    }

    #[test]
    fn all_zero_ground_truth_cannot_be_scored() {
        let reference = ReferenceMatrix::from_array(Array2::eye(2)).unwrap();
        let image = Array3::<f64>::ones((2, 2, 2));
        let result = unmix_with_reference(&image, &reference, &UnmixConfig::default()).unwrap();
        let gt = Array3::<f64>::zeros((2, 2, 2));
        assert!(matches!(
            evaluate(&result, &gt, &UnmixConfig::default()),
            Err(UnmixError::DegenerateInput(_))
        ));
    }

    #[test]
    fn evaluate_rejects_misaligned_ground_truth() {
        let reference = ReferenceMatrix::from_array(Array2::eye(3)).unwrap();
        let image = Array3::<f64>::ones((3, 4, 4));
        let result = unmix_with_reference(&image, &reference, &UnmixConfig::default()).unwrap();
        let gt = Array3::<f64>::ones((3, 6, 6));
        let config = UnmixConfig { downscale_factor: 2, ..Default::default() };
        assert!(matches!(evaluate(&result, &gt, &config), Err(UnmixError::DimensionMismatch(_))));
        let config = UnmixConfig { downscale_factor: 4, ..Default::default() };
        assert!(matches!(evaluate(&result, &gt, &config), Err(UnmixError::InvalidShape { .. })));
    }
}
