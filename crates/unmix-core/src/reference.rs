//! Reference matrix `R` (components × bands) built from binned endmember spectra.
use ndarray::{Array1, Array2, ArrayView2, Axis};

use crate::error::{Result, UnmixError};
use crate::normalize::normalize;
use crate::spectrum::{Spectrum, WavelengthBins};

/// Component-major stack of binned reference vectors, one row per endmember.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceMatrix {
    matrix: Array2<f64>,
    labels: Vec<String>,
}

impl ReferenceMatrix {
    /// Stack `p` vectors of identical length `n` into a `p × n` matrix.
    pub fn from_vectors(vectors: &[Array1<f64>]) -> Result<Self> {
        let Some(first) = vectors.first() else {
            return Err(UnmixError::DegenerateInput("no reference components".into()));
        };
        let n = first.len();
        if let Some((i, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != n) {
            return Err(UnmixError::DimensionMismatch(format!(
                "reference {} has {} bands, reference 0 has {}",
                i,
                v.len(),
                n
            )));
        }
        let mut matrix = Array2::zeros((vectors.len(), n));
        for (mut row, v) in matrix.axis_iter_mut(Axis(0)).zip(vectors) {
            row.assign(v);
        }
        Self::from_array(matrix)
    }

    /// Bin every spectrum onto `bins` and stack the results.
    pub fn from_spectra(spectra: &[Spectrum], bins: &WavelengthBins) -> Result<Self> {
        let vectors: Vec<Array1<f64>> = spectra.iter().map(|s| bins.bin(s)).collect();
        Self::from_vectors(&vectors)
    }

    pub fn from_array(matrix: Array2<f64>) -> Result<Self> {
        let (p, n) = matrix.dim();
        if p == 0 {
            return Err(UnmixError::DegenerateInput("no reference components".into()));
        }
        if n == 0 {
            return Err(UnmixError::DegenerateInput("reference spectra have zero bands".into()));
        }
        if matrix.iter().any(|v| !v.is_finite()) {
            return Err(UnmixError::DegenerateInput("reference matrix has non-finite entries".into()));
        }
        Ok(Self { matrix, labels: default_labels(p) })
    }

    /// Attach component names. A list of the wrong length is replaced by `#0, #1, ...`.
    pub fn with_labels<I, L>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<String>,
    {
        let labels: Vec<String> = labels.into_iter().map(|l| l.into().trim().to_string()).collect();
        if labels.len() == self.n_components() {
            self.labels = labels;
        } else {
            log::warn!(
                "got {} labels for {} components, using pseudo labels",
                labels.len(),
                self.n_components()
            );
            self.labels = default_labels(self.n_components());
        }
        self
    }

    /// Rescale each reference to [0, 1] independently.
    pub fn normalized(&self) -> Self {
        let mut matrix = self.matrix.clone();
        for mut row in matrix.axis_iter_mut(Axis(0)) {
            let scaled = normalize(&row);
            row.assign(&scaled);
        }
        Self { matrix, labels: self.labels.clone() }
    }

    /// Clip negative intensities to zero.
    pub fn clamp_non_negative(mut self) -> Self {
        self.matrix.mapv_inplace(|v| v.max(0.0));
        self
    }

    /// Number of components `p`.
    pub fn n_components(&self) -> usize {
        self.matrix.nrows()
    }

    /// Number of bands `n`.
    pub fn n_bands(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// `p × n` view.
    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.matrix.view()
    }

    /// `n × p` view, the design matrix of the per-pixel system.
    pub fn design(&self) -> ArrayView2<'_, f64> {
        self.matrix.t()
    }
}

fn default_labels(p: usize) -> Vec<String> {
    (0..p).map(|i| format!("#{i}")).collect()
}
