//! Reference spectra and wavelength binning.
//!
//! A reference spectrum arrives at whatever sampling its source used (often
//! 1 nm). The image is measured in `n` contiguous bands `[edge_i, edge_i+1)`.
//! Binning sums every spectrum sample that falls inside a band, so the binned
//! vector is directly comparable with the per-band intensities of a pixel.
//! Empty bands produce 0; samples outside `[edge_0, edge_n)` are dropped.
use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::{Result, UnmixError};

// ── Spectrum ──────────────────────────────────────────────────────────────────

/// Ordered (wavelength, intensity) samples with strictly increasing wavelength
/// and finite, non-negative intensity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSpectrum")]
pub struct Spectrum {
    wavelengths: Vec<f64>,
    intensities: Vec<f64>,
}

#[derive(Deserialize)]
struct RawSpectrum {
    wavelengths: Vec<f64>,
    intensities: Vec<f64>,
}

impl TryFrom<RawSpectrum> for Spectrum {
    type Error = UnmixError;

    fn try_from(raw: RawSpectrum) -> Result<Self> {
        Spectrum::new(raw.wavelengths, raw.intensities)
    }
}

impl Spectrum {
    pub fn new(wavelengths: Vec<f64>, intensities: Vec<f64>) -> Result<Self> {
        if wavelengths.len() != intensities.len() {
            return Err(UnmixError::DimensionMismatch(format!(
                "spectrum has {} wavelengths but {} intensities",
                wavelengths.len(),
                intensities.len()
            )));
        }
        if wavelengths.iter().any(|w| !w.is_finite()) {
            return Err(UnmixError::InvalidBins("spectrum wavelengths must be finite".into()));
        }
        if wavelengths.windows(2).any(|w| w[1] <= w[0]) {
            return Err(UnmixError::InvalidBins(
                "spectrum wavelengths must be strictly increasing".into(),
            ));
        }
        if let Some((i, v)) = intensities
            .iter()
            .enumerate()
            .find(|(_, v)| !v.is_finite() || **v < 0.0)
        {
            return Err(UnmixError::DegenerateInput(format!(
                "spectrum intensity must be finite and non-negative, got {v} at index {i}"
            )));
        }
        Ok(Self { wavelengths, intensities })
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (f64, f64)>) -> Result<Self> {
        let (wavelengths, intensities) = pairs.into_iter().unzip();
        Self::new(wavelengths, intensities)
    }

    pub fn len(&self) -> usize {
        self.wavelengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wavelengths.is_empty()
    }

    pub fn wavelengths(&self) -> &[f64] {
        &self.wavelengths
    }

    pub fn intensities(&self) -> &[f64] {
        &self.intensities
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.wavelengths.iter().copied().zip(self.intensities.iter().copied())
    }
}

// ── Wavelength bins ───────────────────────────────────────────────────────────

/// `n + 1` strictly increasing edges describing `n` half-open bands.
#[derive(Debug, Clone, PartialEq)]
pub struct WavelengthBins {
    edges: Vec<f64>,
}

impl WavelengthBins {
    pub fn new(edges: Vec<f64>) -> Result<Self> {
        if edges.len() < 2 {
            return Err(UnmixError::InvalidBins(format!(
                "need at least 2 edges, got {}",
                edges.len()
            )));
        }
        if edges.iter().any(|e| !e.is_finite()) {
            return Err(UnmixError::InvalidBins("edges must be finite".into()));
        }
        if let Some(i) = edges.windows(2).position(|w| w[1] <= w[0]) {
            return Err(UnmixError::InvalidBins(format!(
                "edges not strictly increasing at index {}: {} -> {}",
                i,
                edges[i],
                edges[i + 1]
            )));
        }
        Ok(Self { edges })
    }

    /// `n` equal-width bands spanning `[start, stop)`.
    pub fn uniform(start: f64, stop: f64, n: usize) -> Result<Self> {
        if n == 0 {
            return Err(UnmixError::InvalidBins("need at least one band".into()));
        }
        let step = (stop - start) / n as f64;
        let edges = (0..=n).map(|i| start + step * i as f64).collect();
        Self::new(edges)
    }

    /// Derive edges from band centre wavelengths, as found in image metadata.
    ///
    /// Interior edges sit halfway between neighbouring centres; the outer edges
    /// extend by half of the adjacent spacing.
    pub fn from_centers(centers: &[f64]) -> Result<Self> {
        if centers.len() < 2 {
            return Err(UnmixError::InvalidBins(format!(
                "need at least 2 band centres to infer widths, got {}",
                centers.len()
            )));
        }
        let n = centers.len();
        let mut edges = Vec::with_capacity(n + 1);
        edges.push(centers[0] - (centers[1] - centers[0]) / 2.0);
        edges.extend(centers.windows(2).map(|w| (w[0] + w[1]) / 2.0));
        edges.push(centers[n - 1] + (centers[n - 1] - centers[n - 2]) / 2.0);
        Self::new(edges)
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    /// Number of bands `n`.
    pub fn n_bins(&self) -> usize {
        self.edges.len() - 1
    }

    /// Covered range `[edge_0, edge_n)`.
    pub fn range(&self) -> (f64, f64) {
        (self.edges[0], self.edges[self.edges.len() - 1])
    }

    /// Index of the band containing `wavelength`, if any.
    #[inline]
    pub fn bin_index(&self, wavelength: f64) -> Option<usize> {
        let idx = self.edges.partition_point(|&e| e <= wavelength);
        if idx == 0 || idx > self.n_bins() {
            None
        } else {
            Some(idx - 1)
        }
    }

    /// Sum the spectrum's intensities into each band.
    pub fn bin(&self, spectrum: &Spectrum) -> Array1<f64> {
        let mut out = Array1::zeros(self.n_bins());
        for (wl, intensity) in spectrum.iter() {
            if let Some(i) = self.bin_index(wl) {
                out[i] += intensity;
            }
        }
        out
    }
}

/// Rebin `spectrum` onto the bands described by `edges`.
pub fn bin_spectrum(spectrum: &Spectrum, edges: &[f64]) -> Result<Array1<f64>> {
    let bins = WavelengthBins::new(edges.to_vec())?;
    Ok(bins.bin(spectrum))
}
