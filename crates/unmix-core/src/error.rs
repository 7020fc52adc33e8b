use thiserror::Error;

/// Structural input errors. All of them are raised during setup and validation,
/// before any pixel is solved.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UnmixError {
    /// Bin edges are fewer than two, not finite, or not strictly increasing.
    #[error("invalid wavelength bins: {0}")]
    InvalidBins(String),

    /// Reference vectors of unequal length, or image band count differing from R.
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Zero endmembers, zero bands, or another empty/unusable input.
    #[error("degenerate input: {0}")]
    DegenerateInput(String),

    /// Array rank or extents unusable for the requested operation.
    #[error("invalid shape {shape:?}: {reason}")]
    InvalidShape { shape: Vec<usize>, reason: String },

    /// The SVD of the reference matrix did not converge.
    #[error("factorization failed: {0}")]
    Factorization(String),
}

pub type Result<T> = std::result::Result<T, UnmixError>;

impl UnmixError {
    pub(crate) fn shape(shape: &[usize], reason: impl Into<String>) -> Self {
        Self::InvalidShape { shape: shape.to_vec(), reason: reason.into() }
    }
}
