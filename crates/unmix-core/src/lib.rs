//! Per-pixel linear spectral unmixing.
//!
//! A mixed image `(n bands, ...spatial)` is modelled pixel by pixel as
//! `y = Rᵀc`, where the rows of `R` are binned reference spectra. The
//! abundances `c` are the least-squares (minimum-norm) solution.
pub mod error;
pub mod image;
pub mod metrics;
pub mod normalize;
pub mod pipeline;
pub mod reference;
pub mod solver;
pub mod spectrum;

pub use error::{Result, UnmixError};
pub use metrics::{block_sum, mse, mse_per_channel, pixel_wise_squared_error, psnr};
pub use normalize::{channel_wise_normalize, normalize, pixel_wise_sum_to_one};
pub use pipeline::{evaluate, unmix, unmix_with_reference, ChannelScore, Evaluation, UnmixConfig, UnmixResult};
pub use reference::ReferenceMatrix;
pub use solver::LeastSquaresUnmixer;
pub use spectrum::{bin_spectrum, Spectrum, WavelengthBins};
