//! Pixel-wise linear least-squares unmixing.
//!
//! Every pixel solves `min_c ‖y − Rᵀc‖²` independently. `Rᵀ` is the same for
//! all pixels, so it is factorized once (see [`factorization`]) and each solve
//! is a product with the p × n pseudo-inverse. The image is unrolled to an
//! (n, N) matrix and processed as column blocks: each block is one batched
//! matrix product, blocks write disjoint output columns, and with the
//! `threading` feature they run on the rayon pool.
pub mod factorization;

use ndarray::linalg::general_mat_mul;
use ndarray::{Array1, Array2, ArrayBase, ArrayD, ArrayView1, ArrayView2, Axis, Data, Dimension, IxDyn};
#[cfg(feature = "threading")]
use rayon::prelude::*;

use crate::error::{Result, UnmixError};
use crate::image::{roll, spatial_dims, unroll};
use crate::reference::ReferenceMatrix;
use factorization::{factorize, Factorization};

/// Pixel columns per batched product.
const PIXEL_BLOCK: usize = 4096;

/// Least-squares unmixer bound to one reference matrix.
#[derive(Debug, Clone)]
pub struct LeastSquaresUnmixer {
    reference: ReferenceMatrix,
    factorization: Factorization,
}

impl LeastSquaresUnmixer {
    /// Factorize `reference` with the default singular value cutoff.
    pub fn new(reference: &ReferenceMatrix) -> Result<Self> {
        Self::with_rcond(reference, None)
    }

    /// Factorize `reference`, truncating singular values below `rcond · σ_max`.
    pub fn with_rcond(reference: &ReferenceMatrix, rcond: Option<f64>) -> Result<Self> {
        let factorization = factorize(reference.design(), rcond)?;
        let (p, n) = (reference.n_components(), reference.n_bands());
        if n < p {
            log::warn!("underdetermined system: {n} bands for {p} components, returning minimum-norm abundances");
        } else if factorization.rank < p {
            log::warn!(
                "reference matrix is rank deficient (rank {} of {p}), returning minimum-norm abundances",
                factorization.rank
            );
        }
        Ok(Self { reference: reference.clone(), factorization })
    }

    pub fn reference(&self) -> &ReferenceMatrix {
        &self.reference
    }

    pub fn n_components(&self) -> usize {
        self.reference.n_components()
    }

    pub fn n_bands(&self) -> usize {
        self.reference.n_bands()
    }

    /// Numerical rank of `Rᵀ` after truncation.
    pub fn rank(&self) -> usize {
        self.factorization.rank
    }

    pub fn singular_values(&self) -> &[f64] {
        &self.factorization.singular_values
    }

    /// p × n pseudo-inverse applied to every pixel.
    pub fn pseudo_inverse(&self) -> ArrayView2<'_, f64> {
        self.factorization.pinv.view()
    }

    /// Solve a single band vector.
    pub fn solve_pixel(&self, y: ArrayView1<'_, f64>) -> Result<Array1<f64>> {
        if y.len() != self.n_bands() {
            return Err(UnmixError::DimensionMismatch(format!(
                "pixel has {} bands, reference matrix has {}",
                y.len(),
                self.n_bands()
            )));
        }
        Ok(self.factorization.pinv.dot(&y))
    }

    /// Solve an unrolled (n, N) band matrix into a (p, N) abundance matrix.
    pub fn solve_unrolled(&self, y: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        if y.nrows() != self.n_bands() {
            return Err(UnmixError::DimensionMismatch(format!(
                "image has {} bands, reference matrix has {}",
                y.nrows(),
                self.n_bands()
            )));
        }
        let pinv = &self.factorization.pinv;
        let mut out = Array2::zeros((self.n_components(), y.ncols()));
        if y.ncols() == 0 {
            return Ok(out);
        }

        let blocks = y.axis_chunks_iter(Axis(1), PIXEL_BLOCK);
        let out_blocks = out.axis_chunks_iter_mut(Axis(1), PIXEL_BLOCK);

        #[cfg(feature = "threading")]
        out_blocks
            .into_par_iter()
            .zip(blocks.into_par_iter())
            .for_each(|(mut c, y)| general_mat_mul(1.0, pinv, &y, 0.0, &mut c));

        #[cfg(not(feature = "threading"))]
        out_blocks
            .zip(blocks)
            .for_each(|(mut c, y)| general_mat_mul(1.0, pinv, &y, 0.0, &mut c));

        Ok(out)
    }

    /// Unmix a band-major image `(n, ...spatial)` into `(p, ...spatial)`.
    ///
    /// All shape checks happen before any pixel is solved. Singular or
    /// rank-deficient references never fail here; they give minimum-norm
    /// abundances.
    pub fn solve<S, D>(&self, image: &ArrayBase<S, D>) -> Result<ArrayD<f64>>
    where
        S: Data<Elem = f64>,
        D: Dimension,
    {
        let spatial = spatial_dims(image)?;
        let bands = image.shape()[0];
        if bands == 0 {
            return Err(UnmixError::DegenerateInput("image has zero bands".into()));
        }
        let y = unroll(image)?;
        log::info!(
            "unmixing {} pixels × {} bands into {} components",
            y.ncols(),
            bands,
            self.n_components()
        );
        let c = self.solve_unrolled(y.view())?;
        roll(&c, &spatial)
    }

    /// Per-pixel residual norm `‖y − Rᵀc‖`, shaped like the spatial grid.
    pub fn residuals<S1, D1, S2, D2>(
        &self,
        image: &ArrayBase<S1, D1>,
        abundances: &ArrayBase<S2, D2>,
    ) -> Result<ArrayD<f64>>
    where
        S1: Data<Elem = f64>,
        D1: Dimension,
        S2: Data<Elem = f64>,
        D2: Dimension,
    {
        let spatial = spatial_dims(image)?;
        if spatial_dims(abundances)? != spatial || abundances.shape()[0] != self.n_components() {
            return Err(UnmixError::DimensionMismatch(format!(
                "abundances {:?} do not match image {:?} with {} components",
                abundances.shape(),
                image.shape(),
                self.n_components()
            )));
        }
        let y = unroll(image)?;
        if y.nrows() != self.n_bands() {
            return Err(UnmixError::DimensionMismatch(format!(
                "image has {} bands, reference matrix has {}",
                y.nrows(),
                self.n_bands()
            )));
        }
        let c = unroll(abundances)?;
        let fitted = self.reference.design().dot(&c);
        let norms: Vec<f64> = (&y - &fitted)
            .axis_iter(Axis(1))
            .map(|col| col.dot(&col).sqrt())
            .collect();
        ArrayD::from_shape_vec(IxDyn(&spatial), norms)
            .map_err(|e| UnmixError::shape(&spatial, e.to_string()))
    }
}
