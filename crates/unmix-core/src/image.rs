//! Layout helpers for band-major images `(n, rows, cols)` / `(n, z, rows, cols)`.
//!
//! The solver works on the unrolled `(n, N)` matrix, one column per pixel, and
//! rolls its `(p, N)` result back to `(p, ...spatial)`.
use ndarray::{Array2, ArrayBase, ArrayD, Data, Dimension, Ix2, IxDyn};

use crate::error::{Result, UnmixError};

/// Spatial extents of a band-major image, i.e. `shape[1..]`.
///
/// Only 2D (`rows × cols`) and 3D (`z × rows × cols`) layouts are accepted.
pub fn spatial_dims<S, D>(image: &ArrayBase<S, D>) -> Result<Vec<usize>>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    match image.ndim() {
        3 | 4 => Ok(image.shape()[1..].to_vec()),
        _ => Err(UnmixError::shape(
            image.shape(),
            "expected (bands, rows, cols) or (bands, z, rows, cols)",
        )),
    }
}

/// Flatten `(c, ...spatial)` to `(c, N)` in row-major pixel order.
pub fn unroll<S, D>(image: &ArrayBase<S, D>) -> Result<Array2<f64>>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    let spatial = spatial_dims(image)?;
    let channels = image.shape()[0];
    let n_pixels = spatial.iter().product::<usize>();
    Array2::from_shape_vec((channels, n_pixels), image.iter().copied().collect())
        .map_err(|e| UnmixError::shape(image.shape(), e.to_string()))
}

/// Inverse of [`unroll`]: `(c, N)` back to `(c, ...spatial)`.
pub fn roll<S>(matrix: &ArrayBase<S, Ix2>, spatial: &[usize]) -> Result<ArrayD<f64>>
where
    S: Data<Elem = f64>,
{
    let mut shape = Vec::with_capacity(spatial.len() + 1);
    shape.push(matrix.nrows());
    shape.extend_from_slice(spatial);
    if spatial.iter().product::<usize>() != matrix.ncols() {
        return Err(UnmixError::shape(
            &shape,
            format!("{} pixel columns do not fill the spatial grid", matrix.ncols()),
        ));
    }
    ArrayD::from_shape_vec(IxDyn(&shape), matrix.iter().copied().collect())
        .map_err(|e| UnmixError::shape(&shape, e.to_string()))
}
