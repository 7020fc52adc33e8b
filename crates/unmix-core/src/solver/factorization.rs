//! One-time SVD factorization of the design matrix `R^T` (n × p).
//!
//! The pseudo-inverse `pinv(R^T) = V Σ⁺ Uᵀ` is p × n. Singular values at or
//! below `rcond · σ_max` are treated as zero, which yields the minimum-norm
//! least-squares solution for rank-deficient or underdetermined systems.
//!
//! The SVD is computed with one-sided (Hestenes) Jacobi rotations on the
//! columns of `R^T`. Columns that are exact copies or linear combinations of
//! others collapse to norms at rounding level, so the retained singular
//! triplets reproduce `R^T` to working precision even when it is exactly
//! rank deficient. p is the number of references, so the p² rotations per
//! sweep are cheap next to the per-pixel solve.
use nalgebra::DMatrix;
use ndarray::{Array2, ArrayView2};

use crate::error::{Result, UnmixError};

/// Jacobi sweeps before giving up. Convergence is quadratic; a handful of
/// sweeps is typical.
const MAX_SWEEPS: usize = 64;

/// Immutable factorization shared by every pixel solve.
#[derive(Debug, Clone)]
pub struct Factorization {
    /// p × n pseudo-inverse of the design matrix.
    pub pinv: Array2<f64>,
    /// Singular values, descending.
    pub singular_values: Vec<f64>,
    /// Number of singular values above the cutoff.
    pub rank: usize,
    /// Absolute singular value cutoff used.
    pub cutoff: f64,
    /// `‖A·A⁺·A − A‖_F / ‖A‖_F`, zero for an all-zero design.
    pub penrose_residual: f64,
}

/// Default relative cutoff, `ε · max(n, p)`.
pub fn default_rcond(n_bands: usize, n_components: usize) -> f64 {
    f64::EPSILON * n_bands.max(n_components) as f64
}

/// Factorize `design` (n × p) and build its pseudo-inverse.
pub fn factorize(design: ArrayView2<'_, f64>, rcond: Option<f64>) -> Result<Factorization> {
    let (n, p) = design.dim();
    if n == 0 || p == 0 {
        return Err(UnmixError::DegenerateInput(format!(
            "design matrix is {n} × {p}"
        )));
    }
    let rcond = rcond.unwrap_or_else(|| default_rcond(n, p));
    if !rcond.is_finite() || rcond < 0.0 {
        return Err(UnmixError::DegenerateInput(format!(
            "rcond must be finite and non-negative, got {rcond}"
        )));
    }

    let mut u = DMatrix::from_fn(n, p, |i, j| design[[i, j]]);
    let mut v = DMatrix::<f64>::identity(p, p);
    let sweeps = orthogonalize_columns(&mut u, &mut v)?;

    // After convergence the columns of `u` are σ_k · u_k.
    let sigma: Vec<f64> = (0..p).map(|k| u.column(k).norm()).collect();
    let sigma_max = sigma.iter().cloned().fold(0.0, f64::max);
    let cutoff = rcond * sigma_max;

    // pinv[i, j] = Σ_k v[i, k] · u[j, k] / σ_k² over retained k.
    let mut pinv = Array2::zeros((p, n));
    let mut rank = 0;
    for (k, &s) in sigma.iter().enumerate() {
        if s <= cutoff || s == 0.0 {
            continue;
        }
        rank += 1;
        let inv_sq = 1.0 / (s * s);
        for i in 0..p {
            let vi = v[(i, k)] * inv_sq;
            if vi == 0.0 {
                continue;
            }
            for j in 0..n {
                pinv[[i, j]] += vi * u[(j, k)];
            }
        }
    }

    let penrose_residual = penrose_residual(design, &pinv);
    if penrose_residual > 1e3 * default_rcond(n, p) {
        log::warn!("pseudo-inverse reproduces the design only to {penrose_residual:.3e} (relative)");
    }

    let mut singular_values = sigma;
    singular_values.sort_by(|a, b| b.total_cmp(a));

    log::debug!(
        "factorized {n}×{p} design in {sweeps} sweeps: rank {rank}, cutoff {cutoff:.3e}, \
         singular values {singular_values:?}, penrose residual {penrose_residual:.3e}"
    );

    Ok(Factorization { pinv, singular_values, rank, cutoff, penrose_residual })
}

/// Rotate column pairs of `u` until they are mutually orthogonal, accumulating
/// the rotations into `v`. Returns the number of sweeps taken.
fn orthogonalize_columns(u: &mut DMatrix<f64>, v: &mut DMatrix<f64>) -> Result<usize> {
    let (n, p) = u.shape();
    // Rounding in a length-n dot product.
    let tol = f64::EPSILON * n as f64;
    for sweep in 1..=MAX_SWEEPS {
        let mut rotated = false;
        for i in 0..p {
            for j in (i + 1)..p {
                let alpha = u.column(i).norm_squared();
                let beta = u.column(j).norm_squared();
                let gamma = u.column(i).dot(&u.column(j));
                if gamma == 0.0 || gamma.abs() <= tol * alpha.sqrt() * beta.sqrt() {
                    continue;
                }
                rotated = true;

                let zeta = (beta - alpha) / (2.0 * gamma);
                let t = zeta.signum() / (zeta.abs() + zeta.hypot(1.0));
                let c = 1.0 / t.hypot(1.0);
                let s = c * t;
                for k in 0..n {
                    let (a, b) = (u[(k, i)], u[(k, j)]);
                    u[(k, i)] = c * a - s * b;
                    u[(k, j)] = s * a + c * b;
                }
                for k in 0..p {
                    let (a, b) = (v[(k, i)], v[(k, j)]);
                    v[(k, i)] = c * a - s * b;
                    v[(k, j)] = s * a + c * b;
                }
            }
        }
        if !rotated {
            return Ok(sweep);
        }
    }
    Err(UnmixError::Factorization(format!(
        "Jacobi SVD did not converge in {MAX_SWEEPS} sweeps"
    )))
}

fn penrose_residual(design: ArrayView2<'_, f64>, pinv: &Array2<f64>) -> f64 {
    let scale = design.iter().map(|v| v * v).sum::<f64>().sqrt();
    if scale == 0.0 {
        return 0.0;
    }
    let back = design.dot(pinv).dot(&design);
    let err = (&back - &design).iter().map(|v| v * v).sum::<f64>().sqrt();
    err / scale
}
