//! Closed-form Fréchet distance between two Gaussian summaries
//!
//! d² = ‖μ_a − μ_b‖² + tr(Σ_a + Σ_b − 2·(Σ_a·Σ_b)^{1/2})
//!
//! The product Σ_a·Σ_b is not symmetric, so its square root is taken through
//! the equivalent symmetric form: tr((Σ_a·Σ_b)^{1/2}) equals the trace of the
//! square root of √Σ_a · Σ_b · √Σ_a, which is symmetric PSD and safe to
//! eigendecompose. Near-singular covariances get a small diagonal jitter
//! before the square root; the jitter grows over a bounded number of retries
//! and failure past that surfaces as `NumericalInstability`.

use nalgebra::{DMatrix, SymmetricEigen};
use tracing::{debug, warn};

use crate::stats::DistributionStats;
use crate::{Error, Result};

/// Jitter magnitudes tried in order after the unregularized attempt.
const JITTER_SCHEDULE: [f64; 4] = [1e-6, 1e-5, 1e-4, 1e-3];

/// Relative tolerance for negative eigenvalues of the symmetrized product.
const EIGEN_TOLERANCE: f64 = 1e-8;

/// Fréchet distance between two feature distributions.
///
/// Symmetric in its arguments and always ≥ 0: negligible negative values from
/// floating-point error in the trace term are clamped to zero. Comparing
/// stats of different dimensionality fails with `DimensionMismatch`.
pub fn frechet_distance(a: &DistributionStats, b: &DistributionStats) -> Result<f64> {
    if a.dim() != b.dim() {
        return Err(Error::DimensionMismatch {
            left: a.dim(),
            right: b.dim(),
        });
    }

    let mean_term = (a.mean() - b.mean()).norm_squared();
    let trace_a = a.covariance().trace();
    let trace_b = b.covariance().trace();
    let trace_sqrt = trace_sqrt_product(a.covariance(), b.covariance())?;

    let squared = mean_term + trace_a + trace_b - 2.0 * trace_sqrt;
    debug!(
        mean_term,
        trace_term = trace_a + trace_b - 2.0 * trace_sqrt,
        "Fréchet distance terms"
    );
    Ok(squared.max(0.0))
}

/// tr((Σ_a·Σ_b)^{1/2}) with bounded diagonal regularization.
fn trace_sqrt_product(sigma_a: &DMatrix<f64>, sigma_b: &DMatrix<f64>) -> Result<f64> {
    let d = sigma_a.nrows();
    let identity = DMatrix::<f64>::identity(d, d);

    let mut attempts = 0usize;
    let mut worst = 0.0f64;

    for eps in std::iter::once(0.0).chain(JITTER_SCHEDULE) {
        attempts += 1;
        let (a, b) = if eps == 0.0 {
            (sigma_a.clone(), sigma_b.clone())
        } else {
            warn!(eps, attempt = attempts, "Regularizing covariance diagonals");
            (sigma_a + &identity * eps, sigma_b + &identity * eps)
        };

        match try_trace_sqrt(&a, &b) {
            Ok(trace) => return Ok(trace),
            Err(magnitude) => worst = worst.max(magnitude),
        }
    }

    Err(Error::NumericalInstability {
        attempts,
        magnitude: worst,
    })
}

/// One unretried square-root attempt; `Err` carries the magnitude of the most
/// negative eigenvalue found.
fn try_trace_sqrt(sigma_a: &DMatrix<f64>, sigma_b: &DMatrix<f64>) -> std::result::Result<f64, f64> {
    let sqrt_a = symmetric_sqrt(sigma_a)?;

    let mut product = &sqrt_a * sigma_b * &sqrt_a;
    product = (&product + product.transpose()) * 0.5;

    let eigen = SymmetricEigen::new(product);
    let max_eig = eigen.eigenvalues.amax().max(1.0);
    let tolerance = EIGEN_TOLERANCE * max_eig;

    let min_eig = eigen.eigenvalues.min();
    if min_eig < -tolerance {
        return Err(-min_eig);
    }

    Ok(eigen.eigenvalues.iter().map(|&l| l.max(0.0).sqrt()).sum())
}

/// Square root of a symmetric PSD matrix via eigendecomposition.
///
/// Eigenvalues below `-tolerance` mean the matrix is not PSD even after the
/// caller's jitter; smaller negatives are rounding noise and clamp to zero.
fn symmetric_sqrt(matrix: &DMatrix<f64>) -> std::result::Result<DMatrix<f64>, f64> {
    let eigen = SymmetricEigen::new(matrix.clone());
    let max_eig = eigen.eigenvalues.amax().max(1.0);
    let tolerance = EIGEN_TOLERANCE * max_eig;

    let min_eig = eigen.eigenvalues.min();
    if min_eig < -tolerance {
        return Err(-min_eig);
    }

    let sqrt_vals = eigen.eigenvalues.map(|l| l.max(0.0).sqrt());
    let sqrt_diag = DMatrix::from_diagonal(&sqrt_vals);
    Ok(&eigen.eigenvectors * sqrt_diag * eigen.eigenvectors.transpose())
}
