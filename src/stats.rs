//! Distribution statistics over feature embeddings
//!
//! A stream of feature vectors is reduced to a multivariate-Gaussian summary
//! (sample mean + unbiased sample covariance). The accumulator keeps running
//! sums only, so memory stays bounded by D and D×D regardless of how many
//! images flow through.
//!
//! Persisted statistics use the safetensors container format: tensors `mean`
//! (f64, `[D]`), `covariance` (f64, `[D, D]`) and `sample_count` (u32, `[1]`).
//! Save-then-load reproduces mean and covariance bit for bit.

use candle_core::{Device, Tensor};
use nalgebra::{DMatrix, DVector};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use crate::{Error, Result};

/// File extension recognized as a persisted statistics container when
/// resolving pipeline inputs.
pub const STATS_EXTENSION: &str = "safetensors";

/// Mean + covariance summary of a set of feature embeddings.
///
/// Immutable after construction. Covariance is symmetric and (up to numerical
/// tolerance) positive-semidefinite whenever it was derived from ≥2 samples.
#[derive(Clone, Debug)]
pub struct DistributionStats {
    mean: DVector<f64>,
    covariance: DMatrix<f64>,
    sample_count: usize,
}

impl DistributionStats {
    /// Build stats from an in-memory collection of feature rows.
    pub fn from_features<'a, I>(rows: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a [f32]>,
    {
        let mut acc = FeatureAccumulator::new();
        for row in rows {
            acc.push(row)?;
        }
        acc.finish()
    }

    pub fn mean(&self) -> &DVector<f64> {
        &self.mean
    }

    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.covariance
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Embedding dimensionality D.
    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    /// Persist to a safetensors file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let d = self.dim();
        let mean = Tensor::from_vec(self.mean.as_slice().to_vec(), d, &Device::Cpu)?;

        // DMatrix is column-major; safetensors rows must be row-major.
        let mut cov_rows = Vec::with_capacity(d * d);
        for i in 0..d {
            for j in 0..d {
                cov_rows.push(self.covariance[(i, j)]);
            }
        }
        let covariance = Tensor::from_vec(cov_rows, (d, d), &Device::Cpu)?;
        let sample_count =
            Tensor::from_vec(vec![self.sample_count as u32], 1, &Device::Cpu)?;

        let tensors = HashMap::from([
            ("mean".to_string(), mean),
            ("covariance".to_string(), covariance),
            ("sample_count".to_string(), sample_count),
        ]);
        candle_core::safetensors::save(&tensors, path.as_ref())?;
        debug!(path = %path.as_ref().display(), dim = d, "Saved distribution stats");
        Ok(())
    }

    /// Load previously persisted stats.
    ///
    /// Fails with `InvalidFormat` when the file is not a safetensors container
    /// or does not hold the expected tensors/shapes.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let invalid = |reason: String| Error::InvalidFormat {
            path: path.to_path_buf(),
            reason,
        };

        let tensors = candle_core::safetensors::load(path, &Device::Cpu)
            .map_err(|e| invalid(e.to_string()))?;

        let mean = tensors
            .get("mean")
            .ok_or_else(|| invalid("missing tensor: mean".into()))?;
        let covariance = tensors
            .get("covariance")
            .ok_or_else(|| invalid("missing tensor: covariance".into()))?;
        let sample_count = tensors
            .get("sample_count")
            .ok_or_else(|| invalid("missing tensor: sample_count".into()))?;

        let mean: Vec<f64> = mean.to_vec1().map_err(|e| invalid(e.to_string()))?;
        let cov_rows: Vec<Vec<f64>> =
            covariance.to_vec2().map_err(|e| invalid(e.to_string()))?;
        let count: Vec<u32> = sample_count
            .to_vec1()
            .map_err(|e| invalid(e.to_string()))?;

        let d = mean.len();
        if cov_rows.len() != d || cov_rows.iter().any(|r| r.len() != d) {
            return Err(invalid(format!(
                "covariance shape does not match mean length {d}"
            )));
        }
        let count = *count
            .first()
            .ok_or_else(|| invalid("empty sample_count tensor".into()))?
            as usize;

        let covariance =
            DMatrix::from_row_iterator(d, d, cov_rows.into_iter().flatten());
        debug!(path = %path.display(), dim = d, samples = count, "Loaded distribution stats");

        Ok(Self {
            mean: DVector::from_vec(mean),
            covariance,
            sample_count: count,
        })
    }
}

/// Streaming reducer: feature rows in, `DistributionStats` out.
///
/// Keeps `n`, `Σx` and `Σxxᵀ` in f64; permutation of the input stream cannot
/// change the result beyond floating-point associativity inside one sum.
#[derive(Debug, Default)]
pub struct FeatureAccumulator {
    count: usize,
    sum: Option<DVector<f64>>,
    outer: Option<DMatrix<f64>>,
}

impl FeatureAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Fold one feature vector into the running sums.
    ///
    /// The first row fixes the dimensionality; later rows of a different
    /// length fail with `DimensionMismatch`.
    pub fn push(&mut self, row: &[f32]) -> Result<()> {
        let x = DVector::from_iterator(row.len(), row.iter().map(|&v| v as f64));

        match (&mut self.sum, &mut self.outer) {
            (None, None) => {
                self.outer = Some(&x * x.transpose());
                self.sum = Some(x);
            }
            (Some(sum), Some(outer)) => {
                if sum.len() != x.len() {
                    return Err(Error::DimensionMismatch {
                        left: sum.len(),
                        right: x.len(),
                    });
                }
                *sum += &x;
                *outer += &x * x.transpose();
            }
            _ => unreachable!("sum and outer are initialized together"),
        }
        self.count += 1;
        Ok(())
    }

    /// Finalize into mean + unbiased covariance.
    ///
    /// Fails with `InsufficientSamples` for fewer than 2 rows, since the
    /// unbiased covariance divides by `n - 1`.
    pub fn finish(self) -> Result<DistributionStats> {
        if self.count < 2 {
            return Err(Error::InsufficientSamples(self.count));
        }
        let n = self.count as f64;
        let sum = self.sum.expect("count >= 2 implies sums exist");
        let outer = self.outer.expect("count >= 2 implies sums exist");

        let mean = &sum / n;
        let mut covariance = (outer - n * (&mean * mean.transpose())) / (n - 1.0);
        // Force exact symmetry; the running sums accumulate tiny asymmetries.
        covariance = (&covariance + covariance.transpose()) * 0.5;

        Ok(DistributionStats {
            mean,
            covariance,
            sample_count: self.count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_rows() -> Vec<Vec<f32>> {
        vec![
            vec![1.0, 2.0, 3.0],
            vec![2.0, 0.5, -1.0],
            vec![-0.5, 1.5, 4.0],
            vec![3.0, -2.0, 0.0],
        ]
    }

    #[test]
    fn test_mean_and_covariance() {
        let rows = vec![vec![1.0f32, 0.0], vec![3.0, 4.0]];
        let stats =
            DistributionStats::from_features(rows.iter().map(|r| r.as_slice())).unwrap();

        assert!((stats.mean()[0] - 2.0).abs() < 1e-12);
        assert!((stats.mean()[1] - 2.0).abs() < 1e-12);
        // Unbiased covariance of two points: outer product of half-difference * 2.
        assert!((stats.covariance()[(0, 0)] - 2.0).abs() < 1e-12);
        assert!((stats.covariance()[(0, 1)] - 4.0).abs() < 1e-12);
        assert!((stats.covariance()[(1, 1)] - 8.0).abs() < 1e-12);
        assert_eq!(stats.sample_count(), 2);
    }

    #[test]
    fn test_permutation_invariance() {
        let rows = sample_rows();
        let forward =
            DistributionStats::from_features(rows.iter().map(|r| r.as_slice())).unwrap();
        let reversed =
            DistributionStats::from_features(rows.iter().rev().map(|r| r.as_slice()))
                .unwrap();

        let mean_diff = (forward.mean() - reversed.mean()).amax();
        let cov_diff = (forward.covariance() - reversed.covariance()).amax();
        assert!(mean_diff < 1e-9, "mean diff {mean_diff}");
        assert!(cov_diff < 1e-9, "covariance diff {cov_diff}");
    }

    #[test]
    fn test_covariance_symmetry() {
        let rows = sample_rows();
        let stats =
            DistributionStats::from_features(rows.iter().map(|r| r.as_slice())).unwrap();
        let cov = stats.covariance();
        let asym = (cov - cov.transpose()).amax();
        assert!(asym < 1e-12);
    }

    #[test]
    fn test_insufficient_samples() {
        let err =
            DistributionStats::from_features(std::iter::empty::<&[f32]>()).unwrap_err();
        assert!(matches!(err, Error::InsufficientSamples(0)));

        let one = vec![vec![1.0f32, 2.0]];
        let err = DistributionStats::from_features(one.iter().map(|r| r.as_slice()))
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientSamples(1)));
    }

    #[test]
    fn test_dimension_drift() {
        let mut acc = FeatureAccumulator::new();
        acc.push(&[1.0, 2.0]).unwrap();
        let err = acc.push(&[1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch { left: 2, right: 3 }
        ));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let rows = sample_rows();
        let stats =
            DistributionStats::from_features(rows.iter().map(|r| r.as_slice())).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.safetensors");
        stats.save(&path).unwrap();
        let loaded = DistributionStats::load(&path).unwrap();

        assert_eq!(loaded.sample_count(), stats.sample_count());
        assert_eq!((loaded.mean() - stats.mean()).amax(), 0.0);
        assert_eq!((loaded.covariance() - stats.covariance()).amax(), 0.0);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bogus.safetensors");
        std::fs::write(&path, b"not a safetensors file").unwrap();
        let err = DistributionStats::load(&path).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat { .. }));
    }
}
