use ndarray::{Array1, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sm_core::{ClassifyError, FeatureMatrix, Result};

/// Per-dimension moments of a set of frames.
///
/// `merge` is associative, so per-file accumulators can be built in parallel
/// and combined afterwards.
#[derive(Clone, Debug)]
struct Moments {
    count: usize,
    mean: Array1<f64>,
    m2: Array1<f64>,
    min: Array1<f64>,
    max: Array1<f64>,
}

impl Moments {
    fn of(matrix: &FeatureMatrix) -> Self {
        let dim = matrix.ncols();
        let count = matrix.nrows();
        if count == 0 {
            return Self {
                count,
                mean: Array1::zeros(dim),
                m2: Array1::zeros(dim),
                min: Array1::from_elem(dim, f64::INFINITY),
                max: Array1::from_elem(dim, f64::NEG_INFINITY),
            };
        }
        let mean = matrix.sum_axis(Axis(0)) / count as f64;
        let centered = matrix - &mean;
        let m2 = centered.mapv(|v| v * v).sum_axis(Axis(0));
        let min = matrix.fold_axis(Axis(0), f64::INFINITY, |a, &b| a.min(b));
        let max = matrix.fold_axis(Axis(0), f64::NEG_INFINITY, |a, &b| a.max(b));
        Self {
            count,
            mean,
            m2,
            min,
            max,
        }
    }

    /// Chan et al. pairwise combination.
    fn merge(self, other: Self) -> Self {
        if self.count == 0 {
            return other;
        }
        if other.count == 0 {
            return self;
        }
        let n_a = self.count as f64;
        let n_b = other.count as f64;
        let n = n_a + n_b;
        let delta = &other.mean - &self.mean;
        let mean = &self.mean + &(&delta * (n_b / n));
        let m2 = &self.m2 + &other.m2 + &(delta.mapv(|d| d * d) * (n_a * n_b / n));
        let min = ndarray::Zip::from(&self.min)
            .and(&other.min)
            .map_collect(|a, b| a.min(*b));
        let max = ndarray::Zip::from(&self.max)
            .and(&other.max)
            .map_collect(|a, b| a.max(*b));
        Self {
            count: self.count + other.count,
            mean,
            m2,
            min,
            max,
        }
    }
}

/// Mean and inverse standard deviation learned from pooled training frames.
///
/// Frozen after [`NormalizationStats::fit`]; classification reuses them as is.
///
/// # Example
/// ```
/// use ndarray::array;
/// use sm_model::NormalizationStats;
///
/// let stats = NormalizationStats::fit(&[array![[1.0, 5.0], [3.0, 5.0]]]).unwrap();
/// assert_eq!(stats.mean().to_vec(), vec![2.0, 5.0]);
/// assert_eq!(stats.inv_std().to_vec(), vec![1.0, 1.0]); // std 1, and constant column
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizationStats {
    mean: Array1<f64>,
    inv_std: Array1<f64>,
}

impl NormalizationStats {
    /// Pool every frame of every matrix and compute mean / population std.
    ///
    /// A dimension whose training values are all identical gets
    /// `inv_std = 1.0`, so normalization only centers it.
    ///
    /// # Errors
    /// `EmptyTrainingSet` when there are no frames at all,
    /// `DimensionMismatch` when matrices disagree on width.
    pub fn fit(matrices: &[FeatureMatrix]) -> Result<Self> {
        let Some(first) = matrices.first() else {
            return Err(ClassifyError::EmptyTrainingSet);
        };
        let dim = first.ncols();
        if let Some(bad) = matrices.iter().find(|m| m.ncols() != dim) {
            return Err(ClassifyError::DimensionMismatch {
                expected: dim,
                actual: bad.ncols(),
            });
        }

        let partial: Vec<Moments> = matrices.par_iter().map(Moments::of).collect();
        let total = partial.into_iter().fold(
            Moments::of(&FeatureMatrix::zeros((0, dim))),
            Moments::merge,
        );
        if total.count == 0 {
            return Err(ClassifyError::EmptyTrainingSet);
        }

        let n = total.count as f64;
        let mut mean = total.mean;
        let mut inv_std = Array1::ones(dim);
        for d in 0..dim {
            if total.min[d] == total.max[d] {
                mean[d] = total.min[d];
                continue;
            }
            let std = (total.m2[d] / n).sqrt();
            if std > 0.0 {
                inv_std[d] = 1.0 / std;
            }
        }

        Ok(Self { mean, inv_std })
    }

    /// `(frame - mean) * inv_std` for every frame.
    ///
    /// # Errors
    /// `DimensionMismatch` if the matrix width differs from the stats.
    pub fn apply(&self, matrix: &FeatureMatrix) -> Result<FeatureMatrix> {
        let mut out = matrix.clone();
        self.apply_in_place(&mut out)?;
        Ok(out)
    }

    /// In-place variant of [`NormalizationStats::apply`].
    ///
    /// # Errors
    /// `DimensionMismatch` if the matrix width differs from the stats.
    pub fn apply_in_place(&self, matrix: &mut FeatureMatrix) -> Result<()> {
        if matrix.ncols() != self.dim() {
            return Err(ClassifyError::DimensionMismatch {
                expected: self.dim(),
                actual: matrix.ncols(),
            });
        }
        *matrix -= &self.mean;
        *matrix *= &self.inv_std;
        Ok(())
    }

    /// Feature dimension.
    #[must_use]
    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    /// Per-dimension mean of the training frames.
    #[must_use]
    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    /// Per-dimension `1 / std`, 1.0 for constant dimensions.
    #[must_use]
    pub fn inv_std(&self) -> &Array1<f64> {
        &self.inv_std
    }
}
