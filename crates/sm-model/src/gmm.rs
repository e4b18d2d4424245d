//! Full-covariance Gaussian mixture fitted by expectation-maximisation.
//!
//! Initialization: k-means++ seeding from a seeded `fastrand::Rng`, a few
//! Lloyd passes, uniform weights and the pooled data covariance for every
//! component. EM then runs until the mean per-frame log-likelihood moves by
//! less than `tolerance` or `max_iterations` is reached. `reg_covar` is added
//! to every covariance diagonal to keep them positive definite.

use std::f64::consts::PI;

use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use sm_core::{ClassifyError, MixtureConfig, Result};

use crate::linalg::{cholesky, log_det, log_sum_exp, solve_lower};

/// Added to component masses so a starved component never divides by zero.
const MASS_EPS: f64 = 10.0 * f64::EPSILON;

/// One weighted Gaussian. Serialized as (weight, mean, covariance); the
/// Cholesky factor is rebuilt on deserialization.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "ComponentParams", into = "ComponentParams")]
pub struct Component {
    weight: f64,
    mean: Array1<f64>,
    covariance: Array2<f64>,
    chol: Array2<f64>,
    /// `-0.5 (d ln 2π + ln |Σ|)`
    log_norm: f64,
}

#[derive(Serialize, Deserialize)]
struct ComponentParams {
    weight: f64,
    mean: Array1<f64>,
    covariance: Array2<f64>,
}

impl TryFrom<ComponentParams> for Component {
    type Error = ClassifyError;

    fn try_from(p: ComponentParams) -> Result<Self> {
        Component::new(p.weight, p.mean, p.covariance)
    }
}

impl From<Component> for ComponentParams {
    fn from(c: Component) -> Self {
        Self {
            weight: c.weight,
            mean: c.mean,
            covariance: c.covariance,
        }
    }
}

impl Component {
    /// # Errors
    /// `Numerical` if the covariance is not positive definite or the shapes
    /// disagree.
    pub fn new(weight: f64, mean: Array1<f64>, covariance: Array2<f64>) -> Result<Self> {
        let d = mean.len();
        if covariance.dim() != (d, d) {
            return Err(ClassifyError::Numerical(format!(
                "covariance {:?} pour une moyenne de dimension {d}",
                covariance.dim()
            )));
        }
        if !(weight > 0.0 && weight.is_finite()) {
            return Err(ClassifyError::Numerical(format!("poids invalide : {weight}")));
        }
        let chol = cholesky(&covariance).ok_or_else(|| {
            ClassifyError::Numerical("covariance non définie positive".to_string())
        })?;
        let log_norm = -0.5 * (d as f64 * (2.0 * PI).ln() + log_det(&chol));
        Ok(Self {
            weight,
            mean,
            covariance,
            chol,
            log_norm,
        })
    }

    /// `ln N(x | μ, Σ)`.
    fn log_pdf(&self, x: ndarray::ArrayView1<'_, f64>) -> f64 {
        let diff = &x - &self.mean;
        let z = solve_lower(&self.chol, diff.view());
        self.log_norm - 0.5 * z.dot(&z)
    }

    /// Mixing weight; weights of a mixture sum to 1.
    #[must_use]
    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Component mean.
    #[must_use]
    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    /// Full covariance, regularization included.
    #[must_use]
    pub fn covariance(&self) -> &Array2<f64> {
        &self.covariance
    }
}

/// Gaussian mixture density over fixed-width feature vectors.
///
/// # Example
/// ```
/// use ndarray::Array2;
/// use sm_core::MixtureConfig;
/// use sm_model::GaussianMixture;
///
/// let data = Array2::from_shape_fn((40, 2), |(i, j)| (i % 2) as f64 * 10.0 + (i * 7 + j) as f64 % 3.0);
/// let config = MixtureConfig { components: 2, ..MixtureConfig::default() };
/// let gmm = GaussianMixture::fit(data.view(), &config, 1).unwrap();
/// assert_eq!(gmm.n_components(), 2);
/// assert!(gmm.score(data.view()).unwrap().is_finite());
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GaussianMixture {
    dim: usize,
    components: Vec<Component>,
    converged: bool,
    iterations: usize,
}

impl GaussianMixture {
    /// Fit `config.components` full-covariance Gaussians to the rows of `data`.
    ///
    /// # Errors
    /// `InvalidConfig` for zero components, `InsufficientTrainingData` (with
    /// an empty label) when `data` has fewer rows than components,
    /// `Numerical` if a covariance degenerates.
    pub fn fit(data: ArrayView2<'_, f64>, config: &MixtureConfig, seed: u64) -> Result<Self> {
        let (n, dim) = data.dim();
        let k = config.components;
        if k == 0 {
            return Err(ClassifyError::InvalidConfig(
                "au moins une composante requise".to_string(),
            ));
        }
        if n < k {
            return Err(ClassifyError::InsufficientTrainingData {
                label: String::new(),
                frames: n,
                components: k,
            });
        }

        let mut rng = fastrand::Rng::with_seed(seed);
        let centers = kmeans(data, k, config.kmeans_iterations, &mut rng);

        let global_mean = data.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(dim));
        let centered = &data - &global_mean;
        let mut base_cov = centered.t().dot(&centered) / n as f64;
        add_diagonal(&mut base_cov, config.reg_covar);

        let components = centers
            .outer_iter()
            .map(|c| Component::new(1.0 / k as f64, c.to_owned(), base_cov.clone()))
            .collect::<Result<Vec<_>>>()?;

        let mut model = Self {
            dim,
            components,
            converged: false,
            iterations: 0,
        };

        let mut prev = f64::NEG_INFINITY;
        for iter in 1..=config.max_iterations {
            let (resp, mean_ll) = model.e_step(data);
            model.m_step(data, &resp, config.reg_covar)?;
            model.iterations = iter;
            if (mean_ll - prev).abs() < config.tolerance {
                model.converged = true;
                break;
            }
            prev = mean_ll;
        }

        if !model.converged {
            log::warn!(
                "EM non convergé après {} itérations ({n} frames, {k} composantes)",
                model.iterations
            );
        }
        Ok(model)
    }

    /// Assemble a mixture from components. Weights are renormalized.
    ///
    /// # Errors
    /// `InvalidConfig` if there are no components, `DimensionMismatch` if they
    /// disagree on dimension.
    pub fn from_components(components: Vec<Component>) -> Result<Self> {
        let Some(first) = components.first() else {
            return Err(ClassifyError::InvalidConfig(
                "mélange sans composante".to_string(),
            ));
        };
        let dim = first.mean.len();
        if let Some(bad) = components.iter().find(|c| c.mean.len() != dim) {
            return Err(ClassifyError::DimensionMismatch {
                expected: dim,
                actual: bad.mean.len(),
            });
        }
        let total: f64 = components.iter().map(|c| c.weight).sum();
        let components = components
            .into_iter()
            .map(|mut c| {
                c.weight /= total;
                c
            })
            .collect();
        Ok(Self {
            dim,
            components,
            converged: true,
            iterations: 0,
        })
    }

    /// Responsibilities and mean per-frame log-likelihood.
    fn e_step(&self, data: ArrayView2<'_, f64>) -> (Array2<f64>, f64) {
        let n = data.nrows();
        let k = self.components.len();
        let log_weights: Vec<f64> = self.components.iter().map(|c| c.weight.ln()).collect();
        let mut resp = Array2::<f64>::zeros((n, k));
        let mut lp = vec![0.0; k];
        let mut total = 0.0;

        for (i, x) in data.outer_iter().enumerate() {
            for (j, c) in self.components.iter().enumerate() {
                lp[j] = log_weights[j] + c.log_pdf(x);
            }
            let lse = log_sum_exp(&lp);
            total += lse;
            for (r, &l) in resp.row_mut(i).iter_mut().zip(&lp) {
                *r = (l - lse).exp();
            }
        }
        (resp, total / n as f64)
    }

    fn m_step(&mut self, data: ArrayView2<'_, f64>, resp: &Array2<f64>, reg: f64) -> Result<()> {
        let n = data.nrows() as f64;
        for (j, comp) in self.components.iter_mut().enumerate() {
            let r = resp.column(j);
            let mass = r.sum() + MASS_EPS;
            let mean = data.t().dot(&r) / mass;
            let diff = &data - &mean;
            let weighted = &diff * &r.insert_axis(Axis(1));
            let mut cov = weighted.t().dot(&diff) / mass;
            add_diagonal(&mut cov, reg);
            *comp = Component::new(mass / n, mean, cov)?;
        }
        Ok(())
    }

    /// Per-frame `ln p(x)`.
    ///
    /// # Errors
    /// `DimensionMismatch` if the rows have the wrong width.
    pub fn log_likelihoods(&self, data: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        if data.ncols() != self.dim {
            return Err(ClassifyError::DimensionMismatch {
                expected: self.dim,
                actual: data.ncols(),
            });
        }
        let log_weights: Vec<f64> = self.components.iter().map(|c| c.weight.ln()).collect();
        let mut lp = vec![0.0; self.components.len()];
        Ok(data
            .outer_iter()
            .map(|x| {
                for (j, c) in self.components.iter().enumerate() {
                    lp[j] = log_weights[j] + c.log_pdf(x);
                }
                log_sum_exp(&lp)
            })
            .collect())
    }

    /// Total log-likelihood of all rows, frames treated as independent.
    ///
    /// # Errors
    /// `DimensionMismatch` if the rows have the wrong width.
    pub fn score(&self, data: ArrayView2<'_, f64>) -> Result<f64> {
        Ok(self.log_likelihoods(data)?.sum())
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[must_use]
    pub fn n_components(&self) -> usize {
        self.components.len()
    }

    #[must_use]
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// `true` if EM stopped on the tolerance rather than the iteration cap.
    #[must_use]
    pub fn converged(&self) -> bool {
        self.converged
    }

    /// EM iterations run by [`GaussianMixture::fit`], 0 for assembled mixtures.
    #[must_use]
    pub fn iterations(&self) -> usize {
        self.iterations
    }
}

fn add_diagonal(m: &mut Array2<f64>, value: f64) {
    m.diag_mut().mapv_inplace(|v| v + value);
}

fn sq_dist(a: ndarray::ArrayView1<'_, f64>, b: ndarray::ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// k-means++ seeding followed by `iterations` Lloyd passes. Returns `k × d` centers.
fn kmeans(
    data: ArrayView2<'_, f64>,
    k: usize,
    iterations: usize,
    rng: &mut fastrand::Rng,
) -> Array2<f64> {
    let (n, d) = data.dim();
    let mut centers = Array2::<f64>::zeros((k, d));
    centers.row_mut(0).assign(&data.row(rng.usize(0..n)));

    let mut dist: Vec<f64> = data
        .outer_iter()
        .map(|x| sq_dist(x, centers.row(0)))
        .collect();
    for c in 1..k {
        let total: f64 = dist.iter().sum();
        let idx = if total > 0.0 {
            let mut r = rng.f64() * total;
            let mut pick = n - 1;
            for (i, &w) in dist.iter().enumerate() {
                r -= w;
                if r <= 0.0 && w > 0.0 {
                    pick = i;
                    break;
                }
            }
            pick
        } else {
            rng.usize(0..n)
        };
        centers.row_mut(c).assign(&data.row(idx));
        for (i, x) in data.outer_iter().enumerate() {
            dist[i] = dist[i].min(sq_dist(x, centers.row(c)));
        }
    }

    let mut assignment = vec![0usize; n];
    for _ in 0..iterations {
        let mut changed = false;
        for (i, x) in data.outer_iter().enumerate() {
            let best = (0..k)
                .map(|c| (c, sq_dist(x, centers.row(c))))
                .fold((0, f64::INFINITY), |b, cur| if cur.1 < b.1 { cur } else { b })
                .0;
            if best != assignment[i] {
                assignment[i] = best;
                changed = true;
            }
        }

        let mut sums = Array2::<f64>::zeros((k, d));
        let mut counts = vec![0usize; k];
        for (i, x) in data.outer_iter().enumerate() {
            let mut row = sums.row_mut(assignment[i]);
            row += &x;
            counts[assignment[i]] += 1;
        }
        for (c, &count) in counts.iter().enumerate() {
            // empty cluster keeps its previous center
            if count > 0 {
                let mean = &sums.row(c) / count as f64;
                centers.row_mut(c).assign(&mean);
            }
        }
        if !changed {
            break;
        }
    }
    centers
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    /// Two well separated 2-D blobs with a little deterministic jitter.
    fn blobs(n_each: usize) -> Array2<f64> {
        let mut rng = fastrand::Rng::with_seed(42);
        Array2::from_shape_fn((2 * n_each, 2), |(i, _)| {
            let center = if i < n_each { -5.0 } else { 5.0 };
            center + rng.f64() - 0.5
        })
    }

    fn config(k: usize) -> MixtureConfig {
        MixtureConfig {
            components: k,
            ..MixtureConfig::default()
        }
    }

    #[test]
    fn finds_both_blobs() {
        let data = blobs(50);
        let gmm = GaussianMixture::fit(data.view(), &config(2), 7).expect("fit");
        let mut means: Vec<f64> = gmm.components().iter().map(|c| c.mean()[0]).collect();
        means.sort_by(f64::total_cmp);
        assert!((means[0] + 5.0).abs() < 0.5, "{means:?}");
        assert!((means[1] - 5.0).abs() < 0.5, "{means:?}");
        let w: f64 = gmm.components().iter().map(Component::weight).sum();
        assert!((w - 1.0).abs() < 1e-9);
    }

    #[test]
    fn iteration_cap_stops_em() {
        let data = blobs(30);
        let capped = MixtureConfig {
            max_iterations: 1,
            ..config(2)
        };
        let gmm = GaussianMixture::fit(data.view(), &capped, 7).expect("fit");
        assert_eq!(gmm.iterations(), 1);
        assert!(!gmm.converged());

        let full = GaussianMixture::fit(data.view(), &config(2), 7).expect("fit");
        assert!(full.converged());
        assert!(full.iterations() > 1);
        assert!(full.iterations() <= MixtureConfig::default().max_iterations);
    }

    #[test]
    fn same_seed_same_model() {
        let data = blobs(30);
        let a = GaussianMixture::fit(data.view(), &config(3), 11).expect("fit");
        let b = GaussianMixture::fit(data.view(), &config(3), 11).expect("fit");
        assert_eq!(
            a.score(data.view()).expect("score"),
            b.score(data.view()).expect("score")
        );
    }

    #[test]
    fn fewer_frames_than_components_fails() {
        let data = blobs(2);
        match GaussianMixture::fit(data.view(), &config(10), 0) {
            Err(ClassifyError::InsufficientTrainingData {
                frames, components, ..
            }) => {
                assert_eq!(frames, 4);
                assert_eq!(components, 10);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn duplicated_points_stay_finite() {
        // every row identical: regularization alone keeps covariances valid
        let data = Array2::from_elem((20, 3), 0.25);
        let gmm = GaussianMixture::fit(data.view(), &config(10), 3).expect("fit");
        assert!(gmm.score(data.view()).expect("score").is_finite());
    }

    #[test]
    fn training_data_scores_higher_than_outliers() {
        let data = blobs(40);
        let gmm = GaussianMixture::fit(data.view(), &config(2), 5).expect("fit");
        let inlier = gmm.score(array![[5.0, 5.0]].view()).expect("score");
        let outlier = gmm.score(array![[0.0, 40.0]].view()).expect("score");
        assert!(inlier > outlier);
    }

    #[test]
    fn score_is_sum_of_frames() {
        let data = blobs(20);
        let gmm = GaussianMixture::fit(data.view(), &config(2), 9).expect("fit");
        let per_frame = gmm.log_likelihoods(data.view()).expect("ll");
        assert_eq!(per_frame.len(), 40);
        let total = gmm.score(data.view()).expect("score");
        assert!((per_frame.sum() - total).abs() < 1e-9);
    }

    #[test]
    fn single_gaussian_matches_closed_form() {
        let c = Component::new(1.0, array![0.0, 0.0], array![[1.0, 0.0], [0.0, 1.0]])
            .expect("component");
        let gmm = GaussianMixture::from_components(vec![c]).expect("mixture");
        let ll = gmm.score(array![[0.0, 0.0]].view()).expect("score");
        assert!((ll + (2.0 * PI).ln()).abs() < 1e-12);
    }

    #[test]
    fn wrong_width_is_rejected() {
        let data = blobs(10);
        let gmm = GaussianMixture::fit(data.view(), &config(2), 1).expect("fit");
        assert!(matches!(
            gmm.score(array![[1.0, 2.0, 3.0]].view()),
            Err(ClassifyError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
    }
}
