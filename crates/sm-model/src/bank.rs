use std::collections::BTreeMap;

use log::Level;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sm_core::{ClassifyError, FeatureMatrix, MixtureConfig, Result};

use crate::gmm::GaussianMixture;

/// One density model per label, in label order.
///
/// Models are independent: training and scoring run in parallel over labels,
/// and results always come back in the `BTreeMap` order.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DensityModelBank {
    models: BTreeMap<String, GaussianMixture>,
}

impl DensityModelBank {
    /// Empty bank.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fit one mixture for `label` and store it, replacing any previous one.
    ///
    /// # Errors
    /// `InsufficientTrainingData` if `features` has fewer frames than
    /// components, `Numerical` on degenerate covariances.
    pub fn train(
        &mut self,
        label: &str,
        features: &FeatureMatrix,
        config: &MixtureConfig,
    ) -> Result<()> {
        let model = fit_label(label, features, config)?;
        self.models.insert(label.to_string(), model);
        Ok(())
    }

    /// Fit every label in parallel. The bank is left untouched on error.
    ///
    /// # Errors
    /// The error of a failing label.
    pub fn train_all(
        &mut self,
        per_label: &BTreeMap<String, FeatureMatrix>,
        config: &MixtureConfig,
        verbose: bool,
    ) -> Result<()> {
        let level = if verbose { Level::Info } else { Level::Debug };
        let fitted: Vec<(String, GaussianMixture)> = per_label
            .par_iter()
            .map(|(label, features)| {
                log::log!(
                    level,
                    "Training a GMM for label {label}, using data of shape {:?}",
                    features.dim()
                );
                fit_label(label, features, config).map(|m| (label.clone(), m))
            })
            .collect::<Result<_>>()?;
        self.models.extend(fitted);
        Ok(())
    }

    /// Store an already fitted model under `label`.
    pub fn insert(&mut self, label: impl Into<String>, model: GaussianMixture) {
        self.models.insert(label.into(), model);
    }

    /// Total log-likelihood of `features` under `label`'s model.
    ///
    /// # Errors
    /// `UnknownLabel` if no model exists for `label`, `DimensionMismatch` on
    /// a width mismatch.
    pub fn score(&self, label: &str, features: &FeatureMatrix) -> Result<f64> {
        let model = self
            .models
            .get(label)
            .ok_or_else(|| ClassifyError::UnknownLabel {
                label: label.to_string(),
                available: self.labels().map(str::to_string).collect(),
            })?;
        model.score(features.view())
    }

    /// Score `features` against every model, in label order.
    ///
    /// # Errors
    /// `DimensionMismatch` on a width mismatch.
    pub fn scores(&self, features: &FeatureMatrix) -> Result<Vec<(String, f64)>> {
        self.models
            .par_iter()
            .map(|(label, model)| Ok((label.clone(), model.score(features.view())?)))
            .collect()
    }

    /// Known labels, sorted.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    #[must_use]
    pub fn get(&self, label: &str) -> Option<&GaussianMixture> {
        self.models.get(label)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// Per-label RNG seed: FNV-1a of the label mixed into the base seed, so a
/// label's model does not depend on which other labels are trained.
#[must_use]
pub fn label_seed(base: u64, label: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0100_0000_01b3;
    let hash = label
        .bytes()
        .fold(OFFSET, |h, b| (h ^ u64::from(b)).wrapping_mul(PRIME));
    hash ^ base
}

fn fit_label(
    label: &str,
    features: &FeatureMatrix,
    config: &MixtureConfig,
) -> Result<GaussianMixture> {
    let model = GaussianMixture::fit(features.view(), config, label_seed(config.seed, label))
        .map_err(|e| match e {
            ClassifyError::InsufficientTrainingData {
                frames, components, ..
            } => ClassifyError::InsufficientTrainingData {
                label: label.to_string(),
                frames,
                components,
            },
            other => other,
        })?;
    log::debug!(
        "{label} : EM {} après {} itérations",
        if model.converged() { "convergé" } else { "arrêté" },
        model.iterations()
    );
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn cluster(center: f64, rows: usize, seed: u64) -> FeatureMatrix {
        let mut rng = fastrand::Rng::with_seed(seed);
        Array2::from_shape_fn((rows, 3), |_| center + rng.f64() - 0.5)
    }

    fn config() -> MixtureConfig {
        MixtureConfig {
            components: 2,
            ..MixtureConfig::default()
        }
    }

    fn trained() -> DensityModelBank {
        let mut per_label = BTreeMap::new();
        per_label.insert("low".to_string(), cluster(-3.0, 60, 1));
        per_label.insert("high".to_string(), cluster(3.0, 60, 2));
        let mut bank = DensityModelBank::new();
        bank.train_all(&per_label, &config(), false).expect("train");
        bank
    }

    #[test]
    fn each_label_prefers_its_own_data() {
        let bank = trained();
        assert_eq!(bank.labels().collect::<Vec<_>>(), vec!["high", "low"]);
        let probe = cluster(-3.0, 10, 9);
        let low = bank.score("low", &probe).expect("score");
        let high = bank.score("high", &probe).expect("score");
        assert!(low > high);
    }

    #[test]
    fn scores_come_back_in_label_order() {
        let bank = trained();
        let scores = bank.scores(&cluster(3.0, 5, 4)).expect("scores");
        let labels: Vec<&str> = scores.iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(labels, vec!["high", "low"]);
        assert!(scores[0].1 > scores[1].1);
    }

    #[test]
    fn unknown_label_lists_available() {
        let bank = trained();
        match bank.score("mid", &cluster(0.0, 3, 0)) {
            Err(ClassifyError::UnknownLabel { label, available }) => {
                assert_eq!(label, "mid");
                assert_eq!(available, vec!["high".to_string(), "low".to_string()]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn starved_label_is_named_in_error() {
        let mut per_label = BTreeMap::new();
        per_label.insert("tiny".to_string(), cluster(0.0, 1, 3));
        let mut bank = DensityModelBank::new();
        let err = bank.train_all(&per_label, &config(), false).err();
        assert!(matches!(
            err,
            Some(ClassifyError::InsufficientTrainingData { ref label, frames: 1, components: 2 })
                if label == "tiny"
        ));
        assert!(bank.is_empty());
    }

    #[test]
    fn label_model_independent_of_other_labels() {
        let data = cluster(1.0, 40, 5);
        let mut alone = DensityModelBank::new();
        alone.train("x", &data, &config()).expect("train");

        let mut per_label = BTreeMap::new();
        per_label.insert("x".to_string(), data.clone());
        per_label.insert("y".to_string(), cluster(-1.0, 40, 6));
        let mut both = DensityModelBank::new();
        both.train_all(&per_label, &config(), false).expect("train");

        assert_eq!(
            alone.score("x", &data).expect("score"),
            both.score("x", &data).expect("score")
        );
    }

    #[test]
    fn label_seed_varies_by_label() {
        assert_ne!(label_seed(0, "a"), label_seed(0, "b"));
        assert_eq!(label_seed(7, "a"), label_seed(7, "a"));
    }
}
