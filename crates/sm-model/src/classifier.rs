use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::Level;
use ndarray::{ArrayView2, Axis, concatenate};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sm_audio::FeatureExtractor;
use sm_core::{ClassifierConfig, ClassifyError, FeatureMatrix, Result, TrainingExample};

use crate::bank::DensityModelBank;
use crate::normalizer::NormalizationStats;

/// Everything learned by training: frozen normalization and one model per label.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClassifierState {
    stats: NormalizationStats,
    bank: DensityModelBank,
}

impl ClassifierState {
    #[must_use]
    pub fn new(stats: NormalizationStats, bank: DensityModelBank) -> Self {
        Self { stats, bank }
    }

    #[must_use]
    pub fn stats(&self) -> &NormalizationStats {
        &self.stats
    }

    #[must_use]
    pub fn bank(&self) -> &DensityModelBank {
        &self.bank
    }
}

/// Total log-likelihood of one file under one label's model.
#[derive(Clone, Debug, PartialEq)]
pub struct LabelScore {
    /// Label of the model.
    pub label: String,
    /// Sum of per-frame log-likelihoods.
    pub score: f64,
}

/// Bag-of-frames classifier: trains on labelled files, then names the label
/// whose mixture explains a file's frames best.
///
/// # Example
/// ```no_run
/// use sm_core::{ClassifierConfig, TrainingExample};
/// use sm_model::Classifier;
/// use std::path::Path;
///
/// let mut classifier = Classifier::new(ClassifierConfig::default())?;
/// let examples = vec![
///     TrainingExample::new("a1.wav", "A"),
///     TrainingExample::new("b1.wav", "B"),
/// ];
/// classifier.train(Path::new("wavs"), &examples)?;
/// println!("{}", classifier.classify("wavs/unknown.wav")?);
/// # Ok::<(), sm_core::ClassifyError>(())
/// ```
pub struct Classifier {
    config: ClassifierConfig,
    extractor: FeatureExtractor,
    state: Option<ClassifierState>,
}

impl Classifier {
    /// Untrained classifier for `config`.
    ///
    /// # Errors
    /// `InvalidConfig` if the feature settings are unusable.
    pub fn new(config: ClassifierConfig) -> Result<Self> {
        let extractor = FeatureExtractor::new(&config.features, config.verbose)?;
        Ok(Self {
            config,
            extractor,
            state: None,
        })
    }

    /// Classifier restored from a previously trained state.
    ///
    /// # Errors
    /// `InvalidConfig` on unusable feature settings, `DimensionMismatch` if
    /// the state was trained with another coefficient count.
    pub fn with_state(config: ClassifierConfig, state: ClassifierState) -> Result<Self> {
        let mut classifier = Self::new(config)?;
        let dim = classifier.extractor.dim();
        if state.stats.dim() != dim {
            return Err(ClassifyError::DimensionMismatch {
                expected: dim,
                actual: state.stats.dim(),
            });
        }
        classifier.state = Some(state);
        Ok(classifier)
    }

    /// Train from `examples`, each path resolved against `base`.
    ///
    /// Any failing file aborts training; the previous state, if any, is kept.
    ///
    /// # Errors
    /// `EmptyTrainingSet`, any extraction error (including
    /// `NoCompleteFrames`), `InsufficientTrainingData`, `Numerical`.
    pub fn train(&mut self, base: &Path, examples: &[TrainingExample]) -> Result<&ClassifierState> {
        if examples.is_empty() {
            return Err(ClassifyError::EmptyTrainingSet);
        }

        let matrices: Vec<FeatureMatrix> = examples
            .par_iter()
            .map(|ex| self.extractor.extract_nonempty(base.join(&ex.path)))
            .collect::<Result<_>>()?;

        let stats = NormalizationStats::fit(&matrices)?;

        let mut normalized = matrices;
        for m in &mut normalized {
            stats.apply_in_place(m)?;
        }

        let mut grouped: BTreeMap<&str, Vec<ArrayView2<'_, f64>>> = BTreeMap::new();
        for (ex, m) in examples.iter().zip(&normalized) {
            grouped.entry(ex.label.as_str()).or_default().push(m.view());
        }
        let per_label = grouped
            .into_iter()
            .map(|(label, views)| {
                concatenate(Axis(0), &views)
                    .map(|pooled| (label.to_string(), pooled))
                    .map_err(|e| ClassifyError::Numerical(e.to_string()))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        let mut bank = DensityModelBank::new();
        bank.train_all(&per_label, &self.config.mixture, self.config.verbose)?;

        let level = if self.config.verbose { Level::Info } else { Level::Debug };
        log::log!(
            level,
            "Trained {} classes from {} input files",
            bank.len(),
            examples.len()
        );

        Ok(self.state.insert(ClassifierState::new(stats, bank)))
    }

    /// Label with the greatest total log-likelihood for the file at `path`.
    ///
    /// # Errors
    /// `NotTrained`, any extraction error (including `NoCompleteFrames`).
    pub fn classify(&self, path: impl AsRef<Path>) -> Result<String> {
        let scores = self.scores(path)?;
        best_label(&scores)
            .map(str::to_string)
            .ok_or(ClassifyError::NotTrained)
    }

    /// Score of the file at `path` under every label, in label order.
    ///
    /// # Errors
    /// Same as [`Classifier::classify`].
    pub fn scores(&self, path: impl AsRef<Path>) -> Result<Vec<LabelScore>> {
        let state = self.trained_state()?;
        let features = self.extractor.extract_nonempty(path)?;
        Self::score_with(state, features)
    }

    /// Classify frames that were already extracted (not yet normalized).
    ///
    /// # Errors
    /// `NotTrained`, `NoCompleteFrames` for a matrix without rows,
    /// `DimensionMismatch`.
    pub fn classify_features(&self, features: &FeatureMatrix) -> Result<String> {
        let state = self.trained_state()?;
        if features.nrows() == 0 {
            return Err(ClassifyError::NoCompleteFrames {
                path: PathBuf::new(),
                samples: 0,
                frame_len: self.config.features.frame_len,
            });
        }
        let scores = Self::score_with(state, features.clone())?;
        best_label(&scores)
            .map(str::to_string)
            .ok_or(ClassifyError::NotTrained)
    }

    fn score_with(state: &ClassifierState, mut features: FeatureMatrix) -> Result<Vec<LabelScore>> {
        state.stats.apply_in_place(&mut features)?;
        let scores = state.bank.scores(&features)?;
        for (label, score) in &scores {
            log::debug!("{label}: {score:.3}");
        }
        Ok(scores
            .into_iter()
            .map(|(label, score)| LabelScore { label, score })
            .collect())
    }

    fn trained_state(&self) -> Result<&ClassifierState> {
        match &self.state {
            Some(state) if !state.bank.is_empty() => Ok(state),
            _ => Err(ClassifyError::NotTrained),
        }
    }

    #[must_use]
    pub fn state(&self) -> Option<&ClassifierState> {
        self.state.as_ref()
    }

    #[must_use]
    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Labels known to the trained bank, sorted.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.state.iter().flat_map(|s| s.bank.labels())
    }
}

/// Label with the strictly greatest score.
///
/// Ties go to the lexicographically smallest label; NaN ranks below every
/// real score. `None` for an empty slice.
#[must_use]
pub fn best_label(scores: &[LabelScore]) -> Option<&str> {
    let rank = |v: f64| if v.is_nan() { f64::NEG_INFINITY } else { v };
    scores
        .iter()
        .min_by(|a, b| {
            rank(b.score)
                .partial_cmp(&rank(a.score))
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.label.cmp(&b.label))
        })
        .map(|s| s.label.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(label: &str, score: f64) -> LabelScore {
        LabelScore {
            label: label.to_string(),
            score,
        }
    }

    #[test]
    fn greatest_score_wins() {
        let scores = [s("a", -10.0), s("b", -3.0), s("c", -7.5)];
        assert_eq!(best_label(&scores), Some("b"));
    }

    #[test]
    fn ties_go_to_smallest_label() {
        let scores = [s("zeta", 1.0), s("alpha", 1.0), s("mid", 0.0)];
        assert_eq!(best_label(&scores), Some("alpha"));
    }

    #[test]
    fn nan_never_wins() {
        let scores = [s("a", f64::NAN), s("b", -1e300)];
        assert_eq!(best_label(&scores), Some("b"));
        assert_eq!(best_label(&[s("only", f64::NAN)]), Some("only"));
        assert_eq!(best_label(&[]), None);
    }

    #[test]
    fn untrained_classifier_refuses() {
        let classifier = Classifier::new(ClassifierConfig::default()).expect("new");
        assert!(matches!(
            classifier.classify("whatever.wav"),
            Err(ClassifyError::NotTrained)
        ));
        assert!(matches!(
            classifier.classify_features(&FeatureMatrix::zeros((3, 13))),
            Err(ClassifyError::NotTrained)
        ));
        assert_eq!(classifier.labels().count(), 0);
    }

    fn trained_on_blobs() -> Classifier {
        let mut rng = fastrand::Rng::with_seed(21);
        let low = FeatureMatrix::from_shape_fn((40, 13), |_| rng.f64() - 2.0);
        let high = FeatureMatrix::from_shape_fn((40, 13), |_| rng.f64() + 2.0);
        let stats = NormalizationStats::fit(&[low.clone(), high.clone()]).expect("stats");
        let mixture = sm_core::MixtureConfig {
            components: 2,
            ..sm_core::MixtureConfig::default()
        };
        let mut bank = DensityModelBank::new();
        bank.train("high", &stats.apply(&high).expect("apply"), &mixture)
            .expect("train");
        bank.train("low", &stats.apply(&low).expect("apply"), &mixture)
            .expect("train");
        let config = ClassifierConfig {
            verbose: false,
            ..ClassifierConfig::default()
        };
        Classifier::with_state(config, ClassifierState::new(stats, bank)).expect("state")
    }

    #[test]
    fn trained_classifier_refuses_zero_frames() {
        let classifier = trained_on_blobs();
        assert_eq!(
            classifier
                .classify_features(&FeatureMatrix::from_elem((3, 13), 2.0))
                .expect("classify"),
            "high"
        );
        assert!(matches!(
            classifier.classify_features(&FeatureMatrix::zeros((0, 13))),
            Err(ClassifyError::NoCompleteFrames {
                samples: 0,
                frame_len: 1024,
                ..
            })
        ));
    }

    #[test]
    fn empty_training_set_is_rejected() {
        let mut classifier = Classifier::new(ClassifierConfig::default()).expect("new");
        assert!(matches!(
            classifier.train(Path::new("."), &[]),
            Err(ClassifyError::EmptyTrainingSet)
        ));
        assert!(classifier.state().is_none());
    }

    #[test]
    fn state_of_other_width_is_rejected() {
        let stats = NormalizationStats::fit(&[ndarray::array![[1.0, 2.0], [2.0, 1.0]]])
            .expect("stats");
        let state = ClassifierState::new(stats, DensityModelBank::new());
        assert!(matches!(
            Classifier::with_state(ClassifierConfig::default(), state),
            Err(ClassifyError::DimensionMismatch {
                expected: 13,
                actual: 2
            })
        ));
    }
}
