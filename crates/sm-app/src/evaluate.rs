use std::path::{Path, PathBuf};

use sm_core::{Result, TrainingExample};
use sm_model::Classifier;

/// One test file and what the classifier made of it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Prediction {
    /// Path relative to the test folder.
    pub path: PathBuf,
    /// Label taken from the file name.
    pub expected: String,
    /// Label chosen by the classifier.
    pub inferred: String,
}

impl Prediction {
    #[must_use]
    pub fn is_correct(&self) -> bool {
        self.expected == self.inferred
    }
}

/// Résultat d'une passe de test.
#[derive(Clone, Debug, Default)]
pub struct Evaluation {
    /// One entry per test file, in test order.
    pub predictions: Vec<Prediction>,
    /// Predictions matching their expected label.
    pub correct: usize,
    /// Test files classified.
    pub total: usize,
    /// Labels known to the classifier.
    pub trained_classes: usize,
}

impl Evaluation {
    /// Classify every labelled file under `base`, in order.
    ///
    /// # Errors
    /// The first classification error; the run stops there.
    pub fn run(classifier: &Classifier, base: &Path, tests: &[TrainingExample]) -> Result<Self> {
        let mut predictions = Vec::with_capacity(tests.len());
        for ex in tests {
            let inferred = classifier.classify(base.join(&ex.path))?;
            println!(" inferred: {inferred}");
            predictions.push(Prediction {
                path: ex.path.clone(),
                expected: ex.label.clone(),
                inferred,
            });
        }
        Ok(Self::from_predictions(
            predictions,
            classifier.labels().count(),
        ))
    }

    #[must_use]
    pub fn from_predictions(predictions: Vec<Prediction>, trained_classes: usize) -> Self {
        let correct = predictions.iter().filter(|p| p.is_correct()).count();
        Self {
            total: predictions.len(),
            correct,
            predictions,
            trained_classes,
        }
    }

    /// Fraction of correct predictions, 0.0 for an empty run.
    #[must_use]
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }

    /// The closing line of a run.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "Got {} correct out of {} (trained on {} classes)",
            self.correct, self.total, self.trained_classes
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(expected: &str, inferred: &str) -> Prediction {
        Prediction {
            path: PathBuf::from(format!("{expected}_x.wav")),
            expected: expected.to_string(),
            inferred: inferred.to_string(),
        }
    }

    #[test]
    fn counts_and_accuracy() {
        let eval = Evaluation::from_predictions(vec![p("a", "a"), p("b", "a"), p("b", "b")], 2);
        assert_eq!(eval.correct, 2);
        assert_eq!(eval.total, 3);
        assert!((eval.accuracy() - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(eval.summary(), "Got 2 correct out of 3 (trained on 2 classes)");
    }

    #[test]
    fn empty_run_has_zero_accuracy() {
        let eval = Evaluation::from_predictions(Vec::new(), 0);
        assert_eq!(eval.accuracy(), 0.0);
    }

    #[test]
    fn untrained_classifier_aborts_run() {
        let classifier =
            Classifier::new(sm_core::ClassifierConfig::default()).expect("classifier");
        let tests = [TrainingExample::new("a_1.wav", "a")];
        assert!(Evaluation::run(&classifier, Path::new("."), &tests).is_err());
    }
}
