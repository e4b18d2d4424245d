use std::path::PathBuf;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Number of cepstral coefficients kept per frame (coefficient 0 excluded).
pub const FEATURE_DIM: usize = 13;

/// Feature vectors of one file, shape `(frames, dim)`, rows in temporal order.
pub type FeatureMatrix = Array2<f64>;

/// One labelled training file.
///
/// `path` is relative to the base folder handed to training.
///
/// # Example
/// ```
/// use sm_core::TrainingExample;
/// let ex = TrainingExample::new("karen01.wav", "usa");
/// assert_eq!(ex.label, "usa");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrainingExample {
    /// Audio file path, relative to the training folder.
    pub path: PathBuf,
    /// Opaque class label.
    pub label: String,
}

impl TrainingExample {
    /// Pair a file with its label.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, label: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            label: label.into(),
        }
    }
}
