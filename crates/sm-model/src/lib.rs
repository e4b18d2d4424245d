//! Normalization, Gaussian mixture models and the classifier orchestrator.
//!
//! Training pools MFCC frames per label and fits one full-covariance mixture
//! per label; classification picks the label whose mixture gives the
//! greatest total log-likelihood.

pub mod bank;
pub mod classifier;
pub mod gmm;
mod linalg;
pub mod normalizer;
pub mod persist;

pub use bank::DensityModelBank;
pub use classifier::{Classifier, ClassifierState, LabelScore, best_label};
pub use gmm::GaussianMixture;
pub use normalizer::NormalizationStats;
