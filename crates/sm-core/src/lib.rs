//! Configuration, types, and shared structures for smacrs.
//!
//! This crate contains the shared types, traits, configuration logic and the
//! error taxonomy used across the smacrs workspace.

pub mod config;
pub mod error;
pub mod features;
pub mod traits;

pub use config::{ClassifierConfig, DiscoveryConfig, FeatureConfig, MixtureConfig};
pub use error::{ClassifyError, FormatMismatch, Result};
pub use features::{FEATURE_DIM, FeatureMatrix, TrainingExample};
pub use traits::AudioSource;
