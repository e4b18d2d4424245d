use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Shorthand result type for the classifier crates.
pub type Result<T, E = ClassifyError> = std::result::Result<T, E>;

/// Which property of an audio stream did not match the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatMismatch {
    /// Channel count differs from the required mono layout.
    Channels {
        /// Required channel count.
        expected: usize,
        /// Channel count found in the file.
        actual: usize,
    },
    /// Sample rate differs from the configured rate.
    SampleRate {
        /// Configured sample rate in Hz.
        expected: u32,
        /// Sample rate found in the file.
        actual: u32,
    },
}

impl fmt::Display for FormatMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Channels { expected, actual } => write!(
                f,
                "{actual} canaux, {expected} requis (audio mono uniquement)"
            ),
            Self::SampleRate { expected, actual } => {
                write!(f, "fréquence {actual} Hz, {expected} Hz attendus")
            }
        }
    }
}

/// Errors raised by feature extraction, training and classification.
///
/// Every variant aborts the enclosing operation; there is no skip-and-continue
/// mode. End of stream while reading audio is never reported through this type.
#[derive(Error, Debug)]
pub enum ClassifyError {
    /// Referenced file does not exist or cannot be opened.
    #[error("Fichier introuvable : {}", path.display())]
    FileNotFound {
        /// Path that was not found.
        path: PathBuf,
    },

    /// Audio stream has the wrong channel count or sample rate.
    #[error("Format audio invalide pour {} : {detail}", path.display())]
    InvalidAudioFormat {
        /// Offending file.
        path: PathBuf,
        /// Expected vs. actual property.
        detail: FormatMismatch,
    },

    /// Container or codec not recognised by the decoder.
    #[error("Format non supporté pour {} : {reason}", path.display())]
    UnsupportedFormat {
        /// Offending file.
        path: PathBuf,
        /// Decoder message.
        reason: String,
    },

    /// Fatal error while reading packets from an opened stream.
    #[error("Erreur de décodage dans {} : {reason}", path.display())]
    Decode {
        /// Offending file.
        path: PathBuf,
        /// Decoder message.
        reason: String,
    },

    /// File is shorter than one analysis frame, so it has no features.
    #[error(
        "Aucune frame complète dans {} : {samples} échantillons, {frame_len} requis par frame",
        path.display()
    )]
    NoCompleteFrames {
        /// Offending file.
        path: PathBuf,
        /// Samples actually read.
        samples: usize,
        /// Configured frame length.
        frame_len: usize,
    },

    /// A label has fewer pooled frames than mixture components.
    #[error(
        "Données insuffisantes pour le label '{label}' : {frames} frames pour {components} composantes"
    )]
    InsufficientTrainingData {
        /// Label being trained.
        label: String,
        /// Pooled frame count for the label.
        frames: usize,
        /// Configured component count.
        components: usize,
    },

    /// Classification attempted before any label was trained.
    #[error("Classifieur non entraîné : aucun label disponible")]
    NotTrained,

    /// Training called with zero files (or zero frames overall).
    #[error("Ensemble d'entraînement vide")]
    EmptyTrainingSet,

    /// Score requested for a label the bank does not know.
    #[error("Label inconnu '{label}' (disponibles : {})", available.join(", "))]
    UnknownLabel {
        /// Requested label.
        label: String,
        /// Labels present in the bank.
        available: Vec<String>,
    },

    /// Feature width differs from the width the stats or model were built with.
    #[error("Dimension incompatible : {actual} au lieu de {expected}")]
    DimensionMismatch {
        /// Width the model expects.
        expected: usize,
        /// Width received.
        actual: usize,
    },

    /// Covariance not positive definite even after regularization.
    #[error("Erreur numérique : {0}")]
    Numerical(String),

    /// Invalid configuration value.
    #[error("Configuration invalide : {0}")]
    InvalidConfig(String),

    /// Model file has the wrong magic, version or content.
    #[error("Fichier modèle invalide : {0}")]
    Persist(String),

    /// I/O failure while reading or writing a model file.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
