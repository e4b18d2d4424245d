//! Trained model files.
//!
//! Layout: a small bincode header (`magic`, `version`) followed by the body
//! (`FeatureConfig` used for training + `ClassifierState`). The header is read
//! on its own first, so a foreign or newer file is rejected before the body is
//! decoded.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sm_core::{ClassifierConfig, ClassifyError, FeatureConfig, Result};

use crate::classifier::{Classifier, ClassifierState};

const MAGIC: [u8; 4] = *b"SMAC";
const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Header {
    magic: [u8; 4],
    version: u32,
}

#[derive(Serialize, Deserialize)]
struct Body {
    features: FeatureConfig,
    state: ClassifierState,
}

fn persist_err(path: &Path, reason: impl std::fmt::Display) -> ClassifyError {
    ClassifyError::Persist(format!("{} : {reason}", path.display()))
}

/// Write `state` and the feature settings it was trained with to `path`.
///
/// # Errors
/// `Io` if the file cannot be created, `Persist` on encoding failure.
pub fn save_state(path: &Path, features: &FeatureConfig, state: &ClassifierState) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    let header = Header {
        magic: MAGIC,
        version: FORMAT_VERSION,
    };
    bincode::serialize_into(&mut writer, &header).map_err(|e| persist_err(path, e))?;
    let body = BodyRef { features, state };
    bincode::serialize_into(&mut writer, &body).map_err(|e| persist_err(path, e))?;
    writer.flush()?;
    log::info!("Modèle sauvegardé : {}", path.display());
    Ok(())
}

#[derive(Serialize)]
struct BodyRef<'a> {
    features: &'a FeatureConfig,
    state: &'a ClassifierState,
}

/// Read a model file written by [`save_state`].
///
/// # Errors
/// `FileNotFound`, `Persist` on a bad magic, an unknown version, a corrupt
/// body or models whose dimension disagrees with the stored feature settings.
pub fn load_state(path: &Path) -> Result<(FeatureConfig, ClassifierState)> {
    let file = File::open(path).map_err(|_| ClassifyError::FileNotFound {
        path: path.to_path_buf(),
    })?;
    let mut reader = BufReader::new(file);

    let header: Header =
        bincode::deserialize_from(&mut reader).map_err(|e| persist_err(path, e))?;
    if header.magic != MAGIC {
        return Err(persist_err(path, "pas un fichier de modèle"));
    }
    if header.version != FORMAT_VERSION {
        return Err(persist_err(
            path,
            format!(
                "version {} non supportée (attendue {FORMAT_VERSION})",
                header.version
            ),
        ));
    }

    let body: Body = bincode::deserialize_from(&mut reader).map_err(|e| persist_err(path, e))?;
    let dim = body.features.num_coefficients;
    if body.state.stats().dim() != dim {
        return Err(persist_err(
            path,
            format!(
                "statistiques de dimension {} pour {dim} coefficients",
                body.state.stats().dim()
            ),
        ));
    }
    for label in body.state.bank().labels() {
        let model_dim = body.state.bank().get(label).map_or(dim, |m| m.dim());
        if model_dim != dim {
            return Err(persist_err(
                path,
                format!("modèle '{label}' de dimension {model_dim} pour {dim} coefficients"),
            ));
        }
    }
    log::debug!(
        "Modèle chargé : {} ({} labels)",
        path.display(),
        body.state.bank().len()
    );
    Ok((body.features, body.state))
}

impl Classifier {
    /// Save the trained state to `path`.
    ///
    /// # Errors
    /// `NotTrained` before training, otherwise see [`save_state`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let state = self.state().ok_or(ClassifyError::NotTrained)?;
        save_state(path.as_ref(), &self.config().features, state)
    }

    /// Restore a classifier from `path`. The stored feature settings replace
    /// `config.features` so that extraction matches what the models saw.
    ///
    /// # Errors
    /// See [`load_state`] and [`Classifier::with_state`].
    pub fn load(path: impl AsRef<Path>, mut config: ClassifierConfig) -> Result<Self> {
        let (features, state) = load_state(path.as_ref())?;
        if features != config.features {
            log::warn!("Paramètres d'extraction du modèle utilisés à la place de la configuration");
        }
        config.features = features;
        Self::with_state(config, state)
    }
}
