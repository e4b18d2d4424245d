use std::path::Path;

use anyhow::{Context, Result};
use sm_core::{DiscoveryConfig, TrainingExample};

/// List the audio files directly inside `folder` and label them by name.
///
/// Only files whose lowercase extension is in `config.extensions` are kept.
/// The label is the file name up to the first `label_separator`; a name
/// without the separator is its own label. Results are sorted by path.
///
/// # Errors
/// Unreadable folder, or no matching file at all.
pub fn discover(folder: &Path, config: &DiscoveryConfig) -> Result<Vec<TrainingExample>> {
    let mut found: Vec<TrainingExample> = std::fs::read_dir(folder)
        .with_context(|| format!("Lecture du dossier {}", folder.display()))?
        .filter_map(std::result::Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|s| s.to_str())
                .is_some_and(|ext| config.extensions.contains(&ext.to_lowercase()))
        })
        .filter_map(|p| {
            let name = p.file_name()?.to_str()?.to_string();
            let label = label_of(&name, &config.label_separator).to_string();
            Some(TrainingExample::new(name, label))
        })
        .collect();

    if found.is_empty() {
        anyhow::bail!(
            "Aucun fichier trouvé dans {} (extensions : {})",
            folder.display(),
            config.extensions.join(", ")
        );
    }
    found.sort();
    Ok(found)
}

/// Anything before the first `separator` in `name`.
#[must_use]
pub fn label_of<'a>(name: &'a str, separator: &str) -> &'a str {
    name.split(separator).next().unwrap_or(name)
}
