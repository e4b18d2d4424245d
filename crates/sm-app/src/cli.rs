use std::path::PathBuf;

use clap::Parser;

/// smacrs : classifieur audio par sacs de frames (MFCC + GMM).
///
/// Les fichiers sont étiquetés par leur nom : tout ce qui précède le
/// séparateur est le label (`dog_01.wav` → `dog`).
#[derive(Parser, Debug)]
#[command(about, long_about = None, disable_version_flag = true)]
pub struct Cli {
    /// Dossier des fichiers d'entraînement.
    #[arg(short = 't', long, default_value = "wavs")]
    pub trainpath: PathBuf,

    /// Dossier des fichiers de test.
    #[arg(short = 'T', long, default_value = "wavs")]
    pub testpath: PathBuf,

    /// Séparateur dans les noms de fichiers : ce qui le précède est le label.
    #[arg(short = 'c', long)]
    pub charsplit: Option<String>,

    /// Moins verbeux.
    #[arg(short = 'V', default_value_t = false)]
    pub less_verbose: bool,

    /// Fichier de configuration TOML. Défaut : config/default.toml.
    #[arg(long, default_value = "config/default.toml")]
    pub config: PathBuf,

    /// Sauvegarder le modèle entraîné dans ce fichier.
    #[arg(long)]
    pub save_model: Option<PathBuf>,

    /// Charger un modèle au lieu d'entraîner (ignore --trainpath).
    #[arg(long, conflicts_with = "save_model")]
    pub load_model: Option<PathBuf>,

    /// Niveau de log : error, warn, info, debug, trace.
    #[arg(long)]
    pub log_level: Option<String>,
}

impl Cli {
    /// Log filter: `--log-level` wins, otherwise info, or warn with `-V`.
    #[must_use]
    pub fn level_filter(&self) -> log::LevelFilter {
        let fallback = if self.less_verbose {
            log::LevelFilter::Warn
        } else {
            log::LevelFilter::Info
        };
        self.log_level
            .as_deref()
            .and_then(|l| l.parse().ok())
            .unwrap_or(fallback)
    }
}
