use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::features::FEATURE_DIM;

/// Configuration complète du classifieur.
///
/// Sérialisable en TOML. Chaque champ a une valeur par défaut qui reproduit
/// le réglage de référence (44100 Hz, frames de 1024, 40 bandes mel,
/// 13 coefficients, 10 composantes).
///
/// # Example
/// ```
/// use sm_core::config::ClassifierConfig;
/// let config = ClassifierConfig::default();
/// assert_eq!(config.features.frame_len, 1024);
/// assert_eq!(config.mixture.components, 10);
/// ```
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ClassifierConfig {
    /// Feature extraction settings.
    pub features: FeatureConfig,
    /// Mixture fitting settings.
    pub mixture: MixtureConfig,
    /// Training/test file discovery settings.
    pub discovery: DiscoveryConfig,
    /// Log progress at info level instead of debug.
    pub verbose: bool,
}

/// Paramètres d'extraction des MFCC.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct FeatureConfig {
    /// Required input sample rate in Hz.
    pub sample_rate: u32,
    /// Samples per non-overlapping analysis frame.
    pub frame_len: usize,
    /// Mel bands in the warping filterbank.
    pub num_mel_bands: usize,
    /// Cepstral coefficients kept after dropping coefficient 0.
    pub num_coefficients: usize,
    /// Lowest filterbank edge in Hz.
    pub min_hz: f64,
    /// Highest filterbank edge in Hz. `None` = Nyquist.
    pub max_hz: Option<f64>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            frame_len: 1024,
            num_mel_bands: 40,
            num_coefficients: FEATURE_DIM,
            min_hz: 0.0,
            max_hz: None,
        }
    }
}

impl FeatureConfig {
    /// Number of magnitude bins handed to the mel engine (first half of the FFT).
    #[must_use]
    pub fn spectrum_bins(&self) -> usize {
        self.frame_len / 2
    }
}

/// Paramètres de l'algorithme EM.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct MixtureConfig {
    /// Gaussian components per label.
    pub components: usize,
    /// EM iteration cap.
    pub max_iterations: usize,
    /// Stop when the mean per-frame log-likelihood improves by less than this.
    pub tolerance: f64,
    /// Added to every covariance diagonal.
    pub reg_covar: f64,
    /// Lloyd refinement passes after k-means++ seeding.
    pub kmeans_iterations: usize,
    /// Base seed for component initialization.
    pub seed: u64,
}

impl Default for MixtureConfig {
    fn default() -> Self {
        Self {
            components: 10,
            max_iterations: 100,
            tolerance: 1e-3,
            reg_covar: 1e-3,
            kmeans_iterations: 10,
            seed: 0x5eed,
        }
    }
}

/// Découverte des fichiers d'entraînement/test dans un dossier.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    /// Extensions accepted (lowercase, without the dot).
    pub extensions: Vec<String>,
    /// Anything before the first occurrence of this string is the label.
    pub label_separator: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["wav".to_string()],
            label_separator: "_".to_string(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            features: FeatureConfig::default(),
            mixture: MixtureConfig::default(),
            discovery: DiscoveryConfig::default(),
            verbose: true,
        }
    }
}

impl ClassifierConfig {
    /// Ramène chaque valeur dans une plage exploitable.
    pub fn clamp_all(&mut self) {
        let f = &mut self.features;
        f.frame_len = f.frame_len.clamp(16, 1 << 16);
        if f.frame_len % 2 == 1 {
            log::warn!("frame_len impair ({}), arrondi au pair supérieur", f.frame_len);
            f.frame_len += 1;
        }
        f.sample_rate = f.sample_rate.clamp(1000, 384_000);
        f.num_mel_bands = f.num_mel_bands.clamp(2, f.spectrum_bins());
        if f.num_coefficients >= f.num_mel_bands {
            log::warn!(
                "num_coefficients ({}) ramené à {} (bandes mel - 1)",
                f.num_coefficients,
                f.num_mel_bands - 1
            );
        }
        f.num_coefficients = f.num_coefficients.clamp(1, f.num_mel_bands - 1);
        let nyquist = f64::from(f.sample_rate) / 2.0;
        f.min_hz = f.min_hz.clamp(0.0, nyquist);
        f.max_hz = f.max_hz.map(|hz| hz.clamp(f.min_hz, nyquist));

        let m = &mut self.mixture;
        m.components = m.components.max(1);
        m.max_iterations = m.max_iterations.max(1);
        m.tolerance = m.tolerance.max(0.0);
        m.reg_covar = m.reg_covar.max(1e-12);

        let d = &mut self.discovery;
        for ext in &mut d.extensions {
            *ext = ext.trim_start_matches('.').to_lowercase();
        }
        if d.label_separator.is_empty() {
            log::warn!("label_separator vide, utilisation de '_'");
            d.label_separator = "_".to_string();
        }
    }
}

/// Structure TOML intermédiaire pour désérialisation avec valeurs optionnelles.
#[derive(Deserialize)]
struct ConfigFile {
    verbose: Option<bool>,
    features: Option<FeatureSection>,
    mixture: Option<MixtureSection>,
    discovery: Option<DiscoverySection>,
}

/// Features section of the TOML config, all fields optional for partial override.
#[derive(Deserialize)]
struct FeatureSection {
    sample_rate: Option<u32>,
    frame_len: Option<usize>,
    num_mel_bands: Option<usize>,
    num_coefficients: Option<usize>,
    min_hz: Option<f64>,
    max_hz: Option<f64>,
}

#[derive(Deserialize)]
struct MixtureSection {
    components: Option<usize>,
    max_iterations: Option<usize>,
    tolerance: Option<f64>,
    reg_covar: Option<f64>,
    kmeans_iterations: Option<usize>,
    seed: Option<u64>,
}

#[derive(Deserialize)]
struct DiscoverySection {
    extensions: Option<Vec<String>>,
    label_separator: Option<String>,
}

/// Parse une config TOML et fusionne avec les valeurs par défaut.
///
/// # Errors
/// Returns an error if the text is not valid TOML for this schema.
///
/// # Example
/// ```
/// use sm_core::config::parse_config;
/// let config = parse_config("[mixture]\ncomponents = 4\n").unwrap();
/// assert_eq!(config.mixture.components, 4);
/// assert_eq!(config.features.sample_rate, 44100);
/// ```
pub fn parse_config(content: &str) -> Result<ClassifierConfig> {
    let file: ConfigFile = toml::from_str(content).context("Erreur de parsing TOML")?;

    let mut config = ClassifierConfig::default();

    if let Some(v) = file.verbose {
        config.verbose = v;
    }

    if let Some(s) = file.features {
        let f = &mut config.features;
        if let Some(v) = s.sample_rate {
            f.sample_rate = v;
        }
        if let Some(v) = s.frame_len {
            f.frame_len = v;
        }
        if let Some(v) = s.num_mel_bands {
            f.num_mel_bands = v;
        }
        if let Some(v) = s.num_coefficients {
            f.num_coefficients = v;
        }
        if let Some(v) = s.min_hz {
            f.min_hz = v;
        }
        if s.max_hz.is_some() {
            f.max_hz = s.max_hz;
        }
    }

    if let Some(s) = file.mixture {
        let m = &mut config.mixture;
        if let Some(v) = s.components {
            m.components = v;
        }
        if let Some(v) = s.max_iterations {
            m.max_iterations = v;
        }
        if let Some(v) = s.tolerance {
            m.tolerance = v;
        }
        if let Some(v) = s.reg_covar {
            m.reg_covar = v;
        }
        if let Some(v) = s.kmeans_iterations {
            m.kmeans_iterations = v;
        }
        if let Some(v) = s.seed {
            m.seed = v;
        }
    }

    if let Some(s) = file.discovery {
        if let Some(v) = s.extensions {
            config.discovery.extensions = v;
        }
        if let Some(v) = s.label_separator {
            config.discovery.label_separator = v;
        }
    }

    config.clamp_all();
    Ok(config)
}

/// Charge un fichier TOML et fusionne avec les valeurs par défaut.
///
/// # Errors
/// Returns an error if the file cannot be read or parsed.
///
/// # Example
/// ```no_run
/// use sm_core::config::load_config;
/// use std::path::Path;
/// let config = load_config(Path::new("config/default.toml")).unwrap();
/// ```
pub fn load_config(path: &Path) -> Result<ClassifierConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Impossible de lire {}", path.display()))?;
    parse_config(&content).with_context(|| format!("Config invalide : {}", path.display()))
}
