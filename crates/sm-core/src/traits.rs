use crate::error::Result;

/// Fournit des échantillons PCM à l'extracteur de features.
///
/// Implémenté par : `DecodedSource` (fichier via symphonia), `MemorySource`.
/// Closing the source is `Drop`.
///
/// # Example
/// ```
/// use sm_core::traits::AudioSource;
///
/// struct Silence { left: usize }
/// impl AudioSource for Silence {
///     fn channels(&self) -> usize { 1 }
///     fn sample_rate(&self) -> u32 { 44100 }
///     fn read_frames(&mut self, out: &mut Vec<f32>, n: usize) -> sm_core::Result<usize> {
///         let take = n.min(self.left);
///         self.left -= take;
///         out.clear();
///         out.resize(take, 0.0);
///         Ok(take)
///     }
/// }
/// ```
pub trait AudioSource {
    /// Nombre de canaux du flux.
    fn channels(&self) -> usize;

    /// Fréquence d'échantillonnage en Hz.
    fn sample_rate(&self) -> u32;

    /// Remplace le contenu de `out` par au plus `n` échantillons.
    ///
    /// CONTRAT : retourner moins de `n` échantillons signale la fin du flux.
    /// La fin du flux n'est jamais une erreur.
    ///
    /// # Errors
    /// Returns an error only for genuine read failures.
    fn read_frames(&mut self, out: &mut Vec<f32>, n: usize) -> Result<usize>;
}
