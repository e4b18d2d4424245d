//! Mel-frequency warping and cepstral transform.
//!
//! Two phases: [`MelScaling`] carries the configuration, [`MelScaling::build`]
//! computes the triangular filterbank and the orthonormal DCT-II matrix and
//! returns a [`MelFilterbank`]. Only the built filterbank can warp spectra.

use std::f64::consts::PI;

use sm_core::{ClassifyError, Result};

/// Floor applied to mel energies before the logarithm.
const ENERGY_FLOOR: f64 = 1e-10;

/// Hz to Mel (natural-log form).
#[inline]
fn hz_to_mel(hz: f64) -> f64 {
    1127.010_48 * (1.0 + hz / 700.0).ln()
}

/// Mel to Hz.
#[inline]
fn mel_to_hz(mel: f64) -> f64 {
    700.0 * ((mel / 1127.010_48).exp() - 1.0)
}

/// Filterbank configuration, not yet usable.
///
/// # Example
/// ```
/// use sm_audio::mel::MelScaling;
/// let bank = MelScaling::new(44100, 512, 40).build().unwrap();
/// assert_eq!(bank.num_bands(), 40);
/// ```
#[derive(Clone, Debug)]
pub struct MelScaling {
    sample_rate: u32,
    num_bins: usize,
    num_bands: usize,
    min_hz: f64,
    max_hz: Option<f64>,
}

impl MelScaling {
    /// `num_bins` magnitude bins spanning 0 Hz up to (excluding) Nyquist.
    #[must_use]
    pub fn new(sample_rate: u32, num_bins: usize, num_bands: usize) -> Self {
        Self {
            sample_rate,
            num_bins,
            num_bands,
            min_hz: 0.0,
            max_hz: None,
        }
    }

    /// Restrict the filterbank to `[min_hz, max_hz]`. `None` = Nyquist.
    #[must_use]
    pub fn with_range(mut self, min_hz: f64, max_hz: Option<f64>) -> Self {
        self.min_hz = min_hz;
        self.max_hz = max_hz;
        self
    }

    /// Compute the filter and DCT matrices.
    ///
    /// # Errors
    /// `InvalidConfig` if a size is zero or the frequency range is empty or
    /// above Nyquist.
    pub fn build(self) -> Result<MelFilterbank> {
        if self.num_bins == 0 || self.num_bands == 0 || self.sample_rate == 0 {
            return Err(ClassifyError::InvalidConfig(format!(
                "filterbank mel vide : {} bins, {} bandes, {} Hz",
                self.num_bins, self.num_bands, self.sample_rate
            )));
        }
        let nyquist = f64::from(self.sample_rate) / 2.0;
        let max_hz = self.max_hz.unwrap_or(nyquist);
        if !(0.0..max_hz).contains(&self.min_hz) || max_hz > nyquist {
            return Err(ClassifyError::InvalidConfig(format!(
                "plage mel invalide : {}..{} Hz (Nyquist {} Hz)",
                self.min_hz, max_hz, nyquist
            )));
        }

        let filters = self.filter_matrix(max_hz);
        let dct = dct_matrix(self.num_bands);

        log::debug!(
            "Filterbank mel : {} bandes sur {} bins, {:.0}..{:.0} Hz",
            self.num_bands,
            self.num_bins,
            self.min_hz,
            max_hz
        );

        Ok(MelFilterbank {
            num_bands: self.num_bands,
            filters,
            dct,
        })
    }

    /// Triangular filters, equally spaced on the mel scale, one row per band.
    fn filter_matrix(&self, max_hz: f64) -> Vec<Vec<f64>> {
        let min_mel = hz_to_mel(self.min_hz);
        let max_mel = hz_to_mel(max_hz);
        let step = (max_mel - min_mel) / (self.num_bands + 1) as f64;
        let edges: Vec<f64> = (0..self.num_bands + 2)
            .map(|i| mel_to_hz(min_mel + step * i as f64))
            .collect();

        // bin k sits at k * fs / (2 * num_bins)
        let bin_hz = f64::from(self.sample_rate) / (2 * self.num_bins) as f64;

        edges
            .windows(3)
            .map(|e| {
                let (left, mid, right) = (e[0], e[1], e[2]);
                (0..self.num_bins)
                    .map(|k| {
                        let freq = k as f64 * bin_hz;
                        if freq <= left || freq >= right {
                            0.0
                        } else if freq <= mid {
                            (freq - left) / (mid - left)
                        } else {
                            (right - freq) / (right - mid)
                        }
                    })
                    .collect()
            })
            .collect()
    }
}

/// Orthonormal DCT-II, row `k` = coefficient `k`.
fn dct_matrix(n: usize) -> Vec<Vec<f64>> {
    let scale0 = (1.0 / n as f64).sqrt();
    let scale = (2.0 / n as f64).sqrt();
    (0..n)
        .map(|k| {
            let s = if k == 0 { scale0 } else { scale };
            (0..n)
                .map(|i| s * (PI * k as f64 * (i as f64 + 0.5) / n as f64).cos())
                .collect()
        })
        .collect()
}

/// Built mel filterbank and cepstral transform.
///
/// Immutable after construction; share it freely between threads.
#[derive(Clone, Debug)]
pub struct MelFilterbank {
    num_bands: usize,
    filters: Vec<Vec<f64>>,
    dct: Vec<Vec<f64>>,
}

impl MelFilterbank {
    /// Mel-warped energies of a magnitude spectrum.
    ///
    /// Bins beyond the configured count are ignored; missing bins count as zero.
    #[must_use]
    pub fn warp_spectrum(&self, magnitudes: &[f64]) -> Vec<f64> {
        self.filters
            .iter()
            .map(|row| row.iter().zip(magnitudes).map(|(w, m)| w * m).sum())
            .collect()
    }

    /// Cepstral coefficients of mel energies (log then DCT-II).
    ///
    /// With `include_c0 = false` the log-energy term is left out and the
    /// result has `num_bands - 1` entries.
    ///
    /// # Example
    /// ```
    /// use sm_audio::mel::MelScaling;
    /// let bank = MelScaling::new(16000, 256, 20).build().unwrap();
    /// let mel = bank.warp_spectrum(&vec![1.0; 256]);
    /// assert_eq!(bank.mfccs(&mel, true).len(), 20);
    /// assert_eq!(bank.mfccs(&mel, false).len(), 19);
    /// ```
    #[must_use]
    pub fn mfccs(&self, mel_energies: &[f64], include_c0: bool) -> Vec<f64> {
        let logs: Vec<f64> = mel_energies
            .iter()
            .map(|&e| e.max(ENERGY_FLOOR).ln())
            .collect();
        let skip = usize::from(!include_c0);
        self.dct
            .iter()
            .skip(skip)
            .map(|row| row.iter().zip(&logs).map(|(c, l)| c * l).sum())
            .collect()
    }

    /// Number of mel bands (and cepstral coefficients including c0).
    #[must_use]
    pub fn num_bands(&self) -> usize {
        self.num_bands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mel_round_trip() {
        for hz in [0.0, 440.0, 1000.0, 8000.0, 22050.0] {
            assert!((mel_to_hz(hz_to_mel(hz)) - hz).abs() < 1e-6);
        }
        // 1000 Hz ≈ 1000 mel
        assert!((hz_to_mel(1000.0) - 1000.0).abs() < 0.1);
    }

    #[test]
    fn filters_are_triangular_and_bounded() {
        let bank = MelScaling::new(44100, 512, 40).build().expect("build");
        assert_eq!(bank.filters.len(), 40);
        for row in &bank.filters {
            assert_eq!(row.len(), 512);
            assert!(row.iter().all(|&w| (0.0..=1.0).contains(&w)));
        }
        // upper filters are wide enough to always catch bins
        assert!(bank.filters[39].iter().any(|&w| w > 0.0));
    }

    #[test]
    fn dct_is_orthonormal() {
        let d = dct_matrix(8);
        for a in 0..8 {
            for b in 0..8 {
                let dot: f64 = d[a].iter().zip(&d[b]).map(|(x, y)| x * y).sum();
                let expected = if a == b { 1.0 } else { 0.0 };
                assert!((dot - expected).abs() < 1e-10, "rows {a},{b}: {dot}");
            }
        }
    }

    #[test]
    fn flat_log_spectrum_only_has_c0() {
        let bank = MelScaling::new(44100, 512, 40).build().expect("build");
        let c = bank.mfccs(&[1.0; 40], true);
        // ln(1) = 0 everywhere
        assert!(c.iter().all(|v| v.abs() < 1e-12));
        let c = bank.mfccs(&[2.0; 40], true);
        assert!(c[0] > 0.0);
        assert!(c[1..].iter().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn dropping_c0_keeps_remaining_order() {
        let bank = MelScaling::new(44100, 512, 40).build().expect("build");
        let mags: Vec<f64> = (0..512).map(|k| 1.0 + (k % 7) as f64).collect();
        let mel = bank.warp_spectrum(&mags);
        let with = bank.mfccs(&mel, true);
        let without = bank.mfccs(&mel, false);
        assert_eq!(&with[1..], without.as_slice());
    }

    #[test]
    fn build_rejects_bad_ranges() {
        assert!(MelScaling::new(44100, 0, 40).build().is_err());
        assert!(MelScaling::new(44100, 512, 0).build().is_err());
        assert!(
            MelScaling::new(8000, 128, 10)
                .with_range(100.0, Some(6000.0))
                .build()
                .is_err()
        );
        assert!(
            MelScaling::new(8000, 128, 10)
                .with_range(3000.0, Some(2000.0))
                .build()
                .is_err()
        );
    }
}
