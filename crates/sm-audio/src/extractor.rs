use std::path::Path;
use std::sync::Arc;

use log::Level;
use ndarray::Array2;
use sm_core::{AudioSource, ClassifyError, FeatureConfig, FeatureMatrix, FormatMismatch, Result};

use crate::decode::DecodedSource;
use crate::fft::FftPipeline;
use crate::mel::{MelFilterbank, MelScaling};

/// Turns a mono recording into one MFCC vector per non-overlapping frame.
///
/// Per full frame: Hamming window, real FFT magnitude (first half), mel warp,
/// DCT-II of the log energies, coefficient 0 dropped, the next
/// `num_coefficients` kept. A trailing partial frame is discarded.
///
/// `extract` takes `&self` and the extractor is `Sync`, so one instance can
/// serve a whole rayon pool.
///
/// # Example
/// ```
/// use sm_audio::{FeatureExtractor, MemorySource};
/// use sm_core::FeatureConfig;
/// use std::path::Path;
///
/// let extractor = FeatureExtractor::new(&FeatureConfig::default(), false).unwrap();
/// let mut src = MemorySource::new(vec![0.1; 44100], 1, 44100);
/// let features = extractor.extract_from(&mut src, Path::new("mem")).unwrap();
/// assert_eq!(features.dim(), (43, 13)); // floor(44100 / 1024)
/// ```
#[derive(Clone)]
pub struct FeatureExtractor {
    config: FeatureConfig,
    fft: FftPipeline,
    mel: Arc<MelFilterbank>,
    verbose: bool,
}

impl FeatureExtractor {
    /// Build the FFT plan and the mel filterbank for `config`.
    ///
    /// # Errors
    /// `InvalidConfig` if the frame length is too short or more coefficients
    /// are requested than the filterbank produces.
    pub fn new(config: &FeatureConfig, verbose: bool) -> Result<Self> {
        if config.frame_len < 4 {
            return Err(ClassifyError::InvalidConfig(format!(
                "frame_len trop court : {}",
                config.frame_len
            )));
        }
        if config.num_coefficients == 0 || config.num_coefficients >= config.num_mel_bands {
            return Err(ClassifyError::InvalidConfig(format!(
                "{} coefficients demandés pour {} bandes mel (c0 exclu)",
                config.num_coefficients, config.num_mel_bands
            )));
        }

        let mel = MelScaling::new(
            config.sample_rate,
            config.spectrum_bins(),
            config.num_mel_bands,
        )
        .with_range(config.min_hz, config.max_hz)
        .build()?;

        Ok(Self {
            config: config.clone(),
            fft: FftPipeline::new(config.frame_len),
            mel: Arc::new(mel),
            verbose,
        })
    }

    /// Feature dimension of every produced frame.
    #[must_use]
    pub fn dim(&self) -> usize {
        self.config.num_coefficients
    }

    /// Extraction settings.
    #[must_use]
    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Decode `path` and extract its features.
    ///
    /// A file shorter than one frame gives an empty `(0, dim)` matrix.
    ///
    /// # Errors
    /// `FileNotFound`, `UnsupportedFormat`, `InvalidAudioFormat`, `Decode`.
    pub fn extract(&self, path: impl AsRef<Path>) -> Result<FeatureMatrix> {
        self.extract_counted(path.as_ref()).map(|(features, _)| features)
    }

    /// Like [`FeatureExtractor::extract`] but fails on files without a single
    /// complete frame.
    ///
    /// # Errors
    /// Same as `extract`, plus `NoCompleteFrames`.
    pub fn extract_nonempty(&self, path: impl AsRef<Path>) -> Result<FeatureMatrix> {
        let path = path.as_ref();
        let (features, samples) = self.extract_counted(path)?;
        if features.nrows() == 0 {
            return Err(ClassifyError::NoCompleteFrames {
                path: path.to_path_buf(),
                samples,
                frame_len: self.config.frame_len,
            });
        }
        Ok(features)
    }

    fn extract_counted(&self, path: &Path) -> Result<(FeatureMatrix, usize)> {
        let level = if self.verbose { Level::Info } else { Level::Debug };
        log::log!(level, "Reading {}", path.display());
        let mut source = DecodedSource::open(path)?;
        self.extract_counted_from(&mut source, path)
    }

    /// Extract features from any [`AudioSource`]. `origin` is only used in
    /// error messages.
    ///
    /// # Errors
    /// `InvalidAudioFormat` for non-mono sources or a sample rate other than
    /// the configured one; read errors from the source.
    pub fn extract_from<S: AudioSource + ?Sized>(
        &self,
        source: &mut S,
        origin: &Path,
    ) -> Result<FeatureMatrix> {
        self.extract_counted_from(source, origin)
            .map(|(features, _)| features)
    }

    fn extract_counted_from<S: AudioSource + ?Sized>(
        &self,
        source: &mut S,
        origin: &Path,
    ) -> Result<(FeatureMatrix, usize)> {
        if source.channels() != 1 {
            return Err(ClassifyError::InvalidAudioFormat {
                path: origin.to_path_buf(),
                detail: FormatMismatch::Channels {
                    expected: 1,
                    actual: source.channels(),
                },
            });
        }
        if source.sample_rate() != self.config.sample_rate {
            return Err(ClassifyError::InvalidAudioFormat {
                path: origin.to_path_buf(),
                detail: FormatMismatch::SampleRate {
                    expected: self.config.sample_rate,
                    actual: source.sample_rate(),
                },
            });
        }

        let frame_len = self.config.frame_len;
        let dim = self.dim();
        let mut fft = self.fft.clone();
        let mut chunk = Vec::with_capacity(frame_len);
        let mut data = Vec::new();
        let mut samples = 0;

        loop {
            let read = source.read_frames(&mut chunk, frame_len)?;
            samples += read;
            if read != frame_len {
                log::trace!(
                    "{} : fin du flux après {samples} échantillons ({read} ignorés)",
                    origin.display()
                );
                break;
            }

            let magnitudes = fft.process(&chunk);
            let mel = self.mel.warp_spectrum(magnitudes);
            let cepstrum = self.mel.mfccs(&mel, false);
            data.extend_from_slice(&cepstrum[..dim]);
        }

        let frames = data.len() / dim;
        let features = Array2::from_shape_vec((frames, dim), data)
            .map_err(|e| ClassifyError::Numerical(e.to_string()))?;
        Ok((features, samples))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::MemorySource;

    fn tone(freq: f32, len: usize, rate: u32) -> Vec<f32> {
        (0..len)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    fn extractor() -> FeatureExtractor {
        FeatureExtractor::new(&FeatureConfig::default(), false).expect("extractor")
    }

    #[test]
    fn frame_count_is_floor_of_length() {
        let ex = extractor();
        for len in [0, 1023, 1024, 1025, 4096, 5000] {
            let mut src = MemorySource::new(tone(440.0, len, 44100), 1, 44100);
            let m = ex.extract_from(&mut src, Path::new("mem")).expect("extract");
            assert_eq!(m.nrows(), len / 1024, "len {len}");
            assert_eq!(m.ncols(), 13);
        }
    }

    #[test]
    fn extraction_is_idempotent() {
        let ex = extractor();
        let samples = tone(1000.0, 8192, 44100);
        let a = ex
            .extract_from(&mut MemorySource::new(samples.clone(), 1, 44100), Path::new("a"))
            .expect("extract");
        let b = ex
            .extract_from(&mut MemorySource::new(samples, 1, 44100), Path::new("a"))
            .expect("extract");
        assert_eq!(a, b);
        assert!(a.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn distinct_tones_give_distinct_features() {
        let ex = extractor();
        let low = ex
            .extract_from(
                &mut MemorySource::new(tone(300.0, 4096, 44100), 1, 44100),
                Path::new("low"),
            )
            .expect("extract");
        let high = ex
            .extract_from(
                &mut MemorySource::new(tone(5000.0, 4096, 44100), 1, 44100),
                Path::new("high"),
            )
            .expect("extract");
        let diff: f64 = (&low.row(0) - &high.row(0)).mapv(f64::abs).sum();
        assert!(diff > 1.0);
    }

    #[test]
    fn wrong_rate_reports_both_rates() {
        let ex = extractor();
        let mut src = MemorySource::new(vec![0.0; 4096], 1, 22050);
        let err = ex
            .extract_from(&mut src, Path::new("slow.wav"))
            .err()
            .expect("must fail");
        match err {
            ClassifyError::InvalidAudioFormat {
                detail: FormatMismatch::SampleRate { expected, actual },
                ..
            } => {
                assert_eq!(expected, 44100);
                assert_eq!(actual, 22050);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn stereo_is_rejected() {
        let ex = extractor();
        let mut src = MemorySource::new(vec![0.0; 4096], 2, 44100);
        let err = ex.extract_from(&mut src, Path::new("st.wav")).err();
        assert!(matches!(
            err,
            Some(ClassifyError::InvalidAudioFormat {
                detail: FormatMismatch::Channels {
                    expected: 1,
                    actual: 2
                },
                ..
            })
        ));
    }

    #[test]
    fn too_many_coefficients_is_config_error() {
        let config = FeatureConfig {
            num_mel_bands: 10,
            num_coefficients: 10,
            ..FeatureConfig::default()
        };
        assert!(matches!(
            FeatureExtractor::new(&config, false),
            Err(ClassifyError::InvalidConfig(_))
        ));
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = extractor().extract("/nonexistent/a1.wav").err();
        assert!(matches!(err, Some(ClassifyError::FileNotFound { .. })));
    }

    #[test]
    fn wav_file_one_sample_short_has_no_frames() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("short.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).expect("create");
        for _ in 0..1023 {
            writer.write_sample(1000i16).expect("write");
        }
        writer.finalize().expect("finalize");

        let ex = extractor();
        assert_eq!(ex.extract(&path).expect("extract").nrows(), 0);
        match ex.extract_nonempty(&path) {
            Err(ClassifyError::NoCompleteFrames {
                samples, frame_len, ..
            }) => {
                assert_eq!(samples, 1023);
                assert_eq!(frame_len, 1024);
            }
            other => panic!("expected NoCompleteFrames, got {other:?}"),
        }
    }
}
