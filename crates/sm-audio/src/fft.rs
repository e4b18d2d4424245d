use std::sync::Arc;

use realfft::RealFftPlanner;
use realfft::num_complex::Complex;

/// FFT pipeline: Hamming-windowed real FFT using realfft.
///
/// Pre-allocates the FFT plan and scratch buffers; `process` does not allocate.
/// Cloning shares the plan and duplicates the buffers, so each worker thread
/// can own its pipeline.
///
/// # Example
/// ```
/// use sm_audio::fft::FftPipeline;
/// let fft = FftPipeline::new(1024);
/// assert_eq!(fft.half_len(), 512);
/// ```
#[derive(Clone)]
pub struct FftPipeline {
    fft_size: usize,
    input_buf: Vec<f64>,
    spectrum_buf: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
    magnitudes: Vec<f64>,
    plan: Arc<dyn realfft::RealToComplex<f64>>,
    /// Symmetric Hamming window coefficients.
    window: Vec<f64>,
}

impl FftPipeline {
    /// Create a new FFT pipeline with the given window size.
    ///
    /// # Panics
    /// Panics if `size` is less than 2.
    #[must_use]
    pub fn new(size: usize) -> Self {
        assert!(size > 1, "FFT size must be > 1");

        let mut planner = RealFftPlanner::<f64>::new();
        let plan = planner.plan_fft_forward(size);

        let input_buf = plan.make_input_vec();
        let spectrum_buf = plan.make_output_vec();
        let scratch = plan.make_scratch_vec();

        Self {
            fft_size: size,
            input_buf,
            spectrum_buf,
            scratch,
            magnitudes: vec![0.0; size / 2],
            plan,
            window: hamming(size),
        }
    }

    /// Window `samples` and return the magnitude of the first `N/2` bins.
    ///
    /// The upper half of a real signal's spectrum mirrors the lower half and
    /// is dropped. Missing samples are zero-padded.
    ///
    /// # Example
    /// ```
    /// use sm_audio::fft::FftPipeline;
    /// let mut fft = FftPipeline::new(256);
    /// let samples = vec![0.0f32; 256];
    /// let spectrum = fft.process(&samples);
    /// assert_eq!(spectrum.len(), 128);
    /// ```
    pub fn process(&mut self, samples: &[f32]) -> &[f64] {
        let n = self.fft_size.min(samples.len());

        for (i, slot) in self.input_buf.iter_mut().enumerate() {
            *slot = if i < n {
                f64::from(samples[i]) * self.window[i]
            } else {
                0.0
            };
        }

        if self
            .plan
            .process_with_scratch(
                &mut self.input_buf,
                &mut self.spectrum_buf,
                &mut self.scratch,
            )
            .is_err()
        {
            self.magnitudes.fill(0.0);
            return &self.magnitudes;
        }

        for (mag, c) in self.magnitudes.iter_mut().zip(&self.spectrum_buf) {
            *mag = c.norm();
        }
        &self.magnitudes
    }

    /// Number of magnitude bins returned by [`FftPipeline::process`].
    #[must_use]
    pub fn half_len(&self) -> usize {
        self.magnitudes.len()
    }
}

/// Symmetric Hamming window: `0.54 - 0.46 cos(2πn / (N-1))`.
fn hamming(size: usize) -> Vec<f64> {
    let denom = (size - 1) as f64;
    (0..size)
        .map(|i| 0.54 - 0.46 * (2.0 * std::f64::consts::PI * i as f64 / denom).cos())
        .collect()
}
