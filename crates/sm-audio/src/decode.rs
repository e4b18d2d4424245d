use std::collections::VecDeque;
use std::fs::File;
use std::path::{Path, PathBuf};

use sm_core::{AudioSource, ClassifyError, Result};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Audio file decoded packet by packet through symphonia.
///
/// Supports WAV, MP3, FLAC, OGG, AAC. Samples are produced interleaved in the
/// file's channel layout; the extractor rejects anything but mono before
/// reading.
///
/// # Example
/// ```no_run
/// use sm_audio::decode::DecodedSource;
/// use sm_core::AudioSource;
/// let source = DecodedSource::open("wavs/dog_01.wav").unwrap();
/// assert_eq!(source.channels(), 1);
/// ```
pub struct DecodedSource {
    path: PathBuf,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    channels: usize,
    sample_rate: u32,
    pending: VecDeque<f32>,
    sample_buf: Option<SampleBuffer<f32>>,
    max_frames: usize,
    finished: bool,
}

impl DecodedSource {
    /// Open and probe an audio file.
    ///
    /// # Errors
    /// `FileNotFound` if the path is not a readable file, `UnsupportedFormat`
    /// if no demuxer/codec accepts it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ClassifyError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let file = File::open(path).map_err(|_| ClassifyError::FileNotFound {
            path: path.to_path_buf(),
        })?;
        let mss = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let unsupported = |reason: String| ClassifyError::UnsupportedFormat {
            path: path.to_path_buf(),
            reason,
        };

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| unsupported(e.to_string()))?;

        let format = probed.format;
        let track = format
            .default_track()
            .ok_or_else(|| unsupported("aucune piste audio".to_string()))?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();
        let sample_rate = codec_params
            .sample_rate
            .ok_or_else(|| unsupported("fréquence d'échantillonnage inconnue".to_string()))?;
        let channels = codec_params
            .channels
            .map_or(1, symphonia::core::audio::Channels::count);

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| unsupported(e.to_string()))?;

        Ok(Self {
            path: path.to_path_buf(),
            format,
            decoder,
            track_id,
            channels,
            sample_rate,
            pending: VecDeque::new(),
            sample_buf: None,
            max_frames: 0,
            finished: false,
        })
    }

    /// Decode the next packet of our track into `pending`.
    ///
    /// Returns `false` once the stream is exhausted.
    fn decode_next(&mut self) -> Result<bool> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => return Ok(false),
                Err(e) => {
                    return Err(ClassifyError::Decode {
                        path: self.path.clone(),
                        reason: e.to_string(),
                    });
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    log::warn!("Paquet corrompu ignoré dans {} : {e}", self.path.display());
                    continue;
                }
                Err(e) => {
                    return Err(ClassifyError::Decode {
                        path: self.path.clone(),
                        reason: e.to_string(),
                    });
                }
            };

            let spec = *decoded.spec();
            let num_frames = decoded.capacity();
            // Reuse SampleBuffer: only reallocate if this packet is bigger than current capacity
            if self.sample_buf.is_none() || num_frames > self.max_frames {
                self.sample_buf = Some(SampleBuffer::<f32>::new(num_frames as u64, spec));
                self.max_frames = num_frames;
            }
            let Some(buf) = self.sample_buf.as_mut() else {
                continue;
            };
            buf.copy_interleaved_ref(decoded);
            self.pending.extend(buf.samples().iter().copied());
            return Ok(true);
        }
    }
}

impl AudioSource for DecodedSource {
    fn channels(&self) -> usize {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_frames(&mut self, out: &mut Vec<f32>, n: usize) -> Result<usize> {
        while self.pending.len() < n && !self.finished {
            if !self.decode_next()? {
                self.finished = true;
            }
        }
        let take = n.min(self.pending.len());
        out.clear();
        out.extend(self.pending.drain(..take));
        Ok(take)
    }
}

/// In-memory mono or interleaved buffer exposed as an [`AudioSource`].
///
/// # Example
/// ```
/// use sm_audio::decode::MemorySource;
/// use sm_core::AudioSource;
/// let mut src = MemorySource::new(vec![0.0; 1500], 1, 44100);
/// let mut chunk = Vec::new();
/// assert_eq!(src.read_frames(&mut chunk, 1024).unwrap(), 1024);
/// assert_eq!(src.read_frames(&mut chunk, 1024).unwrap(), 476);
/// ```
#[derive(Clone, Debug)]
pub struct MemorySource {
    samples: Vec<f32>,
    pos: usize,
    channels: usize,
    sample_rate: u32,
}

impl MemorySource {
    /// Wrap `samples` recorded with the given layout.
    #[must_use]
    pub fn new(samples: Vec<f32>, channels: usize, sample_rate: u32) -> Self {
        Self {
            samples,
            pos: 0,
            channels,
            sample_rate,
        }
    }
}

impl AudioSource for MemorySource {
    fn channels(&self) -> usize {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_frames(&mut self, out: &mut Vec<f32>, n: usize) -> Result<usize> {
        let end = (self.pos + n).min(self.samples.len());
        out.clear();
        out.extend_from_slice(&self.samples[self.pos..end]);
        let read = end - self.pos;
        self.pos = end;
        Ok(read)
    }
}
