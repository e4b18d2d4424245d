// Audio decoding, spectral analysis and MFCC feature extraction for smacrs.

pub mod decode;
pub mod extractor;
pub mod fft;
pub mod mel;

pub use decode::{DecodedSource, MemorySource};
pub use extractor::FeatureExtractor;
pub use mel::{MelFilterbank, MelScaling};
