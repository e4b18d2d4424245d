use std::hint::black_box;
use std::path::Path;

use criterion::{Criterion, criterion_group, criterion_main};
use sm_audio::fft::FftPipeline;
use sm_audio::{FeatureExtractor, MemorySource};
use sm_core::FeatureConfig;

fn bench_fft(c: &mut Criterion) {
    let mut fft = FftPipeline::new(1024);
    let samples: Vec<f32> = (0..1024).map(|i| (i as f32 * 0.05).sin()).collect();
    c.bench_function("fft_1024", |b| b.iter(|| black_box(fft.process(&samples)).len()));
}

fn bench_extract(c: &mut Criterion) {
    let Ok(extractor) = FeatureExtractor::new(&FeatureConfig::default(), false) else {
        return;
    };
    // 3 s of a two-tone mix
    let samples: Vec<f32> = (0..44100 * 3)
        .map(|i| {
            let t = i as f32 / 44100.0;
            0.3 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
                + 0.2 * (2.0 * std::f32::consts::PI * 3000.0 * t).sin()
        })
        .collect();
    c.bench_function("extract_3s", |b| {
        b.iter(|| {
            let mut src = MemorySource::new(samples.clone(), 1, 44100);
            black_box(extractor.extract_from(&mut src, Path::new("bench")).is_ok())
        });
    });
}

criterion_group!(benches, bench_fft, bench_extract);
criterion_main!(benches);
