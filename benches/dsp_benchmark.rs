//! Criterion benchmarks for DSP stage performance
//!
//! Measures:
//! - Biquad filter throughput
//! - Limiter throughput
//! - Full effects chain per block, bypassed and fully enabled
//! - Chain order sensitivity

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use reverie_benchmarks::{generate_stereo_buffer, generate_white_noise, BLOCK_SIZES};
use reverie_core::domain::audio::{AudioFrameStream, ChannelCount, SampleRate, StreamFormat};
use reverie_core::domain::config::{ChainOrder, EffectsConfig, SharedConfig};
use reverie_core::domain::{BiquadFilter, EffectsChain, Limiter, SignalGenerator, Waveform};
use std::hint::black_box;
use std::sync::Arc;

fn stereo_format() -> StreamFormat {
    StreamFormat::new(SampleRate::Hz48000, ChannelCount::Stereo)
}

fn full_config() -> EffectsConfig {
    let mut config = EffectsConfig::default();
    config.high_pass.enabled = true;
    config.low_pass.enabled = true;
    config.low_pass.cutoff_hz = 8000.0;
    config.reverb_enabled = true;
    config.makeup_gain.enabled = true;
    config.makeup_gain.gain_db = 3.0;
    config
}

fn chain_with(config: EffectsConfig) -> EffectsChain<SignalGenerator> {
    let source = SignalGenerator::new(stereo_format(), Waveform::Noise).with_seed(11);
    match EffectsChain::new(source, Arc::new(SharedConfig::new(config))) {
        Ok(chain) => chain,
        Err(e) => panic!("chain setup failed: {e}"),
    }
}

/// Benchmark biquad processing
fn bench_biquad(c: &mut Criterion) {
    let mut group = c.benchmark_group("biquad_low_pass");

    for size in BLOCK_SIZES {
        let mut filter = BiquadFilter::low_pass(48000.0, 2000.0);
        let mut buffer = generate_white_noise(size, 3);

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                filter.process(black_box(&mut buffer));
                black_box(&mut buffer);
            })
        });
    }

    group.finish();
}

/// Benchmark the soft-knee limiter on a hot signal
fn bench_limiter(c: &mut Criterion) {
    let limiter = Limiter::new();
    let input: Vec<f32> = generate_stereo_buffer(48000, 512)
        .into_iter()
        .map(|s| s * 4.0)
        .collect();

    c.bench_function("limiter_512_stereo", |b| {
        b.iter(|| {
            let mut buffer = input.clone();
            limiter.process(black_box(&mut buffer));
            black_box(buffer)
        })
    });
}

/// Benchmark one pull through the chain
fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain_read");

    for (label, config) in [("bypass", EffectsConfig::bypass()), ("full", full_config())] {
        for size in BLOCK_SIZES {
            let mut chain = chain_with(config);
            let mut buffer = vec![0.0; size * 2];

            group.bench_with_input(BenchmarkId::new(label, size), &size, |b, &size| {
                b.iter(|| black_box(chain.read(black_box(&mut buffer), size)))
            });
        }
    }

    group.finish();
}

/// Benchmark the chain with slow-down active
fn bench_chain_slowed(c: &mut Criterion) {
    let mut config = full_config();
    config.slow.enabled = true;
    config.slow.amount = 30.0;
    let mut chain = chain_with(config);
    let mut buffer = vec![0.0; 512 * 2];

    c.bench_function("chain_read_slowed_512", |b| {
        b.iter(|| black_box(chain.read(black_box(&mut buffer), 512)))
    });
}

/// Benchmark every stage order
fn bench_chain_orders(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain_order");

    for order in ChainOrder::ALL {
        let mut config = full_config();
        config.order = order;
        let mut chain = chain_with(config);
        let mut buffer = vec![0.0; 512 * 2];

        group.bench_function(format!("{order:?}"), |b| {
            b.iter(|| black_box(chain.read(black_box(&mut buffer), 512)))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_biquad,
    bench_limiter,
    bench_chain,
    bench_chain_slowed,
    bench_chain_orders,
);

criterion_main!(benches);
