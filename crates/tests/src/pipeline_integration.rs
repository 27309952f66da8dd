//! Integration tests for the full pipeline
//!
//! These tests drive generated signals through the effects chain and the
//! visualizer tap together, the way the CLI and a UI would.

use reverie_core::domain::audio::{AudioFrameStream, ChannelCount, SampleRate, StreamFormat};
use reverie_core::domain::config::{
    ChainOrder, EffectsConfig, EngineConfig, ReverbPreset, ReverbSettings, SharedConfig,
    VisualizerSettings,
};
use reverie_core::domain::signal::{BufferSource, SignalGenerator, Waveform};
use reverie_core::domain::EffectsChain;
use reverie_infra::audio::{peak_bin, VisualizerHandle, VisualizerTap};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn stereo(rate: SampleRate) -> StreamFormat {
    StreamFormat::new(rate, ChannelCount::Stereo)
}

fn render<S: AudioFrameStream>(stream: &mut S, frames: usize, block: usize) -> Vec<f32> {
    let ch = stream.format().channel_count();
    let mut out = Vec::with_capacity(frames * ch);
    let mut buf = vec![0.0; block * ch];
    while out.len() < frames * ch {
        let n = stream.read(&mut buf, block);
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n * ch]);
    }
    out
}

fn wait_for_passes(handle: &VisualizerHandle, passes: u64) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if handle.analysis_passes() >= passes {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

// ============================================================================
// CHAIN TESTS
// ============================================================================

#[test]
fn test_disabled_chain_is_transparent() {
    let input: Vec<f32> = (0..4096).map(|i| ((i as f32) * 0.013).sin() * 0.7).collect();
    let source = BufferSource::new(stereo(SampleRate::Hz48000), input.clone());
    let shared = Arc::new(SharedConfig::new(EffectsConfig::bypass()));
    let mut chain = EffectsChain::new(source, shared).unwrap();

    assert_eq!(render(&mut chain, 2048, 300), input);
}

#[test]
fn test_impulse_reverb_tail_through_chain() {
    let mut config = EffectsConfig::bypass();
    config.reverb_enabled = true;
    config.reverb = ReverbSettings {
        room_size: 50.0,
        reverberance: 60.0,
        damping: 50.0,
        wet_gain_db: 0.0,
        dry_gain_db: 0.0,
        stereo_width: 100.0,
        ..ReverbSettings::default()
    };
    let format = stereo(SampleRate::Hz44100);
    let source = SignalGenerator::new(format, Waveform::Impulse)
        .with_amplitude(1.0)
        .with_duration(6.0);
    let mut chain = EffectsChain::new(source, Arc::new(SharedConfig::new(config))).unwrap();

    let out = render(&mut chain, 44100 * 6, 512);
    assert_eq!(out.len(), 44100 * 6 * 2);

    let peak_between = |from_ms: usize, to_ms: usize| {
        out[from_ms * 441 / 10 * 2..to_ms * 441 / 10 * 2]
            .iter()
            .fold(0.0_f32, |m, s| m.max(s.abs()))
    };
    assert!(peak_between(300, 400) > 1e-5);
    assert!(peak_between(5500, 6000) < 1e-4);
    assert!(out.iter().all(|s| s.abs() <= 1.0));
}

#[test]
fn test_live_config_changes_apply_between_pulls() {
    let shared = Arc::new(SharedConfig::new(EffectsConfig::bypass()));
    let source = SignalGenerator::sine(stereo(SampleRate::Hz48000), 1000.0, 0.5);
    let mut chain = EffectsChain::new(source, shared.clone()).unwrap();
    let mut buf = vec![0.0; 512 * 2];

    chain.read(&mut buf, 512);
    assert!(!chain.last_changes().any());

    // A control thread flips settings while audio keeps pulling
    let writer = {
        let shared = Arc::clone(&shared);
        std::thread::spawn(move || {
            shared.update(|c| {
                c.low_pass.enabled = true;
                c.low_pass.cutoff_hz = 200.0;
                c.order = ChainOrder::ReverbLowPassHighPass;
            });
        })
    };
    writer.join().unwrap();

    chain.read(&mut buf, 512);
    assert!(chain.last_changes().low_pass);

    // 1 kHz well above a 200 Hz low-pass
    let out = render(&mut chain, 4800, 512);
    let peak = out[4800..].iter().fold(0.0_f32, |m, s| m.max(s.abs()));
    assert!(peak < 0.05, "peak {peak}");
}

#[test]
fn test_mono_and_stereo_agree_on_identical_channels() {
    let mut config = EffectsConfig::bypass();
    config.high_pass.enabled = true;
    config.low_pass.enabled = true;
    config.low_pass.cutoff_hz = 5000.0;

    let mono_format = StreamFormat::new(SampleRate::Hz44100, ChannelCount::Mono);
    let stereo_format = stereo(SampleRate::Hz44100);
    let shared = Arc::new(SharedConfig::new(config));

    let mut mono = EffectsChain::new(
        SignalGenerator::new(mono_format, Waveform::Noise).with_seed(3),
        shared.clone(),
    )
    .unwrap();
    let mut stereo = EffectsChain::new(
        SignalGenerator::new(stereo_format, Waveform::Noise).with_seed(3),
        shared,
    )
    .unwrap();

    let mono_out = render(&mut mono, 2048, 256);
    let stereo_out = render(&mut stereo, 2048, 256);
    for (i, frame) in stereo_out.chunks_exact(2).enumerate() {
        assert_eq!(frame[0], mono_out[i]);
        assert_eq!(frame[1], mono_out[i]);
    }
}

#[test]
fn test_slow_stretches_rendered_duration() {
    let mut config = EffectsConfig::bypass();
    config.slow.enabled = true;
    config.slow.amount = 50.0;
    let source = SignalGenerator::sine(stereo(SampleRate::Hz44100), 440.0, 0.5).with_duration(1.0);
    let mut chain = EffectsChain::new(source, Arc::new(SharedConfig::new(config))).unwrap();

    let out = render(&mut chain, 100_000, 1024);
    let frames = out.len() / 2;
    // One second of source at half speed, minus the interpolation tail
    assert!((88_190..=88_200).contains(&frames), "rendered {frames} frames");
}

// ============================================================================
// VISUALIZER TESTS
// ============================================================================

#[test]
fn test_tap_over_chain_reports_sine() {
    let shared = Arc::new(SharedConfig::new(EffectsConfig::bypass()));
    let source = SignalGenerator::sine(stereo(SampleRate::Hz48000), 1500.0, 0.5);
    let chain = EffectsChain::new(source, shared).unwrap();
    let (mut tap, handle) = VisualizerTap::new(chain, VisualizerSettings::default()).unwrap();

    render(&mut tap, 4096, 256);
    assert!(wait_for_passes(&handle, 1));
    let passes = handle.analysis_passes();
    render(&mut tap, 256, 256);
    assert!(wait_for_passes(&handle, passes + 1));

    let spectrum = handle.spectrum();
    let bin = peak_bin(&spectrum).unwrap();
    assert_eq!(bin, 32);
    assert!((handle.bin_frequency(bin) - 1500.0).abs() < 1.0);

    let levels = handle.levels();
    assert!((levels.peak - 0.5).abs() < 0.01);
}

#[test]
fn test_tap_end_of_stream_and_shutdown() {
    let source = SignalGenerator::new(stereo(SampleRate::Hz48000), Waveform::Noise).with_duration(0.1);
    let shared = Arc::new(SharedConfig::new(EffectsConfig::bypass()));
    let chain = EffectsChain::new(source, shared).unwrap();
    let (mut tap, handle) = VisualizerTap::new(chain, VisualizerSettings::default()).unwrap();

    let out = render(&mut tap, 10_000, 512);
    assert_eq!(out.len(), 4800 * 2);

    let mut buf = vec![0.0; 1024];
    assert_eq!(tap.read(&mut buf, 512), 0);

    drop(tap);
    assert!(!handle.is_running());
}

// ============================================================================
// CONFIGURATION TESTS
// ============================================================================

#[tokio::test]
async fn test_config_file_drives_chain() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("reverie.toml");

    let mut config = EngineConfig::default();
    config.preset = Some(ReverbPreset::Hall);
    config.effects.reverb_enabled = true;
    config.effects.makeup_gain.enabled = true;
    config.effects.makeup_gain.gain_db = 6.0;
    config.save_to_file(&path).await.unwrap();

    let loaded = EngineConfig::load_from_file(&path).await.unwrap();
    let effects = loaded.effective_effects();
    assert_eq!(effects.reverb, ReverbPreset::Hall.settings());

    let source = SignalGenerator::sine(stereo(SampleRate::Hz44100), 220.0, 0.9);
    let mut chain = EffectsChain::new(source, Arc::new(SharedConfig::new(effects))).unwrap();
    let out = render(&mut chain, 44100, 512);
    // Makeup gain pushes past full scale, the limiter holds the ceiling
    assert!(out.iter().all(|s| s.abs() <= 1.0));
    assert!(out.iter().any(|s| s.abs() > 0.9));
}
