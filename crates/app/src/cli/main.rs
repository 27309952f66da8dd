//! Reverie CLI Application
//!
//! Renders a generated test signal through the effects chain and the
//! visualizer tap, polling the tap like a UI would, then reports levels and
//! the dominant spectrum bin. With `--watch`, edits to the config file are
//! applied to the running chain.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use reverie_core::domain::audio::{ChannelCount, SampleRate, StreamFormat};
use reverie_core::domain::config::{
    ConfigManager, ConfigWatcher, EngineConfig, ReverbPreset, SharedConfig,
};
use reverie_core::domain::{AudioFrameStream, EffectsChain, SignalGenerator, Waveform};
use reverie_infra::audio::{peak_bin, Levels, VisualizerHandle, VisualizerTap};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SignalArg {
    Sine,
    Impulse,
    Noise,
    Silence,
}

impl From<SignalArg> for Waveform {
    fn from(arg: SignalArg) -> Self {
        match arg {
            SignalArg::Sine => Waveform::Sine,
            SignalArg::Impulse => Waveform::Impulse,
            SignalArg::Noise => Waveform::Noise,
            SignalArg::Silence => Waveform::Silence,
        }
    }
}

#[derive(Parser)]
#[command(name = "reverie")]
#[command(about = "Slowed + reverb effects chain with a live spectrum tap", long_about = None)]
struct Cli {
    /// Engine configuration (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Test signal to render
    #[arg(long, value_enum, default_value = "sine")]
    signal: SignalArg,

    /// Sine frequency in Hz
    #[arg(long, default_value_t = 440.0)]
    frequency: f32,

    /// Seconds of audio to render (overrides the config)
    #[arg(long)]
    seconds: Option<f32>,

    /// Sample rate in Hz (overrides the config)
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Render mono instead of stereo
    #[arg(long)]
    mono: bool,

    /// Reverb preset: default, small_room, hall, cathedral, bedroom
    #[arg(long)]
    preset: Option<ReverbPreset>,

    /// Enable slow-down with this amount (0-100)
    #[arg(long)]
    slow: Option<f32>,

    /// Render in real time and hot-reload the config file
    #[arg(long)]
    watch: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Summary printed after rendering
#[derive(Debug, Serialize)]
struct RenderReport {
    frames: u64,
    seconds: f32,
    sample_rate: u32,
    channels: u16,
    max_peak: f32,
    last_levels: Levels,
    dominant_bin: Option<usize>,
    dominant_hz: Option<f32>,
    analysis_passes: u64,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    if let Some(path) = path {
        return EngineConfig::load_from_file(path)
            .await
            .with_context(|| format!("Failed to load config from {}", path.display()));
    }

    match ConfigManager::default_config_dir() {
        Ok(dir) => {
            let manager = ConfigManager::new(dir);
            if manager.exists() {
                return Ok(manager.load().await);
            }
            debug!(path = %manager.config_path().display(), "No user config, using factory default");
        }
        Err(e) => warn!(error = %e, "No config directory"),
    }
    Ok(EngineConfig::factory_default())
}

fn apply_overrides(config: &mut EngineConfig, cli: &Cli) {
    if let Some(seconds) = cli.seconds {
        config.render.seconds = seconds;
    }
    if let Some(sample_rate) = cli.sample_rate {
        config.render.sample_rate = sample_rate;
    }
    if cli.mono {
        config.render.channels = 1;
    }
    if let Some(preset) = cli.preset {
        config.preset = Some(preset);
        config.effects.reverb_enabled = true;
    }
    if let Some(amount) = cli.slow {
        config.effects.slow.enabled = true;
        config.effects.slow.amount = amount;
    }
}

/// Reload the config file whenever the watcher reports it changed
async fn watch_config(path: PathBuf, shared: Arc<SharedConfig>) -> Result<()> {
    let dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let watcher = ConfigWatcher::new(dir)
        .await
        .context("Failed to start config watcher")?;
    let mut changes = watcher.subscribe();

    tokio::spawn(async move {
        // The watcher must live as long as the task
        let _watcher = watcher;
        loop {
            match changes.recv().await {
                Ok(changed) => {
                    if changed.file_name() != path.file_name() {
                        continue;
                    }
                    match EngineConfig::load_from_file(&path).await {
                        Ok(config) => {
                            shared.store(config.effective_effects());
                            info!(path = %path.display(), "Effects reloaded");
                        }
                        Err(e) => error!(error = %e, "Ignoring invalid config edit"),
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Config events dropped");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    Ok(())
}

/// Pull blocks through the pipeline like an output device callback would
fn render<S: AudioFrameStream>(
    stream: &mut S,
    handle: &VisualizerHandle,
    block_frames: usize,
    real_time: bool,
) -> (u64, f32) {
    let format = stream.format();
    let ch = format.channel_count();
    let block_duration =
        Duration::from_secs_f64(block_frames as f64 / f64::from(format.sample_rate.hz()));
    let mut buffer = vec![0.0; block_frames * ch];
    let mut frames = 0u64;
    let mut max_peak = 0.0_f32;
    let started = Instant::now();

    loop {
        let n = stream.read(&mut buffer, block_frames);
        if n == 0 {
            break;
        }
        frames += n as u64;
        // UI-style poll
        max_peak = max_peak.max(handle.levels().peak);

        if real_time {
            let due = block_duration.mul_f64(frames as f64 / block_frames as f64);
            if let Some(wait) = due.checked_sub(started.elapsed()) {
                std::thread::sleep(wait);
            }
        }
    }

    (frames, max_peak)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    info!("Reverie starting");

    let mut config = load_config(cli.config.as_deref()).await?;
    apply_overrides(&mut config, &cli);
    config.validate().context("Invalid configuration")?;

    let render_settings = config.render;
    let format = StreamFormat::new(
        SampleRate::from_hz(render_settings.sample_rate),
        ChannelCount::from_count(render_settings.channels),
    );
    let shared = Arc::new(SharedConfig::new(config.effective_effects()));

    if cli.watch {
        match &cli.config {
            Some(path) => watch_config(path.clone(), Arc::clone(&shared)).await?,
            None => warn!("--watch needs --config, rendering without hot reload"),
        }
    }

    let source = SignalGenerator::new(format, cli.signal.into())
        .with_frequency(cli.frequency)
        .with_duration(render_settings.seconds);
    let chain = EffectsChain::new(source, shared.clone()).context("Failed to build effects chain")?;
    let (mut tap, handle) =
        VisualizerTap::new(chain, config.visualizer).context("Failed to start visualizer")?;

    let block_frames = render_settings.block_frames;
    let real_time = cli.watch;
    let render_handle = handle.clone();
    let (tap, frames, max_peak) = tokio::task::spawn_blocking(move || {
        let (frames, max_peak) = render(&mut tap, &render_handle, block_frames, real_time);
        (tap, frames, max_peak)
    })
    .await
    .context("Render thread failed")?;

    // One more analysis pass over the tail before stopping the tap
    let settle = Duration::from_millis(config.visualizer.wait_timeout_ms * 2);
    tokio::time::sleep(settle).await;
    drop(tap);

    let spectrum = handle.spectrum();
    let dominant_bin = peak_bin(&spectrum).filter(|&bin| spectrum[bin] > 0.0);
    let report = RenderReport {
        frames,
        seconds: frames as f32 / format.sample_rate.as_f32(),
        sample_rate: format.sample_rate.hz(),
        channels: format.channels.count(),
        max_peak,
        last_levels: handle.levels(),
        dominant_bin,
        dominant_hz: dominant_bin.map(|bin| handle.bin_frequency(bin)),
        analysis_passes: handle.analysis_passes(),
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Rendered {} frames ({:.2} s @ {} Hz, {} ch)",
            report.frames, report.seconds, report.sample_rate, report.channels
        );
        println!(
            "Peak {:.3}  last block peak {:.3} rms {:.3}",
            report.max_peak, report.last_levels.peak, report.last_levels.rms
        );
        match (report.dominant_bin, report.dominant_hz) {
            (Some(bin), Some(hz)) => println!("Dominant bin {bin} (~{hz:.0} Hz)"),
            _ => println!("Spectrum is silent"),
        }
        println!("Analysis passes: {}", report.analysis_passes);
    }

    info!("Reverie finished");
    Ok(())
}
