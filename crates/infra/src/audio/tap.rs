//! Visualization tap
//!
//! [`VisualizerTap`] sits in the pull chain like any other stream: it
//! forwards reads unchanged, records a mono copy into the scope buffer and
//! publishes block levels. A background thread turns the scope history into
//! a smoothed spectrum; the UI reads both through a [`VisualizerHandle`].
//!
//! Three contexts touch the shared state:
//! - the audio thread writes samples and levels, then nudges the analyzer
//!   through a single-slot channel without ever blocking
//! - the analysis thread runs the FFT and publishes spectra by swapping
//!   a back buffer into an [`ArcSwap`]
//! - UI pollers only copy from the published front buffer

use crate::audio::lockfree_buffer::ScopeBuffer;
use crate::audio::spectrum::SpectrumAnalyzer;
use arc_swap::ArcSwap;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use reverie_core::domain::audio::{AudioError, AudioFrameStream, Result, StreamFormat};
use reverie_core::domain::config::VisualizerSettings;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, trace};

/// Instant peak and RMS of the most recent block (mono, linear)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Levels {
    pub peak: f32,
    pub rms: f32,
}

impl Levels {
    /// Levels of the channel average of interleaved `samples`
    pub fn measure(samples: &[f32], channels: usize) -> Self {
        let channels = channels.max(1);
        let scale = 1.0 / channels as f32;
        let mut peak = 0.0_f32;
        let mut sum_sq = 0.0_f32;
        let mut frames = 0usize;

        for frame in samples.chunks_exact(channels) {
            let mono = frame.iter().sum::<f32>() * scale;
            peak = peak.max(mono.abs());
            sum_sq += mono * mono;
            frames += 1;
        }

        if frames == 0 {
            return Self::default();
        }
        Self {
            peak,
            rms: (sum_sq / frames as f32).sqrt(),
        }
    }
}

/// State shared by the tap, its analysis thread and every handle
struct TapShared {
    scope: ScopeBuffer,
    peak: AtomicU32,
    rms: AtomicU32,
    front: ArcSwap<Vec<f32>>,
    disposed: AtomicBool,
    /// Raised by `VisualizerTap::reset`, cleared by the analysis thread
    reset_pending: AtomicBool,
    passes: AtomicU64,
}

impl TapShared {
    fn store_levels(&self, levels: Levels) {
        self.peak.store(levels.peak.to_bits(), Ordering::Relaxed);
        self.rms.store(levels.rms.to_bits(), Ordering::Relaxed);
    }
}

/// Read-only view for UI code
///
/// Cheap to clone; stays valid after the tap is dropped and then keeps
/// returning the last published values.
#[derive(Clone)]
pub struct VisualizerHandle {
    shared: Arc<TapShared>,
    fft_size: usize,
    sample_rate: f32,
}

impl VisualizerHandle {
    /// Levels of the most recent block
    pub fn levels(&self) -> Levels {
        Levels {
            peak: f32::from_bits(self.shared.peak.load(Ordering::Relaxed)),
            rms: f32::from_bits(self.shared.rms.load(Ordering::Relaxed)),
        }
    }

    /// Copy the published spectrum into `dest`, returning bins copied
    pub fn spectrum_data(&self, dest: &mut [f32]) -> usize {
        let front = self.shared.front.load();
        let n = dest.len().min(front.len());
        dest[..n].copy_from_slice(&front[..n]);
        n
    }

    /// The published spectrum itself
    pub fn spectrum(&self) -> Arc<Vec<f32>> {
        self.shared.front.load_full()
    }

    pub fn bins(&self) -> usize {
        self.fft_size / 2
    }

    /// Center frequency of `bin` in Hz
    pub fn bin_frequency(&self, bin: usize) -> f32 {
        bin as f32 * self.sample_rate / self.fft_size as f32
    }

    /// Analysis passes over new samples so far
    ///
    /// Idle decay and reset do not count.
    pub fn analysis_passes(&self) -> u64 {
        self.shared.passes.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        !self.shared.disposed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for VisualizerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisualizerHandle")
            .field("levels", &self.levels())
            .field("bins", &self.bins())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Pass-through stream feeding the visualizer
pub struct VisualizerTap<S> {
    source: S,
    format: StreamFormat,
    channels: usize,
    shared: Arc<TapShared>,
    wake_tx: Sender<()>,
    worker: Option<JoinHandle<()>>,
}

impl<S: AudioFrameStream> VisualizerTap<S> {
    /// Wrap `source` and start the analysis thread
    pub fn new(source: S, settings: VisualizerSettings) -> Result<(Self, VisualizerHandle)> {
        let format = source.format();
        format.validate()?;
        let analyzer = SpectrumAnalyzer::new(settings)?;

        let shared = Arc::new(TapShared {
            scope: ScopeBuffer::with_capacity(settings.capacity),
            peak: AtomicU32::new(0),
            rms: AtomicU32::new(0),
            front: ArcSwap::from_pointee(vec![0.0; settings.bins()]),
            disposed: AtomicBool::new(false),
            reset_pending: AtomicBool::new(false),
            passes: AtomicU64::new(0),
        });

        let (wake_tx, wake_rx) = channel::bounded(1);
        let timeout = Duration::from_millis(settings.wait_timeout_ms);
        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("reverie-analysis".to_string())
            .spawn(move || analysis_loop(worker_shared, analyzer, wake_rx, timeout))
            .map_err(|e| AudioError::StreamError(format!("Failed to spawn analysis thread: {e}")))?;

        info!(
            fft_size = settings.fft_size,
            capacity = shared.scope.capacity(),
            "Visualizer tap started"
        );

        let handle = VisualizerHandle {
            shared: Arc::clone(&shared),
            fft_size: settings.fft_size,
            sample_rate: format.sample_rate.as_f32(),
        };

        Ok((
            Self {
                source,
                format,
                channels: format.channel_count(),
                shared,
                wake_tx,
                worker: Some(worker),
            },
            handle,
        ))
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Forget scope history, levels and the spectrum, e.g. on a track change
    ///
    /// The published spectrum reads as silent immediately; the analysis
    /// thread drops its smoothing history before its next pass.
    pub fn reset(&mut self) {
        self.shared.scope.clear();
        self.shared.store_levels(Levels::default());
        let bins = self.shared.front.load().len();
        self.shared.front.store(Arc::new(vec![0.0; bins]));
        self.shared.reset_pending.store(true, Ordering::Release);
        let _ = self.wake_tx.try_send(());
        debug!("Visualizer tap reset");
    }
}

impl<S: AudioFrameStream> AudioFrameStream for VisualizerTap<S> {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn read(&mut self, buffer: &mut [f32], frames: usize) -> usize {
        let produced = self.source.read(buffer, frames);
        if produced == 0 {
            return 0;
        }

        let samples = &buffer[..produced * self.channels];
        self.shared.scope.write_downmixed(samples, self.channels);
        self.shared.store_levels(Levels::measure(samples, self.channels));

        // Full slot means a wake-up is already pending
        let _ = self.wake_tx.try_send(());
        produced
    }
}

impl<S> Drop for VisualizerTap<S> {
    fn drop(&mut self) {
        self.shared.disposed.store(true, Ordering::Release);
        let _ = self.wake_tx.try_send(());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Analysis thread panicked");
            }
        }
        debug!("Visualizer tap stopped");
    }
}

/// Copy `bins` into the back buffer and swap it in, returning the old front
fn publish(front: &ArcSwap<Vec<f32>>, mut back: Arc<Vec<f32>>, bins: &[f32]) -> Arc<Vec<f32>> {
    // Clones only if a reader still holds this buffer from an earlier swap
    Arc::make_mut(&mut back).copy_from_slice(bins);
    front.swap(back)
}

fn analysis_loop(
    shared: Arc<TapShared>,
    mut analyzer: SpectrumAnalyzer,
    wake_rx: Receiver<()>,
    timeout: Duration,
) {
    debug!("Analysis thread running");
    let mut back = Arc::new(vec![0.0; analyzer.bins()]);
    let mut last_cursor = 0usize;
    let mut decaying = false;

    loop {
        let timed_out = match wake_rx.recv_timeout(timeout) {
            Ok(()) => false,
            Err(RecvTimeoutError::Timeout) => true,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if shared.disposed.load(Ordering::Acquire) {
            break;
        }

        if shared.reset_pending.swap(false, Ordering::AcqRel) {
            analyzer.reset();
            // Overwrites a pass that raced with the reset
            back = publish(&shared.front, back, analyzer.spectrum());
            last_cursor = shared.scope.cursor();
            decaying = false;
            trace!("Analyzer reset");
            continue;
        }

        let cursor = shared.scope.cursor();
        if cursor == last_cursor {
            // Paused or ended: let the bars fall instead of freezing
            if timed_out && decaying {
                decaying = analyzer.decay();
                back = publish(&shared.front, back, analyzer.spectrum());
            }
            continue;
        }
        last_cursor = cursor;

        shared.scope.copy_latest(cursor, analyzer.input_mut());
        analyzer.analyze();
        back = publish(&shared.front, back, analyzer.spectrum());
        decaying = true;
        let passes = shared.passes.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(cursor, passes, "Spectrum published");
    }

    info!("Analysis thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::spectrum::peak_bin;
    use reverie_core::domain::audio::{ChannelCount, SampleRate};
    use reverie_core::domain::signal::{BufferSource, SignalGenerator};
    use std::time::Instant;

    fn stereo_48k() -> StreamFormat {
        StreamFormat::new(SampleRate::Hz48000, ChannelCount::Stereo)
    }

    fn pump<S: AudioFrameStream>(tap: &mut VisualizerTap<S>, blocks: usize, block: usize) {
        let mut buf = vec![0.0; block * tap.format().channel_count()];
        for _ in 0..blocks {
            tap.read(&mut buf, block);
        }
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

    #[test]
    fn test_levels_measure() {
        let levels = Levels::measure(&[0.5, 0.5, -0.5, -0.5], 2);
        assert_eq!(levels.peak, 0.5);
        assert!((levels.rms - 0.5).abs() < 1e-6);

        // Opposite channels cancel in the downmix
        let levels = Levels::measure(&[1.0, -1.0, 1.0, -1.0], 2);
        assert_eq!(levels, Levels::default());

        assert_eq!(Levels::measure(&[], 2), Levels::default());
    }

    #[test]
    fn test_tap_is_transparent() {
        let input: Vec<f32> = (0..512).map(|i| (i as f32 * 0.1).sin()).collect();
        let mut reference = BufferSource::new(stereo_48k(), input.clone());
        let (mut tap, _handle) =
            VisualizerTap::new(BufferSource::new(stereo_48k(), input), VisualizerSettings::default())
                .unwrap();

        let mut a = vec![0.0; 128];
        let mut b = vec![0.0; 128];
        loop {
            let n = tap.read(&mut a, 64);
            assert_eq!(n, reference.read(&mut b, 64));
            if n == 0 {
                break;
            }
            assert_eq!(a[..n * 2], b[..n * 2]);
        }
    }

    #[test]
    fn test_sine_levels_and_spectrum() {
        let source = SignalGenerator::sine(stereo_48k(), 3000.0, 0.5);
        let (mut tap, handle) = VisualizerTap::new(source, VisualizerSettings::default()).unwrap();
        assert_eq!(handle.bins(), 512);

        pump(&mut tap, 16, 256);

        let levels = handle.levels();
        assert!((levels.peak - 0.5).abs() < 0.01);
        assert!((levels.rms - 0.5 / 2.0_f32.sqrt()).abs() < 0.01);

        assert!(wait_for_passes(&handle, 1), "analysis never ran");
        // Let the last wake-up finish so the full window is analyzed
        let before = handle.analysis_passes();
        pump(&mut tap, 1, 256);
        assert!(wait_for_passes(&handle, before + 1));

        let mut spectrum = vec![0.0; handle.bins()];
        assert_eq!(handle.spectrum_data(&mut spectrum), 512);
        let peak = peak_bin(&spectrum).unwrap();
        assert!((peak as i64 - 64).abs() <= 1, "peak bin {peak}");
        assert!((handle.bin_frequency(64) - 3000.0).abs() < 1e-3);
    }

    #[test]
    fn test_idle_tap_publishes_nothing() {
        let source = SignalGenerator::sine(stereo_48k(), 440.0, 0.5);
        let settings = VisualizerSettings {
            wait_timeout_ms: 5,
            ..Default::default()
        };
        let (mut tap, handle) = VisualizerTap::new(source, settings).unwrap();

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(handle.analysis_passes(), 0);

        pump(&mut tap, 1, 256);
        assert!(wait_for_passes(&handle, 1));
        let settled = handle.analysis_passes();

        // Timeouts without new samples skip the analysis pass
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(handle.analysis_passes(), settled);
    }

    #[test]
    fn test_drop_stops_analysis_thread() {
        let source = SignalGenerator::sine(stereo_48k(), 440.0, 0.5);
        let (mut tap, handle) = VisualizerTap::new(source, VisualizerSettings::default()).unwrap();
        pump(&mut tap, 4, 256);
        assert!(handle.is_running());

        drop(tap);
        assert!(!handle.is_running());

        // Last published spectrum is still readable
        let mut spectrum = vec![0.0; 8];
        assert_eq!(handle.spectrum_data(&mut spectrum), 8);
    }

    #[test]
    fn test_rejects_invalid_settings() {
        let source = SignalGenerator::sine(stereo_48k(), 440.0, 0.5);
        let settings = VisualizerSettings {
            fft_size: 2048,
            capacity: 1024,
            ..Default::default()
        };
        let result = VisualizerTap::new(source, settings);
        assert!(matches!(result, Err(AudioError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_reset_clears_levels() {
        let source = SignalGenerator::sine(stereo_48k(), 440.0, 0.5);
        let (mut tap, handle) = VisualizerTap::new(source, VisualizerSettings::default()).unwrap();
        pump(&mut tap, 2, 256);
        assert!(handle.levels().peak > 0.0);

        tap.reset();
        assert_eq!(handle.levels(), Levels::default());
    }

    #[test]
    fn test_reset_clears_spectrum_and_smoothing() {
        // 3 kHz track followed by silence on the "next track"
        let mut samples: Vec<f32> = (0..17 * 256)
            .flat_map(|i| {
                let s = 0.8 * (2.0 * std::f32::consts::PI * 3000.0 * i as f32 / 48000.0).sin();
                [s, s]
            })
            .collect();
        samples.extend(std::iter::repeat(0.0).take(4096 * 2));
        let source = BufferSource::new(stereo_48k(), samples);
        let (mut tap, handle) = VisualizerTap::new(source, VisualizerSettings::default()).unwrap();

        pump(&mut tap, 16, 256);
        assert!(wait_for_passes(&handle, 1));
        let before = handle.analysis_passes();
        pump(&mut tap, 1, 256);
        assert!(wait_for_passes(&handle, before + 1));
        assert!(handle.spectrum()[64] > 0.5);
        // Let any wake-up still queued from the pumps finish its pass
        std::thread::sleep(Duration::from_millis(50));

        tap.reset();
        assert!(handle.spectrum().iter().all(|&v| v == 0.0));

        // The analysis thread picks up the reset without publishing old bars
        std::thread::sleep(Duration::from_millis(200));
        assert!(handle.spectrum().iter().all(|&v| v == 0.0));

        // Silence right after the reset must not fade out the old track
        let passes = handle.analysis_passes();
        pump(&mut tap, 4, 256);
        assert!(wait_for_passes(&handle, passes + 1));
        std::thread::sleep(Duration::from_millis(20));
        let spectrum = handle.spectrum();
        assert!(spectrum.iter().all(|&v| v == 0.0), "bin 64 = {}", spectrum[64]);
    }

    #[test]
    fn test_idle_spectrum_decays_to_silence() {
        let source = SignalGenerator::sine(stereo_48k(), 3000.0, 0.8).with_duration(0.1);
        let settings = VisualizerSettings {
            wait_timeout_ms: 5,
            ..Default::default()
        };
        let (mut tap, handle) = VisualizerTap::new(source, settings).unwrap();

        pump(&mut tap, 19, 256);
        assert!(wait_for_passes(&handle, 1));
        let peak_after_audio = handle.spectrum().iter().fold(0.0_f32, |m, &v| m.max(v));
        assert!(peak_after_audio > 0.0);

        // End of stream: bars fall with the release factor, then rest at zero
        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.spectrum().iter().any(|&v| v > 0.0) {
            assert!(Instant::now() < deadline, "spectrum froze");
            std::thread::sleep(Duration::from_millis(5));
        }
        let passes = handle.analysis_passes();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(handle.analysis_passes(), passes);
        assert!(handle.spectrum().iter().all(|&v| v == 0.0));
    }
}
