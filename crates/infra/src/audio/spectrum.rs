//! Spectrum analysis for the visualizer
//!
//! Hann-windowed FFT magnitude, mapped to a 0..1 display range in dB and
//! smoothed so bars rise instantly and fall off gradually. Everything is
//! preallocated; `analyze` does no allocation.

use reverie_core::domain::audio::{AudioError, Result};
use reverie_core::domain::config::VisualizerSettings;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

/// Display level treated as silent while decaying
const SILENCE: f32 = 1e-4;

/// Periodic Hann window of `size` points
pub fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / size as f32).cos()))
        .collect()
}

/// Map a magnitude to `0..=1` over `[db_floor, db_ceiling]`
///
/// `reference` is the magnitude that reads as 0 dB.
#[inline]
pub fn normalize_magnitude(magnitude: f32, reference: f32, db_floor: f32, db_ceiling: f32) -> f32 {
    let db = 20.0 * (magnitude / reference).max(1e-12).log10();
    ((db - db_floor) / (db_ceiling - db_floor)).clamp(0.0, 1.0)
}

/// Rise immediately, fall by `release`
#[inline]
pub fn smooth(previous: f32, current: f32, release: f32) -> f32 {
    if current >= previous {
        current
    } else {
        previous * release + current * (1.0 - release)
    }
}

/// Windowed FFT with smoothed, normalized output bins
pub struct SpectrumAnalyzer {
    settings: VisualizerSettings,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    input: Vec<f32>,
    work: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
    /// Magnitude of a full-scale sine after the Hann window
    reference: f32,
}

impl SpectrumAnalyzer {
    pub fn new(settings: VisualizerSettings) -> Result<Self> {
        settings.validate()?;
        let size = settings.fft_size;

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        Ok(Self {
            settings,
            fft,
            window: hann_window(size),
            input: vec![0.0; size],
            work: vec![Complex::new(0.0, 0.0); size],
            scratch,
            smoothed: vec![0.0; settings.bins()],
            reference: size as f32 / 4.0,
        })
    }

    pub fn fft_size(&self) -> usize {
        self.settings.fft_size
    }

    pub fn bins(&self) -> usize {
        self.smoothed.len()
    }

    /// Time-domain window to fill before calling [`analyze`](Self::analyze)
    pub fn input_mut(&mut self) -> &mut [f32] {
        &mut self.input
    }

    /// Copy `samples` into the input window, zero-padding short input
    pub fn load(&mut self, samples: &[f32]) -> Result<()> {
        if samples.len() > self.input.len() {
            return Err(AudioError::BufferOverflow {
                capacity: self.input.len(),
                len: samples.len(),
            });
        }
        self.input[..samples.len()].copy_from_slice(samples);
        self.input[samples.len()..].fill(0.0);
        Ok(())
    }

    /// Run one analysis pass over the input window
    ///
    /// Returns the smoothed bins, `fft_size / 2` of them.
    pub fn analyze(&mut self) -> &[f32] {
        for ((w, &x), &h) in self.work.iter_mut().zip(&self.input).zip(&self.window) {
            *w = Complex::new(x * h, 0.0);
        }

        self.fft.process_with_scratch(&mut self.work, &mut self.scratch);

        let VisualizerSettings {
            db_floor,
            db_ceiling,
            release,
            ..
        } = self.settings;
        for (bin, prev) in self.work.iter().zip(self.smoothed.iter_mut()) {
            let level = normalize_magnitude(bin.norm(), self.reference, db_floor, db_ceiling);
            *prev = smooth(*prev, level, release);
        }

        &self.smoothed
    }

    /// Let every bin fall by the release factor with no new input
    ///
    /// Bins under `SILENCE` snap to zero. Returns `false` once the whole
    /// spectrum is silent.
    pub fn decay(&mut self) -> bool {
        let release = self.settings.release;
        let mut audible = false;
        for value in &mut self.smoothed {
            *value = smooth(*value, 0.0, release);
            if *value < SILENCE {
                *value = 0.0;
            } else {
                audible = true;
            }
        }
        audible
    }

    /// Latest smoothed bins
    pub fn spectrum(&self) -> &[f32] {
        &self.smoothed
    }

    /// Bin with the highest smoothed level
    pub fn peak_bin(&self) -> Option<usize> {
        peak_bin(&self.smoothed)
    }

    /// Center frequency of `bin` at `sample_rate`
    pub fn bin_frequency(&self, bin: usize, sample_rate: f32) -> f32 {
        bin as f32 * sample_rate / self.settings.fft_size as f32
    }

    /// Forget the smoothing history
    pub fn reset(&mut self) {
        self.smoothed.fill(0.0);
        self.input.fill(0.0);
    }
}

/// Index of the largest value, ignoring DC
pub fn peak_bin(spectrum: &[f32]) -> Option<usize> {
    spectrum
        .iter()
        .enumerate()
        .skip(1)
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
}
