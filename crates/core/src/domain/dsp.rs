//! Filter and dynamics building blocks for the effects chain
//!
//! This module provides:
//! - Biquad high-pass / low-pass filters (RBJ cookbook, Direct Form I)
//! - One-pole tone filters used inside the reverb wet path
//! - A stateless soft-knee peak limiter
//!
//! All processors are designed for:
//! - Zero allocations in the hot path
//! - Per-sample processing so stages can be reordered freely
//! - Cheap reinitialization when a parameter changes

use serde::{Deserialize, Serialize};

/// Parameter constraints for the filter stage
///
/// All parameters are clamped to these ranges to prevent
/// invalid states and ensure numerical stability.
pub mod params {
    /// Lowest cutoff accepted by the biquad stages (Hz)
    pub const CUTOFF_MIN: f32 = 10.0;
    /// Highest cutoff as a fraction of the sample rate (just under Nyquist)
    pub const CUTOFF_MAX_RATIO: f32 = 0.49;

    /// Q used by the high-pass and low-pass stages
    pub const FILTER_Q: f32 = 1.0;

    /// Limiter knee (linear amplitude)
    pub const LIMITER_THRESHOLD: f32 = 0.9;
    /// Limiter output ceiling (linear amplitude)
    pub const LIMITER_CEILING: f32 = 1.0;

    /// Centre of the tone-control pitch range (MIDI note)
    pub const TONE_PITCH_CENTER: f32 = 72.0;
    /// Semitones covered by a tone control at 100%
    pub const TONE_PITCH_SPAN: f32 = 48.0;
}

/// Convert decibels to a linear gain factor
#[inline]
pub fn db_to_gain(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert a MIDI pitch to frequency in Hz (A4 = 69 = 440 Hz)
#[inline]
pub fn pitch_to_hz(pitch: f32) -> f32 {
    440.0 * 2.0_f32.powf((pitch - 69.0) / 12.0)
}

/// Cutoff of the post-reverb high-pass for a "tone low" percentage
///
/// 0% puts the corner at pitch 72 (~523 Hz); 100% moves it down to
/// pitch 24 (~33 Hz), letting the full low end through.
pub fn tone_low_cutoff(tone_low_percent: f32) -> f32 {
    let pct = tone_low_percent.clamp(0.0, 100.0);
    pitch_to_hz(params::TONE_PITCH_CENTER - pct / 100.0 * params::TONE_PITCH_SPAN)
}

/// Cutoff of the post-reverb low-pass for a "tone high" percentage
pub fn tone_high_cutoff(tone_high_percent: f32) -> f32 {
    let pct = tone_high_percent.clamp(0.0, 100.0);
    pitch_to_hz(params::TONE_PITCH_CENTER + pct / 100.0 * params::TONE_PITCH_SPAN)
}

/// Clamp a cutoff into the range a biquad can realize at `sample_rate`
#[inline]
pub fn clamp_cutoff(sample_rate: f32, cutoff_hz: f32) -> f32 {
    cutoff_hz.clamp(params::CUTOFF_MIN, sample_rate * params::CUTOFF_MAX_RATIO)
}

// ============================================================================
// BIQUAD FILTER
// ============================================================================

/// Biquad filter coefficients
///
/// Direct Form I implementation for numerical stability.
/// Coefficients are pre-computed to avoid per-sample calculations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BiquadCoeffs {
    /// Numerator coefficients
    pub b0: f32,
    pub b1: f32,
    pub b2: f32,
    /// Denominator coefficients (a0 is normalized to 1.0)
    pub a1: f32,
    pub a2: f32,
}

impl Default for BiquadCoeffs {
    fn default() -> Self {
        // Unity gain (no filtering)
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }
}

impl BiquadCoeffs {
    /// Calculate coefficients for a second-order low-pass filter
    ///
    /// # Parameters
    /// - `sample_rate`: Audio sample rate in Hz
    /// - `freq`: Cutoff frequency in Hz (clamped below Nyquist)
    /// - `q`: Q factor (resonance)
    #[must_use]
    pub fn low_pass(sample_rate: f32, freq: f32, q: f32) -> Self {
        let freq = clamp_cutoff(sample_rate, freq);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);

        let b0 = (1.0 - cos_w0) / 2.0;
        let b1 = 1.0 - cos_w0;
        let b2 = (1.0 - cos_w0) / 2.0;
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_w0;
        let a2 = 1.0 - alpha;

        // Normalize by a0
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// Calculate coefficients for a second-order high-pass filter
    #[must_use]
    pub fn high_pass(sample_rate: f32, freq: f32, q: f32) -> Self {
        let freq = clamp_cutoff(sample_rate, freq);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);

        let b0 = (1.0 + cos_w0) / 2.0;
        let b1 = -(1.0 + cos_w0);
        let b2 = (1.0 + cos_w0) / 2.0;
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_w0;
        let a2 = 1.0 - alpha;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }
}

/// Stateful biquad filter using Direct Form I
///
/// Direct Form I is chosen over Transposed Direct Form II for
/// better numerical stability with low-frequency filters.
#[derive(Debug, Clone, PartialEq)]
pub struct BiquadFilter {
    coeffs: BiquadCoeffs,
    // Previous input samples (x[n-1], x[n-2])
    x1: f32,
    x2: f32,
    // Previous output samples (y[n-1], y[n-2])
    y1: f32,
    y2: f32,
}

impl BiquadFilter {
    /// Create a new biquad filter with given coefficients
    pub fn new(coeffs: BiquadCoeffs) -> Self {
        Self {
            coeffs,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    /// Create a bypass filter (unity gain)
    pub fn bypass() -> Self {
        Self::new(BiquadCoeffs::default())
    }

    /// High-pass at `cutoff_hz` with the chain's fixed Q
    pub fn high_pass(sample_rate: f32, cutoff_hz: f32) -> Self {
        Self::new(BiquadCoeffs::high_pass(
            sample_rate,
            cutoff_hz,
            params::FILTER_Q,
        ))
    }

    /// Low-pass at `cutoff_hz` with the chain's fixed Q
    pub fn low_pass(sample_rate: f32, cutoff_hz: f32) -> Self {
        Self::new(BiquadCoeffs::low_pass(
            sample_rate,
            cutoff_hz,
            params::FILTER_Q,
        ))
    }

    pub fn coeffs(&self) -> BiquadCoeffs {
        self.coeffs
    }

    /// Process a single sample
    #[inline]
    pub fn process_sample(&mut self, x: f32) -> f32 {
        // Direct Form I: y[n] = b0*x[n] + b1*x[n-1] + b2*x[n-2]
        //                        - a1*y[n-1] - a2*y[n-2]
        let y = self.coeffs.b0 * x + self.coeffs.b1 * self.x1 + self.coeffs.b2 * self.x2
            - self.coeffs.a1 * self.y1
            - self.coeffs.a2 * self.y2;

        // Update state
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;

        y
    }

    /// Process a buffer of samples
    pub fn process(&mut self, buffer: &mut [f32]) {
        for sample in buffer.iter_mut() {
            *sample = self.process_sample(*sample);
        }
    }

    /// Reset filter state
    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }
}

// ============================================================================
// ONE-POLE TONE FILTER
// ============================================================================

/// First-order IIR filter: `y[n] = b0*x[n] + b1*x[n-1] - a1*y[n-1]`
///
/// Used as the reverb's post-EQ. Retuning builds a fresh filter, so
/// history is cleared on every change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OnePoleFilter {
    b0: f32,
    b1: f32,
    a1: f32,
    x1: f32,
    y1: f32,
}

impl OnePoleFilter {
    /// 6 dB/oct low-pass with corner at `cutoff_hz`
    pub fn low_pass(sample_rate: f32, cutoff_hz: f32) -> Self {
        let a1 = Self::pole(sample_rate, cutoff_hz);
        Self {
            b0: 1.0 + a1,
            b1: 0.0,
            a1,
            x1: 0.0,
            y1: 0.0,
        }
    }

    /// 6 dB/oct high-pass with corner at `cutoff_hz`
    pub fn high_pass(sample_rate: f32, cutoff_hz: f32) -> Self {
        let a1 = Self::pole(sample_rate, cutoff_hz);
        let b0 = (1.0 - a1) / 2.0;
        Self {
            b0,
            b1: -b0,
            a1,
            x1: 0.0,
            y1: 0.0,
        }
    }

    #[inline]
    fn pole(sample_rate: f32, cutoff_hz: f32) -> f32 {
        let cutoff = cutoff_hz.clamp(1.0, sample_rate * 0.5);
        -(-2.0 * std::f32::consts::PI * cutoff / sample_rate).exp()
    }

    #[inline]
    pub fn process_sample(&mut self, x: f32) -> f32 {
        let y = self.b0 * x + self.b1 * self.x1 - self.a1 * self.y1;
        self.x1 = x;
        self.y1 = y;
        y
    }

    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.y1 = 0.0;
    }
}

// ============================================================================
// SOFT-KNEE LIMITER
// ============================================================================

/// Stateless soft-knee peak limiter
///
/// Samples at or below the threshold pass untouched. Above it the excess
/// is squashed by `e / (1 + e)` and the result is clamped to the ceiling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limiter {
    threshold: f32,
    ceiling: f32,
}

impl Default for Limiter {
    fn default() -> Self {
        Self {
            threshold: params::LIMITER_THRESHOLD,
            ceiling: params::LIMITER_CEILING,
        }
    }
}

impl Limiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Limit a single sample
    #[inline]
    pub fn process_sample(&self, x: f32) -> f32 {
        let abs = x.abs();
        if abs <= self.threshold {
            return x;
        }
        let excess = abs - self.threshold;
        let compressed = (self.threshold + excess / (1.0 + excess)).min(self.ceiling);
        compressed.copysign(x)
    }

    /// Limit a buffer in-place
    pub fn process(&self, buffer: &mut [f32]) {
        for sample in buffer.iter_mut() {
            *sample = self.process_sample(*sample);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
