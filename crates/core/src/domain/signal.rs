//! Test and demo signal sources
//!
//! Decoding is out of scope for the pipeline, so the CLI, benchmarks and
//! tests drive it from these in-memory streams.

use crate::domain::audio::{AudioFrameStream, StreamFormat};
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;

/// Pre-rendered interleaved samples played once
#[derive(Debug, Clone)]
pub struct BufferSource {
    format: StreamFormat,
    samples: Vec<f32>,
    position: usize,
}

impl BufferSource {
    /// `samples` is interleaved; a trailing partial frame is ignored
    pub fn new(format: StreamFormat, samples: Vec<f32>) -> Self {
        Self {
            format,
            samples,
            position: 0,
        }
    }

    pub fn remaining_frames(&self) -> usize {
        (self.samples.len() - self.position) / self.format.channel_count().max(1)
    }

    pub fn rewind(&mut self) {
        self.position = 0;
    }
}

impl AudioFrameStream for BufferSource {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn read(&mut self, buffer: &mut [f32], frames: usize) -> usize {
        let ch = self.format.channel_count().max(1);
        let n = frames.min(self.remaining_frames()).min(buffer.len() / ch);
        let len = n * ch;
        buffer[..len].copy_from_slice(&self.samples[self.position..self.position + len]);
        self.position += len;
        n
    }
}

/// Generator waveform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Waveform {
    #[default]
    Sine,
    /// A single unit sample at frame 0
    Impulse,
    /// Deterministic white noise
    Noise,
    Silence,
}

/// Synthesizes a waveform on every channel, optionally for a fixed length
#[derive(Debug, Clone)]
pub struct SignalGenerator {
    format: StreamFormat,
    waveform: Waveform,
    frequency: f32,
    amplitude: f32,
    phase: f32,
    frame: u64,
    total_frames: Option<u64>,
    noise_state: u32,
}

impl SignalGenerator {
    pub fn new(format: StreamFormat, waveform: Waveform) -> Self {
        Self {
            format,
            waveform,
            frequency: 440.0,
            amplitude: 0.5,
            phase: 0.0,
            frame: 0,
            total_frames: None,
            noise_state: 0x9E37_79B9,
        }
    }

    pub fn sine(format: StreamFormat, frequency: f32, amplitude: f32) -> Self {
        Self::new(format, Waveform::Sine)
            .with_frequency(frequency)
            .with_amplitude(amplitude)
    }

    pub fn with_frequency(mut self, frequency: f32) -> Self {
        self.frequency = frequency;
        self
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude;
        self
    }

    /// Stop after `seconds` of audio
    pub fn with_duration(mut self, seconds: f32) -> Self {
        let frames = (seconds.max(0.0) * self.format.sample_rate.as_f32()).round() as u64;
        self.total_frames = Some(frames);
        self
    }

    pub fn with_seed(mut self, seed: u32) -> Self {
        // xorshift must not start at zero
        self.noise_state = seed.max(1);
        self
    }

    pub fn frames_generated(&self) -> u64 {
        self.frame
    }

    #[inline]
    fn next_noise(&mut self) -> f32 {
        let mut x = self.noise_state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.noise_state = x;
        (x as f32 / u32::MAX as f32) * 2.0 - 1.0
    }

    #[inline]
    fn next_value(&mut self) -> f32 {
        match self.waveform {
            Waveform::Sine => {
                let value = (self.phase * TAU).sin();
                self.phase += self.frequency / self.format.sample_rate.as_f32();
                self.phase -= self.phase.floor();
                value * self.amplitude
            }
            Waveform::Impulse => {
                if self.frame == 0 {
                    self.amplitude
                } else {
                    0.0
                }
            }
            Waveform::Noise => self.next_noise() * self.amplitude,
            Waveform::Silence => 0.0,
        }
    }
}

impl AudioFrameStream for SignalGenerator {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn read(&mut self, buffer: &mut [f32], frames: usize) -> usize {
        let ch = self.format.channel_count().max(1);
        let mut n = frames.min(buffer.len() / ch);
        if let Some(total) = self.total_frames {
            n = n.min(total.saturating_sub(self.frame) as usize);
        }

        for frame in buffer[..n * ch].chunks_exact_mut(ch) {
            let value = self.next_value();
            frame.fill(value);
            self.frame += 1;
        }
        n
    }
}
