//! Slow-down by linear-interpolation resampling
//!
//! Reads upstream frames into a reusable scratch buffer and walks it with a
//! fractional position that advances by `speed` per output frame. Frames not
//! yet consumed stay buffered between pulls, so consecutive reads are
//! continuous and the position never drifts.

use crate::domain::audio::AudioFrameStream;

/// Slowest playback speed the resampler will run at
pub const MIN_SPEED: f64 = 0.5;

/// Linear-interpolation resampler for speeds in `[0.5, 1.0]`
#[derive(Debug, Clone)]
pub struct SlowResampler {
    channels: usize,
    /// Interleaved upstream frames, `buffered` of them valid
    scratch: Vec<f32>,
    buffered: usize,
    /// Position relative to the first buffered frame, in frames
    position: f64,
}

impl SlowResampler {
    pub fn new(channels: usize) -> Self {
        Self {
            channels: channels.max(1),
            scratch: Vec::new(),
            buffered: 0,
            position: 0.0,
        }
    }

    /// Pre-size the scratch buffer for pulls of up to `max_frames`
    pub fn with_capacity(channels: usize, max_frames: usize) -> Self {
        let mut resampler = Self::new(channels);
        let len = Self::lookahead_frames(resampler.channels, max_frames, 1.0) * resampler.channels;
        resampler.scratch.resize(len, 0.0);
        resampler
    }

    /// Playback speed for a 0..=100 slow amount
    pub fn speed_for(amount: f32) -> f64 {
        (1.0 - f64::from(amount) / 100.0).clamp(MIN_SPEED, 1.0)
    }

    /// Upstream frames kept buffered for a pull of `frames` at `speed`
    fn lookahead_frames(channels: usize, frames: usize, speed: f64) -> usize {
        (frames as f64 * speed).ceil() as usize + channels + 2
    }

    pub fn buffered_frames(&self) -> usize {
        self.buffered
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    /// Produce up to `frames` resampled frames into `out`
    ///
    /// Returns fewer frames when upstream cannot supply the frames the
    /// interpolation needs, `0` once upstream is exhausted.
    pub fn read<S>(&mut self, source: &mut S, out: &mut [f32], frames: usize, speed: f64) -> usize
    where
        S: AudioFrameStream + ?Sized,
    {
        let ch = self.channels;
        let speed = speed.clamp(MIN_SPEED, 1.0);
        let frames = frames.min(out.len() / ch);

        let wanted = Self::lookahead_frames(ch, frames, speed);
        if self.buffered < wanted {
            if self.scratch.len() < wanted * ch {
                self.scratch.resize(wanted * ch, 0.0);
            }
            let deficit = wanted - self.buffered;
            let start = self.buffered * ch;
            let got = source.read(&mut self.scratch[start..wanted * ch], deficit);
            self.buffered += got.min(deficit);
        }

        let mut produced = 0;
        while produced < frames {
            let index = self.position.floor() as usize;
            let frac = (self.position - index as f64) as f32;
            if index >= self.buffered || (frac > 0.0 && index + 1 >= self.buffered) {
                break;
            }

            let current = &self.scratch[index * ch..(index + 1) * ch];
            let dest = &mut out[produced * ch..(produced + 1) * ch];
            if frac > 0.0 {
                let next = &self.scratch[(index + 1) * ch..(index + 2) * ch];
                for ((d, &a), &b) in dest.iter_mut().zip(current).zip(next) {
                    *d = a + (b - a) * frac;
                }
            } else {
                dest.copy_from_slice(current);
            }

            produced += 1;
            self.position += speed;
        }

        self.discard_consumed();
        produced
    }

    /// Copy frames still buffered to `out` and forget the position
    ///
    /// Used when slow-down switches off so no upstream audio is skipped.
    pub fn drain(&mut self, out: &mut [f32], frames: usize) -> usize {
        let ch = self.channels;
        let start = (self.position.ceil() as usize).min(self.buffered);
        let count = (self.buffered - start).min(frames).min(out.len() / ch);

        out[..count * ch].copy_from_slice(&self.scratch[start * ch..(start + count) * ch]);

        let consumed = start + count;
        self.scratch.copy_within(consumed * ch..self.buffered * ch, 0);
        self.buffered -= consumed;
        self.position = 0.0;
        count
    }

    /// Drop buffered frames and the position, keeping the allocation
    pub fn reset(&mut self) {
        self.buffered = 0;
        self.position = 0.0;
    }

    fn discard_consumed(&mut self) {
        let consumed = (self.position.floor() as usize).min(self.buffered);
        if consumed == 0 {
            return;
        }
        let ch = self.channels;
        self.scratch.copy_within(consumed * ch..self.buffered * ch, 0);
        self.buffered -= consumed;
        self.position -= consumed as f64;
    }
}
