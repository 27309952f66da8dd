//! Audio stream abstractions and domain models
//!
//! This module defines the pull-based stream interface every stage of the
//! pipeline speaks. Decoders and device outputs sit outside this crate and
//! only meet the pipeline through [`AudioFrameStream`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur in the audio subsystem
#[derive(Debug, Error)]
pub enum AudioError {
    /// Error while setting up or running a stream stage
    #[error("Stream error: {0}")]
    StreamError(String),

    /// Invalid configuration for a pipeline stage
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Stage does not support the requested stream format
    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    /// Caller passed more samples than the destination holds
    #[error("Buffer overflow: capacity {capacity}, got {len}")]
    BufferOverflow { capacity: usize, len: usize },
}

pub type Result<T> = std::result::Result<T, AudioError>;

/// Audio sample rate in Hz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleRate {
    Hz44100,
    Hz48000,
    Hz96000,
    Hz192000,
    Custom(u32),
}

impl SampleRate {
    pub fn hz(&self) -> u32 {
        match self {
            SampleRate::Hz44100 => 44100,
            SampleRate::Hz48000 => 48000,
            SampleRate::Hz96000 => 96000,
            SampleRate::Hz192000 => 192000,
            SampleRate::Custom(hz) => *hz,
        }
    }

    pub fn from_hz(hz: u32) -> Self {
        match hz {
            44100 => SampleRate::Hz44100,
            48000 => SampleRate::Hz48000,
            96000 => SampleRate::Hz96000,
            192000 => SampleRate::Hz192000,
            hz => SampleRate::Custom(hz),
        }
    }

    /// Sample rate as a float, for coefficient math
    #[inline]
    pub fn as_f32(&self) -> f32 {
        self.hz() as f32
    }
}

/// Number of interleaved audio channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelCount {
    Mono,
    Stereo,
    Surround(u16),
}

impl ChannelCount {
    pub fn count(&self) -> u16 {
        match self {
            ChannelCount::Mono => 1,
            ChannelCount::Stereo => 2,
            ChannelCount::Surround(n) => *n,
        }
    }

    pub fn from_count(count: u16) -> Self {
        match count {
            1 => ChannelCount::Mono,
            2 => ChannelCount::Stereo,
            n => ChannelCount::Surround(n),
        }
    }
}

/// Shape of an interleaved `f32` stream
///
/// Fixed for the lifetime of a stream instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFormat {
    pub sample_rate: SampleRate,
    pub channels: ChannelCount,
}

impl StreamFormat {
    pub fn new(sample_rate: SampleRate, channels: ChannelCount) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Channel count as a `usize`, for buffer indexing
    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channels.count() as usize
    }

    /// Reject formats no stage can process
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate.hz() == 0 {
            return Err(AudioError::InvalidConfiguration(
                "Sample rate must be non-zero".to_string(),
            ));
        }
        if self.channels.count() == 0 {
            return Err(AudioError::InvalidConfiguration(
                "Channel count must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for StreamFormat {
    fn default() -> Self {
        Self {
            sample_rate: SampleRate::Hz44100,
            channels: ChannelCount::Stereo,
        }
    }
}

/// Pull-based source of interleaved `f32` frames
///
/// `read` fills `buffer` with up to `frames` frames (`frames * channels`
/// samples) and returns how many frames it produced. The result never
/// exceeds `frames`; `0` signals end-of-stream.
///
/// Implementations called from the audio thread must not block or
/// allocate in steady state.
pub trait AudioFrameStream: Send {
    /// Stream format, fixed for the lifetime of the instance
    fn format(&self) -> StreamFormat;

    /// Pull up to `frames` frames into `buffer`
    fn read(&mut self, buffer: &mut [f32], frames: usize) -> usize;
}

impl<S: AudioFrameStream + ?Sized> AudioFrameStream for Box<S> {
    fn format(&self) -> StreamFormat {
        (**self).format()
    }

    fn read(&mut self, buffer: &mut [f32], frames: usize) -> usize {
        (**self).read(buffer, frames)
    }
}

impl<S: AudioFrameStream + ?Sized> AudioFrameStream for &mut S {
    fn format(&self) -> StreamFormat {
        (**self).format()
    }

    fn read(&mut self, buffer: &mut [f32], frames: usize) -> usize {
        (**self).read(buffer, frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_rate_conversion() {
        assert_eq!(SampleRate::Hz48000.hz(), 48000);
        assert_eq!(SampleRate::from_hz(44100), SampleRate::Hz44100);
        assert_eq!(SampleRate::Custom(22050).hz(), 22050);
        assert_eq!(SampleRate::Hz44100.as_f32(), 44100.0);
    }

    #[test]
    fn test_channel_count() {
        assert_eq!(ChannelCount::Mono.count(), 1);
        assert_eq!(ChannelCount::Stereo.count(), 2);
        assert_eq!(ChannelCount::Surround(6).count(), 6);
        assert_eq!(ChannelCount::from_count(2), ChannelCount::Stereo);
        assert_eq!(ChannelCount::from_count(6), ChannelCount::Surround(6));
    }

    #[test]
    fn test_stream_format_default() {
        let format = StreamFormat::default();
        assert_eq!(format.sample_rate.hz(), 44100);
        assert_eq!(format.channel_count(), 2);
        assert!(format.validate().is_ok());
    }

    #[test]
    fn test_stream_format_rejects_zero_rate() {
        let format = StreamFormat::new(SampleRate::Custom(0), ChannelCount::Stereo);
        assert!(matches!(
            format.validate(),
            Err(AudioError::InvalidConfiguration(_))
        ));

        let format = StreamFormat::new(SampleRate::Hz48000, ChannelCount::Surround(0));
        assert!(format.validate().is_err());
    }
}
