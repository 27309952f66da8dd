//! Domain entities and signal-processing rules

pub mod audio;
pub mod chain;
pub mod config;
pub mod dsp;
pub mod resample;
pub mod reverb;
pub mod signal;

// Re-export specific items to avoid ambiguous glob imports
pub use audio::{AudioError, AudioFrameStream, ChannelCount, SampleRate, StreamFormat};
pub use chain::{EffectsChain, Stage, StageChanges};
pub use config::{
    ChainOrder, ConfigProvider, EffectsConfig, FilterSettings, GainSettings, ReverbPreset,
    ReverbSettings, SharedConfig, SlowSettings,
};
pub use dsp::{db_to_gain, BiquadCoeffs, BiquadFilter, Limiter, OnePoleFilter};
pub use resample::SlowResampler;
pub use reverb::Reverb;
pub use signal::{BufferSource, SignalGenerator, Waveform};
