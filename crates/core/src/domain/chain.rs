//! Effects chain orchestrator
//!
//! Wraps an upstream [`AudioFrameStream`] and applies, per pull:
//! slow-down resampling, high-pass, low-pass and reverb in the configured
//! order, makeup gain, then the limiter.
//!
//! The configuration is copied once at the top of every `read`. Stages
//! whose parameters changed since the previous pull are rebuilt before any
//! sample is processed; the rebuild is reported through [`StageChanges`]
//! and may cause a short discontinuity in that one block.

use crate::domain::audio::{AudioError, AudioFrameStream, Result, StreamFormat};
use crate::domain::config::{ConfigProvider, EffectsConfig, FilterSettings};
use crate::domain::dsp::{db_to_gain, BiquadFilter, Limiter};
use crate::domain::resample::SlowResampler;
use crate::domain::reverb::{Reverb, ReverbChanges};
use std::sync::Arc;
use tracing::{debug, info};

/// Per-sample stages that can be reordered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    HighPass,
    LowPass,
    Reverb,
}

/// Substages rebuilt during the last pull
///
/// All `false` means the chain stayed stable for that block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageChanges {
    pub high_pass: bool,
    pub low_pass: bool,
    pub reverb: ReverbChanges,
    /// Frames left over from slow-down were played out first
    pub resampler_drained: bool,
}

impl StageChanges {
    pub fn any(&self) -> bool {
        self.high_pass || self.low_pass || self.reverb.any() || self.resampler_drained
    }
}

/// Pull-based effects processor around an upstream source
pub struct EffectsChain<S> {
    source: S,
    provider: Arc<dyn ConfigProvider>,
    format: StreamFormat,
    channels: usize,
    sample_rate: f32,

    high_pass: Vec<BiquadFilter>,
    low_pass: Vec<BiquadFilter>,
    applied_high_pass: FilterSettings,
    applied_low_pass: FilterSettings,
    reverb: Reverb,
    reverb_active: bool,
    resampler: SlowResampler,
    limiter: Limiter,

    last_changes: StageChanges,
}

impl<S: AudioFrameStream> EffectsChain<S> {
    /// Build a chain around a mono or stereo source
    pub fn new(source: S, provider: Arc<dyn ConfigProvider>) -> Result<Self> {
        let format = source.format();
        format.validate()?;
        let channels = format.channel_count();
        if channels > 2 {
            return Err(AudioError::UnsupportedConfiguration(format!(
                "Effects chain supports mono or stereo, got {channels} channels"
            )));
        }

        let config = provider.snapshot().clamped();
        let sample_rate = format.sample_rate.as_f32();
        let reverb = Reverb::new(format, &config.reverb)?;

        info!(
            sample_rate = format.sample_rate.hz(),
            channels,
            order = ?config.order,
            "Effects chain created"
        );

        Ok(Self {
            source,
            provider,
            format,
            channels,
            sample_rate,
            high_pass: vec![
                BiquadFilter::high_pass(sample_rate, config.high_pass.cutoff_hz);
                channels
            ],
            low_pass: vec![
                BiquadFilter::low_pass(sample_rate, config.low_pass.cutoff_hz);
                channels
            ],
            applied_high_pass: config.high_pass,
            applied_low_pass: config.low_pass,
            reverb,
            reverb_active: config.reverb_enabled,
            resampler: SlowResampler::with_capacity(channels, 4096),
            limiter: Limiter::new(),
            last_changes: StageChanges::default(),
        })
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn into_source(self) -> S {
        self.source
    }

    /// Substages rebuilt during the most recent `read`
    pub fn last_changes(&self) -> StageChanges {
        self.last_changes
    }

    /// Clear filter, reverb and resampler state; the source is untouched
    pub fn reset(&mut self) {
        self.high_pass.iter_mut().for_each(BiquadFilter::reset);
        self.low_pass.iter_mut().for_each(BiquadFilter::reset);
        self.reverb.reset();
        self.resampler.reset();
        self.last_changes = StageChanges::default();
        debug!("Effects chain reset");
    }

    /// Pull from upstream, through the resampler when slow-down is on
    fn pull(
        &mut self,
        config: &EffectsConfig,
        buffer: &mut [f32],
        frames: usize,
        changes: &mut StageChanges,
    ) -> usize {
        if config.slow.enabled {
            let speed = SlowResampler::speed_for(config.slow.amount);
            return self.resampler.read(&mut self.source, buffer, frames, speed);
        }

        let ch = self.channels;
        let drained = self.resampler.drain(buffer, frames);
        changes.resampler_drained = drained > 0;
        if drained == frames {
            return drained;
        }
        let read = self
            .source
            .read(&mut buffer[drained * ch..frames * ch], frames - drained);
        drained + read.min(frames - drained)
    }

    /// Rebuild substages whose parameters changed
    fn reconfigure(&mut self, config: &EffectsConfig, changes: &mut StageChanges) {
        let sr = self.sample_rate;

        if config.high_pass.cutoff_hz != self.applied_high_pass.cutoff_hz {
            self.high_pass.fill(BiquadFilter::high_pass(sr, config.high_pass.cutoff_hz));
            changes.high_pass = true;
        } else if config.high_pass.enabled && !self.applied_high_pass.enabled {
            self.high_pass.iter_mut().for_each(BiquadFilter::reset);
            changes.high_pass = true;
        }
        self.applied_high_pass = config.high_pass;

        if config.low_pass.cutoff_hz != self.applied_low_pass.cutoff_hz {
            self.low_pass.fill(BiquadFilter::low_pass(sr, config.low_pass.cutoff_hz));
            changes.low_pass = true;
        } else if config.low_pass.enabled && !self.applied_low_pass.enabled {
            self.low_pass.iter_mut().for_each(BiquadFilter::reset);
            changes.low_pass = true;
        }
        self.applied_low_pass = config.low_pass;

        changes.reverb = self.reverb.apply_settings(&config.reverb);
        if config.reverb_enabled && !self.reverb_active {
            // Stale tail from the last time the reverb ran
            self.reverb.reset();
        }
        self.reverb_active = config.reverb_enabled;

        if changes.any() {
            debug!(
                high_pass = changes.high_pass,
                low_pass = changes.low_pass,
                reverb = changes.reverb.any(),
                drained = changes.resampler_drained,
                "Effects chain reconfigured"
            );
        }
    }

    fn process_mono(&mut self, config: &EffectsConfig, samples: &mut [f32]) {
        let order = config.order.stages();
        let (hp_on, lp_on, rv_on) = (
            config.high_pass.enabled,
            config.low_pass.enabled,
            config.reverb_enabled,
        );

        for sample in samples.iter_mut() {
            let mut x = *sample;
            for stage in order {
                x = match stage {
                    Stage::HighPass if hp_on => self.high_pass[0].process_sample(x),
                    Stage::LowPass if lp_on => self.low_pass[0].process_sample(x),
                    Stage::Reverb if rv_on => self.reverb.process_mono(x),
                    _ => x,
                };
            }
            *sample = x;
        }
    }

    fn process_stereo(&mut self, config: &EffectsConfig, samples: &mut [f32]) {
        let order = config.order.stages();
        let (hp_on, lp_on, rv_on) = (
            config.high_pass.enabled,
            config.low_pass.enabled,
            config.reverb_enabled,
        );

        for frame in samples.chunks_exact_mut(2) {
            let (mut l, mut r) = (frame[0], frame[1]);
            for stage in order {
                match stage {
                    Stage::HighPass if hp_on => {
                        l = self.high_pass[0].process_sample(l);
                        r = self.high_pass[1].process_sample(r);
                    }
                    Stage::LowPass if lp_on => {
                        l = self.low_pass[0].process_sample(l);
                        r = self.low_pass[1].process_sample(r);
                    }
                    Stage::Reverb if rv_on => {
                        (l, r) = self.reverb.process_stereo(l, r);
                    }
                    _ => {}
                }
            }
            frame[0] = l;
            frame[1] = r;
        }
    }
}

impl<S: AudioFrameStream> AudioFrameStream for EffectsChain<S> {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn read(&mut self, buffer: &mut [f32], frames: usize) -> usize {
        let config = self.provider.snapshot().clamped();
        let ch = self.channels;
        let frames = frames.min(buffer.len() / ch);
        let mut changes = StageChanges::default();

        let produced = self.pull(&config, buffer, frames, &mut changes);
        if produced == 0 {
            // End of stream: leave effect state as is
            self.last_changes = changes;
            return 0;
        }

        self.reconfigure(&config, &mut changes);
        self.last_changes = changes;

        if !config.any_stage_enabled() {
            return produced;
        }

        let samples = &mut buffer[..produced * ch];
        if ch == 1 {
            self.process_mono(&config, samples);
        } else {
            self.process_stereo(&config, samples);
        }

        if config.makeup_gain.enabled {
            let gain = db_to_gain(config.makeup_gain.gain_db);
            samples.iter_mut().for_each(|s| *s *= gain);
        }

        self.limiter.process(samples);
        produced
    }
}
