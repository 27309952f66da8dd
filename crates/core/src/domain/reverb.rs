//! Algorithmic reverb
//!
//! Freeverb-family network: a shared pre-delay, then per channel eight
//! parallel damped combs feeding four series all-passes, followed by
//! one-pole tone shaping, stereo width and the wet/dry mix.
//!
//! Delay-line lengths are tuned for 44.1 kHz and scaled to the stream's
//! sample rate. Changing the room size reallocates every comb and
//! all-pass line, so the current tail is discarded.

use crate::domain::audio::{AudioError, Result, StreamFormat};
use crate::domain::config::ReverbSettings;
use crate::domain::dsp::{db_to_gain, tone_high_cutoff, tone_low_cutoff, OnePoleFilter};
use tracing::debug;

/// Comb delays in samples at 44.1 kHz
pub const COMB_TUNING: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];
/// All-pass delays in samples at 44.1 kHz
pub const ALLPASS_TUNING: [usize; 4] = [225, 556, 441, 341];
/// Extra samples added to every right-channel delay
pub const STEREO_SPREAD: usize = 12;

const ALLPASS_FEEDBACK: f32 = 0.5;
const REFERENCE_RATE: f32 = 44100.0;
const MAX_PRE_DELAY_MS: f32 = 200.0;

/// Comb feedback for a reverberance percentage
///
/// `1 - exp((r - b) / (a * b))` with `a = -1/ln(0.7)` and
/// `b = 100 / (a * ln(0.02) + 1)`. Runs from ~0.30 at 0% to ~0.98 at 100%.
pub fn feedback_from_reverberance(reverberance: f32) -> f32 {
    let a = -1.0 / 0.7_f64.ln();
    let b = 100.0 / (a * 0.02_f64.ln() + 1.0);
    let r = f64::from(reverberance);
    (1.0 - ((r - b) / (a * b)).exp()) as f32
}

/// High-frequency damping factor for a damping percentage
pub fn hf_damping(damping: f32, min: f32, max: f32) -> f32 {
    damping / 100.0 * (max - min) + min
}

/// Scale applied to comb lengths for a room-size percentage
pub fn room_scale(room_size: f32) -> f32 {
    room_size / 100.0 * 0.9 + 0.1
}

fn scaled_len(scale: f32, base: usize) -> usize {
    ((scale * base as f32).round() as usize).max(1)
}

#[derive(Debug, Clone)]
struct CombFilter {
    buffer: Vec<f32>,
    index: usize,
    store: f32,
}

impl CombFilter {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len],
            index: 0,
            store: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32, feedback: f32, damping: f32) -> f32 {
        let output = self.buffer[self.index];
        self.store = output + (self.store - output) * damping;
        self.buffer[self.index] = input + self.store * feedback;
        self.index += 1;
        if self.index == self.buffer.len() {
            self.index = 0;
        }
        output
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.index = 0;
        self.store = 0.0;
    }
}

#[derive(Debug, Clone)]
struct AllpassFilter {
    buffer: Vec<f32>,
    index: usize,
}

impl AllpassFilter {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len],
            index: 0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let buffered = self.buffer[self.index];
        self.buffer[self.index] = input + buffered * ALLPASS_FEEDBACK;
        self.index += 1;
        if self.index == self.buffer.len() {
            self.index = 0;
        }
        buffered - input
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.index = 0;
    }
}

/// Frame-interleaved delay shared by all channels
#[derive(Debug, Clone)]
struct PreDelay {
    buffer: Vec<f32>,
    channels: usize,
    capacity: usize,
    delay: usize,
    cursor: usize,
}

impl PreDelay {
    fn new(sample_rate: f32, channels: usize) -> Self {
        let capacity = ((MAX_PRE_DELAY_MS * sample_rate / 1000.0).round() as usize).max(1);
        Self {
            buffer: vec![0.0; capacity * channels],
            channels,
            capacity,
            delay: 1,
            cursor: 0,
        }
    }

    fn set_delay_ms(&mut self, sample_rate: f32, ms: f32) {
        let frames = (ms * sample_rate / 1000.0).round() as usize;
        self.delay = frames.clamp(1, self.capacity);
    }

    /// Swap `frame` with the frame written `delay` frames ago
    #[inline]
    fn process(&mut self, frame: &mut [f32]) {
        let read = (self.cursor + self.capacity - self.delay) % self.capacity;
        let read_base = read * self.channels;
        let write_base = self.cursor * self.channels;
        for (ch, sample) in frame.iter_mut().enumerate().take(self.channels) {
            let delayed = self.buffer[read_base + ch];
            self.buffer[write_base + ch] = *sample;
            *sample = delayed;
        }
        self.cursor += 1;
        if self.cursor == self.capacity {
            self.cursor = 0;
        }
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.cursor = 0;
    }
}

/// Comb bank, all-pass cascade and tone filters for one channel
#[derive(Debug, Clone)]
struct ReverbChannel {
    combs: Vec<CombFilter>,
    allpasses: Vec<AllpassFilter>,
    tone_high_pass: OnePoleFilter,
    tone_low_pass: OnePoleFilter,
}

impl ReverbChannel {
    fn new(sample_rate: f32, room_size: f32, spread: usize, settings: &ReverbSettings) -> Self {
        let rate_ratio = sample_rate / REFERENCE_RATE;
        let comb_scale = room_scale(room_size) * rate_ratio;
        let (tone_high_pass, tone_low_pass) = tone_filters(sample_rate, settings);
        Self {
            combs: COMB_TUNING
                .iter()
                .map(|&base| CombFilter::new(scaled_len(comb_scale, base + spread)))
                .collect(),
            allpasses: ALLPASS_TUNING
                .iter()
                .map(|&base| AllpassFilter::new(scaled_len(rate_ratio, base + spread)))
                .collect(),
            tone_high_pass,
            tone_low_pass,
        }
    }

    #[inline]
    fn process(&mut self, input: f32, feedback: f32, damping: f32) -> f32 {
        let mut out = 0.0;
        for comb in self.combs.iter_mut().rev() {
            out += comb.process(input, feedback, damping);
        }
        for allpass in self.allpasses.iter_mut().rev() {
            out = allpass.process(out);
        }
        let out = self.tone_high_pass.process_sample(out);
        self.tone_low_pass.process_sample(out)
    }

    fn clear(&mut self) {
        self.combs.iter_mut().for_each(CombFilter::clear);
        self.allpasses.iter_mut().for_each(AllpassFilter::clear);
        self.tone_high_pass.reset();
        self.tone_low_pass.reset();
    }
}

fn tone_filters(sample_rate: f32, settings: &ReverbSettings) -> (OnePoleFilter, OnePoleFilter) {
    (
        OnePoleFilter::high_pass(sample_rate, tone_low_cutoff(settings.tone_low)),
        OnePoleFilter::low_pass(sample_rate, tone_high_cutoff(settings.tone_high)),
    )
}

/// Which parts of the reverb a settings change touched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReverbChanges {
    /// Delay lines reallocated and zeroed
    pub room: bool,
    pub pre_delay: bool,
    /// Tone filters rebuilt
    pub tone: bool,
    /// Feedback, damping, gains or width recomputed
    pub coefficients: bool,
}

impl ReverbChanges {
    pub fn any(&self) -> bool {
        self.room || self.pre_delay || self.tone || self.coefficients
    }
}

/// Mono or stereo reverb
#[derive(Debug, Clone)]
pub struct Reverb {
    sample_rate: f32,
    settings: ReverbSettings,
    channels: Vec<ReverbChannel>,
    pre_delay: PreDelay,
    feedback: f32,
    damping: f32,
    wet_gain: f32,
    dry_gain: f32,
    width: f32,
}

impl Reverb {
    /// Build a reverb for a mono or stereo stream
    pub fn new(format: StreamFormat, settings: &ReverbSettings) -> Result<Self> {
        format.validate()?;
        let channel_count = format.channel_count();
        if channel_count > 2 {
            return Err(AudioError::UnsupportedConfiguration(format!(
                "Reverb supports mono or stereo, got {channel_count} channels"
            )));
        }

        let sample_rate = format.sample_rate.as_f32();
        let settings = settings.clamped();
        let channels = (0..channel_count)
            .map(|ch| {
                ReverbChannel::new(sample_rate, settings.room_size, ch * STEREO_SPREAD, &settings)
            })
            .collect();
        let mut pre_delay = PreDelay::new(sample_rate, channel_count);
        pre_delay.set_delay_ms(sample_rate, settings.pre_delay_ms);

        let mut reverb = Self {
            sample_rate,
            settings,
            channels,
            pre_delay,
            feedback: 0.0,
            damping: 0.0,
            wet_gain: 0.0,
            dry_gain: 1.0,
            width: 1.0,
        };
        reverb.update_coefficients();
        Ok(reverb)
    }

    pub fn settings(&self) -> &ReverbSettings {
        &self.settings
    }

    pub fn feedback(&self) -> f32 {
        self.feedback
    }

    /// Apply new settings, touching only the substages that changed
    pub fn apply_settings(&mut self, settings: &ReverbSettings) -> ReverbChanges {
        let next = settings.clamped();
        let prev = self.settings;
        let mut changes = ReverbChanges::default();
        if next == prev {
            return changes;
        }
        self.settings = next;

        if next.room_size != prev.room_size {
            let sample_rate = self.sample_rate;
            for (ch, channel) in self.channels.iter_mut().enumerate() {
                *channel =
                    ReverbChannel::new(sample_rate, next.room_size, ch * STEREO_SPREAD, &next);
            }
            changes.room = true;
            changes.tone = true;
        }

        if next.pre_delay_ms != prev.pre_delay_ms {
            self.pre_delay.set_delay_ms(self.sample_rate, next.pre_delay_ms);
            changes.pre_delay = true;
        }

        if !changes.room && (next.tone_low != prev.tone_low || next.tone_high != prev.tone_high) {
            for channel in &mut self.channels {
                let (hp, lp) = tone_filters(self.sample_rate, &next);
                channel.tone_high_pass = hp;
                channel.tone_low_pass = lp;
            }
            changes.tone = true;
        }

        if next.reverberance != prev.reverberance
            || next.damping != prev.damping
            || next.damping_min != prev.damping_min
            || next.damping_max != prev.damping_max
            || next.wet_gain_db != prev.wet_gain_db
            || next.dry_gain_db != prev.dry_gain_db
            || next.wet_scale != prev.wet_scale
            || next.stereo_width != prev.stereo_width
        {
            self.update_coefficients();
            changes.coefficients = true;
        }

        debug!(
            room = changes.room,
            pre_delay = changes.pre_delay,
            tone = changes.tone,
            coefficients = changes.coefficients,
            "Reverb reconfigured"
        );
        changes
    }

    fn update_coefficients(&mut self) {
        let s = &self.settings;
        self.feedback = feedback_from_reverberance(s.reverberance);
        self.damping = hf_damping(s.damping, s.damping_min, s.damping_max);
        self.wet_gain = db_to_gain(s.wet_gain_db) * s.wet_scale;
        self.dry_gain = db_to_gain(s.dry_gain_db);
        self.width = s.stereo_width / 100.0;
    }

    /// Process one mono sample
    #[inline]
    pub fn process_mono(&mut self, input: f32) -> f32 {
        let mut frame = [input];
        self.pre_delay.process(&mut frame);
        let wet = self.channels[0].process(frame[0], self.feedback, self.damping);
        input * self.dry_gain + wet * self.wet_gain
    }

    /// Process one stereo frame
    ///
    /// On a mono reverb both inputs are summed to mono and the result
    /// duplicated.
    #[inline]
    pub fn process_stereo(&mut self, left: f32, right: f32) -> (f32, f32) {
        if self.channels.len() < 2 {
            let out = self.process_mono((left + right) * 0.5);
            return (out, out);
        }

        let mut frame = [left, right];
        self.pre_delay.process(&mut frame);
        let (feedback, damping) = (self.feedback, self.damping);
        let mut wet_l = self.channels[0].process(frame[0], feedback, damping);
        let mut wet_r = self.channels[1].process(frame[1], feedback, damping);

        if self.width < 1.0 {
            let mono = (wet_l + wet_r) * 0.5;
            wet_l = mono + (wet_l - mono) * self.width;
            wet_r = mono + (wet_r - mono) * self.width;
        }

        (
            left * self.dry_gain + wet_l * self.wet_gain,
            right * self.dry_gain + wet_r * self.wet_gain,
        )
    }

    /// Clear every delay line and filter, keeping allocations
    pub fn reset(&mut self) {
        self.channels.iter_mut().for_each(ReverbChannel::clear);
        self.pre_delay.clear();
    }
}
