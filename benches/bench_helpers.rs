//! Helper utilities for benchmarks

use std::f32::consts::PI;

/// Block sizes an output device typically asks for
pub const BLOCK_SIZES: [usize; 4] = [128, 256, 512, 1024];

/// Generate sine wave test signal
pub fn generate_sine_wave(freq: f32, sample_rate: u32, frames: usize) -> Vec<f32> {
    (0..frames)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * PI * freq * t).sin()
        })
        .collect()
}

/// Generate interleaved stereo with different tones per side
pub fn generate_stereo_buffer(sample_rate: u32, frames: usize) -> Vec<f32> {
    let mut buffer = Vec::with_capacity(frames * 2);
    for i in 0..frames {
        let t = i as f32 / sample_rate as f32;
        buffer.push((2.0 * PI * 440.0 * t).sin() * 0.5);
        buffer.push((2.0 * PI * 660.0 * t).sin() * 0.5);
    }
    buffer
}

/// Generate deterministic white noise in `-1..1`
pub fn generate_white_noise(frames: usize, seed: u32) -> Vec<f32> {
    let mut state = seed.max(1);
    (0..frames)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state as f32 / u32::MAX as f32) * 2.0 - 1.0
        })
        .collect()
}

/// Calculate peak level
pub fn calc_peak(buffer: &[f32]) -> f32 {
    buffer.iter().map(|&s| s.abs()).fold(0.0f32, f32::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_sine_wave() {
        let wave = generate_sine_wave(440.0, 48000, 512);
        assert_eq!(wave.len(), 512);
        assert!(wave.iter().all(|&s| (-1.0..=1.0).contains(&s)));
    }

    #[test]
    fn test_generate_stereo_buffer() {
        let buffer = generate_stereo_buffer(48000, 256);
        assert_eq!(buffer.len(), 512);
        assert!(calc_peak(&buffer) <= 0.5);
    }

    #[test]
    fn test_white_noise_is_deterministic() {
        let a = generate_white_noise(512, 7);
        let b = generate_white_noise(512, 7);
        assert_eq!(a, b);
        assert!(a.iter().all(|&s| (-1.0..=1.0).contains(&s)));
    }

    #[test]
    fn test_calc_peak() {
        let signal = vec![0.5, -0.8, 0.3, -0.2];
        assert!((calc_peak(&signal) - 0.8).abs() < 0.01);
    }
}
