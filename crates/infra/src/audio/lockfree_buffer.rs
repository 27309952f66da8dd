//! Lock-free scope buffer shared between the audio and analysis threads
//!
//! The audio thread appends mono samples; the analysis thread copies out
//! the most recent window. Samples are stored as `f32` bits in atomics so
//! both sides can touch the buffer without locks or `unsafe`.
//!
//! Performance characteristics:
//! - Wait-free for the single producer and the single consumer
//! - Power-of-two capacity, so wrapping is a mask
//! - No allocations in hot path
//!
//! The writer may overwrite samples the reader is copying. The copy can
//! then mix two adjacent blocks, which is harmless for visualization.

use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Single-producer single-consumer circular history of mono samples
pub struct ScopeBuffer {
    /// Sample storage as `f32::to_bits`
    samples: Vec<AtomicU32>,

    /// Total samples ever written (cache-padded to prevent false sharing)
    cursor: CachePadded<AtomicUsize>,

    /// Buffer capacity (power of 2 for fast modulo)
    capacity: usize,

    /// Mask for fast modulo operation (capacity - 1)
    mask: usize,
}

impl ScopeBuffer {
    /// Create a zeroed buffer
    ///
    /// Capacity will be rounded up to the next power of 2.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();

        Self {
            samples: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
            cursor: CachePadded::new(AtomicUsize::new(0)),
            capacity,
            mask: capacity - 1,
        }
    }

    /// Append samples (producer)
    ///
    /// Only the last `capacity` samples of a larger slice are kept.
    pub fn write(&self, samples: &[f32]) {
        let start = self.cursor.load(Ordering::Relaxed);
        let skip = samples.len().saturating_sub(self.capacity);

        for (i, &sample) in samples.iter().enumerate().skip(skip) {
            self.samples[(start + i) & self.mask].store(sample.to_bits(), Ordering::Relaxed);
        }

        // Release publishes the sample stores to readers that acquire the cursor
        self.cursor.store(start.wrapping_add(samples.len()), Ordering::Release);
    }

    /// Append the channel average of each interleaved frame (producer)
    pub fn write_downmixed(&self, interleaved: &[f32], channels: usize) {
        if channels <= 1 {
            self.write(interleaved);
            return;
        }

        let start = self.cursor.load(Ordering::Relaxed);
        let scale = 1.0 / channels as f32;
        let mut written = 0;
        for frame in interleaved.chunks_exact(channels) {
            let mono = frame.iter().sum::<f32>() * scale;
            self.samples[(start + written) & self.mask].store(mono.to_bits(), Ordering::Relaxed);
            written += 1;
        }

        self.cursor.store(start.wrapping_add(written), Ordering::Release);
    }

    /// Samples written so far
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    /// Copy the `dest.len()` samples preceding `cursor` (consumer)
    ///
    /// Slots never written read as zero.
    pub fn copy_latest(&self, cursor: usize, dest: &mut [f32]) {
        let len = dest.len().min(self.capacity);
        let start = cursor.wrapping_sub(len);
        let offset = dest.len() - len;

        dest[..offset].fill(0.0);
        for (i, slot) in dest[offset..].iter_mut().enumerate() {
            let bits = self.samples[start.wrapping_add(i) & self.mask].load(Ordering::Relaxed);
            *slot = f32::from_bits(bits);
        }
    }

    /// Zero every slot; the cursor keeps counting
    pub fn clear(&self) {
        for slot in &self.samples {
            slot.store(0, Ordering::Relaxed);
        }
    }

    /// Get buffer capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
