//! Reverie infrastructure
//!
//! Threaded, lock-free plumbing around the pure DSP in `reverie-core`.

pub mod audio;

pub use audio::{Levels, VisualizerHandle, VisualizerTap};
