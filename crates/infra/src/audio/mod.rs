//! Runtime side of the visualizer
//!
//! This module provides:
//! - A lock-free scope buffer shared by the audio and analysis threads
//! - Hann-windowed spectrum analysis with asymmetric smoothing
//! - The visualization tap and its background analysis thread

pub mod lockfree_buffer;
pub mod spectrum;
pub mod tap;

pub use lockfree_buffer::ScopeBuffer;
pub use spectrum::{peak_bin, SpectrumAnalyzer};
pub use tap::{Levels, VisualizerHandle, VisualizerTap};
