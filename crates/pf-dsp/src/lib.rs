//! PulseForge DSP
//!
//! Signal analysis for the beatbox pipeline:
//! - Onset detection (adaptive energy threshold with refractory gap)
//! - Per-onset feature extraction (FFT-based spectral + temporal
//!   descriptors)
//!
//! Everything here is single-threaded and allocation-free after
//! construction; the analysis thread owns one instance of each.

pub mod features;
pub mod onset;

pub use features::{rms, FeatureExtractor, FeatureVector, WINDOW_SIZE};
pub use onset::{OnsetDetector, OnsetEvent};
