//! PulseForge Audio Layer
//!
//! Platform audio I/O and the realtime-safe plumbing around it:
//! - Metronome click generation and integer beat arithmetic
//! - Lock-free frame pool (audio thread ↔ analysis thread)
//! - cpal engine with full-duplex streams and atomic transport state
//!
//! CRITICAL: the audio callbacks never allocate, never lock, and never
//! block. All communication out of a callback goes through the frame
//! pool rings and atomics.

pub mod engine;
pub mod metronome;
pub mod pool;

pub use engine::AudioEngine;
pub use pool::{AnalysisSideQueues, AudioSideQueues, FrameBuffer, FramePool};
