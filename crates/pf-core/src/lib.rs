//! PulseForge Core Types
//!
//! Shared foundation for the beatbox-training audio engine:
//! - Typed error taxonomy (audio lifecycle + calibration)
//! - Construction-time configuration with JSON loading
//! - Result/metrics types crossing crate boundaries

pub mod config;
pub mod error;
pub mod types;

pub use config::*;
pub use error::*;
pub use types::*;

/// Audio sample type used throughout the engine (32-bit float PCM)
pub type Sample = f32;
