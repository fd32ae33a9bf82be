//! PulseForge Session
//!
//! Ties the engine together: the analysis worker that drains the frame
//! pool, the calibration flow, the threshold classifier, timing
//! quantization against the metronome grid, and the `AppContext`
//! facade external consumers drive.
//!
//! Event flow: audio callback → frame pool → worker → mpsc →
//! broadcast → subscriber streams.

pub mod calibration;
pub mod classifier;
pub mod context;
pub mod quantizer;
pub mod streams;
pub mod worker;

pub use calibration::{
    CalibrationPhase, CalibrationProgress, CalibrationRun, CalibrationState, GuidanceHint,
    GuidanceReason, SampleOutcome, ThresholdSet,
};
pub use classifier::classify;
pub use context::AppContext;
pub use quantizer::BeatQuantizer;
pub use streams::{subscribe_stream, BROADCAST_CAPACITY};
pub use worker::AnalysisWorker;
