//! Calibration: guided sample collection, validation, and threshold
//! computation.

pub mod progress;
pub mod run;
pub mod state;

pub use progress::{CalibrationPhase, CalibrationProgress, GuidanceHint, GuidanceReason};
pub use run::{CalibrationRun, SampleOutcome};
pub use state::{categories_for_level, CalibrationSnapshot, CalibrationState, ThresholdSet};
