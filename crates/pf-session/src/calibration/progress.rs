//! Calibration progress reporting.
//!
//! Emitted repeatedly on the calibration stream while a run is active;
//! last-value-wins semantics for late subscribers.

use pf_core::HitKind;
use serde::{Deserialize, Serialize};

/// Phase of an active calibration run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalibrationPhase {
    /// Measuring ambient noise (caller stays silent)
    NoiseFloor,
    /// Collecting samples for one sound category
    Sound(HitKind),
    /// All categories complete, waiting for `finish_calibration`
    Done,
}

/// Why a guidance hint surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuidanceReason {
    /// Candidate level below the noise-floor gate
    TooQuiet,
    /// Candidate level near full scale
    Clipped,
    /// Several consecutive candidates rejected
    Stagnation,
}

/// Hint surfaced to the consumer during collection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GuidanceHint {
    pub reason: GuidanceReason,
    /// RMS observed when the hint was generated
    pub level: f32,
}

/// Snapshot of calibration progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProgress {
    pub phase: CalibrationPhase,
    pub samples_collected: u8,
    pub samples_needed: u8,
    pub guidance: Option<GuidanceHint>,
    /// A rejected candidate is held and can be promoted
    pub manual_accept_available: bool,
}

impl CalibrationProgress {
    pub fn percentage(&self) -> u8 {
        if self.samples_needed == 0 {
            return 0;
        }
        (self.samples_collected as f32 / self.samples_needed as f32 * 100.0).min(100.0) as u8
    }
}
