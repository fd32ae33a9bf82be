//! Result types crossing the analysis → consumer boundary.

use serde::{Deserialize, Serialize};

/// Sound category assigned to a detected onset
///
/// Level 1 classification uses Kick/Snare/HiHat; level 2 extends the
/// set with closed/open hi-hat and the kick+snare combo. `Unknown` is
/// a valid classification outcome, never an error.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum HitKind {
    Kick,
    Snare,
    HiHat,
    ClosedHiHat,
    OpenHiHat,
    KSnare,
    Unknown,
}

impl HitKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            HitKind::Kick => "KICK",
            HitKind::Snare => "SNARE",
            HitKind::HiHat => "HI-HAT",
            HitKind::ClosedHiHat => "CLOSED HI-HAT",
            HitKind::OpenHiHat => "OPEN HI-HAT",
            HitKind::KSnare => "K-SNARE",
            HitKind::Unknown => "UNKNOWN",
        }
    }
}

/// Verdict of an onset timestamp against the metronome grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimingVerdict {
    OnTime,
    Early,
    Late,
}

/// Timing feedback for a single onset
///
/// Sign convention: negative `error_ms` = early, positive = late.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimingFeedback {
    pub verdict: TimingVerdict,
    pub error_ms: f64,
}

/// One classified onset, delivered to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub sound: HitKind,
    pub timing: TimingFeedback,
    /// Confidence in [0.0, 1.0]
    pub confidence: f32,
    /// Onset position in stream time (ms since engine start)
    pub timestamp_ms: u64,
}

/// Periodic diagnostic sample from the analysis thread
///
/// Purely observational; nothing in the control path reads these.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineMetrics {
    pub rms: f32,
    /// Centroid/flux of the most recently extracted feature window
    /// (0.0 until the first onset)
    pub spectral_centroid: f32,
    pub spectral_flux: f32,
    pub frame: u64,
    pub timestamp_ms: u64,
    /// Frames discarded by the pool since engine start
    pub dropped_frames: u64,
}
