//! Calibrated classification state and its persisted snapshot.
//!
//! Thresholds are only ever replaced as a whole unit by a completed
//! calibration run (or a snapshot load); concurrent readers never
//! observe a partial update. The snapshot JSON layout is the contract
//! the external storage collaborator round-trips:
//!
//! ```json
//! {"level": 1, "timestamp": "2026-08-28T10:00:00Z",
//!  "thresholds": {"Kick": {"rms": 0.2, ...}, ...}}
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use pf_core::{CalibrationError, CalibrationResult, HitKind};
use pf_dsp::FeatureVector;
use serde::{Deserialize, Serialize};

/// Sound categories collected per calibration level
pub fn categories_for_level(level: u8) -> &'static [HitKind] {
    match level {
        2 => &[
            HitKind::Kick,
            HitKind::Snare,
            HitKind::HiHat,
            HitKind::ClosedHiHat,
            HitKind::OpenHiHat,
            HitKind::KSnare,
        ],
        _ => &[HitKind::Kick, HitKind::Snare, HitKind::HiHat],
    }
}

/// Per-category decision boundaries: the per-feature means of the
/// accepted calibration samples
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSet {
    pub rms: f64,
    pub spectral_centroid: f64,
    pub spectral_flux: f64,
    pub zero_crossing_rate: f64,
    pub decay_time_ms: f64,
    pub spectral_rolloff: f64,
    pub spectral_flatness: f64,
}

impl ThresholdSet {
    /// Feature means over the accepted samples of one category
    pub fn from_samples(samples: &[FeatureVector]) -> CalibrationResult<Self> {
        if samples.is_empty() {
            return Err(CalibrationError::InsufficientSamples {
                required: 1,
                collected: 0,
            });
        }
        let n = samples.len() as f64;
        let mean = |f: fn(&FeatureVector) -> f32| -> f64 {
            samples.iter().map(|s| f(s) as f64).sum::<f64>() / n
        };

        Ok(Self {
            rms: mean(|s| s.rms),
            spectral_centroid: mean(|s| s.spectral_centroid),
            spectral_flux: mean(|s| s.spectral_flux),
            zero_crossing_rate: mean(|s| s.zero_crossing_rate),
            decay_time_ms: mean(|s| s.decay_time_ms),
            spectral_rolloff: mean(|s| s.spectral_rolloff),
            spectral_flatness: mean(|s| s.spectral_flatness),
        })
    }
}

/// Persisted snapshot — exactly the fields the storage layer owns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSnapshot {
    pub level: u8,
    pub timestamp: DateTime<Utc>,
    pub thresholds: BTreeMap<HitKind, ThresholdSet>,
}

/// Live calibration state shared between classification (readers) and
/// the calibration flow (writer)
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationState {
    pub level: u8,
    pub thresholds: BTreeMap<HitKind, ThresholdSet>,
    pub timestamp: DateTime<Utc>,
    /// Ambient RMS measured during the run's noise-floor phase;
    /// runtime-only, not part of the snapshot
    pub noise_floor_rms: f32,
    pub is_calibrated: bool,
}

impl Default for CalibrationState {
    fn default() -> Self {
        Self {
            level: 1,
            thresholds: BTreeMap::new(),
            timestamp: Utc::now(),
            noise_floor_rms: 0.01,
            is_calibrated: false,
        }
    }
}

impl CalibrationState {
    pub fn snapshot(&self) -> CalibrationSnapshot {
        CalibrationSnapshot {
            level: self.level,
            timestamp: self.timestamp,
            thresholds: self.thresholds.clone(),
        }
    }

    pub fn from_snapshot(snapshot: CalibrationSnapshot) -> CalibrationResult<Self> {
        if !(1..=2).contains(&snapshot.level) {
            return Err(CalibrationError::InvalidFeatures {
                reason: format!("unsupported calibration level {}", snapshot.level),
            });
        }
        let is_calibrated = !snapshot.thresholds.is_empty();
        Ok(Self {
            level: snapshot.level,
            thresholds: snapshot.thresholds,
            timestamp: snapshot.timestamp,
            noise_floor_rms: 0.01,
            is_calibrated,
        })
    }

    pub fn to_json(&self) -> CalibrationResult<String> {
        serde_json::to_string(&self.snapshot()).map_err(|e| CalibrationError::InvalidFeatures {
            reason: format!("snapshot serialization: {}", e),
        })
    }

    pub fn from_json(json: &str) -> CalibrationResult<Self> {
        let snapshot: CalibrationSnapshot =
            serde_json::from_str(json).map_err(|e| CalibrationError::InvalidFeatures {
                reason: format!("snapshot parse: {}", e),
            })?;
        Self::from_snapshot(snapshot)
    }
}
