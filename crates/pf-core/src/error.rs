//! Typed error taxonomy for the audio engine and calibration flow.
//!
//! Every lock acquisition in the facade is fallible: a poisoned lock is
//! converted into `LockPoisoned`/`StatePoisoned` instead of propagating
//! the panic, so one failed component degrades a single operation
//! rather than the whole process.

use thiserror::Error;

/// Inclusive BPM bounds accepted by the engine
pub const BPM_MIN: u32 = 40;
pub const BPM_MAX: u32 = 240;

/// Audio lifecycle errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AudioError {
    #[error("BPM {bpm} out of range ({min}-{max})")]
    BpmInvalid { bpm: u32, min: u32, max: u32 },

    #[error("Audio engine already running")]
    AlreadyRunning,

    #[error("Audio engine not running")]
    NotRunning,

    #[error("Hardware error: {details}")]
    HardwareError { details: String },

    #[error("Microphone permission denied")]
    PermissionDenied,

    #[error("Failed to open audio stream: {reason}")]
    StreamOpenFailed { reason: String },

    #[error("Lock poisoned on {component}")]
    LockPoisoned { component: String },

    #[error("Audio stream failed: {reason}")]
    StreamFailure { reason: String },
}

impl AudioError {
    /// Validate a BPM value against the engine bounds
    pub fn check_bpm(bpm: u32) -> AudioResult<()> {
        if !(BPM_MIN..=BPM_MAX).contains(&bpm) {
            return Err(AudioError::BpmInvalid {
                bpm,
                min: BPM_MIN,
                max: BPM_MAX,
            });
        }
        Ok(())
    }
}

/// Calibration flow errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("Insufficient samples: need {required}, got {collected}")]
    InsufficientSamples { required: usize, collected: usize },

    #[error("Invalid features: {reason}")]
    InvalidFeatures { reason: String },

    #[error("Calibration not complete")]
    NotComplete,

    #[error("Calibration already in progress")]
    AlreadyInProgress,

    #[error("Calibration state lock poisoned")]
    StatePoisoned,
}

pub type AudioResult<T> = Result<T, AudioError>;
pub type CalibrationResult<T> = Result<T, CalibrationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bpm_bounds_are_inclusive() {
        assert!(AudioError::check_bpm(40).is_ok());
        assert!(AudioError::check_bpm(240).is_ok());
        assert!(AudioError::check_bpm(120).is_ok());
    }

    #[test]
    fn bpm_out_of_range_carries_bounds() {
        match AudioError::check_bpm(39) {
            Err(AudioError::BpmInvalid { bpm, min, max }) => {
                assert_eq!(bpm, 39);
                assert_eq!(min, 40);
                assert_eq!(max, 240);
            }
            other => panic!("expected BpmInvalid, got {:?}", other),
        }
        assert!(AudioError::check_bpm(241).is_err());
        assert!(AudioError::check_bpm(0).is_err());
    }

    #[test]
    fn error_messages_name_the_condition() {
        let err = AudioError::BpmInvalid {
            bpm: 300,
            min: BPM_MIN,
            max: BPM_MAX,
        };
        assert!(err.to_string().contains("300"));

        let err = CalibrationError::InsufficientSamples {
            required: 10,
            collected: 3,
        };
        assert!(err.to_string().contains("10"));
        assert!(err.to_string().contains("3"));
    }
}
