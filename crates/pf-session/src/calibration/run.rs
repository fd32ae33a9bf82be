//! Guided calibration run.
//!
//! State machine: `NoiseFloor → Sound(cat₁) → … → Sound(catₙ) → Done`.
//! During each sound phase, onset-triggered feature vectors arrive as
//! candidates; a validator accepts or rejects them, rejections hold the
//! candidate for a possible manual accept and may surface guidance.
//! `finalize` turns the accepted samples into one `ThresholdSet` per
//! category.

use pf_core::{CalibrationConfig, CalibrationError, CalibrationResult, HitKind};
use pf_dsp::FeatureVector;

use super::progress::{CalibrationPhase, CalibrationProgress, GuidanceHint, GuidanceReason};
use super::state::{categories_for_level, CalibrationState, ThresholdSet};

/// Buffers of ambient audio measured before collection starts
const NOISE_FLOOR_BUFFERS: usize = 24;

/// Headroom over the measured ambient mean
const NOISE_FLOOR_SCALE: f32 = 2.0;

/// Absolute floor so a dead-silent room still gates something
const NOISE_FLOOR_MIN: f32 = 1e-4;

/// RMS above which a candidate counts as clipped
const CLIPPED_RMS: f32 = 0.7;

/// Relative centroid deviation from the accepted mean that marks an
/// outlier (only applied once a few samples are in)
const OUTLIER_RELATIVE_DEVIATION: f32 = 0.75;
const OUTLIER_MIN_SAMPLES: usize = 3;

/// Result of offering one candidate sample
#[derive(Debug, Clone, PartialEq)]
pub enum SampleOutcome {
    Accepted,
    Rejected { reason: String },
    /// Candidate arrived outside a collecting phase
    Ignored,
}

pub struct CalibrationRun {
    config: CalibrationConfig,
    level: u8,
    categories: &'static [HitKind],
    current: usize,
    phase: CalibrationPhase,

    noise_readings: Vec<f32>,
    noise_floor_rms: f32,

    samples: Vec<Vec<FeatureVector>>,
    last_rejected: Option<FeatureVector>,
    consecutive_misses: u8,
    guidance: Option<GuidanceHint>,
}

impl CalibrationRun {
    pub fn new(level: u8, config: CalibrationConfig) -> Self {
        let categories = categories_for_level(level);
        log::info!(
            "Calibration run started: level {}, {} categories, {} samples each",
            level,
            categories.len(),
            config.samples_per_category
        );

        Self {
            config,
            level,
            categories,
            current: 0,
            phase: CalibrationPhase::NoiseFloor,
            noise_readings: Vec::with_capacity(NOISE_FLOOR_BUFFERS),
            noise_floor_rms: NOISE_FLOOR_MIN,
            samples: vec![Vec::new(); categories.len()],
            last_rejected: None,
            consecutive_misses: 0,
            guidance: None,
        }
    }

    pub fn phase(&self) -> CalibrationPhase {
        self.phase
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn noise_floor_rms(&self) -> f32 {
        self.noise_floor_rms
    }

    /// Feed one buffer's RMS during the noise-floor phase. Returns true
    /// when the phase completes and collection begins.
    pub fn observe_noise(&mut self, rms: f32) -> bool {
        if self.phase != CalibrationPhase::NoiseFloor {
            return false;
        }
        self.noise_readings.push(rms);
        if self.noise_readings.len() < NOISE_FLOOR_BUFFERS {
            return false;
        }

        let mean = self.noise_readings.iter().sum::<f32>() / self.noise_readings.len() as f32;
        self.noise_floor_rms = (mean * NOISE_FLOOR_SCALE).max(NOISE_FLOOR_MIN);
        self.phase = CalibrationPhase::Sound(self.categories[0]);
        log::info!(
            "Noise floor measured: rms {:.5}, collecting {}",
            self.noise_floor_rms,
            self.categories[0].display_name()
        );
        true
    }

    /// Offer an onset-triggered feature vector for the current category
    pub fn add_candidate(&mut self, features: &FeatureVector) -> SampleOutcome {
        let CalibrationPhase::Sound(category) = self.phase else {
            return SampleOutcome::Ignored;
        };

        match self.validate(features) {
            Ok(()) => {
                self.accept(*features, category);
                SampleOutcome::Accepted
            }
            Err(reason) => {
                self.reject(features, &reason);
                SampleOutcome::Rejected { reason }
            }
        }
    }

    /// Promote the last rejected candidate (UI-triggered escape hatch)
    pub fn manual_accept(&mut self) -> CalibrationResult<CalibrationProgress> {
        let CalibrationPhase::Sound(category) = self.phase else {
            return Err(CalibrationError::InvalidFeatures {
                reason: "no category is collecting".to_string(),
            });
        };
        let candidate = self
            .last_rejected
            .take()
            .ok_or_else(|| CalibrationError::InvalidFeatures {
                reason: "no rejected candidate held".to_string(),
            })?;

        log::info!(
            "Manual accept for {} (sample {})",
            category.display_name(),
            self.samples[self.current].len() + 1
        );
        self.accept(candidate, category);
        Ok(self.progress())
    }

    pub fn is_complete(&self) -> bool {
        self.phase == CalibrationPhase::Done
    }

    pub fn progress(&self) -> CalibrationProgress {
        let (collected, needed) = match self.phase {
            CalibrationPhase::NoiseFloor => {
                (self.noise_readings.len() as u8, NOISE_FLOOR_BUFFERS as u8)
            }
            CalibrationPhase::Sound(_) => (
                self.samples[self.current].len() as u8,
                self.config.samples_per_category,
            ),
            CalibrationPhase::Done => (
                self.config.samples_per_category,
                self.config.samples_per_category,
            ),
        };

        CalibrationProgress {
            phase: self.phase,
            samples_collected: collected,
            samples_needed: needed,
            guidance: self.guidance,
            manual_accept_available: self.last_rejected.is_some(),
        }
    }

    /// Compute thresholds from the accepted samples, consuming the run
    pub fn finalize(self) -> CalibrationResult<CalibrationState> {
        if !self.is_complete() {
            let needed = self.config.samples_per_category as usize;
            let collected = self
                .samples
                .get(self.current)
                .map(Vec::len)
                .unwrap_or(0);
            if self.phase == CalibrationPhase::NoiseFloor {
                return Err(CalibrationError::NotComplete);
            }
            return Err(CalibrationError::InsufficientSamples {
                required: needed,
                collected,
            });
        }

        let mut thresholds = std::collections::BTreeMap::new();
        for (category, samples) in self.categories.iter().zip(self.samples.iter()) {
            thresholds.insert(*category, ThresholdSet::from_samples(samples)?);
        }

        log::info!(
            "Calibration finalized: level {}, {} threshold sets",
            self.level,
            thresholds.len()
        );
        Ok(CalibrationState {
            level: self.level,
            thresholds,
            timestamp: chrono::Utc::now(),
            noise_floor_rms: self.noise_floor_rms,
            is_calibrated: true,
        })
    }

    // ───────────────────────────────────────────────────────────────────

    fn validate(&self, features: &FeatureVector) -> Result<(), String> {
        if !features.is_finite() {
            return Err("non-finite features".to_string());
        }
        if features.rms < self.noise_floor_rms {
            return Err(format!(
                "too quiet: rms {:.5} below floor {:.5}",
                features.rms, self.noise_floor_rms
            ));
        }
        if features.rms > CLIPPED_RMS {
            return Err(format!("clipped: rms {:.3}", features.rms));
        }
        if features.spectral_centroid < self.config.centroid_min_hz
            || features.spectral_centroid > self.config.centroid_max_hz
        {
            return Err(format!(
                "centroid {:.0} Hz outside [{:.0}, {:.0}]",
                features.spectral_centroid, self.config.centroid_min_hz, self.config.centroid_max_hz
            ));
        }
        if !(0.0..=1.0).contains(&features.zero_crossing_rate) {
            return Err(format!("zcr {} out of range", features.zero_crossing_rate));
        }

        // Outlier check against the category's accepted samples
        let accepted = &self.samples[self.current];
        if accepted.len() >= OUTLIER_MIN_SAMPLES {
            let mean = accepted
                .iter()
                .map(|s| s.spectral_centroid)
                .sum::<f32>()
                / accepted.len() as f32;
            if mean > 0.0
                && (features.spectral_centroid - mean).abs() > mean * OUTLIER_RELATIVE_DEVIATION
            {
                return Err(format!(
                    "centroid outlier: {:.0} Hz vs accepted mean {:.0} Hz",
                    features.spectral_centroid, mean
                ));
            }
        }

        Ok(())
    }

    fn accept(&mut self, features: FeatureVector, category: HitKind) {
        self.samples[self.current].push(features);
        self.consecutive_misses = 0;
        self.guidance = None;
        self.last_rejected = None;

        let collected = self.samples[self.current].len();
        log::debug!(
            "{}: sample {}/{}",
            category.display_name(),
            collected,
            self.config.samples_per_category
        );

        if collected >= self.config.samples_per_category as usize {
            self.current += 1;
            if self.current >= self.categories.len() {
                self.phase = CalibrationPhase::Done;
                log::info!("Calibration collection complete");
            } else {
                let next = self.categories[self.current];
                self.phase = CalibrationPhase::Sound(next);
                log::info!("Advancing to {}", next.display_name());
            }
        }
    }

    fn reject(&mut self, features: &FeatureVector, reason: &str) {
        self.last_rejected = Some(*features);
        self.consecutive_misses = self.consecutive_misses.saturating_add(1);
        log::debug!("Candidate rejected: {}", reason);

        self.guidance = if features.rms < self.noise_floor_rms {
            Some(GuidanceHint {
                reason: GuidanceReason::TooQuiet,
                level: features.rms,
            })
        } else if features.rms > CLIPPED_RMS {
            Some(GuidanceHint {
                reason: GuidanceReason::Clipped,
                level: features.rms,
            })
        } else if self.consecutive_misses >= self.config.guidance_after_misses {
            Some(GuidanceHint {
                reason: GuidanceReason::Stagnation,
                level: features.rms,
            })
        } else {
            None
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pf_core::CalibrationConfig;

    fn good_features(centroid: f32) -> FeatureVector {
        FeatureVector {
            rms: 0.3,
            spectral_centroid: centroid,
            spectral_flux: 0.5,
            zero_crossing_rate: 0.1,
            decay_time_ms: 40.0,
            spectral_rolloff: centroid * 2.0,
            spectral_flatness: 0.2,
            onset_timestamp_ms: 0,
        }
    }

    fn run_past_noise_floor() -> CalibrationRun {
        let mut run = CalibrationRun::new(1, CalibrationConfig::default());
        for _ in 0..NOISE_FLOOR_BUFFERS {
            run.observe_noise(0.001);
        }
        assert_eq!(run.phase(), CalibrationPhase::Sound(HitKind::Kick));
        run
    }

    fn fill_category(run: &mut CalibrationRun, centroid: f32) {
        for _ in 0..10 {
            assert_eq!(
                run.add_candidate(&good_features(centroid)),
                SampleOutcome::Accepted
            );
        }
    }

    #[test]
    fn starts_in_noise_floor_phase() {
        let run = CalibrationRun::new(1, CalibrationConfig::default());
        assert_eq!(run.phase(), CalibrationPhase::NoiseFloor);
        assert_eq!(run.progress().samples_collected, 0);
    }

    #[test]
    fn noise_floor_completes_after_enough_buffers() {
        let mut run = CalibrationRun::new(1, CalibrationConfig::default());
        for i in 0..NOISE_FLOOR_BUFFERS {
            let done = run.observe_noise(0.002);
            assert_eq!(done, i == NOISE_FLOOR_BUFFERS - 1);
        }
        // floor = mean * scale
        assert!((run.noise_floor_rms() - 0.004).abs() < 1e-6);
    }

    #[test]
    fn candidates_during_noise_floor_are_ignored() {
        let mut run = CalibrationRun::new(1, CalibrationConfig::default());
        assert_eq!(
            run.add_candidate(&good_features(300.0)),
            SampleOutcome::Ignored
        );
    }

    #[test]
    fn full_level1_sequence_and_finalize() {
        let mut run = run_past_noise_floor();

        fill_category(&mut run, 300.0);
        assert_eq!(run.phase(), CalibrationPhase::Sound(HitKind::Snare));
        fill_category(&mut run, 2500.0);
        assert_eq!(run.phase(), CalibrationPhase::Sound(HitKind::HiHat));
        fill_category(&mut run, 7000.0);
        assert_eq!(run.phase(), CalibrationPhase::Done);
        assert!(run.is_complete());

        let state = run.finalize().unwrap();
        assert!(state.is_calibrated);
        assert_eq!(state.level, 1);
        assert_eq!(state.thresholds.len(), 3);
        assert!(
            (state.thresholds[&HitKind::Snare].spectral_centroid - 2500.0).abs() < 1e-6
        );
    }

    #[test]
    fn level2_collects_six_categories() {
        let mut run = CalibrationRun::new(2, CalibrationConfig::default());
        for _ in 0..NOISE_FLOOR_BUFFERS {
            run.observe_noise(0.001);
        }
        for centroid in [300.0, 2500.0, 7000.0, 6000.0, 5000.0, 1500.0] {
            fill_category(&mut run, centroid);
        }
        let state = run.finalize().unwrap();
        assert_eq!(state.level, 2);
        assert_eq!(state.thresholds.len(), 6);
    }

    #[test]
    fn quiet_candidate_rejected_with_guidance() {
        let mut run = run_past_noise_floor();
        let mut quiet = good_features(300.0);
        quiet.rms = 0.0001;

        let outcome = run.add_candidate(&quiet);
        assert!(matches!(outcome, SampleOutcome::Rejected { .. }));

        let progress = run.progress();
        assert_eq!(progress.samples_collected, 0);
        assert!(progress.manual_accept_available);
        assert_eq!(
            progress.guidance.unwrap().reason,
            GuidanceReason::TooQuiet
        );
    }

    #[test]
    fn clipped_candidate_rejected() {
        let mut run = run_past_noise_floor();
        let mut hot = good_features(300.0);
        hot.rms = 0.9;

        assert!(matches!(
            run.add_candidate(&hot),
            SampleOutcome::Rejected { .. }
        ));
        assert_eq!(run.progress().guidance.unwrap().reason, GuidanceReason::Clipped);
    }

    #[test]
    fn stagnation_guidance_after_repeated_misses() {
        let mut run = run_past_noise_floor();
        // Rejected for centroid range, not level, so the hint falls
        // through to stagnation
        let mut bad = good_features(30.0);
        bad.rms = 0.3;

        for _ in 0..4 {
            run.add_candidate(&bad);
        }
        assert_eq!(
            run.progress().guidance.unwrap().reason,
            GuidanceReason::Stagnation
        );
    }

    #[test]
    fn centroid_outlier_rejected_after_enough_samples() {
        let mut run = run_past_noise_floor();
        for _ in 0..3 {
            assert_eq!(
                run.add_candidate(&good_features(300.0)),
                SampleOutcome::Accepted
            );
        }
        assert!(matches!(
            run.add_candidate(&good_features(5000.0)),
            SampleOutcome::Rejected { .. }
        ));
        // Close to the mean is still fine
        assert_eq!(
            run.add_candidate(&good_features(400.0)),
            SampleOutcome::Accepted
        );
    }

    #[test]
    fn manual_accept_promotes_exactly_one() {
        let mut run = run_past_noise_floor();
        let mut quiet = good_features(300.0);
        quiet.rms = 0.0001;

        run.add_candidate(&quiet);
        assert_eq!(run.progress().samples_collected, 0);

        let progress = run.manual_accept().unwrap();
        assert_eq!(progress.samples_collected, 1);
        assert!(!progress.manual_accept_available);

        // No candidate left to promote
        assert!(run.manual_accept().is_err());
    }

    #[test]
    fn finalize_before_completion_reports_counts() {
        let mut run = run_past_noise_floor();
        for _ in 0..4 {
            run.add_candidate(&good_features(300.0));
        }
        match run.finalize() {
            Err(CalibrationError::InsufficientSamples {
                required,
                collected,
            }) => {
                assert_eq!(required, 10);
                assert_eq!(collected, 4);
            }
            other => panic!("expected InsufficientSamples, got {:?}", other),
        }
    }

    #[test]
    fn finalize_during_noise_floor_is_not_complete() {
        let run = CalibrationRun::new(1, CalibrationConfig::default());
        assert_eq!(run.finalize().unwrap_err(), CalibrationError::NotComplete);
    }
}
