//! Threshold classifier.
//!
//! Scores a feature vector against each calibrated category's
//! `ThresholdSet` and picks the winner. Per feature, closeness to the
//! category mean is linear within the margin band and zero outside it;
//! a category's score is the mean closeness over the scored features.
//! `confidence = max_score / sum_scores`, clamped to [0, 1]. A
//! degenerate score vector yields `Unknown` at confidence 0.0 —
//! classification never fails.

use pf_core::{CalibrationConfig, HitKind};
use pf_dsp::FeatureVector;

use crate::calibration::{CalibrationState, ThresholdSet};

/// Absolute floor for near-zero feature means when computing relative
/// distance
const MEAN_FLOOR: f64 = 1e-3;

/// Classify one feature vector against the calibrated state
///
/// Returns the winning category and a confidence in [0.0, 1.0].
pub fn classify(
    features: &FeatureVector,
    state: &CalibrationState,
    config: &CalibrationConfig,
) -> (HitKind, f32) {
    let mut best: Option<(HitKind, f64)> = None;
    let mut sum = 0.0f64;

    for (category, set) in &state.thresholds {
        let mut score = band_score(features, set, config.margin as f64);

        if state.level >= 2 {
            score = apply_level2_rules(*category, features, set, score, config);
        }

        sum += score;
        if best.map(|(_, s)| score > s).unwrap_or(true) {
            best = Some((*category, score));
        }
    }

    match best {
        Some((category, max)) if sum > f64::EPSILON && max > 0.0 => {
            let confidence = (max / sum).clamp(0.0, 1.0) as f32;
            (category, confidence)
        }
        _ => (HitKind::Unknown, 0.0),
    }
}

/// Mean per-feature closeness to the category's calibrated means
fn band_score(features: &FeatureVector, set: &ThresholdSet, margin: f64) -> f64 {
    let pairs = [
        (features.spectral_centroid as f64, set.spectral_centroid),
        (features.zero_crossing_rate as f64, set.zero_crossing_rate),
        (features.spectral_rolloff as f64, set.spectral_rolloff),
        (features.spectral_flatness as f64, set.spectral_flatness),
        (features.decay_time_ms as f64, set.decay_time_ms),
    ];

    let total: f64 = pairs
        .iter()
        .map(|&(value, mean)| closeness(value, mean, margin))
        .sum();
    total / pairs.len() as f64
}

/// 1.0 at the mean, falling linearly to 0.0 at `margin × mean`
/// deviation
fn closeness(value: f64, mean: f64, margin: f64) -> f64 {
    let band = margin * mean.abs().max(MEAN_FLOOR);
    (1.0 - (value - mean).abs() / band).max(0.0)
}

/// Level-2 sub-category discrimination on top of band scores
fn apply_level2_rules(
    category: HitKind,
    features: &FeatureVector,
    set: &ThresholdSet,
    score: f64,
    config: &CalibrationConfig,
) -> f64 {
    match category {
        // Hi-hat sub-categories are separated by decay time
        HitKind::ClosedHiHat if features.decay_time_ms > config.closed_hihat_max_decay_ms => 0.0,
        HitKind::OpenHiHat if features.decay_time_ms < config.open_hihat_min_decay_ms => 0.0,
        // The kick+snare combo is identified mostly by its noisy
        // spectrum, so flatness agreement gets extra weight
        HitKind::KSnare => {
            let flatness = closeness(
                features.spectral_flatness as f64,
                set.spectral_flatness,
                config.margin as f64,
            );
            score * 0.6 + flatness * score * 0.4
        }
        _ => score,
    }
}
