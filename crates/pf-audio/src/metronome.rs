//! Metronome Click Generation and Beat Arithmetic
//!
//! Beat boundaries are computed from integer frame arithmetic so there
//! is no floating-point phase drift: `samples_per_beat = sample_rate *
//! 60 / bpm`, and frame N starts a beat iff `N % samples_per_beat ==
//! 0`. The click waveform is generated once at engine construction and
//! referenced read-only from the output callback.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Click length in milliseconds
pub const CLICK_DURATION_MS: u32 = 20;

/// Peak amplitude of the click waveform
const CLICK_AMPLITUDE: f32 = 0.5;

/// Seed for the click's noise burst, fixed so the waveform is
/// deterministic across runs
const CLICK_SEED: u64 = 42;

/// Generate the click waveform: a short white-noise burst with a
/// linear decay envelope
pub fn generate_click(sample_rate: u32) -> Vec<f32> {
    let len = (sample_rate * CLICK_DURATION_MS / 1000) as usize;
    let mut rng = StdRng::seed_from_u64(CLICK_SEED);

    (0..len)
        .map(|i| {
            let envelope = 1.0 - i as f32 / len as f32;
            let noise: f32 = rng.random_range(-1.0..1.0);
            noise * envelope * CLICK_AMPLITUDE
        })
        .collect()
}

/// Frames per beat at the given tempo (integer arithmetic, no drift)
pub fn samples_per_beat(bpm: u32, sample_rate: u32) -> u64 {
    if bpm == 0 {
        return u64::MAX;
    }
    sample_rate as u64 * 60 / bpm as u64
}

/// Whether the given frame index starts a beat
pub fn is_beat_boundary(frame: u64, bpm: u32, sample_rate: u32) -> bool {
    frame % samples_per_beat(bpm, sample_rate) == 0
}

/// Ideal beat time closest to a timestamp, used for timing scoring
pub fn nearest_beat_time_ms(timestamp_ms: f64, bpm: u32) -> f64 {
    if bpm == 0 {
        return timestamp_ms;
    }
    let period_ms = 60_000.0 / bpm as f64;
    (timestamp_ms / period_ms).round() * period_ms
}
