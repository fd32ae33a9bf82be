//! Timing scoring against the metronome grid.
//!
//! Compares an onset's frame position to the nearest ideal beat.
//! Sign convention: negative error = early (before the beat), positive
//! = late. Verdict is `OnTime` within ±`on_time_window_ms` inclusive.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use pf_audio::metronome::nearest_beat_time_ms;
use pf_core::{TimingFeedback, TimingVerdict};

pub struct BeatQuantizer {
    /// Shared with the audio engine; tempo changes apply to the next
    /// quantized onset
    bpm: Arc<AtomicU32>,
    sample_rate: u32,
    on_time_window_ms: f64,
}

impl BeatQuantizer {
    pub fn new(bpm: Arc<AtomicU32>, sample_rate: u32, on_time_window_ms: f64) -> Self {
        Self {
            bpm,
            sample_rate,
            on_time_window_ms,
        }
    }

    /// Score an onset at the given absolute frame position
    pub fn quantize(&self, onset_frame: u64) -> TimingFeedback {
        let bpm = self.bpm.load(Ordering::Relaxed);
        let timestamp_ms = onset_frame as f64 * 1000.0 / self.sample_rate as f64;
        let error_ms = timestamp_ms - nearest_beat_time_ms(timestamp_ms, bpm);

        let verdict = if error_ms.abs() <= self.on_time_window_ms {
            TimingVerdict::OnTime
        } else if error_ms < 0.0 {
            TimingVerdict::Early
        } else {
            TimingVerdict::Late
        };

        TimingFeedback { verdict, error_ms }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const SR: u32 = 48_000;

    fn quantizer(bpm: u32) -> BeatQuantizer {
        BeatQuantizer::new(Arc::new(AtomicU32::new(bpm)), SR, 20.0)
    }

    fn ms_to_frames(ms: f64) -> i64 {
        (ms * SR as f64 / 1000.0).round() as i64
    }

    #[test]
    fn exact_beat_is_on_time_with_zero_error() {
        let q = quantizer(120);
        // 120 BPM at 48kHz: beats every 24000 frames
        for beat in [0u64, 24_000, 48_000, 24_000 * 1000] {
            let feedback = q.quantize(beat);
            assert_eq!(feedback.verdict, TimingVerdict::OnTime);
            assert_relative_eq!(feedback.error_ms, 0.0);
        }
    }

    #[test]
    fn window_boundary_is_inclusive() {
        let q = quantizer(120);

        let at_20ms = q.quantize(24_000 + ms_to_frames(20.0) as u64);
        assert_eq!(at_20ms.verdict, TimingVerdict::OnTime);

        let before_20ms = q.quantize((24_000 - ms_to_frames(20.0)) as u64);
        assert_eq!(before_20ms.verdict, TimingVerdict::OnTime);
    }

    #[test]
    fn just_past_window_is_late_or_early() {
        let q = quantizer(120);

        let late = q.quantize(24_000 + ms_to_frames(21.0) as u64);
        assert_eq!(late.verdict, TimingVerdict::Late);
        assert!(late.error_ms > 20.0);

        let early = q.quantize((24_000 - ms_to_frames(21.0)) as u64);
        assert_eq!(early.verdict, TimingVerdict::Early);
        assert!(early.error_ms < -20.0);
    }

    #[test]
    fn sign_convention_negative_is_early() {
        let q = quantizer(120);
        let early = q.quantize((48_000 - ms_to_frames(30.0)) as u64);
        assert!(early.error_ms < 0.0);
        assert_eq!(early.verdict, TimingVerdict::Early);

        let late = q.quantize(48_000 + ms_to_frames(30.0) as u64);
        assert!(late.error_ms > 0.0);
        assert_eq!(late.verdict, TimingVerdict::Late);
    }

    #[test]
    fn tempo_change_applies_to_next_onset() {
        let bpm = Arc::new(AtomicU32::new(120));
        let q = BeatQuantizer::new(Arc::clone(&bpm), SR, 20.0);

        assert_eq!(q.quantize(24_000).verdict, TimingVerdict::OnTime);

        // 60 BPM: beats every 48000 frames, 24000 is now mid-beat
        bpm.store(60, Ordering::Relaxed);
        let feedback = q.quantize(24_000);
        assert_ne!(feedback.verdict, TimingVerdict::OnTime);
    }

    #[test]
    fn error_magnitude_matches_offset() {
        let q = quantizer(120);
        let feedback = q.quantize(24_000 + ms_to_frames(10.0) as u64);
        assert_eq!(feedback.verdict, TimingVerdict::OnTime);
        assert_relative_eq!(feedback.error_ms, 10.0, epsilon = 0.1);
    }
}
