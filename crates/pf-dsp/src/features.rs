//! Per-Onset Feature Extraction
//!
//! Computes the descriptor set used for calibration and classification
//! from a fixed-size window trailing each detected onset. One real FFT
//! per window, plan built once at construction. Silent or degenerate
//! windows yield a defined all-zero vector — never NaN/Inf.

use std::sync::Arc;

use realfft::{RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};

/// Analysis window length in samples
pub const WINDOW_SIZE: usize = 1024;

/// Envelope fraction defining decay time (-20 dB from peak)
const DECAY_FRACTION: f32 = 0.1;

/// Cumulative-energy fraction for spectral rolloff
const ROLLOFF_FRACTION: f32 = 0.85;

/// RMS below which a window counts as silence
const SILENCE_RMS: f32 = 1e-6;

/// Feature descriptors for one analysis window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub rms: f32,
    /// Amplitude-weighted mean frequency (Hz)
    pub spectral_centroid: f32,
    /// Positive magnitude change vs. the previous window, per bin
    pub spectral_flux: f32,
    /// Sign changes / window length, in [0, 1]
    pub zero_crossing_rate: f32,
    /// Time for the envelope to fall to 10% of its peak (ms)
    pub decay_time_ms: f32,
    /// Frequency containing 85% of spectral energy (Hz)
    pub spectral_rolloff: f32,
    /// Geometric / arithmetic mean of the magnitude spectrum, in [0, 1]
    pub spectral_flatness: f32,
    /// Onset position in stream time (ms since engine start)
    pub onset_timestamp_ms: u64,
}

impl FeatureVector {
    /// The defined result for a silent or degenerate window
    pub fn silence(timestamp_ms: u64) -> Self {
        Self {
            rms: 0.0,
            spectral_centroid: 0.0,
            spectral_flux: 0.0,
            zero_crossing_rate: 0.0,
            decay_time_ms: 0.0,
            spectral_rolloff: 0.0,
            spectral_flatness: 0.0,
            onset_timestamp_ms: timestamp_ms,
        }
    }

    /// All fields finite (silence vectors pass trivially)
    pub fn is_finite(&self) -> bool {
        self.rms.is_finite()
            && self.spectral_centroid.is_finite()
            && self.spectral_flux.is_finite()
            && self.zero_crossing_rate.is_finite()
            && self.decay_time_ms.is_finite()
            && self.spectral_rolloff.is_finite()
            && self.spectral_flatness.is_finite()
    }
}

/// FFT-backed feature extractor
///
/// Holds the FFT plan, the Hann window, and all scratch buffers, so
/// extraction does not allocate. Keeps the previous window's magnitude
/// spectrum for spectral flux.
pub struct FeatureExtractor {
    fft: Arc<dyn RealToComplex<f32>>,
    hann: Vec<f32>,
    input: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    magnitudes: Vec<f32>,
    prev_magnitudes: Vec<f32>,
    sample_rate: u32,
}

impl FeatureExtractor {
    pub fn new(sample_rate: u32) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(WINDOW_SIZE);
        let spectrum = fft.make_output_vec();
        let scratch = fft.make_scratch_vec();
        let bins = spectrum.len();

        let hann: Vec<f32> = (0..WINDOW_SIZE)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * i as f32 / WINDOW_SIZE as f32;
                0.5 * (1.0 - phase.cos())
            })
            .collect();

        Self {
            fft,
            hann,
            input: vec![0.0; WINDOW_SIZE],
            spectrum,
            scratch,
            magnitudes: vec![0.0; bins],
            prev_magnitudes: vec![0.0; bins],
            sample_rate,
        }
    }

    /// Extract features from a window trailing an onset
    ///
    /// Windows shorter than `WINDOW_SIZE` are zero-padded; longer ones
    /// use the first `WINDOW_SIZE` samples.
    pub fn extract(&mut self, samples: &[f32], timestamp_ms: u64) -> FeatureVector {
        let len = samples.len().min(WINDOW_SIZE);
        let window = &samples[..len];

        let rms = rms(window);
        if rms < SILENCE_RMS {
            // Keep flux history consistent across silent gaps
            self.prev_magnitudes.fill(0.0);
            return FeatureVector::silence(timestamp_ms);
        }

        // Time-domain features on the raw window
        let zero_crossing_rate = zero_crossing_rate(window);
        let decay_time_ms = decay_time_ms(window, self.sample_rate);

        // Windowed FFT
        for i in 0..WINDOW_SIZE {
            self.input[i] = if i < len { window[i] * self.hann[i] } else { 0.0 };
        }
        if self
            .fft
            .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)
            .is_err()
        {
            return FeatureVector::silence(timestamp_ms);
        }
        for (mag, bin) in self.magnitudes.iter_mut().zip(self.spectrum.iter()) {
            *mag = bin.norm();
        }

        let spectral_centroid = spectral_centroid(&self.magnitudes, self.sample_rate);
        let spectral_rolloff = spectral_rolloff(&self.magnitudes, self.sample_rate);
        let spectral_flatness = spectral_flatness(&self.magnitudes);

        let mut flux = 0.0;
        for (cur, prev) in self.magnitudes.iter().zip(self.prev_magnitudes.iter()) {
            flux += (cur - prev).max(0.0);
        }
        let spectral_flux = flux / self.magnitudes.len() as f32;
        self.prev_magnitudes.copy_from_slice(&self.magnitudes);

        let features = FeatureVector {
            rms,
            spectral_centroid,
            spectral_flux,
            zero_crossing_rate,
            decay_time_ms,
            spectral_rolloff,
            spectral_flatness,
            onset_timestamp_ms: timestamp_ms,
        };

        if features.is_finite() {
            features
        } else {
            FeatureVector::silence(timestamp_ms)
        }
    }

    /// Forget the previous window's spectrum (e.g., across a restart)
    pub fn reset(&mut self) {
        self.prev_magnitudes.fill(0.0);
    }
}

pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

fn zero_crossing_rate(samples: &[f32]) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }
    let crossings = samples
        .windows(2)
        .filter(|pair| (pair[0] >= 0.0) != (pair[1] >= 0.0))
        .count();
    crossings as f32 / (samples.len() - 1) as f32
}

/// Envelope resolution for decay measurement (samples per block)
const ENVELOPE_BLOCK: usize = 32;

fn decay_time_ms(samples: &[f32], sample_rate: u32) -> f32 {
    // Block-maximum envelope: scanning raw |x| would report a
    // sinusoid's first zero crossing as its decay point
    let envelope: Vec<f32> = samples
        .chunks(ENVELOPE_BLOCK)
        .map(|block| block.iter().fold(0.0f32, |acc, s| acc.max(s.abs())))
        .collect();

    let (peak_idx, peak) = envelope
        .iter()
        .enumerate()
        .fold((0, 0.0f32), |(bi, bv), (i, &v)| {
            if v > bv {
                (i, v)
            } else {
                (bi, bv)
            }
        });
    if peak <= 0.0 {
        return 0.0;
    }

    let floor = peak * DECAY_FRACTION;
    for (i, &level) in envelope.iter().enumerate().skip(peak_idx) {
        if level < floor {
            return ((i - peak_idx) * ENVELOPE_BLOCK) as f32 * 1000.0 / sample_rate as f32;
        }
    }
    // Never decayed within the window: report the remaining span
    ((envelope.len() - peak_idx) * ENVELOPE_BLOCK) as f32 * 1000.0 / sample_rate as f32
}

fn spectral_centroid(magnitudes: &[f32], sample_rate: u32) -> f32 {
    let mag_sum: f32 = magnitudes.iter().sum();
    if mag_sum <= 1e-10 {
        return 0.0;
    }
    let bin_hz = sample_rate as f32 / WINDOW_SIZE as f32;
    let weighted: f32 = magnitudes
        .iter()
        .enumerate()
        .map(|(i, m)| i as f32 * bin_hz * m)
        .sum();
    weighted / mag_sum
}

fn spectral_rolloff(magnitudes: &[f32], sample_rate: u32) -> f32 {
    let total_energy: f32 = magnitudes.iter().map(|m| m * m).sum();
    if total_energy <= 1e-10 {
        return 0.0;
    }
    let target = total_energy * ROLLOFF_FRACTION;
    let bin_hz = sample_rate as f32 / WINDOW_SIZE as f32;

    let mut cumulative = 0.0;
    for (i, m) in magnitudes.iter().enumerate() {
        cumulative += m * m;
        if cumulative >= target {
            return i as f32 * bin_hz;
        }
    }
    (magnitudes.len() - 1) as f32 * bin_hz
}

fn spectral_flatness(magnitudes: &[f32]) -> f32 {
    let nonzero: Vec<f32> = magnitudes.iter().copied().filter(|m| *m > 1e-10).collect();
    if nonzero.is_empty() {
        return 0.0;
    }
    let log_mean: f32 = nonzero.iter().map(|m| m.ln()).sum::<f32>() / nonzero.len() as f32;
    let arith_mean: f32 = nonzero.iter().sum::<f32>() / nonzero.len() as f32;
    if arith_mean <= 1e-10 {
        return 0.0;
    }
    (log_mean.exp() / arith_mean).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const SR: u32 = 48_000;

    fn sine(freq: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / SR as f32).sin())
            .collect()
    }

    #[test]
    fn silence_yields_zero_vector() {
        let mut extractor = FeatureExtractor::new(SR);
        let features = extractor.extract(&vec![0.0; WINDOW_SIZE], 100);
        assert_eq!(features, FeatureVector::silence(100));
    }

    #[test]
    fn all_features_finite_for_random_like_input() {
        let mut extractor = FeatureExtractor::new(SR);
        // Deterministic pseudo-noise via sample index hashing
        let noise: Vec<f32> = (0..WINDOW_SIZE)
            .map(|i| (((i * 2654435761) % 10007) as f32 / 10007.0) - 0.5)
            .collect();
        let features = extractor.extract(&noise, 0);
        assert!(features.is_finite());
        assert!(features.rms > 0.0);
        assert!(features.zero_crossing_rate > 0.0);
    }

    #[test]
    fn rms_of_full_scale_square_is_one() {
        let square: Vec<f32> = (0..WINDOW_SIZE)
            .map(|i| if i % 2 == 0 { 1.0 } else { -1.0 })
            .collect();
        assert_relative_eq!(rms(&square), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn centroid_tracks_the_dominant_frequency() {
        let mut extractor = FeatureExtractor::new(SR);
        let low = extractor.extract(&sine(200.0, WINDOW_SIZE), 0);
        extractor.reset();
        let high = extractor.extract(&sine(5000.0, WINDOW_SIZE), 0);

        assert!(low.spectral_centroid < 1000.0);
        assert!(high.spectral_centroid > 3000.0);
        assert!(high.spectral_centroid > low.spectral_centroid);
    }

    #[test]
    fn zcr_higher_for_higher_frequency() {
        let low = zero_crossing_rate(&sine(100.0, WINDOW_SIZE));
        let high = zero_crossing_rate(&sine(8000.0, WINDOW_SIZE));
        assert!(high > low);
    }

    #[test]
    fn decay_time_short_for_fast_decay() {
        // Impulse with rapid exponential decay
        let mut samples = vec![0.0; WINDOW_SIZE];
        for (i, s) in samples.iter_mut().enumerate().take(200) {
            *s = 0.9f32.powi(i as i32);
        }
        let decay = decay_time_ms(&samples, SR);
        // 0.9^n < 0.1 at n=22, i.e. < 1ms at 48kHz
        assert!(decay < 2.0, "decay {} ms", decay);
    }

    #[test]
    fn decay_time_long_for_sustained_tone() {
        let sustained = sine(440.0, WINDOW_SIZE);
        let decay = decay_time_ms(&sustained, SR);
        // Sustained sine keeps its envelope through the window
        assert!(decay > 10.0, "decay {} ms", decay);
    }

    #[test]
    fn flatness_near_one_for_noise_near_zero_for_tone() {
        let mut extractor = FeatureExtractor::new(SR);
        let tone = extractor.extract(&sine(1000.0, WINDOW_SIZE), 0);

        let noise: Vec<f32> = (0..WINDOW_SIZE)
            .map(|i| (((i * 1103515245 + 12345) % 32768) as f32 / 32768.0) - 0.5)
            .collect();
        extractor.reset();
        let noisy = extractor.extract(&noise, 0);

        assert!(tone.spectral_flatness < 0.2, "tone {}", tone.spectral_flatness);
        assert!(noisy.spectral_flatness > tone.spectral_flatness);
        assert!(noisy.spectral_flatness <= 1.0);
    }

    #[test]
    fn flux_positive_on_spectral_change() {
        let mut extractor = FeatureExtractor::new(SR);
        let first = extractor.extract(&sine(500.0, WINDOW_SIZE), 0);
        let second = extractor.extract(&sine(6000.0, WINDOW_SIZE), 100);
        // First window has no history, full energy counts as flux
        assert!(first.spectral_flux > 0.0);
        // Switching the dominant band raises positive flux again
        assert!(second.spectral_flux > 0.0);
    }

    #[test]
    fn short_window_is_zero_padded() {
        let mut extractor = FeatureExtractor::new(SR);
        let features = extractor.extract(&sine(1000.0, 256), 0);
        assert!(features.is_finite());
        assert!(features.rms > 0.0);
    }
}
