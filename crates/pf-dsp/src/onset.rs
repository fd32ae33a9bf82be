//! Onset Detection
//!
//! Adaptive energy-threshold detector for percussive onsets:
//! - Short moving-average energy baseline
//! - Slowly-decaying adaptive threshold scaled by a sensitivity factor
//! - Refractory gap so one hit's decay tail cannot re-trigger
//!
//! The same code path runs for live microphone input and synthetic
//! fixture audio; there is no test mode.

use pf_core::OnsetConfig;

/// One detected onset within a processed block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OnsetEvent {
    /// Sample offset within the block passed to `process_block`
    pub offset: usize,
    /// Normalized detection strength in [0.0, 1.0]
    pub strength: f32,
}

/// Stateful onset detector, one consumer (the analysis thread)
pub struct OnsetDetector {
    config: OnsetConfig,
    /// Circular buffer of recent per-sample energies
    energy_buffer: Vec<f32>,
    energy_idx: usize,
    energy_sum: f32,
    prev_energy: f32,
    adaptive_threshold: f32,
    threshold_decay: f32,
    refractory_samples: u64,
    samples_since_onset: u64,
    last_delta: f32,
}

impl OnsetDetector {
    pub fn new(sample_rate: u32, config: OnsetConfig) -> Self {
        let refractory_samples =
            (config.refractory_ms * sample_rate as f32 / 1000.0).round() as u64;
        let window = config.baseline_window.max(1);

        Self {
            config,
            energy_buffer: vec![0.0; window],
            energy_idx: 0,
            energy_sum: 0.0,
            prev_energy: 0.0,
            adaptive_threshold: 0.0,
            threshold_decay: 0.999,
            refractory_samples,
            // Allow an onset right at the start of the stream
            samples_since_onset: refractory_samples,
            last_delta: 0.0,
        }
    }

    /// Process one block of samples, returning onsets found within it
    pub fn process_block(&mut self, samples: &[f32]) -> Vec<OnsetEvent> {
        let mut events = Vec::new();

        for (offset, &sample) in samples.iter().enumerate() {
            let energy = sample * sample;

            // Moving-average baseline over the circular energy buffer
            self.energy_sum += energy - self.energy_buffer[self.energy_idx];
            self.energy_buffer[self.energy_idx] = energy;
            self.energy_idx = (self.energy_idx + 1) % self.energy_buffer.len();
            let smooth = (self.energy_sum / self.energy_buffer.len() as f32).max(0.0);

            let delta = (smooth - self.prev_energy).max(0.0);
            self.prev_energy = smooth;
            self.last_delta = delta;

            self.adaptive_threshold = self.adaptive_threshold * self.threshold_decay
                + smooth * (1.0 - self.threshold_decay);
            let threshold =
                (self.adaptive_threshold * self.config.sensitivity).max(self.config.energy_floor);

            self.samples_since_onset += 1;

            if delta > threshold && self.samples_since_onset >= self.refractory_samples {
                self.samples_since_onset = 0;
                events.push(OnsetEvent {
                    offset,
                    strength: (delta / threshold).min(1.0),
                });
            }
        }

        events
    }

    /// Most recent energy delta (diagnostics only)
    pub fn last_delta(&self) -> f32 {
        self.last_delta
    }

    /// Clear all detector state
    pub fn reset(&mut self) {
        self.energy_buffer.fill(0.0);
        self.energy_idx = 0;
        self.energy_sum = 0.0;
        self.prev_energy = 0.0;
        self.adaptive_threshold = 0.0;
        self.samples_since_onset = self.refractory_samples;
        self.last_delta = 0.0;
    }
}
