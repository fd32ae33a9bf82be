//! Construction-time configuration.
//!
//! All tunables are fixed when the engine is built; nothing here is a
//! runtime control surface. `EngineConfig::load` falls back to defaults
//! when the file is missing or malformed so a bad config file can never
//! prevent the engine from starting.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Frame pool sizing and worker cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Stream sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Number of pre-allocated frame buffers
    #[serde(default = "default_buffer_count")]
    pub buffer_count: usize,
    /// Samples per frame buffer
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Emit a metrics sample every N processed buffers
    #[serde(default = "default_metrics_every")]
    pub metrics_every_n_buffers: u64,
}

fn default_sample_rate() -> u32 {
    48_000
}
fn default_buffer_count() -> usize {
    16
}
fn default_buffer_size() -> usize {
    2048
}
fn default_metrics_every() -> u64 {
    8
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            buffer_count: default_buffer_count(),
            buffer_size: default_buffer_size(),
            metrics_every_n_buffers: default_metrics_every(),
        }
    }
}

/// Onset detector tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnsetConfig {
    /// Threshold scale over the adaptive energy baseline
    #[serde(default = "default_sensitivity")]
    pub sensitivity: f32,
    /// Moving-average length for energy smoothing (samples)
    #[serde(default = "default_baseline_window")]
    pub baseline_window: usize,
    /// Minimum gap between onsets
    #[serde(default = "default_refractory_ms")]
    pub refractory_ms: f32,
    /// Energy floor below which no onset can fire
    #[serde(default = "default_energy_floor")]
    pub energy_floor: f32,
}

fn default_sensitivity() -> f32 {
    1.5
}
fn default_baseline_window() -> usize {
    64
}
fn default_refractory_ms() -> f32 {
    50.0
}
fn default_energy_floor() -> f32 {
    1e-6
}

impl Default for OnsetConfig {
    fn default() -> Self {
        Self {
            sensitivity: default_sensitivity(),
            baseline_window: default_baseline_window(),
            refractory_ms: default_refractory_ms(),
            energy_floor: default_energy_floor(),
        }
    }
}

/// Calibration procedure tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Accepted samples required per sound category
    #[serde(default = "default_samples_per_category")]
    pub samples_per_category: u8,
    /// Relative band width around each feature mean used for scoring
    #[serde(default = "default_margin")]
    pub margin: f32,
    /// Valid spectral centroid range for candidate samples (Hz)
    #[serde(default = "default_centroid_min_hz")]
    pub centroid_min_hz: f32,
    #[serde(default = "default_centroid_max_hz")]
    pub centroid_max_hz: f32,
    /// Consecutive rejections before a guidance hint surfaces
    #[serde(default = "default_guidance_after_misses")]
    pub guidance_after_misses: u8,
    /// Decay-time boundaries for level-2 hi-hat discrimination (ms)
    #[serde(default = "default_closed_hihat_max_decay_ms")]
    pub closed_hihat_max_decay_ms: f32,
    #[serde(default = "default_open_hihat_min_decay_ms")]
    pub open_hihat_min_decay_ms: f32,
}

fn default_samples_per_category() -> u8 {
    10
}
fn default_margin() -> f32 {
    1.2
}
fn default_centroid_min_hz() -> f32 {
    50.0
}
fn default_centroid_max_hz() -> f32 {
    20_000.0
}
fn default_guidance_after_misses() -> u8 {
    4
}
fn default_closed_hihat_max_decay_ms() -> f32 {
    50.0
}
fn default_open_hihat_min_decay_ms() -> f32 {
    150.0
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            samples_per_category: default_samples_per_category(),
            margin: default_margin(),
            centroid_min_hz: default_centroid_min_hz(),
            centroid_max_hz: default_centroid_max_hz(),
            guidance_after_misses: default_guidance_after_misses(),
            closed_hihat_max_decay_ms: default_closed_hihat_max_decay_ms(),
            open_hihat_min_decay_ms: default_open_hihat_min_decay_ms(),
        }
    }
}

/// Timing feedback tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Half-width of the on-time window around each beat (ms)
    #[serde(default = "default_on_time_window_ms")]
    pub on_time_window_ms: f64,
}

fn default_on_time_window_ms() -> f64 {
    20.0
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            on_time_window_ms: default_on_time_window_ms(),
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub onset: OnsetConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub timing: TimingConfig,
}

impl EngineConfig {
    /// Load configuration from a JSON file, falling back to defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(config) => {
                    log::info!("Loaded engine config from {}", path.as_ref().display());
                    config
                }
                Err(e) => {
                    log::warn!(
                        "Malformed config {}: {} (using defaults)",
                        path.as_ref().display(),
                        e
                    );
                    Self::default()
                }
            },
            Err(_) => {
                log::info!(
                    "No config at {} (using defaults)",
                    path.as_ref().display()
                );
                Self::default()
            }
        }
    }
}
