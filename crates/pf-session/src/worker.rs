//! Analysis worker thread.
//!
//! Owns the analysis side of the frame pool and the DSP state. Each
//! drained buffer flows through one of three paths:
//! - noise-floor measurement, while a calibration run is in that phase
//! - onset → features → calibration candidate, while a run collects
//! - onset → features → classify + quantize, once calibrated
//!
//! Samples are accumulated across buffer boundaries: an onset near the
//! tail of a buffer is held until its full analysis window has arrived
//! rather than analyzed against a truncated fragment.
//!
//! Events leave through unbounded mpsc senders so the worker never
//! blocks on a slow consumer; the stream layer fans them out.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use pf_audio::pool::AnalysisSideQueues;
use pf_core::{ClassificationResult, EngineConfig, EngineMetrics};
use pf_dsp::{FeatureExtractor, FeatureVector, OnsetDetector, WINDOW_SIZE};
use tokio::sync::mpsc::UnboundedSender;

use crate::calibration::{CalibrationPhase, CalibrationProgress, CalibrationRun, CalibrationState};
use crate::classifier::classify;
use crate::quantizer::BeatQuantizer;

/// Idle sleep between empty polls of the data ring
const IDLE_POLL: Duration = Duration::from_millis(1);

pub struct AnalysisWorker {
    queues: AnalysisSideQueues,
    onset: OnsetDetector,
    extractor: FeatureExtractor,
    quantizer: BeatQuantizer,

    calibration_config: pf_core::CalibrationConfig,
    metrics_every_n_buffers: u64,
    sample_rate: u32,

    state: Arc<RwLock<CalibrationState>>,
    run_slot: Arc<Mutex<Option<CalibrationRun>>>,

    results_tx: UnboundedSender<ClassificationResult>,
    progress_tx: UnboundedSender<CalibrationProgress>,
    metrics_tx: UnboundedSender<EngineMetrics>,
    shutdown: Arc<AtomicBool>,

    /// Input frames consumed so far; the worker's timeline
    frames_processed: u64,
    buffers_processed: u64,
    last_features: Option<FeatureVector>,

    /// Samples held until each pending onset's full window arrives
    window: Vec<f32>,
    window_start_frame: u64,
    pending_onsets: VecDeque<u64>,
}

impl AnalysisWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queues: AnalysisSideQueues,
        config: &EngineConfig,
        bpm: Arc<std::sync::atomic::AtomicU32>,
        state: Arc<RwLock<CalibrationState>>,
        run_slot: Arc<Mutex<Option<CalibrationRun>>>,
        results_tx: UnboundedSender<ClassificationResult>,
        progress_tx: UnboundedSender<CalibrationProgress>,
        metrics_tx: UnboundedSender<EngineMetrics>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let sample_rate = config.audio.sample_rate;
        Self {
            queues,
            onset: OnsetDetector::new(sample_rate, config.onset.clone()),
            extractor: FeatureExtractor::new(sample_rate),
            quantizer: BeatQuantizer::new(bpm, sample_rate, config.timing.on_time_window_ms),
            calibration_config: config.calibration.clone(),
            metrics_every_n_buffers: config.audio.metrics_every_n_buffers,
            sample_rate,
            state,
            run_slot,
            results_tx,
            progress_tx,
            metrics_tx,
            shutdown,
            frames_processed: 0,
            buffers_processed: 0,
            last_features: None,
            window: Vec::new(),
            window_start_frame: 0,
            pending_onsets: VecDeque::new(),
        }
    }

    /// Worker main loop; runs until the shutdown flag is raised
    pub fn run(mut self) {
        log::info!("Analysis worker started ({} Hz)", self.sample_rate);

        while !self.shutdown.load(Ordering::Relaxed) {
            match self.queues.pop_frame() {
                Some(buffer) => {
                    self.process_buffer(&buffer);
                    self.queues.recycle(buffer);
                }
                None => std::thread::sleep(IDLE_POLL),
            }
        }

        log::info!(
            "Analysis worker stopped: {} buffers, {} frames, {} dropped",
            self.buffers_processed,
            self.frames_processed,
            self.queues.dropped_frames()
        );
    }

    fn process_buffer(&mut self, buffer: &[f32]) {
        let buffer_rms = pf_dsp::rms(buffer);

        if !self.observe_noise_floor(buffer_rms) {
            self.accumulate(buffer);
        }

        self.frames_processed += buffer.len() as u64;
        self.buffers_processed += 1;

        if self.metrics_every_n_buffers > 0
            && self.buffers_processed % self.metrics_every_n_buffers == 0
        {
            self.emit_metrics(buffer_rms);
        }
    }

    /// Append the buffer and analyze every onset whose full window has
    /// arrived. Tail onsets stay pending until the next buffer
    /// completes their window.
    fn accumulate(&mut self, buffer: &[f32]) {
        if self.window.is_empty() {
            self.window_start_frame = self.frames_processed;
        }
        self.window.extend_from_slice(buffer);

        for event in self.onset.process_block(buffer) {
            self.pending_onsets
                .push_back(self.frames_processed + event.offset as u64);
        }

        let window_end = self.window_start_frame + self.window.len() as u64;
        while let Some(&onset_frame) = self.pending_onsets.front() {
            if onset_frame + WINDOW_SIZE as u64 > window_end {
                break;
            }
            self.pending_onsets.pop_front();

            let start = (onset_frame - self.window_start_frame) as usize;
            let timestamp_ms = onset_frame * 1000 / self.sample_rate as u64;
            let features = self
                .extractor
                .extract(&self.window[start..start + WINDOW_SIZE], timestamp_ms);
            self.handle_onset(onset_frame, features);
        }

        // Windows trail their onset, so samples before the earliest
        // pending onset can never be needed again
        match self.pending_onsets.front() {
            Some(&first) => {
                let keep_from = (first - self.window_start_frame) as usize;
                if keep_from > 0 {
                    self.window.drain(..keep_from);
                    self.window_start_frame = first;
                }
            }
            None => self.window.clear(),
        }
    }

    /// Feed the noise-floor phase if one is active. Returns true when
    /// the buffer was consumed as a noise reading.
    fn observe_noise_floor(&mut self, buffer_rms: f32) -> bool {
        let mut slot = match self.run_slot.lock() {
            Ok(slot) => slot,
            Err(_) => {
                log::error!("calibration run lock poisoned; skipping buffer");
                return false;
            }
        };
        let Some(run) = slot.as_mut() else {
            return false;
        };
        if run.phase() != CalibrationPhase::NoiseFloor {
            return false;
        }

        run.observe_noise(buffer_rms);
        let _ = self.progress_tx.send(run.progress());
        true
    }

    fn handle_onset(&mut self, onset_frame: u64, features: FeatureVector) {
        self.last_features = Some(features);

        // An active run owns every onset until it completes
        match self.run_slot.lock() {
            Ok(mut slot) => {
                if let Some(run) = slot.as_mut() {
                    run.add_candidate(&features);
                    let _ = self.progress_tx.send(run.progress());
                    return;
                }
            }
            Err(_) => {
                log::error!("calibration run lock poisoned; dropping onset");
                return;
            }
        }

        let state = match self.state.read() {
            Ok(state) => state,
            Err(_) => {
                log::error!("calibration state lock poisoned; skipping classification");
                return;
            }
        };
        if !state.is_calibrated {
            return;
        }

        let (sound, confidence) = classify(&features, &state, &self.calibration_config);
        let timing = self.quantizer.quantize(onset_frame);
        let _ = self.results_tx.send(ClassificationResult {
            sound,
            timing,
            confidence,
            timestamp_ms: features.onset_timestamp_ms,
        });
    }

    fn emit_metrics(&mut self, buffer_rms: f32) {
        let (centroid, flux) = self
            .last_features
            .map(|f| (f.spectral_centroid, f.spectral_flux))
            .unwrap_or((0.0, 0.0));

        let _ = self.metrics_tx.send(EngineMetrics {
            rms: buffer_rms,
            spectral_centroid: centroid,
            spectral_flux: flux,
            frame: self.frames_processed,
            timestamp_ms: self.frames_processed * 1000 / self.sample_rate as u64,
            dropped_frames: self.queues.dropped_frames(),
        });
    }
}
