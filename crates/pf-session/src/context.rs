//! Application facade.
//!
//! `AppContext` owns the engine lifecycle, the calibration flow, the
//! shared calibration state, and the broadcast channels external
//! consumers subscribe to. Every operation is a method here; callers
//! never touch the engine or worker directly.
//!
//! Locking: std locks, with poisoning mapped to typed errors
//! (`LockPoisoned` / `StatePoisoned`) so a panicked holder degrades a
//! single operation instead of the process. `start_audio` must be
//! called from within a tokio runtime: the event forwarder tasks are
//! spawned there.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::JoinHandle;

use futures_util::Stream;
use pf_audio::engine::AudioEngine;
use pf_audio::pool::FramePool;
use pf_core::{
    AudioError, AudioResult, CalibrationError, CalibrationResult, ClassificationResult,
    EngineConfig, EngineMetrics,
};
use tokio::sync::{broadcast, mpsc};

use crate::calibration::{
    CalibrationPhase, CalibrationProgress, CalibrationRun, CalibrationState,
};
use crate::streams::{forward, subscribe_stream, BROADCAST_CAPACITY};
use crate::worker::AnalysisWorker;

/// A running engine: streams, worker thread, and its shutdown flag
struct EngineHandle {
    engine: AudioEngine,
    worker: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl EngineHandle {
    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.engine.stop();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Analysis worker panicked during shutdown");
            }
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

pub struct AppContext {
    config: EngineConfig,
    engine: Mutex<Option<EngineHandle>>,
    calibration_run: Arc<Mutex<Option<CalibrationRun>>>,
    calibration_state: Arc<RwLock<CalibrationState>>,

    results_tx: broadcast::Sender<ClassificationResult>,
    progress_tx: broadcast::Sender<CalibrationProgress>,
    metrics_tx: broadcast::Sender<EngineMetrics>,
}

impl AppContext {
    pub fn new(config: EngineConfig) -> Self {
        let (results_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (progress_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (metrics_tx, _) = broadcast::channel(BROADCAST_CAPACITY);

        Self {
            config,
            engine: Mutex::new(None),
            calibration_run: Arc::new(Mutex::new(None)),
            calibration_state: Arc::new(RwLock::new(CalibrationState::default())),
            results_tx,
            progress_tx,
            metrics_tx,
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Audio lifecycle
    // ═══════════════════════════════════════════════════════════════════

    /// Open the duplex streams and start the analysis worker
    pub fn start_audio(&self, bpm: u32) -> AudioResult<()> {
        AudioError::check_bpm(bpm)?;

        let mut guard = self.lock_engine()?;
        if guard.is_some() {
            return Err(AudioError::AlreadyRunning);
        }

        let (audio_queues, analysis_queues) = FramePool::new(
            self.config.audio.buffer_count,
            self.config.audio.buffer_size,
        );
        let mut engine = AudioEngine::new(bpm, self.config.audio.sample_rate, audio_queues);

        // Worker events go through mpsc first so the worker never
        // blocks; forwarders re-publish into the broadcast channels
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let (metrics_tx, metrics_rx) = mpsc::unbounded_channel();
        forward(results_rx, self.results_tx.clone());
        forward(progress_rx, self.progress_tx.clone());
        forward(metrics_rx, self.metrics_tx.clone());

        let shutdown = Arc::new(AtomicBool::new(false));
        let worker = AnalysisWorker::new(
            analysis_queues,
            &self.config,
            engine.bpm_ref(),
            Arc::clone(&self.calibration_state),
            Arc::clone(&self.calibration_run),
            results_tx,
            progress_tx,
            metrics_tx,
            Arc::clone(&shutdown),
        );

        engine.start()?;

        let worker = match std::thread::Builder::new()
            .name("pf-analysis".to_string())
            .spawn(move || worker.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                engine.stop();
                return Err(AudioError::StreamFailure {
                    reason: format!("analysis thread spawn: {}", e),
                });
            }
        };

        *guard = Some(EngineHandle {
            engine,
            worker: Some(worker),
            shutdown,
        });
        log::info!("Session started at {} BPM", bpm);
        Ok(())
    }

    /// Stop the streams and join the analysis worker
    pub fn stop_audio(&self) -> AudioResult<()> {
        let mut guard = self.lock_engine()?;
        let mut handle = guard.take().ok_or(AudioError::NotRunning)?;
        handle.stop();
        log::info!("Session stopped");
        Ok(())
    }

    pub fn is_running(&self) -> AudioResult<bool> {
        Ok(self.lock_engine()?.is_some())
    }

    /// Change tempo; applies from the next output callback
    pub fn set_bpm(&self, bpm: u32) -> AudioResult<()> {
        AudioError::check_bpm(bpm)?;
        let guard = self.lock_engine()?;
        let handle = guard.as_ref().ok_or(AudioError::NotRunning)?;
        handle.engine.set_bpm(bpm);
        Ok(())
    }

    /// Mute or unmute the metronome click without stopping the stream
    pub fn set_metronome_enabled(&self, enabled: bool) -> AudioResult<()> {
        let guard = self.lock_engine()?;
        let handle = guard.as_ref().ok_or(AudioError::NotRunning)?;
        handle.engine.set_metronome_enabled(enabled);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Calibration flow
    // ═══════════════════════════════════════════════════════════════════

    /// Begin a calibration run at the level stored on the calibration
    /// state (persisted snapshots carry it forward)
    pub fn start_calibration(&self) -> CalibrationResult<CalibrationProgress> {
        let level = self.read_state()?.level;
        self.start_calibration_at(level)
    }

    /// Begin a calibration run at an explicit level (1 or 2)
    pub fn start_calibration_at(&self, level: u8) -> CalibrationResult<CalibrationProgress> {
        if !(1..=2).contains(&level) {
            return Err(CalibrationError::InvalidFeatures {
                reason: format!("unsupported calibration level {}", level),
            });
        }

        let mut slot = self.lock_run()?;
        if slot.is_some() {
            return Err(CalibrationError::AlreadyInProgress);
        }

        let run = CalibrationRun::new(level, self.config.calibration.clone());
        let progress = run.progress();
        *slot = Some(run);
        let _ = self.progress_tx.send(progress.clone());
        Ok(progress)
    }

    /// Abandon the active run, if any. Idempotent.
    pub fn cancel_calibration(&self) -> CalibrationResult<()> {
        if self.lock_run()?.take().is_some() {
            log::info!("Calibration run cancelled");
        }
        Ok(())
    }

    /// Compute thresholds from a completed run and swap them in as a
    /// whole unit. An incomplete run is left in place.
    pub fn finish_calibration(&self) -> CalibrationResult<CalibrationState> {
        let mut slot = self.lock_run()?;
        let run = slot.as_ref().ok_or(CalibrationError::NotComplete)?;

        if !run.is_complete() {
            if run.phase() == CalibrationPhase::NoiseFloor {
                return Err(CalibrationError::NotComplete);
            }
            let progress = run.progress();
            return Err(CalibrationError::InsufficientSamples {
                required: progress.samples_needed as usize,
                collected: progress.samples_collected as usize,
            });
        }

        // Completeness verified above, so take cannot fail here
        let run = slot.take().ok_or(CalibrationError::NotComplete)?;
        drop(slot);

        let state = run.finalize()?;
        *self.write_state()? = state.clone();
        Ok(state)
    }

    /// Promote the last rejected candidate of the active run
    pub fn manual_accept_sample(&self) -> CalibrationResult<CalibrationProgress> {
        let mut slot = self.lock_run()?;
        let run = slot
            .as_mut()
            .ok_or_else(|| CalibrationError::InvalidFeatures {
                reason: "no calibration run active".to_string(),
            })?;
        let progress = run.manual_accept()?;
        let _ = self.progress_tx.send(progress.clone());
        Ok(progress)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Calibration state persistence
    // ═══════════════════════════════════════════════════════════════════

    pub fn calibration_state(&self) -> CalibrationResult<CalibrationState> {
        Ok(self.read_state()?.clone())
    }

    /// Serialize the current thresholds for external storage
    pub fn calibration_to_json(&self) -> CalibrationResult<String> {
        self.read_state()?.to_json()
    }

    /// Replace the live state from a stored snapshot
    pub fn load_calibration_json(&self, json: &str) -> CalibrationResult<()> {
        let state = CalibrationState::from_json(json)?;
        log::info!(
            "Loaded calibration snapshot: level {}, {} categories",
            state.level,
            state.thresholds.len()
        );
        *self.write_state()? = state;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Event streams
    // ═══════════════════════════════════════════════════════════════════

    pub fn classification_stream(&self) -> impl Stream<Item = ClassificationResult> + Send {
        subscribe_stream(&self.results_tx)
    }

    pub fn calibration_progress_stream(&self) -> impl Stream<Item = CalibrationProgress> + Send {
        subscribe_stream(&self.progress_tx)
    }

    pub fn metrics_stream(&self) -> impl Stream<Item = EngineMetrics> + Send {
        subscribe_stream(&self.metrics_tx)
    }

    // ───────────────────────────────────────────────────────────────────

    fn lock_engine(&self) -> AudioResult<MutexGuard<'_, Option<EngineHandle>>> {
        self.engine.lock().map_err(|_| AudioError::LockPoisoned {
            component: "audio_engine".to_string(),
        })
    }

    fn lock_run(&self) -> CalibrationResult<MutexGuard<'_, Option<CalibrationRun>>> {
        self.calibration_run
            .lock()
            .map_err(|_| CalibrationError::StatePoisoned)
    }

    fn read_state(&self) -> CalibrationResult<RwLockReadGuard<'_, CalibrationState>> {
        self.calibration_state
            .read()
            .map_err(|_| CalibrationError::StatePoisoned)
    }

    fn write_state(&self) -> CalibrationResult<RwLockWriteGuard<'_, CalibrationState>> {
        self.calibration_state
            .write()
            .map_err(|_| CalibrationError::StatePoisoned)
    }

    // ───────────────────────────────────────────────────────────────────

    /// Park a built-but-not-started engine so lifecycle guards can be
    /// exercised without audio hardware
    #[cfg(test)]
    fn install_stub_engine(&self, bpm: u32) {
        let (audio_queues, _analysis) = FramePool::new(2, 64);
        let engine = AudioEngine::new(bpm, self.config.audio.sample_rate, audio_queues);
        let mut guard = self.lock_engine().unwrap();
        *guard = Some(EngineHandle {
            engine,
            worker: None,
            shutdown: Arc::new(AtomicBool::new(false)),
        });
    }
}
