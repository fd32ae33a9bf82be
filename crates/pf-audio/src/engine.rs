//! Audio Engine
//!
//! Owns the platform input/output streams and the transport state
//! shared with the callbacks:
//! - `frame_counter`: advanced atomically by the output callback,
//!   the timebase for beats and onset timestamps
//! - `bpm`: atomic, observed by the next callback after a change
//! - click playback position and enable flag
//!
//! The callbacks themselves never allocate or lock: the input callback
//! pushes frames through the pool rings, the output callback writes
//! click or silence from the precomputed waveform.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use pf_core::{AudioError, AudioResult};

use crate::metronome::{generate_click, is_beat_boundary};
use crate::pool::AudioSideQueues;

// ═══════════════════════════════════════════════════════════════════════════════
// ENGINE
// ═══════════════════════════════════════════════════════════════════════════════

pub struct AudioEngine {
    input_stream: Option<cpal::Stream>,
    output_stream: Option<cpal::Stream>,

    /// Output-frame timebase, advanced once per rendered frame
    frame_counter: Arc<AtomicU64>,
    /// Current tempo, atomically updated by `set_bpm`
    bpm: Arc<AtomicU32>,
    sample_rate: u32,
    /// Precomputed click waveform, read-only from the callback
    click: Arc<Vec<f32>>,
    /// Playback position within the click (past the end = silent)
    click_position: Arc<AtomicU64>,
    metronome_enabled: Arc<AtomicBool>,

    /// Producer endpoints, consumed by `start`
    audio_queues: Option<AudioSideQueues>,
}

impl AudioEngine {
    pub fn new(bpm: u32, sample_rate: u32, audio_queues: AudioSideQueues) -> Self {
        let click = generate_click(sample_rate);

        Self {
            input_stream: None,
            output_stream: None,
            frame_counter: Arc::new(AtomicU64::new(0)),
            bpm: Arc::new(AtomicU32::new(bpm)),
            sample_rate,
            click: Arc::new(click),
            click_position: Arc::new(AtomicU64::new(u64::MAX)),
            metronome_enabled: Arc::new(AtomicBool::new(true)),
            audio_queues: Some(audio_queues),
        }
    }

    // ───────────────────────────────────────────────────────────────────
    // Transport state
    // ───────────────────────────────────────────────────────────────────

    pub fn set_bpm(&self, bpm: u32) {
        self.bpm.store(bpm, Ordering::Relaxed);
    }

    pub fn bpm(&self) -> u32 {
        self.bpm.load(Ordering::Relaxed)
    }

    pub fn frame_counter(&self) -> u64 {
        self.frame_counter.load(Ordering::Relaxed)
    }

    pub fn frame_counter_ref(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.frame_counter)
    }

    pub fn bpm_ref(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.bpm)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Mute/unmute the click without stopping the engine
    pub fn set_metronome_enabled(&self, enabled: bool) {
        self.metronome_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.input_stream.is_some() || self.output_stream.is_some()
    }

    // ───────────────────────────────────────────────────────────────────
    // Lifecycle
    // ───────────────────────────────────────────────────────────────────

    /// Open and start both streams. The engine is single-shot: after
    /// `stop` a fresh engine (and pool) must be built to start again.
    pub fn start(&mut self) -> AudioResult<()> {
        if self.is_running() {
            return Err(AudioError::AlreadyRunning);
        }
        let audio_queues = self
            .audio_queues
            .take()
            .ok_or_else(|| AudioError::StreamFailure {
                reason: "engine cannot be restarted; build a new one".to_string(),
            })?;

        let input_stream = self.build_input_stream(audio_queues)?;
        let output_stream = self.build_output_stream()?;

        input_stream.play().map_err(|e| AudioError::HardwareError {
            details: format!("input start failed: {}", e),
        })?;
        output_stream
            .play()
            .map_err(|e| AudioError::HardwareError {
                details: format!("output start failed: {}", e),
            })?;

        self.input_stream = Some(input_stream);
        self.output_stream = Some(output_stream);

        log::info!(
            "Audio engine started: {} Hz, {} BPM",
            self.sample_rate,
            self.bpm()
        );
        Ok(())
    }

    /// Stop both streams. Safe to call on a stopped engine.
    pub fn stop(&mut self) {
        if self.input_stream.take().is_some() | self.output_stream.take().is_some() {
            log::info!("Audio engine stopped at frame {}", self.frame_counter());
        }
    }

    // ───────────────────────────────────────────────────────────────────
    // Stream construction
    // ───────────────────────────────────────────────────────────────────

    fn build_input_stream(&self, mut queues: AudioSideQueues) -> AudioResult<cpal::Stream> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| AudioError::HardwareError {
                details: "no default input device".to_string(),
            })?;

        let config = device
            .default_input_config()
            .map_err(|e| AudioError::StreamOpenFailed {
                reason: format!("input config: {}", e),
            })?;
        let stream_config: cpal::StreamConfig = config.clone().into();
        let channels = stream_config.channels as usize;

        let err_fn = |err| log::error!("Input stream error: {}", err);

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => device
                .build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        queues.push_frame(data, channels);
                    },
                    err_fn,
                    None,
                )
                .map_err(map_build_error)?,
            other => {
                return Err(AudioError::StreamOpenFailed {
                    reason: format!("unsupported input sample format {:?}", other),
                })
            }
        };

        Ok(stream)
    }

    fn build_output_stream(&self) -> AudioResult<cpal::Stream> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| AudioError::HardwareError {
                details: "no default output device".to_string(),
            })?;

        let config = device
            .default_output_config()
            .map_err(|e| AudioError::StreamOpenFailed {
                reason: format!("output config: {}", e),
            })?;
        let stream_config: cpal::StreamConfig = config.clone().into();
        let channels = stream_config.channels as usize;

        let frame_counter = Arc::clone(&self.frame_counter);
        let bpm = Arc::clone(&self.bpm);
        let click = Arc::clone(&self.click);
        let click_position = Arc::clone(&self.click_position);
        let metronome_enabled = Arc::clone(&self.metronome_enabled);
        let sample_rate = self.sample_rate;

        let err_fn = |err| log::error!("Output stream error: {}", err);

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => device
                .build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let current_bpm = bpm.load(Ordering::Relaxed);
                        let clicks_on = metronome_enabled.load(Ordering::Relaxed);
                        let mut click_pos = click_position.load(Ordering::Relaxed) as usize;

                        let frames = data.len() / channels;
                        let block_start = frame_counter.load(Ordering::Relaxed);

                        for i in 0..frames {
                            let frame = block_start + i as u64;

                            if clicks_on && is_beat_boundary(frame, current_bpm, sample_rate) {
                                click_pos = 0;
                            }

                            let sample = if clicks_on && click_pos < click.len() {
                                let s = click[click_pos];
                                click_pos += 1;
                                s
                            } else {
                                0.0
                            };

                            for ch in 0..channels {
                                data[i * channels + ch] = sample;
                            }
                        }

                        click_position.store(click_pos as u64, Ordering::Relaxed);
                        frame_counter.fetch_add(frames as u64, Ordering::Relaxed);
                    },
                    err_fn,
                    None,
                )
                .map_err(map_build_error)?,
            other => {
                return Err(AudioError::StreamOpenFailed {
                    reason: format!("unsupported output sample format {:?}", other),
                })
            }
        };

        Ok(stream)
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn map_build_error(e: cpal::BuildStreamError) -> AudioError {
    match e {
        cpal::BuildStreamError::DeviceNotAvailable => AudioError::HardwareError {
            details: "device not available".to_string(),
        },
        other => AudioError::StreamOpenFailed {
            reason: other.to_string(),
        },
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::FramePool;

    fn engine() -> AudioEngine {
        let (audio_side, _analysis_side) = FramePool::new(4, 256);
        AudioEngine::new(120, 48_000, audio_side)
    }

    #[test]
    fn new_engine_is_stopped_at_frame_zero() {
        let engine = engine();
        assert!(!engine.is_running());
        assert_eq!(engine.frame_counter(), 0);
        assert_eq!(engine.bpm(), 120);
    }

    #[test]
    fn bpm_updates_are_observable() {
        let engine = engine();
        engine.set_bpm(90);
        assert_eq!(engine.bpm(), 90);

        // Shared handle sees the same value
        let bpm_ref = engine.bpm_ref();
        engine.set_bpm(200);
        assert_eq!(bpm_ref.load(Ordering::Relaxed), 200);
    }

    #[test]
    fn frame_counter_handle_is_shared() {
        let engine = engine();
        let counter = engine.frame_counter_ref();
        counter.fetch_add(1024, Ordering::Relaxed);
        assert_eq!(engine.frame_counter(), 1024);
    }

    #[test]
    fn stop_is_safe_when_not_running() {
        let mut engine = engine();
        engine.stop();
        engine.stop();
        assert!(!engine.is_running());
    }
}
