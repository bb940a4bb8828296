//! Voice listener - microphone capture and speech-to-text
//!
//! The listener sleeps on the mode channel until voice mode is active, then
//! captures one bounded phrase at a time and enqueues the transcript. Capture
//! and transcription are capabilities behind trait seams; the real ones
//! (`cpal` + `whisper-rs`) come in with the `audio` feature.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

use crate::queue::CommandQueue;
use crate::types::{Modality, RawUtterance};
use crate::Shutdown;

/// Bound on every suspension so shutdown is observed promptly.
const WAKE_CHECK: Duration = Duration::from_secs(1);
const RETRY_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum SttError {
    #[error("no speech captured")]
    Timeout,
    #[error("speech not intelligible")]
    Unintelligible,
    #[error("speech service failed: {0}")]
    Service(String),
}

/// One captured phrase of mono PCM.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Microphone capture bounded by a phrase limit.
#[async_trait]
pub trait SpeechCapture: Send + Sync {
    async fn capture(&self, limit: Duration) -> Result<AudioClip, SttError>;
}

/// Clip-to-text transcription.
pub trait SpeechToText: Send + Sync {
    fn transcribe(&self, clip: &AudioClip) -> Result<String, SttError>;
}

/// Whisper hallucinates filler on silence. Bracketed annotations and its
/// stock sign-off are dropped before they can reach the queue.
fn is_noise(text: &str) -> bool {
    let text = text.trim();
    text.is_empty()
        || text.starts_with('[')
        || text.starts_with('(')
        || text.eq_ignore_ascii_case("thanks for watching!")
}

pub struct VoiceListener {
    capture: Box<dyn SpeechCapture>,
    stt: Box<dyn SpeechToText>,
    queue: Arc<CommandQueue>,
    modes: watch::Receiver<Modality>,
    shutdown: Shutdown,
    phrase_limit: Duration,
}

impl VoiceListener {
    pub fn new(
        capture: Box<dyn SpeechCapture>,
        stt: Box<dyn SpeechToText>,
        queue: Arc<CommandQueue>,
        modes: watch::Receiver<Modality>,
        shutdown: Shutdown,
        phrase_limit: Duration,
    ) -> Self {
        Self {
            capture,
            stt,
            queue,
            modes,
            shutdown,
            phrase_limit,
        }
    }

    pub async fn run(mut self) {
        log::info!("voice listener up");
        while !self.shutdown.is_signaled() {
            if *self.modes.borrow_and_update() != Modality::Voice {
                match tokio::time::timeout(WAKE_CHECK, self.modes.changed()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => break,
                    Err(_) => {}
                }
                continue;
            }
            match self.capture.capture(self.phrase_limit).await {
                Ok(clip) => self.handle_clip(&clip),
                Err(SttError::Timeout) => {
                    log::debug!("no speech within the phrase limit");
                }
                Err(err) => {
                    log::warn!("audio capture failed: {err}");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
        log::info!("voice listener down");
    }

    fn handle_clip(&self, clip: &AudioClip) {
        match self.stt.transcribe(clip) {
            Ok(text) => {
                if is_noise(&text) {
                    log::debug!("discarding noise transcript: {text:?}");
                } else {
                    log::info!("heard: {text:?}");
                    self.queue.enqueue(RawUtterance::new(text, Modality::Voice));
                }
            }
            Err(SttError::Unintelligible) => {
                log::debug!("utterance not intelligible");
            }
            Err(err) => log::warn!("transcription failed: {err}"),
        }
    }
}

#[cfg(feature = "audio")]
mod real {
    use super::*;
    use std::path::Path;

    use anyhow::Context;
    use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

    const WHISPER_SAMPLE_RATE: u32 = 16_000;
    /// Whisper rejects clips shorter than this many samples.
    const MIN_WHISPER_SAMPLES: usize = 320;
    /// Clips quieter than this RMS are silence, not speech.
    const SILENCE_RMS: f32 = 0.01;

    /// Names every available input device, for the startup log.
    pub fn list_input_devices() -> Vec<String> {
        use cpal::traits::{DeviceTrait, HostTrait};
        let host = cpal::default_host();
        match host.input_devices() {
            Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
            Err(err) => {
                log::warn!("could not list input devices: {err}");
                Vec::new()
            }
        }
    }

    /// Microphone capture over `cpal`. The stream handle is not `Send`, so
    /// each capture builds and tears down its stream inside one blocking
    /// closure.
    pub struct CpalCapture {
        device_name: Option<String>,
    }

    impl CpalCapture {
        pub fn new(device_name: Option<String>) -> Self {
            Self { device_name }
        }
    }

    #[async_trait]
    impl SpeechCapture for CpalCapture {
        async fn capture(&self, limit: Duration) -> Result<AudioClip, SttError> {
            let device_name = self.device_name.clone();
            tokio::task::spawn_blocking(move || capture_blocking(device_name, limit))
                .await
                .map_err(|e| SttError::Service(format!("capture task failed: {e}")))?
        }
    }

    fn capture_blocking(
        device_name: Option<String>,
        limit: Duration,
    ) -> Result<AudioClip, SttError> {
        use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

        let host = cpal::default_host();
        let device = match &device_name {
            Some(name) => host
                .input_devices()
                .map_err(|e| SttError::Service(format!("device enumeration failed: {e}")))?
                .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                .ok_or_else(|| SttError::Service(format!("input device {name:?} not found")))?,
            None => host
                .default_input_device()
                .ok_or_else(|| SttError::Service("no input device available".to_string()))?,
        };

        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(WHISPER_SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };

        let (tx, rx) = crossbeam_channel::bounded::<Vec<f32>>(64);
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let _ = tx.try_send(data.to_vec());
                },
                |err| log::warn!("audio stream error: {err}"),
                None,
            )
            .map_err(|e| SttError::Service(format!("could not open input stream: {e}")))?;
        stream
            .play()
            .map_err(|e| SttError::Service(format!("could not start input stream: {e}")))?;

        let deadline = std::time::Instant::now() + limit;
        let mut samples = Vec::new();
        while std::time::Instant::now() < deadline {
            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(chunk) => samples.extend_from_slice(&chunk),
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            }
        }
        drop(stream);

        if samples.is_empty() || rms(&samples) < SILENCE_RMS {
            return Err(SttError::Timeout);
        }
        Ok(AudioClip {
            samples,
            sample_rate: WHISPER_SAMPLE_RATE,
        })
    }

    fn rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum: f32 = samples.iter().map(|s| s * s).sum();
        (sum / samples.len() as f32).sqrt()
    }

    /// Greedy Whisper transcription. The model loads once; each clip gets a
    /// fresh decoding state.
    pub struct WhisperStt {
        ctx: WhisperContext,
    }

    impl WhisperStt {
        pub fn new(model_path: &Path) -> anyhow::Result<Self> {
            let path = model_path
                .to_str()
                .with_context(|| format!("model path not valid UTF-8: {model_path:?}"))?;
            let ctx = WhisperContext::new_with_params(path, WhisperContextParameters::default())
                .with_context(|| format!("failed to load speech model from {path}"))?;
            whisper_rs::install_logging_hooks();
            log::info!("speech model loaded from {path}");
            Ok(Self { ctx })
        }
    }

    impl SpeechToText for WhisperStt {
        fn transcribe(&self, clip: &AudioClip) -> Result<String, SttError> {
            let samples = if clip.sample_rate == WHISPER_SAMPLE_RATE {
                clip.samples.clone()
            } else {
                linear_resample(&clip.samples, clip.sample_rate, WHISPER_SAMPLE_RATE)
            };
            if samples.len() < MIN_WHISPER_SAMPLES {
                return Err(SttError::Unintelligible);
            }

            let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
            params.set_language(Some("en"));
            params.set_print_special(false);
            params.set_print_progress(false);
            params.set_print_realtime(false);
            params.set_print_timestamps(false);

            let mut state = self
                .ctx
                .create_state()
                .map_err(|e| SttError::Service(format!("whisper state failed: {e}")))?;
            state
                .full(params, &samples)
                .map_err(|e| SttError::Service(format!("whisper inference failed: {e}")))?;

            let mut text = String::new();
            for i in 0..state.full_n_segments() {
                if let Some(segment) = state.get_segment(i) {
                    text.push_str(&segment.to_string());
                    text.push(' ');
                }
            }
            let text = text.trim().to_string();
            if text.is_empty() {
                return Err(SttError::Unintelligible);
            }
            Ok(text)
        }
    }

    fn linear_resample(input: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
        if source_rate == target_rate {
            return input.to_vec();
        }
        let ratio = source_rate as f32 / target_rate as f32;
        let new_len = (input.len() as f32 / ratio).ceil() as usize;
        let mut output = Vec::with_capacity(new_len);
        for i in 0..new_len {
            let src_idx_f = i as f32 * ratio;
            let src_idx = src_idx_f as usize;
            if src_idx + 1 >= input.len() {
                break;
            }
            let frac = src_idx_f - src_idx as f32;
            output.push(input[src_idx] + (input[src_idx + 1] - input[src_idx]) * frac);
        }
        output
    }
}

#[cfg(feature = "audio")]
pub use real::{list_input_devices, CpalCapture, WhisperStt};
