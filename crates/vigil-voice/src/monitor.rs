//! Audio monitor: energy gate, then speech classification, then sustained-speech
//! tracking. Sampled once per tick from the capture ring buffer.

use crate::capture::{AudioDevice, AudioSource};
use crate::classifier::SpeechClassifier;
use crate::energy::{rms, VoiceGate};
use crate::speech::{speech_score, SpeechTracker};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace};
use vigil_core::{
    ArmedMonitor, Monitor, MonitorContext, ProctorError, ProctorResult, Report, ViolationType,
};

pub const BACKGROUND_VOICE_MESSAGE: &str = "Background voice detected";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierBackend {
    Webrtc,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub enabled: bool,
    pub sample_rate: u32,
    /// Samples per classified window (0.975 s at 16 kHz).
    pub window_samples: usize,
    pub interval_ms: u64,
    /// RMS level the energy gate must exceed.
    pub vad_threshold: f32,
    /// Consecutive loud samples before the gate opens.
    pub gate_samples: u32,
    pub speech_threshold: f32,
    pub sustain_ms: u64,
    /// Classifier output indices that count as speech.
    pub speech_classes: Vec<usize>,
    pub classifier: ClassifierBackend,
    /// WebRTC VAD aggressiveness (0-3).
    pub webrtc_mode: u8,
    pub classifier_url: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_rate: 16000,
            window_samples: 15_600,
            interval_ms: 1000,
            vad_threshold: 0.02,
            gate_samples: 2,
            speech_threshold: 0.6,
            sustain_ms: 1500,
            speech_classes: vec![0, 1],
            classifier: ClassifierBackend::Webrtc,
            webrtc_mode: 2,
            classifier_url: None,
            request_timeout_ms: 3000,
        }
    }
}

impl AudioConfig {
    pub fn validate(&self) -> ProctorResult<()> {
        if self.window_samples == 0 || self.interval_ms == 0 {
            return Err(ProctorError::Config(
                "audio.window_samples and audio.interval_ms must be > 0".into(),
            ));
        }
        if self.speech_classes.is_empty() {
            return Err(ProctorError::Config(
                "audio.speech_classes must name at least one class".into(),
            ));
        }
        Ok(())
    }
}

/// Unarmed audio monitor.
pub struct AudioMonitor {
    config: AudioConfig,
    device: Box<dyn AudioDevice>,
    classifier: Box<dyn SpeechClassifier>,
}

impl AudioMonitor {
    pub fn new(
        config: AudioConfig,
        device: Box<dyn AudioDevice>,
        classifier: Box<dyn SpeechClassifier>,
    ) -> Self {
        Self {
            config,
            device,
            classifier,
        }
    }
}

#[async_trait]
impl Monitor for AudioMonitor {
    fn name(&self) -> &'static str {
        "audio"
    }

    async fn arm(self: Box<Self>) -> ProctorResult<Box<dyn ArmedMonitor>> {
        self.config.validate()?;
        self.classifier.load().await?;
        let source = self
            .device
            .open(self.config.sample_rate, self.config.window_samples)?;
        info!(
            vad_threshold = self.config.vad_threshold,
            speech_threshold = self.config.speech_threshold,
            "Audio monitor armed"
        );
        let config = self.config;
        Ok(Box::new(ArmedAudio {
            interval: Duration::from_millis(config.interval_ms),
            window_samples: config.window_samples,
            gate: VoiceGate::new(config.vad_threshold, config.gate_samples),
            tracker: SpeechTracker::new(
                config.speech_threshold,
                Duration::from_millis(config.sustain_ms),
            ),
            speech_classes: config.speech_classes,
            source,
            classifier: self.classifier,
        }))
    }
}

struct ArmedAudio {
    interval: Duration,
    window_samples: usize,
    gate: VoiceGate,
    tracker: SpeechTracker,
    speech_classes: Vec<usize>,
    source: Box<dyn AudioSource>,
    classifier: Box<dyn SpeechClassifier>,
}

impl ArmedAudio {
    async fn sample(&mut self, ctx: &MonitorContext) -> ProctorResult<()> {
        let window = self.source.latest(self.window_samples);
        if window.len() < self.window_samples {
            trace!(have = window.len(), "Audio buffer still filling");
            return Ok(());
        }

        let level = rms(&window);
        if !self.gate.observe(level) {
            self.tracker.reset();
            return Ok(());
        }

        let scores = match self
            .classifier
            .scores(&window, self.source.sample_rate())
            .await
        {
            Ok(scores) => scores,
            Err(e) => {
                debug!(error = %e, "Speech classification failed; skipping window");
                return Ok(());
            }
        };
        let score = speech_score(&scores, &self.speech_classes);
        trace!(level, score, "Audio window scored");

        if let Some(since) = self.tracker.observe(score, Instant::now()) {
            let report =
                Report::new(ViolationType::BackgroundVoice, BACKGROUND_VOICE_MESSAGE).since(since);
            ctx.submit(report).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ArmedMonitor for ArmedAudio {
    fn name(&self) -> &'static str {
        "audio"
    }

    async fn run(self: Box<Self>, ctx: MonitorContext) -> ProctorResult<()> {
        let mut this = self;
        let mut stop = ctx.stop_signal();
        let mut interval = tokio::time::interval(this.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = stop.stopped() => break,
                _ = interval.tick() => {
                    if !ctx.is_active() {
                        break;
                    }
                    this.sample(&ctx).await?;
                }
            }
        }
        debug!("Audio monitor stopped");
        Ok(())
    }
}
