//! Speech classifiers: the second stage, run only while the energy gate is open.
//!
//! A classifier returns one score per class for a window of 16 kHz mono PCM.
//! Which indices count as speech is configuration
//! (see [`crate::monitor::AudioConfig::speech_classes`]).

use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use webrtc_vad::{SampleRate, Vad, VadMode};

#[async_trait]
pub trait SpeechClassifier: Send + Sync {
    /// Load the model. Called once while arming.
    async fn load(&self) -> VoiceResult<()> {
        Ok(())
    }

    async fn scores(&self, window: &[f32], sample_rate: u32) -> VoiceResult<Vec<f32>>;
}

// -----------------------------------------------------------------------------
// WebRTC VAD
// -----------------------------------------------------------------------------

fn vad_mode(mode: u8) -> VadMode {
    match mode {
        0 => VadMode::Quality,
        1 => VadMode::LowBitrate,
        2 => VadMode::Aggressive,
        _ => VadMode::VeryAggressive,
    }
}

fn vad_rate(sample_rate: u32) -> VoiceResult<SampleRate> {
    match sample_rate {
        8000 => Ok(SampleRate::Rate8kHz),
        16000 => Ok(SampleRate::Rate16kHz),
        32000 => Ok(SampleRate::Rate32kHz),
        48000 => Ok(SampleRate::Rate48kHz),
        other => Err(VoiceError::Config(format!(
            "WebRTC VAD only supports 8000, 16000, 32000, or 48000 Hz, got {}",
            other
        ))),
    }
}

/// Local scorer built on WebRTC VAD. The window is cut into 30 ms frames and the
/// single score (index 0) is the fraction of frames classified as voiced.
#[derive(Debug, Clone)]
pub struct WebRtcSpeechClassifier {
    sample_rate: u32,
    mode: u8,
    frame_len: usize,
}

impl WebRtcSpeechClassifier {
    pub fn new(sample_rate: u32, mode: u8) -> VoiceResult<Self> {
        vad_rate(sample_rate)?;
        if mode > 3 {
            return Err(VoiceError::Config(format!(
                "VAD mode must be 0-3, got {}",
                mode
            )));
        }
        // 30 ms frames: 480 samples at 16 kHz.
        let frame_len = (sample_rate as usize * 30) / 1000;
        Ok(Self {
            sample_rate,
            mode,
            frame_len,
        })
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// `Vad` is not `Send`, so one is built per window and never held across an await.
    fn voiced_fraction(&self, window: &[f32], sample_rate: u32) -> VoiceResult<f32> {
        if sample_rate != self.sample_rate {
            return Err(VoiceError::VadProcessing(format!(
                "expected {} Hz audio, got {} Hz",
                self.sample_rate, sample_rate
            )));
        }
        let mut vad = Vad::new();
        vad.set_mode(vad_mode(self.mode));
        vad.set_sample_rate(vad_rate(self.sample_rate)?);

        let mut frames = 0usize;
        let mut voiced = 0usize;
        let mut pcm = vec![0i16; self.frame_len];
        for chunk in window.chunks_exact(self.frame_len) {
            for (dst, &src) in pcm.iter_mut().zip(chunk) {
                *dst = (src.clamp(-1.0, 1.0) * 32767.0) as i16;
            }
            let is_speech = vad
                .is_voice_segment(&pcm)
                .map_err(|e| VoiceError::VadProcessing(format!("{:?}", e)))?;
            frames += 1;
            if is_speech {
                voiced += 1;
            }
        }
        if frames == 0 {
            return Ok(0.0);
        }
        Ok(voiced as f32 / frames as f32)
    }
}

#[async_trait]
impl SpeechClassifier for WebRtcSpeechClassifier {
    async fn load(&self) -> VoiceResult<()> {
        info!(
            sample_rate = self.sample_rate,
            mode = self.mode,
            frame_len = self.frame_len,
            "WebRTC VAD ready"
        );
        Ok(())
    }

    async fn scores(&self, window: &[f32], sample_rate: u32) -> VoiceResult<Vec<f32>> {
        let fraction = self.voiced_fraction(window, sample_rate)?;
        debug!(voiced = fraction, "VAD window scored");
        Ok(vec![fraction])
    }
}

// -----------------------------------------------------------------------------
// Remote classifier
// -----------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScoreRequest<'a> {
    sample_rate: u32,
    samples: &'a [f32],
}

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    scores: Vec<f32>,
}

/// Audio-event classifier served over HTTP (e.g. a YAMNet sidecar):
/// `POST {"sampleRate":16000,"samples":[...]}` returns `{"scores":[...]}`.
#[derive(Debug, Clone)]
pub struct HttpSpeechClassifier {
    url: Option<String>,
    client: reqwest::Client,
}

impl HttpSpeechClassifier {
    pub fn new(url: Option<String>, timeout: Duration) -> VoiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VoiceError::Config(e.to_string()))?;
        Ok(Self { url, client })
    }
}

#[async_trait]
impl SpeechClassifier for HttpSpeechClassifier {
    async fn load(&self) -> VoiceResult<()> {
        match self.url {
            Some(ref url) => {
                info!(url = %url, "Remote speech classifier configured");
                Ok(())
            }
            None => Err(VoiceError::ModelLoad(
                "no classifier endpoint configured".to_string(),
            )),
        }
    }

    async fn scores(&self, window: &[f32], sample_rate: u32) -> VoiceResult<Vec<f32>> {
        let url = self
            .url
            .as_deref()
            .ok_or_else(|| VoiceError::Classifier("classifier not loaded".to_string()))?;
        let res = self
            .client
            .post(url)
            .json(&ScoreRequest {
                sample_rate,
                samples: window,
            })
            .send()
            .await
            .map_err(|e| VoiceError::Classifier(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Classifier(format!(
                "classifier error {}: {}",
                status, body
            )));
        }
        let parsed: ScoreResponse = res
            .json()
            .await
            .map_err(|e| VoiceError::Classifier(e.to_string()))?;
        Ok(parsed.scores)
    }
}
