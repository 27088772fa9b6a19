//! Error types for the audio monitor

use thiserror::Error;
use vigil_core::ProctorError;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Audio stream error: {0}")]
    AudioStream(String),

    #[error("VAD processing error: {0}")]
    VadProcessing(String),

    #[error("Speech classifier unavailable: {0}")]
    ModelLoad(String),

    #[error("Speech classifier error: {0}")]
    Classifier(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<VoiceError> for ProctorError {
    fn from(err: VoiceError) -> Self {
        match err {
            VoiceError::AudioDevice(_) | VoiceError::AudioStream(_) => {
                ProctorError::acquisition("audio", err.to_string())
            }
            VoiceError::ModelLoad(_) => {
                ProctorError::model_load("audio", err.to_string())
            }
            VoiceError::VadProcessing(_) | VoiceError::Classifier(_) => {
                ProctorError::Inference(err.to_string())
            }
            VoiceError::Config(reason) => ProctorError::Config(reason),
            VoiceError::Io(e) => ProctorError::Io(e),
        }
    }
}

#[cfg(feature = "capture")]
impl From<cpal::DevicesError> for VoiceError {
    fn from(err: cpal::DevicesError) -> Self {
        VoiceError::AudioDevice(err.to_string())
    }
}

#[cfg(feature = "capture")]
impl From<cpal::DefaultStreamConfigError> for VoiceError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        VoiceError::AudioDevice(err.to_string())
    }
}

#[cfg(feature = "capture")]
impl From<cpal::BuildStreamError> for VoiceError {
    fn from(err: cpal::BuildStreamError) -> Self {
        VoiceError::AudioStream(err.to_string())
    }
}

#[cfg(feature = "capture")]
impl From<cpal::PlayStreamError> for VoiceError {
    fn from(err: cpal::PlayStreamError) -> Self {
        VoiceError::AudioStream(err.to_string())
    }
}
