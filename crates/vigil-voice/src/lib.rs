//! vigil-voice: background-voice detection for a proctored session.
//!
//! Two stages keep the classifier off the hot path:
//!
//! 1. **Energy gate** ([`energy`]): RMS of the latest window must stay above a
//!    threshold for consecutive samples.
//! 2. **Classification** ([`classifier`]): a speech score from WebRTC VAD or a
//!    remote model, tracked for sustained speech ([`speech`]).
//!
//! Capture from a real microphone needs the `capture` feature (cpal).

pub mod capture;
pub mod classifier;
pub mod energy;
pub mod error;
pub mod monitor;
pub mod speech;

pub use capture::{AudioDevice, AudioSource, SampleRing};
#[cfg(feature = "capture")]
pub use capture::{Microphone, MicrophoneSource};
pub use classifier::{HttpSpeechClassifier, SpeechClassifier, WebRtcSpeechClassifier};
pub use energy::{rms, VoiceGate};
pub use error::{VoiceError, VoiceResult};
pub use monitor::{AudioConfig, AudioMonitor, ClassifierBackend};
pub use speech::{speech_score, SpeechTracker};
