use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vigil_core::{MonitorState, SessionBuilder, SessionIdentity, ViolationType};
use vigil_voice::{
    AudioConfig, AudioDevice, AudioMonitor, AudioSource, SpeechClassifier, VoiceError,
    VoiceResult,
};

/// Device that always yields a full window at a fixed amplitude.
struct ConstantDevice {
    amplitude: f32,
}

struct ConstantSource {
    amplitude: f32,
}

impl AudioSource for ConstantSource {
    fn latest(&self, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| if i % 2 == 0 { self.amplitude } else { -self.amplitude })
            .collect()
    }

    fn sample_rate(&self) -> u32 {
        16000
    }
}

impl AudioDevice for ConstantDevice {
    fn open(&self, _sample_rate: u32, _capacity: usize) -> VoiceResult<Box<dyn AudioSource>> {
        Ok(Box::new(ConstantSource {
            amplitude: self.amplitude,
        }))
    }
}

struct DeniedDevice;

impl AudioDevice for DeniedDevice {
    fn open(&self, _sample_rate: u32, _capacity: usize) -> VoiceResult<Box<dyn AudioSource>> {
        Err(VoiceError::AudioDevice("NotAllowedError".to_string()))
    }
}

/// Returns a fixed speech score and counts how often it was asked.
struct CountingClassifier {
    score: f32,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl SpeechClassifier for CountingClassifier {
    async fn scores(&self, _window: &[f32], _sample_rate: u32) -> VoiceResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![self.score])
    }
}

/// Remote scorer that times out on every window.
struct FailingClassifier {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl SpeechClassifier for FailingClassifier {
    async fn scores(&self, _window: &[f32], _sample_rate: u32) -> VoiceResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(VoiceError::Classifier("request timed out".to_string()))
    }
}

fn audio_monitor(amplitude: f32, score: f32, calls: &Arc<AtomicUsize>) -> AudioMonitor {
    AudioMonitor::new(
        AudioConfig {
            window_samples: 1600,
            ..AudioConfig::default()
        },
        Box::new(ConstantDevice { amplitude }),
        Box::new(CountingClassifier {
            score,
            calls: calls.clone(),
        }),
    )
}

#[tokio::test(start_paused = true)]
async fn quiet_room_never_reaches_the_classifier() {
    let calls = Arc::new(AtomicUsize::new(0));
    let running = SessionBuilder::new(SessionIdentity::new("exam-7"))
        .monitor(Box::new(audio_monitor(0.001, 0.99, &calls)))
        .build()
        .start()
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;
    let outcome = running.submit().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(outcome.log.count(ViolationType::BackgroundVoice), 0);
}

#[tokio::test(start_paused = true)]
async fn sustained_speech_is_reported_after_gate_and_sustain() {
    let calls = Arc::new(AtomicUsize::new(0));
    let running = SessionBuilder::new(SessionIdentity::new("exam-7"))
        .monitor(Box::new(audio_monitor(0.3, 0.9, &calls)))
        .build()
        .start()
        .await
        .unwrap();

    // t=0 loud (gate 1/2), t=1 gate opens and speech starts, t=2 still under 1.5 s.
    tokio::time::sleep(Duration::from_millis(2500)).await;
    let log = running.handle().snapshot().await.unwrap();
    assert_eq!(log.count(ViolationType::BackgroundVoice), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    tokio::time::sleep(Duration::from_secs(1)).await;
    let log = running.handle().snapshot().await.unwrap();
    assert_eq!(log.count(ViolationType::BackgroundVoice), 1);

    running.submit().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn loud_non_speech_is_not_reported() {
    let calls = Arc::new(AtomicUsize::new(0));
    let running = SessionBuilder::new(SessionIdentity::new("exam-7"))
        .monitor(Box::new(audio_monitor(0.3, 0.2, &calls)))
        .build()
        .start()
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(6)).await;
    let outcome = running.submit().await.unwrap();
    assert!(calls.load(Ordering::SeqCst) > 0);
    assert_eq!(outcome.log.count(ViolationType::BackgroundVoice), 0);
}

#[tokio::test(start_paused = true)]
async fn denied_microphone_disables_only_audio() {
    let calls = Arc::new(AtomicUsize::new(0));
    let running = SessionBuilder::new(SessionIdentity::new("exam-7"))
        .monitor(Box::new(AudioMonitor::new(
            AudioConfig::default(),
            Box::new(DeniedDevice),
            Box::new(CountingClassifier {
                score: 0.9,
                calls: calls.clone(),
            }),
        )))
        .build()
        .start()
        .await
        .unwrap();

    let statuses = running.statuses();
    assert_eq!(statuses[0].name, "audio");
    assert!(matches!(statuses[0].state, MonitorState::Disabled(_)));
    assert_eq!(running.active_monitors(), 0);

    let outcome = running.submit().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(outcome.log.total, 0);
}

#[tokio::test(start_paused = true)]
async fn classifier_errors_skip_the_window() {
    let calls = Arc::new(AtomicUsize::new(0));
    let running = SessionBuilder::new(SessionIdentity::new("exam-7"))
        .monitor(Box::new(AudioMonitor::new(
            AudioConfig {
                window_samples: 1600,
                ..AudioConfig::default()
            },
            Box::new(ConstantDevice { amplitude: 0.3 }),
            Box::new(FailingClassifier {
                calls: calls.clone(),
            }),
        )))
        .build()
        .start()
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(calls.load(Ordering::SeqCst) >= 3);
    assert_eq!(running.active_monitors(), 1);

    let outcome = running.submit().await.unwrap();
    assert_eq!(outcome.log.count(ViolationType::BackgroundVoice), 0);
    assert_eq!(outcome.log.total, 0);
}
