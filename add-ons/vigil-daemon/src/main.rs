//! Vigil proctoring daemon
//!
//! Runs one monitored exam session: loads the layered configuration, wires the
//! camera, microphone, and environment backends, and speaks the JSON-lines host
//! bridge on stdin/stdout. Logs go to stderr.

mod bridge;
mod settings;

use anyhow::{Context, Result};
use bridge::{HostBridge, HostCommand};
use settings::DaemonConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::sync::{mpsc, oneshot};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vigil_core::{
    build_sink, load_layered, DisplaySurface, EndReason, SessionBuilder, ViolationPolicy,
};
use vigil_sentinel::{
    ChannelEventSource, EnvironmentMonitor, EventSource, GazeMonitor, HttpFrameSource,
    HttpLandmarkExtractor, HttpObjectDetector, VisionMonitor,
};
use vigil_voice::{
    AudioConfig, AudioDevice, AudioMonitor, ClassifierBackend, HttpSpeechClassifier,
    SpeechClassifier, WebRtcSpeechClassifier,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (before any env::var calls)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[vigil-daemon] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config: DaemonConfig = load_layered().context("load configuration")?;
    config.validate().context("validate configuration")?;
    let identity = config.identity(std::env::args().nth(1))?;
    let policy = ViolationPolicy::from_config(&config.policy)?;
    let sink = build_sink(&config.sink).context("open log sinks")?;

    let (host, outbound) = HostBridge::new();
    let (writer_stop, writer_stop_rx) = oneshot::channel();
    let writer = tokio::spawn(bridge::write_lines(
        tokio::io::stdout(),
        outbound,
        writer_stop_rx,
    ));

    let host_events = ChannelEventSource::new();
    let (commands_tx, mut commands) = mpsc::unbounded_channel();
    tokio::spawn(bridge::read_commands(
        BufReader::new(tokio::io::stdin()),
        host_events.clone(),
        commands_tx,
    ));

    let (events, display) = environment_backends(&host, host_events)?;
    let notifier = Arc::new(host.clone());

    tracing::info!(
        session_id = %identity.session_id,
        exam_id = %identity.exam_id,
        threshold = policy.threshold(),
        "Vigil daemon started"
    );

    let mut builder = SessionBuilder::new(identity)
        .policy(policy)
        .session_config(config.session.clone())
        .sink(sink)
        .notifier(notifier.clone())
        .lifecycle(notifier)
        .display(Arc::clone(&display));

    if config.vision.enabled {
        let timeout = Duration::from_millis(config.vision.request_timeout_ms);
        builder = builder.monitor(Box::new(VisionMonitor::new(
            &config.vision,
            Box::new(HttpFrameSource::new(config.vision.frame_url.clone(), timeout)?),
            Box::new(HttpObjectDetector::new(
                config.vision.detector_url.clone(),
                timeout,
            )?),
        )));
    }
    if config.gaze.enabled {
        let timeout = Duration::from_millis(config.gaze.request_timeout_ms);
        builder = builder.monitor(Box::new(GazeMonitor::new(
            config.gaze.clone(),
            Box::new(HttpFrameSource::new(config.gaze.frame_url.clone(), timeout)?),
            Box::new(HttpLandmarkExtractor::new(
                config.gaze.landmark_url.clone(),
                timeout,
            )?),
        )));
    }
    if config.audio.enabled {
        builder = builder.monitor(Box::new(AudioMonitor::new(
            config.audio.clone(),
            audio_device(),
            speech_classifier(&config.audio)?,
        )));
    }
    if config.environment.enabled {
        host.publish_key_policy(&config.environment.key_policy);
        builder = builder.monitor(Box::new(EnvironmentMonitor::new(
            config.environment.clone(),
            events,
            display,
        )));
    }

    let running = builder.build().start().await?;
    let reason = tokio::select! {
        _ = running.terminated() => EndReason::Terminated,
        command = commands.recv() => match command {
            Some(HostCommand::Submit) => EndReason::Submitted,
            Some(HostCommand::Closed) | None => {
                tracing::warn!("Host bridge closed; abandoning session");
                EndReason::Abandoned
            }
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("CTRL-C received; abandoning session");
            EndReason::Abandoned
        }
    };

    let outcome = running.finish(reason).await?;
    tracing::info!(
        reason = ?outcome.reason,
        total = outcome.log.total,
        "Session finished"
    );

    let _ = writer_stop.send(());
    writer
        .await
        .context("host writer task")?
        .context("write to host")?;
    Ok(())
}

/// Environment events come from the host bridge; with `desktop` they are also
/// captured from OS-level hooks and fullscreen is re-entered locally.
#[cfg(not(feature = "desktop"))]
fn environment_backends(
    host: &HostBridge,
    host_events: ChannelEventSource,
) -> Result<(Arc<dyn EventSource>, Arc<dyn DisplaySurface>)> {
    Ok((Arc::new(host_events), Arc::new(host.clone())))
}

#[cfg(feature = "desktop")]
fn environment_backends(
    _host: &HostBridge,
    host_events: ChannelEventSource,
) -> Result<(Arc<dyn EventSource>, Arc<dyn DisplaySurface>)> {
    use vigil_sentinel::{EnigoDisplaySurface, RdevEventSource};

    // The listener thread publishes into its own channel; host lines are merged in.
    let hooks = RdevEventSource::start()?;
    let merged = hooks.channel().clone();
    let mut forward = host_events.subscribe()?;
    tokio::spawn(async move {
        while let Some(event) = forward.next().await {
            merged.publish(event);
        }
    });
    Ok((Arc::new(hooks), Arc::new(EnigoDisplaySurface)))
}

#[cfg(feature = "capture")]
fn audio_device() -> Box<dyn AudioDevice> {
    Box::new(vigil_voice::Microphone)
}

#[cfg(not(feature = "capture"))]
fn audio_device() -> Box<dyn AudioDevice> {
    Box::new(NoCapture)
}

/// Stand-in when the daemon is built without `capture`: arming fails, so the
/// audio monitor is reported unavailable and the session continues without it.
#[cfg(not(feature = "capture"))]
struct NoCapture;

#[cfg(not(feature = "capture"))]
impl AudioDevice for NoCapture {
    fn open(
        &self,
        _sample_rate: u32,
        _capacity: usize,
    ) -> vigil_voice::VoiceResult<Box<dyn vigil_voice::AudioSource>> {
        Err(vigil_voice::VoiceError::AudioDevice(
            "built without the `capture` feature".to_string(),
        ))
    }
}

fn speech_classifier(config: &AudioConfig) -> Result<Box<dyn SpeechClassifier>> {
    let classifier: Box<dyn SpeechClassifier> = match config.classifier {
        ClassifierBackend::Webrtc => Box::new(WebRtcSpeechClassifier::new(
            config.sample_rate,
            config.webrtc_mode,
        )?),
        ClassifierBackend::Http => Box::new(HttpSpeechClassifier::new(
            config.classifier_url.clone(),
            Duration::from_millis(config.request_timeout_ms),
        )?),
    };
    Ok(classifier)
}
