use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vigil_core::{
    AggregateLog, Aggregator, AggregatorParts, ArmedMonitor, EndReason, LogSink, MemoryLogSink,
    Monitor, MonitorContext, MonitorState, Notifier, ProctorError, ProctorResult, Rejection,
    SessionBuilder, SessionConfig, SessionIdentity, SessionLifecycle, SessionState,
    TerminationNotice, ViolationPolicy, ViolationType, ViolationWarning,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();
}

#[derive(Default)]
struct RecordingNotifier {
    warnings: Mutex<Vec<ViolationWarning>>,
    terminations: AtomicUsize,
    persist_failures: AtomicUsize,
    unavailable: Mutex<Vec<String>>,
}

impl Notifier for RecordingNotifier {
    fn violation_warning(&self, warning: &ViolationWarning) {
        self.warnings.lock().unwrap().push(warning.clone());
    }

    fn termination_notice(&self, _notice: &TerminationNotice) {
        self.terminations.fetch_add(1, Ordering::SeqCst);
    }

    fn persistence_failed(&self, _reason: &str) {
        self.persist_failures.fetch_add(1, Ordering::SeqCst);
    }

    fn monitor_unavailable(&self, monitor: &str, _reason: &str) {
        self.unavailable.lock().unwrap().push(monitor.to_string());
    }
}

#[derive(Default)]
struct CountingLifecycle {
    terminated: AtomicUsize,
    submitted: AtomicUsize,
}

#[async_trait]
impl SessionLifecycle for CountingLifecycle {
    async fn on_terminate(&self, _log: &AggregateLog) {
        self.terminated.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_voluntary_submit(&self, _log: &AggregateLog) {
        self.submitted.fetch_add(1, Ordering::SeqCst);
    }
}

struct FailingSink;

#[async_trait]
impl LogSink for FailingSink {
    async fn persist(&self, _log: &AggregateLog) -> ProctorResult<()> {
        Err(ProctorError::Persist("503 Service Unavailable".to_string()))
    }
}

struct ReleaseGuard(Arc<AtomicBool>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Reports one violation type every second until told to stop.
struct TickingMonitor {
    violation: ViolationType,
    released: Arc<AtomicBool>,
}

struct ArmedTicking {
    violation: ViolationType,
    _guard: ReleaseGuard,
}

#[async_trait]
impl Monitor for TickingMonitor {
    fn name(&self) -> &'static str {
        "ticking"
    }

    async fn arm(self: Box<Self>) -> ProctorResult<Box<dyn ArmedMonitor>> {
        Ok(Box::new(ArmedTicking {
            violation: self.violation,
            _guard: ReleaseGuard(self.released),
        }))
    }
}

#[async_trait]
impl ArmedMonitor for ArmedTicking {
    fn name(&self) -> &'static str {
        "ticking"
    }

    async fn run(self: Box<Self>, ctx: MonitorContext) -> ProctorResult<()> {
        let mut stop = ctx.stop_signal();
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = stop.stopped() => break,
                _ = interval.tick() => {
                    if !ctx.is_active() {
                        break;
                    }
                    ctx.report(self.violation, "tick").await?;
                }
            }
        }
        Ok(())
    }
}

/// Camera permission denied.
struct DeniedMonitor;

#[async_trait]
impl Monitor for DeniedMonitor {
    fn name(&self) -> &'static str {
        "vision"
    }

    async fn arm(self: Box<Self>) -> ProctorResult<Box<dyn ArmedMonitor>> {
        Err(ProctorError::acquisition("vision", "camera permission denied"))
    }
}

/// Never looks at the stop signal.
struct StubbornMonitor {
    released: Arc<AtomicBool>,
}

struct ArmedStubborn {
    _guard: ReleaseGuard,
}

#[async_trait]
impl Monitor for StubbornMonitor {
    fn name(&self) -> &'static str {
        "stubborn"
    }

    async fn arm(self: Box<Self>) -> ProctorResult<Box<dyn ArmedMonitor>> {
        Ok(Box::new(ArmedStubborn {
            _guard: ReleaseGuard(self.released),
        }))
    }
}

#[async_trait]
impl ArmedMonitor for ArmedStubborn {
    fn name(&self) -> &'static str {
        "stubborn"
    }

    async fn run(self: Box<Self>, _ctx: MonitorContext) -> ProctorResult<()> {
        loop {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    }
}

fn parts(
    sink: Arc<dyn LogSink>,
    notifier: Arc<RecordingNotifier>,
    lifecycle: Arc<CountingLifecycle>,
) -> AggregatorParts {
    AggregatorParts {
        policy: ViolationPolicy::default(),
        identity: SessionIdentity::new("exam-42").with_session_id("s-1"),
        sink,
        notifier,
        lifecycle,
    }
}

#[tokio::test(start_paused = true)]
async fn threshold_terminates_once_and_freezes_counts() {
    init_tracing();
    let sink = MemoryLogSink::new();
    let notifier = Arc::new(RecordingNotifier::default());
    let lifecycle = Arc::new(CountingLifecycle::default());
    let (handle, _task) = Aggregator::spawn(parts(
        Arc::new(sink.clone()),
        notifier.clone(),
        lifecycle.clone(),
    ));

    assert_eq!(handle.start().await.unwrap(), SessionState::Monitoring);
    for ty in [
        ViolationType::NoFace,
        ViolationType::CellPhone,
        ViolationType::TabSwitch,
        ViolationType::ShortcutKey,
        ViolationType::GazeAway,
    ] {
        assert!(handle.report(ty, true, "seen").await.unwrap().accepted);
    }
    assert_eq!(handle.state(), SessionState::Terminated);

    let late = handle
        .report(ViolationType::WindowBlur, true, "late")
        .await
        .unwrap();
    assert_eq!(late.rejection, Some(Rejection::Terminated));

    let log = handle.stop(EndReason::Abandoned).await.unwrap();
    assert_eq!(log.total, 5);
    assert_eq!(log.count(ViolationType::WindowBlur), 0);
    assert_eq!(lifecycle.terminated.load(Ordering::SeqCst), 1);
    assert_eq!(lifecycle.submitted.load(Ordering::SeqCst), 0);
    assert_eq!(notifier.terminations.load(Ordering::SeqCst), 1);
    // The terminating report still produced its warning.
    assert_eq!(notifier.warnings.lock().unwrap().len(), 5);
    assert_eq!(sink.latest().unwrap().total, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_reporters_terminate_exactly_once() {
    init_tracing();
    let sink = MemoryLogSink::new();
    let notifier = Arc::new(RecordingNotifier::default());
    let lifecycle = Arc::new(CountingLifecycle::default());
    let (handle, _task) = Aggregator::spawn(parts(
        Arc::new(sink.clone()),
        notifier.clone(),
        lifecycle.clone(),
    ));
    handle.start().await.unwrap();

    let threshold = ViolationPolicy::default().threshold();
    let reporters: Vec<_> = ViolationType::ALL
        .into_iter()
        .map(|ty| {
            let handle = handle.clone();
            tokio::spawn(async move { handle.report(ty, true, "race").await })
        })
        .collect();
    let mut accepted = 0;
    let mut crossed = 0;
    for reporter in reporters {
        let outcome = reporter.await.unwrap().unwrap();
        if outcome.accepted {
            accepted += 1;
        } else {
            assert_eq!(outcome.rejection, Some(Rejection::Terminated));
        }
        if outcome.terminated {
            crossed += 1;
        }
    }

    assert_eq!(accepted, threshold);
    assert_eq!(crossed, 1);
    assert_eq!(handle.state(), SessionState::Terminated);
    let log = handle.snapshot().await.unwrap();
    assert_eq!(log.total, threshold);
    handle.stop(EndReason::Abandoned).await.unwrap();
    assert_eq!(lifecycle.terminated.load(Ordering::SeqCst), 1);
    assert_eq!(notifier.terminations.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn debounce_uses_session_clock() {
    let notifier = Arc::new(RecordingNotifier::default());
    let lifecycle = Arc::new(CountingLifecycle::default());
    let (handle, _task) = Aggregator::spawn(parts(
        Arc::new(MemoryLogSink::new()),
        notifier,
        lifecycle,
    ));
    handle.start().await.unwrap();

    assert!(handle.report(ViolationType::NoFace, true, "").await.unwrap().accepted);
    tokio::time::advance(Duration::from_secs(2)).await;
    let second = handle.report(ViolationType::NoFace, true, "").await.unwrap();
    assert_eq!(second.rejection, Some(Rejection::Debounced));
    tokio::time::advance(Duration::from_secs(2)).await;
    let third = handle.report(ViolationType::NoFace, true, "").await.unwrap();
    assert!(third.accepted);
    assert_eq!(third.count, 2);
}

#[tokio::test(start_paused = true)]
async fn submit_fires_voluntary_callback_and_goes_idle() {
    let sink = MemoryLogSink::new();
    let notifier = Arc::new(RecordingNotifier::default());
    let lifecycle = Arc::new(CountingLifecycle::default());
    let (handle, _task) = Aggregator::spawn(parts(
        Arc::new(sink.clone()),
        notifier,
        lifecycle.clone(),
    ));
    handle.start().await.unwrap();
    handle
        .report(ViolationType::TabSwitch, true, "Tab switching detected")
        .await
        .unwrap();

    let log = handle.stop(EndReason::Submitted).await.unwrap();
    assert_eq!(log.count(ViolationType::TabSwitch), 1);
    assert_eq!(handle.state(), SessionState::Idle);
    assert_eq!(lifecycle.submitted.load(Ordering::SeqCst), 1);
    assert_eq!(lifecycle.terminated.load(Ordering::SeqCst), 0);
    assert_eq!(sink.logs().len(), 2);

    let after = handle
        .report(ViolationType::TabSwitch, true, "")
        .await
        .unwrap();
    assert_eq!(after.rejection, Some(Rejection::Inactive));
}

#[tokio::test(start_paused = true)]
async fn persistence_failure_is_not_fatal() {
    init_tracing();
    let notifier = Arc::new(RecordingNotifier::default());
    let lifecycle = Arc::new(CountingLifecycle::default());
    let (handle, _task) = Aggregator::spawn(parts(
        Arc::new(FailingSink),
        notifier.clone(),
        lifecycle,
    ));
    handle.start().await.unwrap();

    assert!(handle.report(ViolationType::TabSwitch, true, "").await.unwrap().accepted);
    assert!(handle.report(ViolationType::WindowBlur, true, "").await.unwrap().accepted);
    let log = handle.snapshot().await.unwrap();
    assert_eq!(log.total, 2);

    handle.stop(EndReason::Abandoned).await.unwrap();
    assert_eq!(notifier.persist_failures.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn denied_monitor_is_disabled_and_others_keep_reporting() {
    init_tracing();
    let notifier = Arc::new(RecordingNotifier::default());
    let lifecycle = Arc::new(CountingLifecycle::default());
    let released = Arc::new(AtomicBool::new(false));

    let controller = SessionBuilder::new(SessionIdentity::new("exam-42"))
        .notifier(notifier.clone())
        .lifecycle(lifecycle.clone())
        .monitor(Box::new(DeniedMonitor))
        .monitor(Box::new(TickingMonitor {
            violation: ViolationType::TabSwitch,
            released: released.clone(),
        }))
        .build();

    let running = controller.start().await.unwrap();
    let statuses = running.statuses().to_vec();
    assert_eq!(statuses.len(), 2);
    assert!(matches!(statuses[0].state, MonitorState::Disabled(_)));
    assert!(statuses[1].is_armed());
    assert_eq!(*notifier.unavailable.lock().unwrap(), vec!["vision".to_string()]);

    let outcome = running.until_terminated().await.unwrap();
    assert_eq!(outcome.reason, EndReason::Terminated);
    assert_eq!(outcome.log.count(ViolationType::TabSwitch), 5);
    assert_eq!(lifecycle.terminated.load(Ordering::SeqCst), 1);
    assert!(released.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn submit_aborts_monitors_that_ignore_stop() {
    init_tracing();
    let lifecycle = Arc::new(CountingLifecycle::default());
    let polite = Arc::new(AtomicBool::new(false));
    let stubborn = Arc::new(AtomicBool::new(false));

    let controller = SessionBuilder::new(SessionIdentity::new("exam-42"))
        .lifecycle(lifecycle.clone())
        .session_config(SessionConfig {
            shutdown_grace_ms: 500,
            ..SessionConfig::default()
        })
        .monitor(Box::new(TickingMonitor {
            violation: ViolationType::WindowBlur,
            released: polite.clone(),
        }))
        .monitor(Box::new(StubbornMonitor {
            released: stubborn.clone(),
        }))
        .build();

    let running = controller.start().await.unwrap();
    assert_eq!(running.active_monitors(), 2);
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let outcome = running.submit().await.unwrap();
    assert_eq!(outcome.reason, EndReason::Submitted);
    assert_eq!(lifecycle.submitted.load(Ordering::SeqCst), 1);
    assert!(polite.load(Ordering::SeqCst));
    assert!(stubborn.load(Ordering::SeqCst));
}
