//! Session controller: arms every monitor, starts monitoring, owns the monitor
//! tasks, and tears all of them down on every way a session can end.

use crate::aggregator::{Aggregator, AggregatorHandle, AggregatorParts};
use crate::config::SessionConfig;
use crate::device::DisplaySurface;
use crate::error::{ProctorError, ProctorResult};
use crate::log::{AggregateLog, SessionIdentity};
use crate::monitor::{ArmedMonitor, Monitor, MonitorContext};
use crate::policy::ViolationPolicy;
use crate::session::{
    EndReason, LoggingLifecycle, Notifier, SessionLifecycle, SessionState, TracingNotifier,
};
use crate::sink::{LogSink, MemoryLogSink};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Whether a monitor made it through arming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorState {
    Armed,
    Disabled(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorStatus {
    pub name: &'static str,
    pub state: MonitorState,
}

impl MonitorStatus {
    pub fn is_armed(&self) -> bool {
        self.state == MonitorState::Armed
    }
}

/// Collects the collaborators for one monitored session.
pub struct SessionBuilder {
    identity: SessionIdentity,
    policy: ViolationPolicy,
    session: SessionConfig,
    sink: Arc<dyn LogSink>,
    notifier: Arc<dyn Notifier>,
    lifecycle: Arc<dyn SessionLifecycle>,
    display: Option<Arc<dyn DisplaySurface>>,
    monitors: Vec<Box<dyn Monitor>>,
}

impl SessionBuilder {
    pub fn new(identity: SessionIdentity) -> Self {
        Self {
            identity,
            policy: ViolationPolicy::default(),
            session: SessionConfig::default(),
            sink: Arc::new(MemoryLogSink::new()),
            notifier: Arc::new(TracingNotifier),
            lifecycle: Arc::new(LoggingLifecycle),
            display: None,
            monitors: Vec::new(),
        }
    }

    pub fn policy(mut self, policy: ViolationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn session_config(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn lifecycle(mut self, lifecycle: Arc<dyn SessionLifecycle>) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn display(mut self, display: Arc<dyn DisplaySurface>) -> Self {
        self.display = Some(display);
        self
    }

    pub fn monitor(mut self, monitor: Box<dyn Monitor>) -> Self {
        self.monitors.push(monitor);
        self
    }

    /// Spawn the aggregator. Must be called inside a tokio runtime.
    pub fn build(self) -> SessionController {
        let (aggregator, aggregator_task) = Aggregator::spawn(AggregatorParts {
            policy: self.policy,
            identity: self.identity,
            sink: self.sink,
            notifier: Arc::clone(&self.notifier),
            lifecycle: self.lifecycle,
        });
        SessionController {
            aggregator,
            aggregator_task,
            monitors: self.monitors,
            display: self.display,
            notifier: self.notifier,
            config: self.session,
        }
    }
}

/// A session that has not started monitoring yet.
pub struct SessionController {
    aggregator: AggregatorHandle,
    aggregator_task: JoinHandle<()>,
    monitors: Vec<Box<dyn Monitor>>,
    display: Option<Arc<dyn DisplaySurface>>,
    notifier: Arc<dyn Notifier>,
    config: SessionConfig,
}

impl SessionController {
    pub fn handle(&self) -> &AggregatorHandle {
        &self.aggregator
    }

    /// Arm every monitor, enter fullscreen, and move the session to `Monitoring`.
    ///
    /// A monitor that fails to arm is disabled for the rest of the session with a
    /// single diagnostic; the others start regardless.
    pub async fn start(self) -> ProctorResult<RunningSession> {
        let arm_timeout = Duration::from_millis(self.config.arm_timeout_ms);
        let arming = self.monitors.into_iter().map(|monitor| async move {
            let name = monitor.name();
            let result = match tokio::time::timeout(arm_timeout, monitor.arm()).await {
                Ok(result) => result,
                Err(_) => Err(ProctorError::acquisition(name, "arming timed out")),
            };
            (name, result)
        });
        let armed_results = futures::future::join_all(arming).await;

        let mut statuses = Vec::with_capacity(armed_results.len());
        let mut armed: Vec<Box<dyn ArmedMonitor>> = Vec::new();
        for (name, result) in armed_results {
            match result {
                Ok(monitor) => {
                    info!(monitor = name, "Monitor armed");
                    statuses.push(MonitorStatus {
                        name,
                        state: MonitorState::Armed,
                    });
                    armed.push(monitor);
                }
                Err(e) => {
                    let reason = e.to_string();
                    if e.disables_monitor() {
                        warn!(monitor = name, error = %reason, "Monitor unavailable; continuing without it");
                    } else {
                        error!(monitor = name, error = %reason, "Monitor failed to arm; continuing without it");
                    }
                    self.notifier.monitor_unavailable(name, &reason);
                    statuses.push(MonitorStatus {
                        name,
                        state: MonitorState::Disabled(reason),
                    });
                }
            }
        }

        if let Some(ref display) = self.display {
            if let Err(e) = display.request_fullscreen().await {
                warn!(error = %e, "Fullscreen request refused");
                self.notifier.monitor_unavailable("fullscreen", &e.to_string());
            }
        }

        let state = self.aggregator.start().await?;
        if state != SessionState::Monitoring {
            return Err(ProctorError::Config(format!(
                "session cannot start from state {:?}",
                state
            )));
        }

        let mut tasks = JoinSet::new();
        for monitor in armed {
            let ctx = MonitorContext::new(self.aggregator.clone());
            tasks.spawn(async move {
                let name = monitor.name();
                (name, monitor.run(ctx).await)
            });
        }
        info!(monitors = tasks.len(), "Session monitoring");

        Ok(RunningSession {
            aggregator: self.aggregator,
            _aggregator_task: self.aggregator_task,
            tasks,
            statuses,
            grace: Duration::from_millis(self.config.shutdown_grace_ms),
        })
    }
}

/// How a session ended.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub reason: EndReason,
    pub log: AggregateLog,
    pub statuses: Vec<MonitorStatus>,
}

/// A session in `Monitoring` (or already `Terminated`). Dropping it aborts every
/// monitor task, which drops the devices each task owns.
pub struct RunningSession {
    aggregator: AggregatorHandle,
    _aggregator_task: JoinHandle<()>,
    tasks: JoinSet<(&'static str, ProctorResult<()>)>,
    statuses: Vec<MonitorStatus>,
    grace: Duration,
}

impl RunningSession {
    pub fn handle(&self) -> &AggregatorHandle {
        &self.aggregator
    }

    pub fn statuses(&self) -> &[MonitorStatus] {
        &self.statuses
    }

    /// Number of monitor tasks still running.
    pub fn active_monitors(&self) -> usize {
        self.tasks.len()
    }

    /// Resolves once the threshold has been breached.
    pub async fn terminated(&self) {
        self.aggregator.terminated().await;
    }

    /// End the session. If it was already terminated the reason reported is
    /// `Terminated` regardless of `reason`.
    pub async fn finish(mut self, reason: EndReason) -> ProctorResult<SessionOutcome> {
        let log = self.aggregator.stop(reason).await?;
        let reason = if self.aggregator.state() == SessionState::Terminated {
            EndReason::Terminated
        } else {
            reason
        };
        self.teardown().await;
        info!(?reason, total = log.total, "Session ended");
        Ok(SessionOutcome {
            reason,
            log,
            statuses: self.statuses.clone(),
        })
    }

    /// Voluntary submit.
    pub async fn submit(self) -> ProctorResult<SessionOutcome> {
        self.finish(EndReason::Submitted).await
    }

    /// Wait for the threshold breach, then tear down.
    pub async fn until_terminated(self) -> ProctorResult<SessionOutcome> {
        self.terminated().await;
        self.finish(EndReason::Terminated).await
    }

    async fn teardown(&mut self) {
        let tasks = &mut self.tasks;
        let drained = tokio::time::timeout(self.grace, async {
            while let Some(joined) = tasks.join_next().await {
                log_monitor_exit(joined);
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = self.tasks.len(),
                "Monitors did not stop within grace period; aborting"
            );
            self.tasks.abort_all();
            while let Some(joined) = self.tasks.join_next().await {
                log_monitor_exit(joined);
            }
        }
    }
}

fn log_monitor_exit(
    joined: Result<(&'static str, ProctorResult<()>), tokio::task::JoinError>,
) {
    match joined {
        Ok((name, Ok(()))) => debug!(monitor = name, "Monitor stopped"),
        Ok((name, Err(e))) => error!(monitor = name, error = %e, "Monitor failed"),
        Err(e) if e.is_cancelled() => debug!("Monitor task aborted"),
        Err(e) => error!(error = %e, "Monitor task panicked"),
    }
}
