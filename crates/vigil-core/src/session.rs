//! Boundaries with the exam shell: who hears about warnings, and who ends the session.

use crate::log::AggregateLog;
use crate::violation::ViolationType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Session lifecycle as owned by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Monitoring,
    /// Absorbing: threshold breached, nothing is counted or sampled afterwards.
    Terminated,
}

/// Why a monitored session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Violation threshold reached.
    Terminated,
    /// Normal completion by the exam taker.
    Submitted,
    /// Host navigated away or the process is shutting down.
    Abandoned,
}

/// User-visible warning emitted for every accepted violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationWarning {
    pub violation: ViolationType,
    pub message: String,
    pub count: u32,
    pub total: u32,
    pub threshold: u32,
}

impl ViolationWarning {
    /// "Violation 2 (Total 3/5)"
    pub fn summary(&self) -> String {
        format!(
            "Violation {} (Total {}/{})",
            self.count, self.total, self.threshold
        )
    }
}

/// Final blocking notice shown when the session is terminated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminationNotice {
    pub title: String,
    pub text: String,
    pub total: u32,
}

impl TerminationNotice {
    pub fn for_threshold(total: u32, threshold: u32) -> Self {
        Self {
            title: "Exam Terminated".to_string(),
            text: format!("You reached {} violations.", threshold),
            total,
        }
    }
}

/// Session-end collaborator. Exactly one of the two callbacks fires per session.
#[async_trait]
pub trait SessionLifecycle: Send + Sync {
    /// Forced submission / redirect after the threshold breach.
    async fn on_terminate(&self, log: &AggregateLog);

    /// Normal completion.
    async fn on_voluntary_submit(&self, log: &AggregateLog);
}

/// Presentation collaborator. Implementations must not block for long; they run
/// on the aggregator task.
pub trait Notifier: Send + Sync {
    fn violation_warning(&self, warning: &ViolationWarning);

    fn termination_notice(&self, notice: &TerminationNotice);

    /// Non-fatal: the session continues.
    fn persistence_failed(&self, reason: &str);

    /// One-time diagnostic when a monitor could not be armed.
    fn monitor_unavailable(&self, monitor: &str, reason: &str);
}

/// Notifier that only writes structured log lines.
#[derive(Debug, Default, Clone)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn violation_warning(&self, warning: &ViolationWarning) {
        warn!(
            violation = %warning.violation,
            count = warning.count,
            total = warning.total,
            threshold = warning.threshold,
            "{}: {}",
            warning.message,
            warning.summary()
        );
    }

    fn termination_notice(&self, notice: &TerminationNotice) {
        error!(total = notice.total, "{}: {}", notice.title, notice.text);
    }

    fn persistence_failed(&self, reason: &str) {
        warn!(reason, "Failed to save proctoring log");
    }

    fn monitor_unavailable(&self, monitor: &str, reason: &str) {
        warn!(monitor, reason, "Monitor disabled for this session");
    }
}

/// Lifecycle that only logs; used when the host does not need callbacks.
#[derive(Debug, Default, Clone)]
pub struct LoggingLifecycle;

#[async_trait]
impl SessionLifecycle for LoggingLifecycle {
    async fn on_terminate(&self, log: &AggregateLog) {
        info!(session_id = log.session_id(), total = log.total, "Session terminated");
    }

    async fn on_voluntary_submit(&self, log: &AggregateLog) {
        info!(session_id = log.session_id(), total = log.total, "Session submitted");
    }
}
