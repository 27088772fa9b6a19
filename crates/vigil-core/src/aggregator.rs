//! Violation Aggregator: the single owner of counts, debounce windows, and the
//! session state.
//!
//! ```text
//!  vision ─┐
//!  gaze   ─┤   mpsc<Command>   ┌────────────────────┐   watch<SessionState>
//!  audio  ─┼──────────────────▶│  Aggregator task   │──────────────────────▶ monitors
//!  env    ─┘                   │  (ViolationLedger) │
//!                              └─────────┬──────────┘
//!                                        │ mpsc<PersistJob> (in order, single attempt)
//!                                        ▼
//!                                   Persister task ──▶ LogSink
//! ```
//!
//! Every mutation happens inside [`ViolationLedger::report`], which never awaits,
//! so the read-check-write of a type's `last_accepted`/`count` pair is atomic with
//! respect to every other monitor.

use crate::error::{ProctorError, ProctorResult};
use crate::log::{AggregateLog, SessionIdentity};
use crate::policy::ViolationPolicy;
use crate::session::{
    EndReason, Notifier, SessionLifecycle, SessionState, TerminationNotice, ViolationWarning,
};
use crate::sink::LogSink;
use crate::violation::{ViolationRecord, ViolationType};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Why a report was not counted. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Session is `Idle` (not started, or already submitted).
    Inactive,
    /// Session is `Terminated`.
    Terminated,
    /// The monitor reported the condition as false.
    NotAsserted,
    /// Same type accepted less than one debounce window ago.
    Debounced,
}

/// Result of a single `report` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportOutcome {
    pub accepted: bool,
    /// Total across all types after this call.
    pub total: u32,
    /// Count of the reported type after this call.
    pub count: u32,
    pub rejection: Option<Rejection>,
    /// This report crossed the threshold.
    pub terminated: bool,
}

impl ReportOutcome {
    fn rejected(rejection: Rejection, total: u32, count: u32) -> Self {
        Self {
            accepted: false,
            total,
            count,
            rejection: Some(rejection),
            terminated: false,
        }
    }
}

/// Pure counting state. No I/O, no clock; callers pass `now`.
#[derive(Debug, Clone)]
pub struct ViolationLedger {
    policy: ViolationPolicy,
    state: SessionState,
    records: [ViolationRecord; ViolationType::COUNT],
}

impl ViolationLedger {
    pub fn new(policy: ViolationPolicy) -> Self {
        Self {
            policy,
            state: SessionState::Idle,
            records: Default::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn policy(&self) -> &ViolationPolicy {
        &self.policy
    }

    /// `Idle → Monitoring`. Returns false if the state did not change.
    pub fn start(&mut self) -> bool {
        if self.state != SessionState::Idle {
            return false;
        }
        self.state = SessionState::Monitoring;
        true
    }

    /// `Monitoring → Idle`. `Terminated` stays terminated.
    pub fn stop(&mut self) -> bool {
        if self.state != SessionState::Monitoring {
            return false;
        }
        self.state = SessionState::Idle;
        true
    }

    pub fn report(
        &mut self,
        violation: ViolationType,
        asserted: bool,
        asserted_since: Option<Instant>,
        now: Instant,
    ) -> ReportOutcome {
        let total = self.total();
        let count = self.count(violation);

        match self.state {
            SessionState::Terminated => {
                return ReportOutcome::rejected(Rejection::Terminated, total, count)
            }
            SessionState::Idle => return ReportOutcome::rejected(Rejection::Inactive, total, count),
            SessionState::Monitoring => {}
        }
        if !asserted {
            return ReportOutcome::rejected(Rejection::NotAsserted, total, count);
        }

        let window = self.policy.debounce_for(violation);
        let record = &mut self.records[violation.index()];
        if let Some(last) = record.last_accepted {
            if now.saturating_duration_since(last) < window {
                return ReportOutcome::rejected(Rejection::Debounced, total, count);
            }
        }

        record.count += 1;
        record.last_accepted = Some(now);
        if asserted_since.is_some() {
            record.assertion_start = asserted_since;
        }
        let count = record.count;
        let total = self.total();

        let terminated = total >= self.policy.threshold();
        if terminated {
            self.state = SessionState::Terminated;
        }

        ReportOutcome {
            accepted: true,
            total,
            count,
            rejection: None,
            terminated,
        }
    }

    pub fn total(&self) -> u32 {
        self.records.iter().map(|r| r.count).sum()
    }

    pub fn count(&self, violation: ViolationType) -> u32 {
        self.records[violation.index()].count
    }

    pub fn record(&self, violation: ViolationType) -> &ViolationRecord {
        &self.records[violation.index()]
    }

    pub fn counts(&self) -> [u32; ViolationType::COUNT] {
        let mut out = [0u32; ViolationType::COUNT];
        for (slot, record) in out.iter_mut().zip(self.records.iter()) {
            *slot = record.count;
        }
        out
    }
}

/// A violation assertion sent by a monitor.
#[derive(Debug, Clone)]
pub struct Report {
    pub violation: ViolationType,
    pub asserted: bool,
    pub message: String,
    /// When the underlying condition started, for sustained signals.
    pub asserted_since: Option<Instant>,
}

impl Report {
    pub fn new(violation: ViolationType, message: impl Into<String>) -> Self {
        Self {
            violation,
            asserted: true,
            message: message.into(),
            asserted_since: None,
        }
    }

    pub fn asserted(mut self, asserted: bool) -> Self {
        self.asserted = asserted;
        self
    }

    pub fn since(mut self, since: Instant) -> Self {
        self.asserted_since = Some(since);
        self
    }
}

enum Command {
    Start {
        reply: oneshot::Sender<SessionState>,
    },
    Report {
        report: Report,
        reply: oneshot::Sender<ReportOutcome>,
    },
    Snapshot {
        reply: oneshot::Sender<AggregateLog>,
    },
    Stop {
        reason: EndReason,
        reply: oneshot::Sender<AggregateLog>,
    },
}

enum PersistJob {
    Write(AggregateLog),
    Flush(oneshot::Sender<()>),
}

/// Sequential, single-attempt writer in front of the log sink.
struct Persister {
    tx: mpsc::UnboundedSender<PersistJob>,
    task: JoinHandle<()>,
}

impl Persister {
    fn spawn(sink: Arc<dyn LogSink>, notifier: Arc<dyn Notifier>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<PersistJob>();
        let task = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                match job {
                    PersistJob::Write(log) => {
                        if let Err(e) = sink.persist(&log).await {
                            warn!(session_id = log.session_id(), error = %e, "Log persistence failed");
                            notifier.persistence_failed(&e.to_string());
                        }
                    }
                    PersistJob::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });
        Self { tx, task }
    }

    fn enqueue(&self, log: AggregateLog) {
        if self.tx.send(PersistJob::Write(log)).is_err() {
            warn!("Persister is gone; log snapshot dropped");
        }
    }

    /// Wait until every snapshot enqueued so far has been attempted.
    async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(PersistJob::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    async fn close(self) {
        drop(self.tx);
        let _ = self.task.await;
    }
}

/// Collaborators the aggregator talks to.
pub struct AggregatorParts {
    pub policy: ViolationPolicy,
    pub identity: SessionIdentity,
    pub sink: Arc<dyn LogSink>,
    pub notifier: Arc<dyn Notifier>,
    pub lifecycle: Arc<dyn SessionLifecycle>,
}

/// The owning actor. Construct with [`Aggregator::spawn`].
pub struct Aggregator {
    ledger: ViolationLedger,
    identity: SessionIdentity,
    notifier: Arc<dyn Notifier>,
    lifecycle: Arc<dyn SessionLifecycle>,
    persister: Persister,
    state_tx: watch::Sender<SessionState>,
    rx: mpsc::UnboundedReceiver<Command>,
}

impl Aggregator {
    /// Spawn the aggregator task. The task runs until every handle is dropped,
    /// then drains pending log writes.
    pub fn spawn(parts: AggregatorParts) -> (AggregatorHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let persister = Persister::spawn(parts.sink, Arc::clone(&parts.notifier));

        let aggregator = Aggregator {
            ledger: ViolationLedger::new(parts.policy),
            identity: parts.identity,
            notifier: parts.notifier,
            lifecycle: parts.lifecycle,
            persister,
            state_tx,
            rx,
        };
        let task = tokio::spawn(aggregator.run());
        (AggregatorHandle { tx, state_rx }, task)
    }

    async fn run(mut self) {
        info!(
            session_id = %self.identity.session_id,
            exam_id = %self.identity.exam_id,
            threshold = self.ledger.policy().threshold(),
            "Aggregator started"
        );
        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                Command::Start { reply } => {
                    if self.ledger.start() {
                        info!("Monitoring started");
                        self.publish();
                    }
                    let _ = reply.send(self.ledger.state());
                }
                Command::Report { report, reply } => {
                    let outcome = self.handle_report(report).await;
                    let _ = reply.send(outcome);
                }
                Command::Snapshot { reply } => {
                    let _ = reply.send(self.log());
                }
                Command::Stop { reason, reply } => {
                    let log = self.handle_stop(reason).await;
                    let _ = reply.send(log);
                }
            }
        }
        self.persister.close().await;
        debug!("Aggregator stopped");
    }

    async fn handle_report(&mut self, report: Report) -> ReportOutcome {
        let outcome = self.ledger.report(
            report.violation,
            report.asserted,
            report.asserted_since,
            Instant::now(),
        );
        if !outcome.accepted {
            trace!(violation = %report.violation, rejection = ?outcome.rejection, "Report dropped");
            return outcome;
        }

        let threshold = self.ledger.policy().threshold();
        info!(
            violation = %report.violation,
            count = outcome.count,
            total = outcome.total,
            threshold,
            "Violation accepted"
        );
        let log = self.log();
        self.persister.enqueue(log.clone());
        self.notifier.violation_warning(&ViolationWarning {
            violation: report.violation,
            message: report.message,
            count: outcome.count,
            total: outcome.total,
            threshold,
        });

        if outcome.terminated {
            warn!(total = outcome.total, "Violation threshold reached; terminating session");
            self.publish();
            self.persister.flush().await;
            self.notifier
                .termination_notice(&TerminationNotice::for_threshold(outcome.total, threshold));
            self.lifecycle.on_terminate(&log).await;
        }
        outcome
    }

    async fn handle_stop(&mut self, reason: EndReason) -> AggregateLog {
        let was_monitoring = self.ledger.stop();
        if was_monitoring {
            info!(?reason, total = self.ledger.total(), "Monitoring stopped");
            self.publish();
        }
        let log = self.log();
        if was_monitoring && reason == EndReason::Submitted {
            self.persister.enqueue(log.clone());
            self.persister.flush().await;
            self.lifecycle.on_voluntary_submit(&log).await;
        } else {
            self.persister.flush().await;
        }
        log
    }

    fn log(&self) -> AggregateLog {
        AggregateLog::new(self.identity.clone(), &self.ledger.counts())
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.ledger.state());
    }
}

/// Cloneable front door to the aggregator task.
#[derive(Clone)]
pub struct AggregatorHandle {
    tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<SessionState>,
}

impl AggregatorHandle {
    fn send(&self, cmd: Command) -> ProctorResult<()> {
        self.tx
            .send(cmd)
            .map_err(|_| ProctorError::Channel("aggregator task has stopped".to_string()))
    }

    async fn recv<T>(rx: oneshot::Receiver<T>) -> ProctorResult<T> {
        rx.await
            .map_err(|_| ProctorError::Channel("aggregator dropped the reply".to_string()))
    }

    /// `Idle → Monitoring`.
    pub async fn start(&self) -> ProctorResult<SessionState> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start { reply })?;
        Self::recv(rx).await
    }

    /// Submit a report and wait for the verdict.
    pub async fn submit(&self, report: Report) -> ProctorResult<ReportOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Report { report, reply })?;
        Self::recv(rx).await
    }

    /// `report(type, assertedTrue, message)`.
    pub async fn report(
        &self,
        violation: ViolationType,
        asserted: bool,
        message: impl Into<String>,
    ) -> ProctorResult<ReportOutcome> {
        self.submit(Report::new(violation, message).asserted(asserted))
            .await
    }

    pub async fn snapshot(&self) -> ProctorResult<AggregateLog> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply })?;
        Self::recv(rx).await
    }

    /// End monitoring. Pending log writes complete before this returns.
    pub async fn stop(&self, reason: EndReason) -> ProctorResult<AggregateLog> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stop { reason, reply })?;
        Self::recv(rx).await
    }

    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Resolves once the session reaches `Terminated`. Pending forever if it never does.
    pub async fn terminated(&self) {
        let mut rx = self.state_rx.clone();
        let _ = rx.wait_for(|s| *s == SessionState::Terminated).await;
    }
}
