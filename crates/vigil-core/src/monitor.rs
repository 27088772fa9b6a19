//! Monitor contract.
//!
//! A monitor is armed once (devices and models acquired) and then run until the
//! session leaves `Monitoring`. Everything acquired during arming is owned by the
//! returned [`ArmedMonitor`], so it is released on every exit path: normal stop,
//! error, or task abort.

use crate::aggregator::{AggregatorHandle, Report, ReportOutcome};
use crate::error::ProctorResult;
use crate::session::SessionState;
use crate::violation::ViolationType;
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

/// An unarmed monitor: configuration plus factories for its devices and models.
#[async_trait]
pub trait Monitor: Send + 'static {
    fn name(&self) -> &'static str;

    /// Acquire devices and load models. `Acquisition`/`ModelLoad` errors disable
    /// this monitor only.
    async fn arm(self: Box<Self>) -> ProctorResult<Box<dyn ArmedMonitor>>;
}

/// A monitor holding live resources, ready to sample.
#[async_trait]
pub trait ArmedMonitor: Send + 'static {
    fn name(&self) -> &'static str;

    /// Sample until `ctx` reports the session is no longer monitoring.
    async fn run(self: Box<Self>, ctx: MonitorContext) -> ProctorResult<()>;
}

/// What a running monitor can see: a way to report, and the session state.
#[derive(Clone)]
pub struct MonitorContext {
    aggregator: AggregatorHandle,
    state: watch::Receiver<SessionState>,
}

impl MonitorContext {
    pub fn new(aggregator: AggregatorHandle) -> Self {
        let state = aggregator.subscribe();
        Self { aggregator, state }
    }

    /// True while the session is `Monitoring`. Check at the top of every tick.
    pub fn is_active(&self) -> bool {
        *self.state.borrow() == SessionState::Monitoring
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Independent receiver for `select!` loops; resolves when monitoring ends.
    pub fn stop_signal(&self) -> StopSignal {
        StopSignal {
            state: self.state.clone(),
        }
    }

    pub async fn report(
        &self,
        violation: ViolationType,
        message: impl Into<String>,
    ) -> ProctorResult<ReportOutcome> {
        self.submit(Report::new(violation, message)).await
    }

    pub async fn submit(&self, report: Report) -> ProctorResult<ReportOutcome> {
        let violation = report.violation;
        let outcome = self.aggregator.submit(report).await?;
        if !outcome.accepted {
            debug!(%violation, rejection = ?outcome.rejection, "Report not counted");
        }
        Ok(outcome)
    }

    pub fn aggregator(&self) -> &AggregatorHandle {
        &self.aggregator
    }
}

/// Cancellation side of the session state, split off so a monitor can await it
/// while still borrowing its [`MonitorContext`].
pub struct StopSignal {
    state: watch::Receiver<SessionState>,
}

impl StopSignal {
    /// Resolves as soon as the session is no longer `Monitoring` (or the aggregator is gone).
    pub async fn stopped(&mut self) {
        let _ = self
            .state
            .wait_for(|s| *s != SessionState::Monitoring)
            .await;
    }
}
