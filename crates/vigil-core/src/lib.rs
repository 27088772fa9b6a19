//! vigil-core: violation accounting and session control for a proctored exam.
//!
//! Monitors (vision, gaze, audio, environment) live in sibling crates and only
//! ever talk to this crate through [`MonitorContext`]. Counting, debouncing, the
//! termination threshold, and log persistence are owned here by a single
//! aggregator task.

pub mod aggregator;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod log;
pub mod monitor;
pub mod policy;
pub mod session;
pub mod sink;
pub mod violation;

pub use aggregator::{
    Aggregator, AggregatorHandle, AggregatorParts, Rejection, Report, ReportOutcome,
    ViolationLedger,
};
pub use config::{load_from, load_layered, PolicyConfig, SessionConfig, SinkConfig};
pub use controller::{
    MonitorState, MonitorStatus, RunningSession, SessionBuilder, SessionController,
    SessionOutcome,
};
pub use device::{DisplaySurface, NullDisplay};
pub use error::{ProctorError, ProctorResult};
pub use log::{AggregateLog, SessionIdentity};
pub use monitor::{ArmedMonitor, Monitor, MonitorContext, StopSignal};
pub use policy::ViolationPolicy;
pub use session::{
    EndReason, LoggingLifecycle, Notifier, SessionLifecycle, SessionState, TerminationNotice,
    TracingNotifier, ViolationWarning,
};
pub use sink::{build_sink, CompositeLogSink, HttpLogSink, LogSink, MemoryLogSink, SledLogSink};
pub use violation::{SignalClass, ViolationRecord, ViolationType};
