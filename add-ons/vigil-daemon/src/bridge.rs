//! JSON-lines bridge to the exam shell.
//!
//! Inbound (stdin), one object per line:
//! `{"type":"visibilityChange","hidden":true}`, `{"type":"windowBlur"}`,
//! `{"type":"keyDown","key":"c","ctrl":true}`, `{"type":"contextMenu"}`,
//! `{"type":"fullscreenChange","fullscreen":false}`, `{"type":"submit"}`.
//!
//! Outbound (stdout): `keyPolicy`, `warning`, `terminationNotice`, `persistFailed`,
//! `monitorUnavailable`, `requestFullscreen`, `terminated`, `submitted`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use vigil_core::{
    AggregateLog, DisplaySurface, Notifier, ProctorError, ProctorResult, SessionLifecycle,
    TerminationNotice, ViolationWarning,
};
use vigil_sentinel::{ChannelEventSource, EnvironmentEvent, RestrictedKeyPolicy};

/// Everything the daemon tells the host.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Outbound {
    KeyPolicy {
        policy: KeyPolicyMessage,
    },
    Warning {
        #[serde(flatten)]
        warning: ViolationWarning,
        summary: String,
    },
    TerminationNotice(TerminationNotice),
    PersistFailed {
        reason: String,
    },
    MonitorUnavailable {
        monitor: String,
        reason: String,
    },
    RequestFullscreen,
    Terminated {
        log: AggregateLog,
    },
    Submitted {
        log: AggregateLog,
    },
}

/// Host copy of the restricted-key policy, camelCase like every other line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPolicyMessage {
    keys: Vec<String>,
    alt_combos: Vec<String>,
    ctrl_combos: Vec<String>,
    ctrl_shift_combos: Vec<String>,
}

impl From<&RestrictedKeyPolicy> for KeyPolicyMessage {
    fn from(policy: &RestrictedKeyPolicy) -> Self {
        Self {
            keys: policy.keys.clone(),
            alt_combos: policy.alt_combos.clone(),
            ctrl_combos: policy.ctrl_combos.clone(),
            ctrl_shift_combos: policy.ctrl_shift_combos.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum Control {
    Submit,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Inbound {
    Control(Control),
    Event(EnvironmentEvent),
}

/// What the host asked for, beyond environment events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCommand {
    Submit,
    /// stdin reached EOF: the shell went away.
    Closed,
}

/// Host-facing collaborator: notifier, session lifecycle, and display surface all
/// at once. Cheap to clone; every clone feeds the same writer.
#[derive(Clone)]
pub struct HostBridge {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl HostBridge {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, message: Outbound) {
        if self.tx.send(message).is_err() {
            debug!("Host writer gone; dropping message");
        }
    }

    pub fn publish_key_policy(&self, policy: &RestrictedKeyPolicy) {
        self.send(Outbound::KeyPolicy {
            policy: policy.into(),
        });
    }
}

impl Notifier for HostBridge {
    fn violation_warning(&self, warning: &ViolationWarning) {
        warn!(violation = %warning.violation, total = warning.total, "{}", warning.message);
        self.send(Outbound::Warning {
            summary: warning.summary(),
            warning: warning.clone(),
        });
    }

    fn termination_notice(&self, notice: &TerminationNotice) {
        self.send(Outbound::TerminationNotice(notice.clone()));
    }

    fn persistence_failed(&self, reason: &str) {
        warn!(reason, "Failed to save proctoring log");
        self.send(Outbound::PersistFailed {
            reason: reason.to_string(),
        });
    }

    fn monitor_unavailable(&self, monitor: &str, reason: &str) {
        self.send(Outbound::MonitorUnavailable {
            monitor: monitor.to_string(),
            reason: reason.to_string(),
        });
    }
}

#[async_trait]
impl SessionLifecycle for HostBridge {
    async fn on_terminate(&self, log: &AggregateLog) {
        info!(session_id = log.session_id(), total = log.total, "Forcing submission");
        self.send(Outbound::Terminated { log: log.clone() });
    }

    async fn on_voluntary_submit(&self, log: &AggregateLog) {
        self.send(Outbound::Submitted { log: log.clone() });
    }
}

#[async_trait]
impl DisplaySurface for HostBridge {
    async fn request_fullscreen(&self) -> ProctorResult<()> {
        self.tx
            .send(Outbound::RequestFullscreen)
            .map_err(|_| ProctorError::acquisition("fullscreen", "host bridge closed"))
    }
}

/// Write each message as one JSON line until `shutdown` fires, then drain what
/// is already queued. Returns the writer so callers can inspect it.
pub async fn write_lines<W>(
    mut out: W,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    mut shutdown: oneshot::Receiver<()>,
) -> std::io::Result<W>
where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            message = rx.recv() => match message {
                Some(message) => write_line(&mut out, &message).await?,
                None => break,
            },
            _ = &mut shutdown => {
                while let Ok(message) = rx.try_recv() {
                    write_line(&mut out, &message).await?;
                }
                break;
            }
        }
    }
    out.flush().await?;
    Ok(out)
}

async fn write_line<W>(out: &mut W, message: &Outbound) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    out.write_all(&line).await?;
    out.flush().await
}

/// Read host lines, publishing environment events and forwarding commands.
/// Malformed lines are logged and skipped.
pub async fn read_commands<R>(
    input: R,
    events: ChannelEventSource,
    commands: mpsc::UnboundedSender<HostCommand>,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Inbound>(line) {
            Ok(Inbound::Control(Control::Submit)) => {
                let _ = commands.send(HostCommand::Submit);
            }
            Ok(Inbound::Event(event)) => {
                if !events.publish(event) {
                    debug!("No environment listener; event dropped");
                }
            }
            Err(e) => warn!(error = %e, line, "Ignoring malformed host message"),
        }
    }
    let _ = commands.send(HostCommand::Closed);
    Ok(())
}
