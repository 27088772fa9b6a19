//! Environment lock: focus loss, restricted keys, context menu, and fullscreen
//! exit, with fullscreen re-assertion.
//!
//! Purely event driven. The monitor holds one [`EventSubscription`] for the whole
//! session; dropping it detaches from the source, and subscribing again replaces
//! the previous subscriber, so listeners never stack.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vigil_core::{
    ArmedMonitor, DisplaySurface, Monitor, MonitorContext, ProctorError, ProctorResult,
    ViolationType,
};

pub const TAB_SWITCH_MESSAGE: &str = "Tab switching detected";
pub const WINDOW_BLUR_MESSAGE: &str = "Window focus lost";
pub const RESTRICTED_KEY_MESSAGE: &str = "Restricted key pressed";
pub const CONTEXT_MENU_MESSAGE: &str = "Right click detected";
pub const FULLSCREEN_EXIT_MESSAGE: &str = "Exited fullscreen";

/// One key press with its modifier state. `key` uses DOM `KeyboardEvent.key` names.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyEvent {
    pub key: String,
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
    pub meta: bool,
}

impl KeyEvent {
    pub fn plain(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    pub fn ctrl(key: impl Into<String>) -> Self {
        Self {
            ctrl: true,
            ..Self::plain(key)
        }
    }

    pub fn ctrl_shift(key: impl Into<String>) -> Self {
        Self {
            shift: true,
            ..Self::ctrl(key)
        }
    }

    pub fn alt(key: impl Into<String>) -> Self {
        Self {
            alt: true,
            ..Self::plain(key)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EnvironmentEvent {
    VisibilityChange { hidden: bool },
    WindowBlur,
    KeyDown(KeyEvent),
    ContextMenu,
    FullscreenChange { fullscreen: bool },
}

/// Keys the exam shell blocks. Field names follow the config document
/// (`ctrl_combos`, ...); the host bridge sends its own camelCase copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestrictedKeyPolicy {
    /// Blocked regardless of modifiers (exact, case-sensitive names).
    pub keys: Vec<String>,
    /// Blocked while Alt is held.
    pub alt_combos: Vec<String>,
    /// Blocked while Ctrl is held (case-insensitive).
    pub ctrl_combos: Vec<String>,
    /// Blocked while Ctrl and Shift are held (case-insensitive).
    pub ctrl_shift_combos: Vec<String>,
}

impl Default for RestrictedKeyPolicy {
    fn default() -> Self {
        let owned = |keys: &[&str]| keys.iter().map(|k| k.to_string()).collect::<Vec<_>>();
        Self {
            keys: owned(&["Escape", "F11", "Tab", "Alt", "Meta", "F12"]),
            alt_combos: owned(&["Tab"]),
            ctrl_combos: owned(&["c", "v", "x", "n", "t"]),
            ctrl_shift_combos: owned(&["i", "j", "c"]),
        }
    }
}

impl RestrictedKeyPolicy {
    pub fn is_restricted(&self, event: &KeyEvent) -> bool {
        if self.keys.iter().any(|k| k == &event.key) {
            return true;
        }
        if event.alt && self.alt_combos.iter().any(|k| k == &event.key) {
            return true;
        }
        let lower = event.key.to_lowercase();
        if event.ctrl && self.ctrl_combos.iter().any(|k| k.to_lowercase() == lower) {
            return true;
        }
        event.ctrl
            && event.shift
            && self
                .ctrl_shift_combos
                .iter()
                .any(|k| k.to_lowercase() == lower)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub enabled: bool,
    /// Key events within this window after a fullscreen re-request are ignored.
    pub refullscreen_grace_ms: u64,
    pub key_policy: RestrictedKeyPolicy,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            refullscreen_grace_ms: 500,
            key_policy: RestrictedKeyPolicy::default(),
        }
    }
}

// -----------------------------------------------------------------------------
// Event sources
// -----------------------------------------------------------------------------

/// Live registration with an [`EventSource`]. Dropping it detaches.
pub struct EventSubscription {
    rx: mpsc::UnboundedReceiver<EnvironmentEvent>,
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl EventSubscription {
    pub fn new(
        rx: mpsc::UnboundedReceiver<EnvironmentEvent>,
        detach: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            rx,
            detach: Some(Box::new(detach)),
        }
    }

    /// Next event, or `None` once the source has gone away or replaced this subscription.
    pub async fn next(&mut self) -> Option<EnvironmentEvent> {
        self.rx.recv().await
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

pub trait EventSource: Send + Sync {
    /// Register the single listener. Replaces any previous subscription.
    fn subscribe(&self) -> ProctorResult<EventSubscription>;
}

#[derive(Default)]
struct Slot {
    generation: u64,
    tx: Option<mpsc::UnboundedSender<EnvironmentEvent>>,
}

/// In-process event source fed by [`ChannelEventSource::publish`]: the host
/// bridge, desktop hooks, and tests all push through it.
#[derive(Clone, Default)]
pub struct ChannelEventSource {
    slot: Arc<Mutex<Slot>>,
}

impl ChannelEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event to the current subscriber. Returns false when nobody is listening.
    pub fn publish(&self, event: EnvironmentEvent) -> bool {
        let Ok(slot) = self.slot.lock() else {
            return false;
        };
        match slot.tx {
            Some(ref tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub fn has_subscriber(&self) -> bool {
        self.slot
            .lock()
            .map(|slot| slot.tx.as_ref().is_some_and(|tx| !tx.is_closed()))
            .unwrap_or(false)
    }
}

impl EventSource for ChannelEventSource {
    fn subscribe(&self) -> ProctorResult<EventSubscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let generation = {
            let mut slot = self
                .slot
                .lock()
                .map_err(|e| ProctorError::acquisition("environment", e.to_string()))?;
            if slot.tx.is_some() {
                debug!("Replacing previous environment subscription");
            }
            slot.generation += 1;
            slot.tx = Some(tx);
            slot.generation
        };

        let slot = Arc::clone(&self.slot);
        Ok(EventSubscription::new(rx, move || {
            if let Ok(mut slot) = slot.lock() {
                if slot.generation == generation {
                    slot.tx = None;
                }
            }
        }))
    }
}

// -----------------------------------------------------------------------------
// Event interpretation
// -----------------------------------------------------------------------------

/// What one event means for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub violation: ViolationType,
    pub message: &'static str,
    /// Ask the display surface to re-enter fullscreen.
    pub refullscreen: bool,
}

impl Verdict {
    fn report(violation: ViolationType, message: &'static str) -> Self {
        Self {
            violation,
            message,
            refullscreen: false,
        }
    }
}

/// Maps raw events to verdicts. Pure; callers pass `now`.
#[derive(Debug, Clone)]
pub struct EnvironmentLock {
    policy: RestrictedKeyPolicy,
    grace: Duration,
    keys_muted_until: Option<Instant>,
}

impl EnvironmentLock {
    pub fn new(config: &EnvironmentConfig) -> Self {
        Self {
            policy: config.key_policy.clone(),
            grace: Duration::from_millis(config.refullscreen_grace_ms),
            keys_muted_until: None,
        }
    }

    pub fn interpret(&mut self, event: &EnvironmentEvent, now: Instant) -> Option<Verdict> {
        match event {
            EnvironmentEvent::VisibilityChange { hidden: true } => Some(Verdict::report(
                ViolationType::TabSwitch,
                TAB_SWITCH_MESSAGE,
            )),
            EnvironmentEvent::VisibilityChange { hidden: false } => None,
            EnvironmentEvent::WindowBlur => Some(Verdict::report(
                ViolationType::WindowBlur,
                WINDOW_BLUR_MESSAGE,
            )),
            EnvironmentEvent::KeyDown(key) => {
                if self.keys_muted_until.is_some_and(|until| now < until) {
                    debug!(key = %key.key, "Key ignored during fullscreen re-request");
                    return None;
                }
                self.policy.is_restricted(key).then(|| {
                    Verdict::report(ViolationType::ShortcutKey, RESTRICTED_KEY_MESSAGE)
                })
            }
            EnvironmentEvent::ContextMenu => Some(Verdict::report(
                ViolationType::ShortcutKey,
                CONTEXT_MENU_MESSAGE,
            )),
            EnvironmentEvent::FullscreenChange { fullscreen: false } => {
                self.keys_muted_until = Some(now + self.grace);
                Some(Verdict {
                    violation: ViolationType::FullscreenExit,
                    message: FULLSCREEN_EXIT_MESSAGE,
                    refullscreen: true,
                })
            }
            EnvironmentEvent::FullscreenChange { fullscreen: true } => None,
        }
    }
}

// -----------------------------------------------------------------------------
// Monitor
// -----------------------------------------------------------------------------

/// Unarmed environment lock monitor.
pub struct EnvironmentMonitor {
    config: EnvironmentConfig,
    source: Arc<dyn EventSource>,
    display: Arc<dyn DisplaySurface>,
}

impl EnvironmentMonitor {
    pub fn new(
        config: EnvironmentConfig,
        source: Arc<dyn EventSource>,
        display: Arc<dyn DisplaySurface>,
    ) -> Self {
        Self {
            config,
            source,
            display,
        }
    }
}

#[async_trait]
impl Monitor for EnvironmentMonitor {
    fn name(&self) -> &'static str {
        "environment"
    }

    async fn arm(self: Box<Self>) -> ProctorResult<Box<dyn ArmedMonitor>> {
        let subscription = self.source.subscribe()?;
        info!(
            restricted_keys = self.config.key_policy.keys.len(),
            "Environment lock armed"
        );
        Ok(Box::new(ArmedEnvironment {
            lock: EnvironmentLock::new(&self.config),
            subscription,
            display: self.display,
        }))
    }
}

struct ArmedEnvironment {
    lock: EnvironmentLock,
    subscription: EventSubscription,
    display: Arc<dyn DisplaySurface>,
}

#[async_trait]
impl ArmedMonitor for ArmedEnvironment {
    fn name(&self) -> &'static str {
        "environment"
    }

    async fn run(self: Box<Self>, ctx: MonitorContext) -> ProctorResult<()> {
        let ArmedEnvironment {
            mut lock,
            mut subscription,
            display,
        } = *self;
        let mut stop = ctx.stop_signal();

        loop {
            let event = tokio::select! {
                _ = stop.stopped() => break,
                event = subscription.next() => event,
            };
            let Some(event) = event else {
                debug!("Environment event source closed");
                break;
            };
            if !ctx.is_active() {
                break;
            }
            let Some(verdict) = lock.interpret(&event, Instant::now()) else {
                continue;
            };
            ctx.report(verdict.violation, verdict.message).await?;
            if verdict.refullscreen && ctx.is_active() {
                if let Err(e) = display.request_fullscreen().await {
                    warn!(error = %e, "Fullscreen re-request failed");
                }
            }
        }
        debug!("Environment lock released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock() -> EnvironmentLock {
        EnvironmentLock::new(&EnvironmentConfig::default())
    }

    #[test]
    fn default_policy_matches_catalogue() {
        let policy = RestrictedKeyPolicy::default();
        for key in ["Escape", "F11", "Tab", "Alt", "Meta", "F12"] {
            assert!(policy.is_restricted(&KeyEvent::plain(key)), "{key}");
        }
        assert!(policy.is_restricted(&KeyEvent::alt("Tab")));
        for key in ["c", "v", "x", "n", "t", "C", "V"] {
            assert!(policy.is_restricted(&KeyEvent::ctrl(key)), "ctrl+{key}");
        }
        for key in ["i", "j", "I", "J"] {
            assert!(policy.is_restricted(&KeyEvent::ctrl_shift(key)), "ctrl+shift+{key}");
        }

        assert!(!policy.is_restricted(&KeyEvent::plain("a")));
        assert!(!policy.is_restricted(&KeyEvent::plain("c")));
        assert!(!policy.is_restricted(&KeyEvent::ctrl("a")));
        assert!(!policy.is_restricted(&KeyEvent::plain("escape")));
        assert!(!policy.is_restricted(&KeyEvent::ctrl("i")));
    }

    #[test]
    fn policy_reads_config_field_names() {
        let policy: RestrictedKeyPolicy =
            serde_json::from_str(r#"{"ctrl_combos":["z"],"ctrl_shift_combos":[]}"#).unwrap();
        assert_eq!(policy.ctrl_combos, vec!["z".to_string()]);
        assert!(policy.ctrl_shift_combos.is_empty());
        assert_eq!(policy.alt_combos, RestrictedKeyPolicy::default().alt_combos);
        assert!(policy.is_restricted(&KeyEvent::ctrl("Z")));
        assert!(!policy.is_restricted(&KeyEvent::ctrl("c")));
    }

    #[test]
    fn events_parse_from_host_json() {
        let event: EnvironmentEvent =
            serde_json::from_str(r#"{"type":"keyDown","key":"c","ctrl":true}"#).unwrap();
        assert_eq!(event, EnvironmentEvent::KeyDown(KeyEvent::ctrl("c")));
        let event: EnvironmentEvent =
            serde_json::from_str(r#"{"type":"visibilityChange","hidden":true}"#).unwrap();
        assert_eq!(event, EnvironmentEvent::VisibilityChange { hidden: true });
    }

    #[test]
    fn event_mapping() {
        let mut lock = lock();
        let now = Instant::now();
        let kind = |lock: &mut EnvironmentLock, e: EnvironmentEvent| {
            lock.interpret(&e, now).map(|v| (v.violation, v.message))
        };

        assert_eq!(
            kind(&mut lock, EnvironmentEvent::VisibilityChange { hidden: true }),
            Some((ViolationType::TabSwitch, TAB_SWITCH_MESSAGE))
        );
        assert_eq!(
            kind(&mut lock, EnvironmentEvent::VisibilityChange { hidden: false }),
            None
        );
        assert_eq!(
            kind(&mut lock, EnvironmentEvent::WindowBlur),
            Some((ViolationType::WindowBlur, WINDOW_BLUR_MESSAGE))
        );
        assert_eq!(
            kind(&mut lock, EnvironmentEvent::ContextMenu),
            Some((ViolationType::ShortcutKey, CONTEXT_MENU_MESSAGE))
        );
        assert_eq!(
            kind(&mut lock, EnvironmentEvent::KeyDown(KeyEvent::plain("q"))),
            None
        );
        assert_eq!(
            kind(&mut lock, EnvironmentEvent::FullscreenChange { fullscreen: true }),
            None
        );
    }

    #[test]
    fn fullscreen_exit_mutes_keys_for_grace_window() {
        let mut lock = lock();
        let t0 = Instant::now();
        let verdict = lock
            .interpret(&EnvironmentEvent::FullscreenChange { fullscreen: false }, t0)
            .unwrap();
        assert_eq!(verdict.violation, ViolationType::FullscreenExit);
        assert!(verdict.refullscreen);

        let f11 = EnvironmentEvent::KeyDown(KeyEvent::plain("F11"));
        assert!(lock.interpret(&f11, t0 + Duration::from_millis(100)).is_none());
        assert!(lock.interpret(&f11, t0 + Duration::from_millis(600)).is_some());
    }

    #[test]
    fn resubscribing_replaces_previous_listener() {
        let source = ChannelEventSource::new();
        let mut first = source.subscribe().unwrap();
        let mut second = source.subscribe().unwrap();

        assert!(source.publish(EnvironmentEvent::WindowBlur));
        assert_eq!(second.rx.try_recv().unwrap(), EnvironmentEvent::WindowBlur);
        // The first subscription's sender was dropped on replacement.
        assert!(first.rx.try_recv().is_err());

        // Dropping a stale subscription must not detach the live one.
        drop(first);
        assert!(source.has_subscriber());
        drop(second);
        assert!(!source.has_subscriber());
        assert!(!source.publish(EnvironmentEvent::WindowBlur));
    }
}
