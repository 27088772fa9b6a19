//! Desktop hooks (feature `desktop`): a global keyboard/mouse listener feeding the
//! environment lock, and a display surface that re-enters fullscreen by sending F11.

use crate::environment::{
    ChannelEventSource, EnvironmentEvent, EventSource, EventSubscription, KeyEvent,
};
use async_trait::async_trait;
use enigo::{Direction, Enigo, Key as EnigoKey, Keyboard, Settings};
use rdev::{listen, Button, Event, EventType, Key};
use std::cell::RefCell;
use tracing::{error, info};
use vigil_core::{DisplaySurface, ProctorError, ProctorResult};

#[derive(Default)]
struct Modifiers {
    ctrl: bool,
    shift: bool,
    alt: bool,
    meta: bool,
}

/// DOM-style name for an rdev key, or `None` for keys the policy never looks at.
fn key_name(key: Key) -> Option<String> {
    let name = match key {
        Key::Escape => "Escape",
        Key::Tab => "Tab",
        Key::F11 => "F11",
        Key::F12 => "F12",
        Key::Alt | Key::AltGr => "Alt",
        Key::MetaLeft | Key::MetaRight => "Meta",
        Key::ControlLeft | Key::ControlRight => "Control",
        Key::ShiftLeft | Key::ShiftRight => "Shift",
        other => {
            // KeyA..KeyZ → "a".."z"
            let debug = format!("{:?}", other);
            let letter = debug.strip_prefix("Key")?;
            if letter.len() != 1 {
                return None;
            }
            return Some(letter.to_lowercase());
        }
    };
    Some(name.to_string())
}

/// Global input listener. rdev's listener cannot be stopped once started, so one
/// thread serves the whole process and sessions subscribe through a channel source.
#[derive(Clone)]
pub struct RdevEventSource {
    channel: ChannelEventSource,
}

impl RdevEventSource {
    pub fn start() -> ProctorResult<Self> {
        let channel = ChannelEventSource::new();
        let publisher = channel.clone();
        std::thread::Builder::new()
            .name("vigil-input".to_string())
            .spawn(move || {
                let mods = RefCell::new(Modifiers::default());
                let callback = move |event: Event| match event.event_type {
                    EventType::KeyPress(key) => {
                        let mut mods = mods.borrow_mut();
                        match key {
                            Key::ControlLeft | Key::ControlRight => mods.ctrl = true,
                            Key::ShiftLeft | Key::ShiftRight => mods.shift = true,
                            Key::Alt | Key::AltGr => mods.alt = true,
                            Key::MetaLeft | Key::MetaRight => mods.meta = true,
                            _ => {}
                        }
                        if let Some(name) = key_name(key) {
                            publisher.publish(EnvironmentEvent::KeyDown(KeyEvent {
                                key: name,
                                ctrl: mods.ctrl,
                                shift: mods.shift,
                                alt: mods.alt,
                                meta: mods.meta,
                            }));
                        }
                    }
                    EventType::KeyRelease(key) => {
                        let mut mods = mods.borrow_mut();
                        match key {
                            Key::ControlLeft | Key::ControlRight => mods.ctrl = false,
                            Key::ShiftLeft | Key::ShiftRight => mods.shift = false,
                            Key::Alt | Key::AltGr => mods.alt = false,
                            Key::MetaLeft | Key::MetaRight => mods.meta = false,
                            _ => {}
                        }
                    }
                    EventType::ButtonPress(Button::Right) => {
                        publisher.publish(EnvironmentEvent::ContextMenu);
                    }
                    _ => {}
                };
                if let Err(e) = listen(callback) {
                    error!("Input listener error: {:?}", e);
                }
            })
            .map_err(|e| ProctorError::acquisition("environment", e.to_string()))?;
        info!("Desktop input listener started");
        Ok(Self { channel })
    }

    /// Window-manager events (focus loss, fullscreen changes) still come from the host.
    pub fn channel(&self) -> &ChannelEventSource {
        &self.channel
    }
}

impl EventSource for RdevEventSource {
    fn subscribe(&self) -> ProctorResult<EventSubscription> {
        self.channel.subscribe()
    }
}

/// Re-enters fullscreen by sending F11 to the focused window.
#[derive(Debug, Default, Clone)]
pub struct EnigoDisplaySurface;

#[async_trait]
impl DisplaySurface for EnigoDisplaySurface {
    async fn request_fullscreen(&self) -> ProctorResult<()> {
        tokio::task::spawn_blocking(|| {
            let mut enigo = Enigo::new(&Settings::default())
                .map_err(|e| ProctorError::acquisition("fullscreen", format!("{:?}", e)))?;
            enigo
                .key(EnigoKey::F11, Direction::Click)
                .map_err(|e| ProctorError::acquisition("fullscreen", format!("{:?}", e)))
        })
        .await
        .map_err(|e| ProctorError::Channel(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rdev_keys_map_to_dom_names() {
        assert_eq!(key_name(Key::KeyC).as_deref(), Some("c"));
        assert_eq!(key_name(Key::Escape).as_deref(), Some("Escape"));
        assert_eq!(key_name(Key::MetaRight).as_deref(), Some("Meta"));
        assert_eq!(key_name(Key::Num1), None);
    }
}
