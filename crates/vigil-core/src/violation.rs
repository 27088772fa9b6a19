//! The closed violation catalogue and per-type bookkeeping.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;

/// Every kind of violation the engine can count. Closed set; no dynamic registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ViolationType {
    NoFace,
    MultipleFace,
    CellPhone,
    ProhibitedObject,
    BackgroundVoice,
    GazeAway,
    TabSwitch,
    WindowBlur,
    ShortcutKey,
    FullscreenExit,
}

/// How a violation signal behaves over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalClass {
    /// One event, one report (tab switch, key press, object seen in a frame).
    Discrete,
    /// Pre-filtered by the monitor's own sustained-duration and cooldown logic.
    Continuous,
}

impl ViolationType {
    pub const COUNT: usize = 10;

    pub const ALL: [ViolationType; Self::COUNT] = [
        ViolationType::NoFace,
        ViolationType::MultipleFace,
        ViolationType::CellPhone,
        ViolationType::ProhibitedObject,
        ViolationType::BackgroundVoice,
        ViolationType::GazeAway,
        ViolationType::TabSwitch,
        ViolationType::WindowBlur,
        ViolationType::ShortcutKey,
        ViolationType::FullscreenExit,
    ];

    /// Stable position in [`ViolationType::ALL`]; used to index fixed-size tables.
    pub fn index(self) -> usize {
        match self {
            ViolationType::NoFace => 0,
            ViolationType::MultipleFace => 1,
            ViolationType::CellPhone => 2,
            ViolationType::ProhibitedObject => 3,
            ViolationType::BackgroundVoice => 4,
            ViolationType::GazeAway => 5,
            ViolationType::TabSwitch => 6,
            ViolationType::WindowBlur => 7,
            ViolationType::ShortcutKey => 8,
            ViolationType::FullscreenExit => 9,
        }
    }

    pub fn signal_class(self) -> SignalClass {
        match self {
            ViolationType::BackgroundVoice | ViolationType::GazeAway => SignalClass::Continuous,
            ViolationType::NoFace
            | ViolationType::MultipleFace
            | ViolationType::CellPhone
            | ViolationType::ProhibitedObject
            | ViolationType::TabSwitch
            | ViolationType::WindowBlur
            | ViolationType::ShortcutKey
            | ViolationType::FullscreenExit => SignalClass::Discrete,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ViolationType::NoFace => "noFace",
            ViolationType::MultipleFace => "multipleFace",
            ViolationType::CellPhone => "cellPhone",
            ViolationType::ProhibitedObject => "prohibitedObject",
            ViolationType::BackgroundVoice => "backgroundVoice",
            ViolationType::GazeAway => "gazeAway",
            ViolationType::TabSwitch => "tabSwitch",
            ViolationType::WindowBlur => "windowBlur",
            ViolationType::ShortcutKey => "shortcutKey",
            ViolationType::FullscreenExit => "fullscreenExit",
        }
    }

    /// Field name used by the exam backend's cheating-log document (e.g. `noFaceCount`).
    pub fn log_field(self) -> String {
        format!("{}Count", self.as_str())
    }
}

impl fmt::Display for ViolationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Running state for one violation type.
#[derive(Debug, Clone, Default)]
pub struct ViolationRecord {
    /// Accepted reports so far. Only ever increases while monitoring.
    pub count: u32,
    /// When the last report of this type was accepted (debounce anchor).
    pub last_accepted: Option<Instant>,
    /// For sustained signals (gaze, voice): when the assertion behind the last
    /// accepted report began, as supplied by the monitor.
    pub assertion_start: Option<Instant>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_matches_catalogue_order() {
        for (i, ty) in ViolationType::ALL.iter().enumerate() {
            assert_eq!(ty.index(), i);
        }
    }

    #[test]
    fn only_gaze_and_voice_are_continuous() {
        let continuous: Vec<_> = ViolationType::ALL
            .iter()
            .filter(|t| t.signal_class() == SignalClass::Continuous)
            .collect();
        assert_eq!(
            continuous,
            vec![&ViolationType::BackgroundVoice, &ViolationType::GazeAway]
        );
    }

    #[test]
    fn serde_name_matches_log_field() {
        let json = serde_json::to_string(&ViolationType::MultipleFace).unwrap();
        assert_eq!(json, "\"multipleFace\"");
        assert_eq!(ViolationType::MultipleFace.log_field(), "multipleFaceCount");
    }
}
