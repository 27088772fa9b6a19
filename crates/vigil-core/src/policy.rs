//! Per-type escalation policy: threshold plus a total mapping from violation type
//! to debounce window.

use crate::config::PolicyConfig;
use crate::error::{ProctorError, ProctorResult};
use crate::violation::{SignalClass, ViolationType};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ViolationPolicy {
    threshold: u32,
    discrete_debounce: Duration,
    continuous_debounce: Duration,
    overrides: [Option<Duration>; ViolationType::COUNT],
}

impl Default for ViolationPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(3), Duration::from_secs(3))
    }
}

impl ViolationPolicy {
    pub fn new(threshold: u32, discrete_debounce: Duration, continuous_debounce: Duration) -> Self {
        Self {
            threshold,
            discrete_debounce,
            continuous_debounce,
            overrides: [None; ViolationType::COUNT],
        }
    }

    pub fn from_config(config: &PolicyConfig) -> ProctorResult<Self> {
        if config.threshold == 0 {
            return Err(ProctorError::Config(
                "policy.threshold must be at least 1".to_string(),
            ));
        }
        Ok(Self::new(
            config.threshold,
            Duration::from_millis(config.discrete_debounce_ms),
            Duration::from_millis(config.continuous_debounce_ms),
        ))
    }

    /// Give one type its own debounce window instead of its class default.
    pub fn with_override(mut self, ty: ViolationType, window: Duration) -> Self {
        self.overrides[ty.index()] = Some(window);
        self
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn debounce_for(&self, ty: ViolationType) -> Duration {
        if let Some(window) = self.overrides[ty.index()] {
            return window;
        }
        match ty.signal_class() {
            SignalClass::Discrete => self.discrete_debounce,
            SignalClass::Continuous => self.continuous_debounce,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_defaults_and_overrides() {
        let policy = ViolationPolicy::new(5, Duration::from_secs(3), Duration::from_secs(10))
            .with_override(ViolationType::CellPhone, Duration::from_secs(5));

        assert_eq!(policy.debounce_for(ViolationType::TabSwitch), Duration::from_secs(3));
        assert_eq!(policy.debounce_for(ViolationType::GazeAway), Duration::from_secs(10));
        assert_eq!(policy.debounce_for(ViolationType::CellPhone), Duration::from_secs(5));
    }

    #[test]
    fn zero_threshold_rejected() {
        let config = PolicyConfig {
            threshold: 0,
            ..Default::default()
        };
        assert!(ViolationPolicy::from_config(&config).is_err());
    }
}
