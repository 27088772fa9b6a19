//! Energy gate: the cheap first stage that keeps the classifier idle in a quiet room.

/// Root-mean-square level of a buffer (0.0 for an empty one).
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt() as f32
}

/// Opens after `required` consecutive levels above `threshold`; any quiet sample
/// closes it again.
#[derive(Debug, Clone)]
pub struct VoiceGate {
    threshold: f32,
    required: u32,
    consecutive: u32,
}

impl VoiceGate {
    pub fn new(threshold: f32, required: u32) -> Self {
        Self {
            threshold,
            required: required.max(1),
            consecutive: 0,
        }
    }

    /// Feed one RMS level. Returns true while the gate is open.
    pub fn observe(&mut self, level: f32) -> bool {
        if level > self.threshold {
            self.consecutive = self.consecutive.saturating_add(1);
        } else {
            self.consecutive = 0;
        }
        self.is_open()
    }

    pub fn is_open(&self) -> bool {
        self.consecutive >= self.required
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_constant_signal() {
        assert_eq!(rms(&[]), 0.0);
        assert!((rms(&[0.5; 100]) - 0.5).abs() < 1e-6);
        assert!((rms(&[0.5, -0.5, 0.5, -0.5]) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn gate_needs_consecutive_loud_samples() {
        let mut gate = VoiceGate::new(0.02, 2);
        assert!(!gate.observe(0.1));
        assert!(gate.observe(0.1));
        assert!(gate.observe(0.1));
        assert!(!gate.observe(0.01));
        assert!(!gate.observe(0.1));
        assert!(gate.observe(0.1));
    }

    #[test]
    fn level_equal_to_threshold_is_quiet() {
        let mut gate = VoiceGate::new(0.02, 1);
        assert!(!gate.observe(0.02));
    }
}
