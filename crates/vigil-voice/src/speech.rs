//! Sustained-speech tracking on top of per-window classifier scores.

use std::time::Duration;
use tokio::time::Instant;

/// Highest score among the speech-like classes. Indices the classifier did not
/// return are ignored.
pub fn speech_score(scores: &[f32], speech_classes: &[usize]) -> f32 {
    speech_classes
        .iter()
        .filter_map(|&i| scores.get(i).copied())
        .fold(0.0, f32::max)
}

/// Speech above `threshold` must last `sustain` before a report is due; each
/// report restarts the timer, so an ongoing conversation yields one report per
/// sustained interval.
#[derive(Debug, Clone)]
pub struct SpeechTracker {
    threshold: f32,
    sustain: Duration,
    speech_since: Option<Instant>,
}

impl SpeechTracker {
    pub fn new(threshold: f32, sustain: Duration) -> Self {
        Self {
            threshold,
            sustain,
            speech_since: None,
        }
    }

    /// Feed one score. Returns when the sustained stretch began if a report is due.
    pub fn observe(&mut self, score: f32, now: Instant) -> Option<Instant> {
        if score <= self.threshold {
            self.speech_since = None;
            return None;
        }
        let since = *self.speech_since.get_or_insert(now);
        if now.saturating_duration_since(since) >= self.sustain {
            self.speech_since = None;
            return Some(since);
        }
        None
    }

    pub fn speech_since(&self) -> Option<Instant> {
        self.speech_since
    }

    pub fn reset(&mut self) {
        self.speech_since = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speech_score_takes_max_of_known_classes() {
        assert_eq!(speech_score(&[0.2, 0.7, 0.9], &[0, 1]), 0.7);
        assert_eq!(speech_score(&[0.4], &[0, 1]), 0.4);
        assert_eq!(speech_score(&[], &[0, 1]), 0.0);
    }

    #[test]
    fn sustained_speech_reports_then_restarts() {
        let mut tracker = SpeechTracker::new(0.6, Duration::from_millis(1500));
        let t0 = Instant::now();
        assert!(tracker.observe(0.8, t0).is_none());
        assert!(tracker.observe(0.8, t0 + Duration::from_secs(1)).is_none());
        assert_eq!(tracker.observe(0.8, t0 + Duration::from_secs(2)), Some(t0));
        assert!(tracker.speech_since().is_none());
        assert!(tracker.observe(0.8, t0 + Duration::from_secs(3)).is_none());
    }

    #[test]
    fn low_score_resets_timer() {
        let mut tracker = SpeechTracker::new(0.6, Duration::from_millis(1500));
        let t0 = Instant::now();
        tracker.observe(0.9, t0);
        tracker.observe(0.6, t0 + Duration::from_secs(1));
        assert!(tracker.observe(0.9, t0 + Duration::from_secs(2)).is_none());
        assert_eq!(tracker.speech_since(), Some(t0 + Duration::from_secs(2)));
    }
}
