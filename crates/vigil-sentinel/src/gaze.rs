//! Gaze monitor: sustained off-screen eye movement.
//!
//! Per frame, the iris offset from the eye's horizontal centre is normalized by
//! half the eye width. The tracker applies hysteresis (a soft band that clears
//! the timer, a hard band that starts it), a hold time, and a cooldown between
//! reports.

use crate::frames::{FaceLandmarks, FrameSource, LandmarkExtractor};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace};
use vigil_core::{
    ArmedMonitor, Monitor, MonitorContext, ProctorError, ProctorResult, Report, ViolationType,
};

pub const GAZE_AWAY_MESSAGE: &str = "Sustained Eye Movement Detected";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GazeConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    /// Below this ratio the eyes count as on-screen.
    pub soft_ignore: f32,
    /// Above this ratio the eyes count as away.
    pub hard_suspicious: f32,
    pub hold_ms: u64,
    pub cooldown_ms: u64,
    pub outer_corner: usize,
    pub inner_corner: usize,
    pub iris_center: usize,
    pub frame_url: Option<String>,
    pub landmark_url: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for GazeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 33,
            soft_ignore: 0.55,
            hard_suspicious: 0.75,
            hold_ms: 3000,
            cooldown_ms: 10_000,
            outer_corner: 33,
            inner_corner: 133,
            iris_center: 468,
            frame_url: None,
            landmark_url: None,
            request_timeout_ms: 2000,
        }
    }
}

impl GazeConfig {
    pub fn validate(&self) -> ProctorResult<()> {
        if self.interval_ms == 0 {
            return Err(ProctorError::Config("gaze.interval_ms must be > 0".into()));
        }
        if self.soft_ignore >= self.hard_suspicious {
            return Err(ProctorError::Config(format!(
                "gaze.soft_ignore ({}) must be below gaze.hard_suspicious ({})",
                self.soft_ignore, self.hard_suspicious
            )));
        }
        Ok(())
    }

    pub fn indices(&self) -> EyeIndices {
        EyeIndices {
            outer: self.outer_corner,
            inner: self.inner_corner,
            iris: self.iris_center,
        }
    }
}

/// Face-mesh indices of one eye's corners and iris centre.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EyeIndices {
    pub outer: usize,
    pub inner: usize,
    pub iris: usize,
}

impl Default for EyeIndices {
    fn default() -> Self {
        GazeConfig::default().indices()
    }
}

/// Horizontal iris offset as a fraction of half the eye width: 0 is centred, 1 is
/// at a corner. `None` when a landmark is missing or the eye has zero width.
pub fn gaze_ratio(landmarks: &FaceLandmarks, indices: EyeIndices) -> Option<f32> {
    let outer = landmarks.get(indices.outer)?;
    let inner = landmarks.get(indices.inner)?;
    let iris = landmarks.get(indices.iris)?;

    let half_width = (inner.x - outer.x).abs() / 2.0;
    if half_width == 0.0 {
        return None;
    }
    let mid = (outer.x + inner.x) / 2.0;
    Some((iris.x - mid).abs() / half_width)
}

/// Hysteresis + hold + cooldown state machine. Pure; callers pass `now`.
#[derive(Debug, Clone)]
pub struct GazeTracker {
    soft_ignore: f32,
    hard_suspicious: f32,
    hold: Duration,
    cooldown: Duration,
    away_since: Option<Instant>,
    last_report: Option<Instant>,
}

impl GazeTracker {
    pub fn new(config: &GazeConfig) -> Self {
        Self {
            soft_ignore: config.soft_ignore,
            hard_suspicious: config.hard_suspicious,
            hold: Duration::from_millis(config.hold_ms),
            cooldown: Duration::from_millis(config.cooldown_ms),
            away_since: None,
            last_report: None,
        }
    }

    pub fn away_since(&self) -> Option<Instant> {
        self.away_since
    }

    /// Feed one ratio. Returns the start of the excursion when a report is due.
    pub fn observe(&mut self, ratio: f32, now: Instant) -> Option<Instant> {
        if ratio < self.soft_ignore {
            self.away_since = None;
            return None;
        }
        if ratio <= self.hard_suspicious {
            return None;
        }

        let since = *self.away_since.get_or_insert(now);
        let held = now.saturating_duration_since(since) > self.hold;
        let cooled = self
            .last_report
            .map_or(true, |last| now.saturating_duration_since(last) > self.cooldown);
        if held && cooled {
            self.last_report = Some(now);
            return Some(since);
        }
        None
    }

    /// No face in the frame.
    pub fn face_lost(&mut self) {
        self.away_since = None;
    }
}

/// Unarmed gaze monitor.
pub struct GazeMonitor {
    config: GazeConfig,
    source: Box<dyn FrameSource>,
    extractor: Box<dyn LandmarkExtractor>,
}

impl GazeMonitor {
    pub fn new(
        config: GazeConfig,
        source: Box<dyn FrameSource>,
        extractor: Box<dyn LandmarkExtractor>,
    ) -> Self {
        Self {
            config,
            source,
            extractor,
        }
    }
}

#[async_trait]
impl Monitor for GazeMonitor {
    fn name(&self) -> &'static str {
        "gaze"
    }

    async fn arm(self: Box<Self>) -> ProctorResult<Box<dyn ArmedMonitor>> {
        self.config.validate()?;
        self.source.acquire().await?;
        self.extractor.load().await?;
        info!(
            soft = self.config.soft_ignore,
            hard = self.config.hard_suspicious,
            "Gaze monitor armed"
        );
        Ok(Box::new(ArmedGaze {
            interval: Duration::from_millis(self.config.interval_ms),
            indices: self.config.indices(),
            tracker: GazeTracker::new(&self.config),
            source: self.source,
            extractor: self.extractor,
        }))
    }
}

struct ArmedGaze {
    interval: Duration,
    indices: EyeIndices,
    tracker: GazeTracker,
    source: Box<dyn FrameSource>,
    extractor: Box<dyn LandmarkExtractor>,
}

impl ArmedGaze {
    async fn sample(&mut self, ctx: &MonitorContext) -> ProctorResult<()> {
        let frame = match self.source.grab().await {
            Ok(frame) => frame,
            Err(e) => {
                trace!(error = %e, "Frame unavailable");
                return Ok(());
            }
        };
        let landmarks = match self.extractor.landmarks(&frame).await {
            Ok(Some(landmarks)) => landmarks,
            Ok(None) => {
                self.tracker.face_lost();
                return Ok(());
            }
            Err(e) => {
                trace!(error = %e, "Landmark inference failed");
                return Ok(());
            }
        };
        let Some(ratio) = gaze_ratio(&landmarks, self.indices) else {
            return Ok(());
        };
        if let Some(since) = self.tracker.observe(ratio, Instant::now()) {
            ctx.submit(Report::new(ViolationType::GazeAway, GAZE_AWAY_MESSAGE).since(since))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ArmedMonitor for ArmedGaze {
    fn name(&self) -> &'static str {
        "gaze"
    }

    async fn run(self: Box<Self>, ctx: MonitorContext) -> ProctorResult<()> {
        let mut this = self;
        let mut stop = ctx.stop_signal();
        let mut interval = tokio::time::interval(this.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = stop.stopped() => break,
                _ = interval.tick() => {
                    if !ctx.is_active() {
                        break;
                    }
                    this.sample(&ctx).await?;
                }
            }
        }
        debug!("Gaze monitor stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::Point;

    fn tracker() -> GazeTracker {
        GazeTracker::new(&GazeConfig::default())
    }

    fn feed(tracker: &mut GazeTracker, ratio: f32, from: Instant, millis: u64) -> usize {
        let mut reports = 0;
        let mut t = 0;
        while t <= millis {
            if tracker.observe(ratio, from + Duration::from_millis(t)).is_some() {
                reports += 1;
            }
            t += 33;
        }
        reports
    }

    fn face(outer: f32, inner: f32, iris: f32) -> FaceLandmarks {
        let mut points = vec![Point::default(); 478];
        points[33] = Point::new(outer, 0.5);
        points[133] = Point::new(inner, 0.5);
        points[468] = Point::new(iris, 0.5);
        FaceLandmarks::new(points)
    }

    #[test]
    fn centred_iris_has_zero_ratio() {
        let ratio = gaze_ratio(&face(0.40, 0.50, 0.45), EyeIndices::default()).unwrap();
        assert!(ratio.abs() < 1e-6);
    }

    #[test]
    fn iris_at_corner_has_unit_ratio() {
        let ratio = gaze_ratio(&face(0.40, 0.50, 0.50), EyeIndices::default()).unwrap();
        assert!((ratio - 1.0).abs() < 1e-5);
    }

    #[test]
    fn zero_width_eye_is_skipped() {
        assert!(gaze_ratio(&face(0.4, 0.4, 0.45), EyeIndices::default()).is_none());
        assert!(gaze_ratio(&FaceLandmarks::new(vec![]), EyeIndices::default()).is_none());
    }

    #[test]
    fn held_for_less_than_hold_does_not_report() {
        let mut tracker = tracker();
        let t0 = Instant::now();
        assert_eq!(feed(&mut tracker, 0.9, t0, 2900), 0);
        tracker.observe(0.1, t0 + Duration::from_millis(2950));
        assert!(tracker.away_since().is_none());
    }

    #[test]
    fn held_past_hold_reports_exactly_once() {
        let mut tracker = tracker();
        let t0 = Instant::now();
        assert_eq!(feed(&mut tracker, 0.9, t0, 3100), 1);
        assert_eq!(feed(&mut tracker, 0.1, t0 + Duration::from_millis(3150), 2000), 0);
    }

    #[test]
    fn second_excursion_inside_cooldown_is_silent() {
        let mut tracker = tracker();
        let t0 = Instant::now();
        assert_eq!(feed(&mut tracker, 0.9, t0, 3100), 1);
        tracker.observe(0.1, t0 + Duration::from_millis(3200));
        // Second excursion 3.3 s .. 7.0 s, still within 10 s of the first report.
        assert_eq!(feed(&mut tracker, 0.9, t0 + Duration::from_millis(3300), 3700), 0);
    }

    #[test]
    fn excursion_after_cooldown_reports_again() {
        let mut tracker = tracker();
        let t0 = Instant::now();
        assert_eq!(feed(&mut tracker, 0.9, t0, 3100), 1);
        tracker.observe(0.1, t0 + Duration::from_millis(3200));
        assert_eq!(feed(&mut tracker, 0.9, t0 + Duration::from_secs(11), 3100), 1);
    }

    #[test]
    fn middle_band_neither_starts_nor_clears() {
        let mut tracker = tracker();
        let t0 = Instant::now();
        tracker.observe(0.65, t0);
        assert!(tracker.away_since().is_none());
        tracker.observe(0.9, t0);
        tracker.observe(0.65, t0 + Duration::from_secs(5));
        assert_eq!(tracker.away_since(), Some(t0));
    }

    #[test]
    fn lost_face_clears_timer() {
        let mut tracker = tracker();
        let t0 = Instant::now();
        tracker.observe(0.9, t0);
        tracker.face_lost();
        assert!(tracker.observe(0.9, t0 + Duration::from_secs(4)).is_none());
    }

    #[test]
    fn soft_not_below_hard_is_rejected() {
        let config = GazeConfig {
            soft_ignore: 0.8,
            ..GazeConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
