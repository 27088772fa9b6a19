//! Vision monitor: once per tick, classify a camera frame and report who and what
//! is in view.

use crate::frames::{Detection, FrameSource, ObjectDetector};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use vigil_core::{
    ArmedMonitor, Monitor, MonitorContext, ProctorError, ProctorResult, ViolationType,
};

pub const NO_FACE_MESSAGE: &str = "Face Not Visible";
pub const MULTIPLE_FACE_MESSAGE: &str = "Multiple Faces Detected";
pub const CELL_PHONE_MESSAGE: &str = "Cell Phone Detected";
pub const PROHIBITED_OBJECT_MESSAGE: &str = "Prohibited Object Detected";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    /// Detections below this score are ignored.
    pub min_score: f32,
    pub person_classes: Vec<String>,
    pub phone_classes: Vec<String>,
    pub prohibited_classes: Vec<String>,
    /// Camera snapshot endpoint.
    pub frame_url: Option<String>,
    /// Object detector endpoint.
    pub detector_url: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 1000,
            min_score: 0.5,
            person_classes: vec!["person".to_string()],
            phone_classes: vec!["cell phone".to_string()],
            prohibited_classes: vec!["book".to_string(), "laptop".to_string()],
            frame_url: None,
            detector_url: None,
            request_timeout_ms: 5000,
        }
    }
}

impl VisionConfig {
    pub fn validate(&self) -> ProctorResult<()> {
        if self.interval_ms == 0 {
            return Err(ProctorError::Config("vision.interval_ms must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.min_score) {
            return Err(ProctorError::Config(
                "vision.min_score must be within 0..=1".into(),
            ));
        }
        Ok(())
    }
}

/// A condition found in one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Finding {
    pub violation: ViolationType,
    pub message: &'static str,
}

/// Maps one frame's detections to findings. Every check is independent, so a
/// single frame can yield several findings.
#[derive(Debug, Clone)]
pub struct VisionPolicy {
    min_score: f32,
    person_classes: Vec<String>,
    phone_classes: Vec<String>,
    prohibited_classes: Vec<String>,
}

impl Default for VisionPolicy {
    fn default() -> Self {
        Self::from_config(&VisionConfig::default())
    }
}

impl VisionPolicy {
    pub fn from_config(config: &VisionConfig) -> Self {
        Self {
            min_score: config.min_score,
            person_classes: config.person_classes.clone(),
            phone_classes: config.phone_classes.clone(),
            prohibited_classes: config.prohibited_classes.clone(),
        }
    }

    fn any_of(&self, confident: &[&Detection], classes: &[String]) -> bool {
        confident
            .iter()
            .any(|d| classes.iter().any(|c| c == &d.class))
    }

    pub fn evaluate(&self, detections: &[Detection]) -> Vec<Finding> {
        let confident: Vec<&Detection> = detections
            .iter()
            .filter(|d| d.score >= self.min_score)
            .collect();
        let persons = confident
            .iter()
            .filter(|d| self.person_classes.iter().any(|c| c == &d.class))
            .count();

        let mut findings = Vec::new();
        if persons == 0 {
            findings.push(Finding {
                violation: ViolationType::NoFace,
                message: NO_FACE_MESSAGE,
            });
        } else if persons > 1 {
            findings.push(Finding {
                violation: ViolationType::MultipleFace,
                message: MULTIPLE_FACE_MESSAGE,
            });
        }
        if self.any_of(&confident, &self.phone_classes) {
            findings.push(Finding {
                violation: ViolationType::CellPhone,
                message: CELL_PHONE_MESSAGE,
            });
        }
        if self.any_of(&confident, &self.prohibited_classes) {
            findings.push(Finding {
                violation: ViolationType::ProhibitedObject,
                message: PROHIBITED_OBJECT_MESSAGE,
            });
        }
        findings
    }
}

/// Unarmed vision monitor.
pub struct VisionMonitor {
    config: VisionConfig,
    source: Box<dyn FrameSource>,
    detector: Box<dyn ObjectDetector>,
}

impl VisionMonitor {
    pub fn new(
        config: &VisionConfig,
        source: Box<dyn FrameSource>,
        detector: Box<dyn ObjectDetector>,
    ) -> Self {
        Self {
            config: config.clone(),
            source,
            detector,
        }
    }
}

#[async_trait]
impl Monitor for VisionMonitor {
    fn name(&self) -> &'static str {
        "vision"
    }

    async fn arm(self: Box<Self>) -> ProctorResult<Box<dyn ArmedMonitor>> {
        self.config.validate()?;
        self.source.acquire().await?;
        self.detector.load().await?;
        info!(interval_ms = self.config.interval_ms, "Vision monitor armed");
        Ok(Box::new(ArmedVision {
            interval: Duration::from_millis(self.config.interval_ms),
            policy: VisionPolicy::from_config(&self.config),
            source: self.source,
            detector: self.detector,
        }))
    }
}

struct ArmedVision {
    interval: Duration,
    policy: VisionPolicy,
    source: Box<dyn FrameSource>,
    detector: Box<dyn ObjectDetector>,
}

impl ArmedVision {
    async fn tick(&self, ctx: &MonitorContext) -> ProctorResult<()> {
        let frame = match self.source.grab().await {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "Frame unavailable; skipping tick");
                return Ok(());
            }
        };
        let detections = match self.detector.detect(&frame).await {
            Ok(detections) => detections,
            Err(e) => {
                debug!(error = %e, "Detection failed; skipping tick");
                return Ok(());
            }
        };
        for finding in self.policy.evaluate(&detections) {
            ctx.report(finding.violation, finding.message).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ArmedMonitor for ArmedVision {
    fn name(&self) -> &'static str {
        "vision"
    }

    async fn run(self: Box<Self>, ctx: MonitorContext) -> ProctorResult<()> {
        let mut stop = ctx.stop_signal();
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = stop.stopped() => break,
                _ = interval.tick() => {
                    if !ctx.is_active() {
                        break;
                    }
                    self.tick(&ctx).await?;
                }
            }
        }
        debug!("Vision monitor stopped");
        Ok(())
    }
}
