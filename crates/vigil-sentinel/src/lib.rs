//! vigil-sentinel: camera and desktop monitors.
//!
//! - [`vision`]: per-second object detection (faces, phones, prohibited objects)
//! - [`gaze`]: per-frame iris tracking with hysteresis, hold, and cooldown
//! - [`environment`]: tab/focus/key/fullscreen lock
//!
//! Perception runs behind the traits in [`frames`]; the `desktop` feature adds
//! OS-level input hooks.

pub mod environment;
pub mod frames;
pub mod gaze;
pub mod vision;

#[cfg(feature = "desktop")]
pub mod desktop;

pub use environment::{
    ChannelEventSource, EnvironmentConfig, EnvironmentEvent, EnvironmentLock, EnvironmentMonitor,
    EventSource, EventSubscription, KeyEvent, RestrictedKeyPolicy,
};
pub use frames::{
    Detection, FaceLandmarks, Frame, FrameSource, HttpFrameSource, HttpLandmarkExtractor,
    HttpObjectDetector, LandmarkExtractor, ObjectDetector, Point,
};
pub use gaze::{gaze_ratio, GazeConfig, GazeMonitor, GazeTracker};
pub use vision::{VisionConfig, VisionMonitor, VisionPolicy};

#[cfg(feature = "desktop")]
pub use desktop::{EnigoDisplaySurface, RdevEventSource};
