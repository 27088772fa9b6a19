//! Error types for the Vigil proctoring engine

use thiserror::Error;

/// Result type alias for proctoring operations
pub type ProctorResult<T> = Result<T, ProctorError>;

/// Errors that can occur while arming, running, or persisting a monitored session.
///
/// Report rejections (debounce, terminal state) are not errors; they come back as
/// [`crate::aggregator::Rejection`] values.
#[derive(Error, Debug)]
pub enum ProctorError {
    /// Camera, microphone, event hook, or fullscreen surface denied or unavailable.
    #[error("{monitor}: device acquisition failed: {reason}")]
    Acquisition { monitor: &'static str, reason: String },

    /// A perception model could not be initialized.
    #[error("{monitor}: model load failed: {reason}")]
    ModelLoad { monitor: &'static str, reason: String },

    /// Transient scoring error for a single frame or buffer.
    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Log persistence failed: {0}")]
    Persist(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The aggregator task is gone (session already torn down).
    #[error("Channel error: {0}")]
    Channel(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProctorError {
    pub fn acquisition(monitor: &'static str, reason: impl Into<String>) -> Self {
        ProctorError::Acquisition {
            monitor,
            reason: reason.into(),
        }
    }

    pub fn model_load(monitor: &'static str, reason: impl Into<String>) -> Self {
        ProctorError::ModelLoad {
            monitor,
            reason: reason.into(),
        }
    }

    /// True for failures that permanently disable a single monitor.
    pub fn disables_monitor(&self) -> bool {
        matches!(
            self,
            ProctorError::Acquisition { .. } | ProctorError::ModelLoad { .. }
        )
    }
}

impl From<config::ConfigError> for ProctorError {
    fn from(err: config::ConfigError) -> Self {
        ProctorError::Config(err.to_string())
    }
}

impl From<sled::Error> for ProctorError {
    fn from(err: sled::Error) -> Self {
        ProctorError::Persist(err.to_string())
    }
}
