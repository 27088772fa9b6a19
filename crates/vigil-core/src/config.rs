//! Layered configuration: built-in defaults, then `config/vigil.toml` (or the file
//! named by `VIGIL_CONFIG`), then `VIGIL__SECTION__KEY` environment variables.
//!
//! Every numeric threshold the monitors use is tunable here; the defaults are the
//! reconciled production values.

use crate::error::{ProctorError, ProctorResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Default path (without extension) searched when `VIGIL_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "config/vigil";

/// Aggregator policy: escalation threshold and debounce windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Total accepted violations that terminate the session.
    pub threshold: u32,
    /// Minimum gap between two accepted reports of a discrete-event type.
    pub discrete_debounce_ms: u64,
    /// Backstop gap for gaze/voice; their monitors already apply hold + cooldown.
    pub continuous_debounce_ms: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            discrete_debounce_ms: 3000,
            continuous_debounce_ms: 3000,
        }
    }
}

/// Where aggregate logs go. Any combination may be enabled; none means memory only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Exam backend endpoint receiving `POST` JSON logs (e.g. `.../api/users/cheatingLogs`).
    pub http_url: Option<String>,
    /// Bearer token for the backend, if it requires one.
    pub http_token: Option<String>,
    pub http_timeout_ms: Option<u64>,
    /// Local sled journal path.
    pub journal_path: Option<String>,
}

/// Session controller timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long monitors get to exit on their own before their tasks are aborted.
    pub shutdown_grace_ms: u64,
    /// Upper bound on arming (device + model acquisition) for a single monitor.
    pub arm_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_ms: 2000,
            arm_timeout_ms: 15_000,
        }
    }
}

/// Load a configuration document of any shape using the layered sources.
///
/// Precedence: env `VIGIL_CONFIG` path > `config/vigil.toml` > struct defaults;
/// `VIGIL__` environment variables override file values.
pub fn load_layered<T: DeserializeOwned>() -> ProctorResult<T> {
    let config_path =
        std::env::var("VIGIL_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    load_from(&config_path)
}

/// Like [`load_layered`] with an explicit file path. A missing file is not an error.
pub fn load_from<T: DeserializeOwned>(config_path: &str) -> ProctorResult<T> {
    let built = config::Config::builder()
        .add_source(config::File::with_name(config_path).required(false))
        .add_source(
            config::Environment::with_prefix("VIGIL")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    built
        .try_deserialize()
        .map_err(|e| ProctorError::Config(e.to_string()))
}
