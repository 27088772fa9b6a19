//! The daemon's configuration document. Every section falls back to its defaults,
//! so an empty (or missing) `config/vigil.toml` is a valid configuration apart
//! from the exam id.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use vigil_core::{PolicyConfig, SessionConfig, SessionIdentity, SinkConfig};
use vigil_sentinel::{EnvironmentConfig, GazeConfig, VisionConfig};
use vigil_voice::AudioConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub exam_id: Option<String>,
    /// Reuse a session id issued by the exam backend; a fresh v4 id otherwise.
    pub session_id: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub identity: IdentityConfig,
    pub policy: PolicyConfig,
    pub session: SessionConfig,
    pub sink: SinkConfig,
    pub vision: VisionConfig,
    pub gaze: GazeConfig,
    pub audio: AudioConfig,
    pub environment: EnvironmentConfig,
}

impl DaemonConfig {
    /// Reject impossible values before any device is touched. Disabled monitors
    /// are not checked.
    pub fn validate(&self) -> Result<()> {
        if self.vision.enabled {
            self.vision.validate()?;
        }
        if self.gaze.enabled {
            self.gaze.validate()?;
        }
        if self.audio.enabled {
            self.audio.validate()?;
        }
        Ok(())
    }

    /// Session identity. A positional exam id on the command line wins over the
    /// configured one.
    pub fn identity(&self, exam_arg: Option<String>) -> Result<SessionIdentity> {
        let exam_id = match exam_arg.or_else(|| self.identity.exam_id.clone()) {
            Some(id) if !id.trim().is_empty() => id,
            _ => bail!("no exam id: pass one as the first argument or set VIGIL__IDENTITY__EXAM_ID"),
        };
        let mut identity = SessionIdentity::new(exam_id)
            .with_user(self.identity.username.clone(), self.identity.email.clone());
        if let Some(ref session_id) = self.identity.session_id {
            identity = identity.with_session_id(session_id.clone());
        }
        Ok(identity)
    }
}
