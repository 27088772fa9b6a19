//! The aggregate cheating log handed to the exam backend.

use crate::violation::ViolationType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Who is being proctored, and for which exam.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdentity {
    pub session_id: String,
    pub exam_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl SessionIdentity {
    /// New identity with a fresh v4 session id.
    pub fn new(exam_id: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            exam_id: exam_id.into(),
            username: None,
            email: None,
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_user(mut self, username: Option<String>, email: Option<String>) -> Self {
        self.username = username;
        self.email = email;
        self
    }
}

/// Snapshot of every per-type count plus session metadata.
///
/// `violation_counts` always carries all ten keys so the backend never has to
/// guess whether a missing type means zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateLog {
    #[serde(flatten)]
    pub identity: SessionIdentity,
    pub violation_counts: BTreeMap<ViolationType, u32>,
    pub total: u32,
    pub updated_at: DateTime<Utc>,
}

impl AggregateLog {
    pub fn new(identity: SessionIdentity, counts: &[u32; ViolationType::COUNT]) -> Self {
        let violation_counts: BTreeMap<ViolationType, u32> = ViolationType::ALL
            .iter()
            .map(|ty| (*ty, counts[ty.index()]))
            .collect();
        let total = violation_counts.values().sum();
        Self {
            identity,
            violation_counts,
            total,
            updated_at: Utc::now(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.identity.session_id
    }

    pub fn count(&self, ty: ViolationType) -> u32 {
        self.violation_counts.get(&ty).copied().unwrap_or(0)
    }
}
