//! Log sinks: where `AggregateLog` snapshots are persisted.
//!
//! The engine makes a single attempt per snapshot and never retries; a failure is
//! surfaced to the exam taker as a non-fatal warning.

use crate::config::SinkConfig;
use crate::error::{ProctorError, ProctorResult};
use crate::log::AggregateLog;
use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// External "save log" collaborator.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn persist(&self, log: &AggregateLog) -> ProctorResult<()>;
}

/// Keeps every persisted snapshot in memory. Default sink and test double.
#[derive(Debug, Default, Clone)]
pub struct MemoryLogSink {
    logs: Arc<Mutex<Vec<AggregateLog>>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn logs(&self) -> Vec<AggregateLog> {
        self.logs.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn latest(&self) -> Option<AggregateLog> {
        self.logs.lock().ok().and_then(|l| l.last().cloned())
    }
}

#[async_trait]
impl LogSink for MemoryLogSink {
    async fn persist(&self, log: &AggregateLog) -> ProctorResult<()> {
        let mut logs = self
            .logs
            .lock()
            .map_err(|e| ProctorError::Persist(e.to_string()))?;
        logs.push(log.clone());
        Ok(())
    }
}

/// Posts each snapshot as JSON to the exam backend.
#[derive(Debug, Clone)]
pub struct HttpLogSink {
    url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpLogSink {
    pub fn new(
        url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> ProctorResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProctorError::Config(format!("log sink client: {}", e)))?;
        Ok(Self {
            url: url.into(),
            token,
            client,
        })
    }
}

#[async_trait]
impl LogSink for HttpLogSink {
    async fn persist(&self, log: &AggregateLog) -> ProctorResult<()> {
        let mut request = self.client.post(&self.url).json(log);
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ProctorError::Persist(format!("POST {}: {}", self.url, e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProctorError::Persist(format!(
                "POST {} returned {}",
                self.url, status
            )));
        }
        debug!(session_id = log.session_id(), total = log.total, "Log posted");
        Ok(())
    }
}

const JOURNAL_PREFIX: &str = "sessions/";

/// Local sled journal holding the latest snapshot per session, so an invigilator
/// can audit a session even when the backend was unreachable.
#[derive(Debug, Clone)]
pub struct SledLogSink {
    db: sled::Db,
}

impl SledLogSink {
    pub fn open_path<P: AsRef<Path>>(path: P) -> ProctorResult<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    fn key(session_id: &str) -> String {
        format!("{}{}", JOURNAL_PREFIX, session_id)
    }

    pub fn latest(&self, session_id: &str) -> ProctorResult<Option<AggregateLog>> {
        match self.db.get(Self::key(session_id).as_bytes())? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| ProctorError::Persist(e.to_string())),
            None => Ok(None),
        }
    }

    /// Every session id currently in the journal.
    pub fn sessions(&self) -> ProctorResult<Vec<String>> {
        let mut out = Vec::new();
        for entry in self.db.scan_prefix(JOURNAL_PREFIX.as_bytes()) {
            let (key, _) = entry?;
            if let Some(id) = String::from_utf8_lossy(&key).strip_prefix(JOURNAL_PREFIX) {
                out.push(id.to_string());
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl LogSink for SledLogSink {
    async fn persist(&self, log: &AggregateLog) -> ProctorResult<()> {
        let bytes = serde_json::to_vec(log).map_err(|e| ProctorError::Persist(e.to_string()))?;
        self.db.insert(Self::key(log.session_id()).as_bytes(), bytes)?;
        self.db.flush_async().await?;
        Ok(())
    }
}

/// Fans one snapshot out to several sinks. Every sink is attempted; the first
/// failure is returned.
#[derive(Clone, Default)]
pub struct CompositeLogSink {
    sinks: Vec<Arc<dyn LogSink>>,
}

impl CompositeLogSink {
    pub fn new(sinks: Vec<Arc<dyn LogSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn LogSink>) {
        self.sinks.push(sink);
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl LogSink for CompositeLogSink {
    async fn persist(&self, log: &AggregateLog) -> ProctorResult<()> {
        let results = futures::future::join_all(self.sinks.iter().map(|s| s.persist(log))).await;
        results.into_iter().collect::<ProctorResult<Vec<()>>>()?;
        Ok(())
    }
}

/// Build the sink stack described by the configuration. With nothing configured
/// the snapshots are kept in memory only.
pub fn build_sink(config: &SinkConfig) -> ProctorResult<Arc<dyn LogSink>> {
    let mut composite = CompositeLogSink::default();
    if let Some(ref url) = config.http_url {
        let timeout = Duration::from_millis(config.http_timeout_ms.unwrap_or(5000));
        info!(url = %url, "Persisting logs to exam backend");
        composite.push(Arc::new(HttpLogSink::new(
            url.clone(),
            config.http_token.clone(),
            timeout,
        )?));
    }
    if let Some(ref path) = config.journal_path {
        info!(path = %path, "Persisting logs to local journal");
        composite.push(Arc::new(SledLogSink::open_path(path)?));
    }
    if composite.is_empty() {
        return Ok(Arc::new(MemoryLogSink::new()));
    }
    Ok(Arc::new(composite))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::SessionIdentity;
    use crate::violation::ViolationType;

    fn sample_log(session: &str, tab_switches: u32) -> AggregateLog {
        let mut counts = [0u32; ViolationType::COUNT];
        counts[ViolationType::TabSwitch.index()] = tab_switches;
        AggregateLog::new(SessionIdentity::new("exam").with_session_id(session), &counts)
    }

    struct FailingSink;

    #[async_trait]
    impl LogSink for FailingSink {
        async fn persist(&self, _log: &AggregateLog) -> ProctorResult<()> {
            Err(ProctorError::Persist("backend down".to_string()))
        }
    }

    #[tokio::test]
    async fn sled_journal_keeps_latest_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SledLogSink::open_path(dir.path().join("journal")).unwrap();

        sink.persist(&sample_log("s-1", 1)).await.unwrap();
        sink.persist(&sample_log("s-1", 2)).await.unwrap();
        sink.persist(&sample_log("s-2", 1)).await.unwrap();

        let latest = sink.latest("s-1").unwrap().unwrap();
        assert_eq!(latest.count(ViolationType::TabSwitch), 2);
        let mut sessions = sink.sessions().unwrap();
        sessions.sort();
        assert_eq!(sessions, vec!["s-1".to_string(), "s-2".to_string()]);
        assert!(sink.latest("missing").unwrap().is_none());
    }

    #[tokio::test]
    async fn composite_attempts_every_sink() {
        let memory = MemoryLogSink::new();
        let composite = CompositeLogSink::new(vec![
            Arc::new(FailingSink) as Arc<dyn LogSink>,
            Arc::new(memory.clone()),
        ]);

        let result = composite.persist(&sample_log("s-1", 1)).await;
        assert!(result.is_err());
        assert_eq!(memory.logs().len(), 1);
    }

    #[test]
    fn empty_config_builds_memory_sink() {
        assert!(build_sink(&SinkConfig::default()).is_ok());
    }
}
