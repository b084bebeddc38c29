use crate::model::{AggregateMetrics, RunConfig, RunId, SessionId, SessionMetrics};
use serde::{Deserialize, Serialize};

/// Outcome of one load-test run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    pub run_report_version: u32,
    pub run_id: RunId,
    pub status: RunStatus,
    /// Unix epoch milliseconds when the run started.
    pub started_at_ms: u64,
    pub ended_at_ms: u64,
    /// Effective configuration after file, environment and flag overrides.
    pub config: RunConfig,
    pub metrics: AggregateMetrics,
    pub sessions: Vec<SessionReport>,
}

impl RunReport {
    /// Sessions that ended with an error attached.
    pub fn failed_sessions(&self) -> impl Iterator<Item = &SessionReport> {
        self.sessions.iter().filter(|s| s.error.is_some())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Canceled,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: SessionId,
    /// Zero-based position within the run.
    pub index: u32,
    pub device_id: String,
    pub reconnect_budget: u32,
    pub metrics: SessionMetrics,
    pub error: Option<ErrorInfo>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
    pub context: Option<serde_json::Value>,
}
