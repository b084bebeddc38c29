//! Progress callback for reporting run progress.
//!
//! Sessions and the run coordinator publish events here as they happen. The
//! CLI renders them as progress bars; tests collect them.

use crate::model::{RunId, RunStatus, SessionId};
use crate::session::SessionState;

/// Event emitted while a run is in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Run has started.
    RunStarted {
        /// Unique run identifier.
        run_id: RunId,
        /// Number of sessions about to start.
        sessions: u32,
    },
    /// A session task has been spawned.
    SessionStarted {
        session_id: SessionId,
        index: u32,
        device_id: String,
        /// Connect/disconnect cycles this session will attempt.
        reconnect_budget: u32,
    },
    /// A session moved between lifecycle states.
    StateChanged {
        session_id: SessionId,
        index: u32,
        /// One-based cycle index.
        cycle: u32,
        from: SessionState,
        to: SessionState,
    },
    /// A cycle returned to `Disconnected`.
    CycleCompleted {
        session_id: SessionId,
        index: u32,
        cycle: u32,
        /// Whether the cycle reached the active state.
        connected: bool,
        duration_ms: u64,
    },
    /// A session finished, normally or not.
    SessionCompleted {
        session_id: SessionId,
        index: u32,
        device_id: String,
        reconnect_count: u64,
        message_count: u64,
        failed: bool,
    },
    /// Run has completed.
    RunCompleted {
        run_id: RunId,
        status: RunStatus,
        /// Total duration in milliseconds.
        duration_ms: u64,
    },
}

/// Trait for receiving progress events during execution.
///
/// Events arrive from many session tasks at once, so implementors must be
/// thread-safe.
pub trait ProgressCallback: Send + Sync {
    /// Called for each progress event.
    fn on_progress(&self, event: &ProgressEvent);
}

/// A no-op progress callback that discards all events.
pub struct NoopProgress;

impl ProgressCallback for NoopProgress {
    fn on_progress(&self, _event: &ProgressEvent) {}
}

/// A progress callback that collects events, for tests and offline analysis.
#[derive(Default)]
pub struct CollectingProgress {
    events: std::sync::Mutex<Vec<ProgressEvent>>,
}

impl CollectingProgress {
    /// Create a new collecting progress callback.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get collected events.
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl ProgressCallback for CollectingProgress {
    fn on_progress(&self, event: &ProgressEvent) {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(event.clone());
    }
}
