//! Run coordinator: spawns device sessions and merges their metrics.

pub mod progress;

use crate::config::validate_config;
use crate::model::{
    duration_ms, random_token, AggregateMetrics, ErrorInfo, RunConfig, RunId, RunReport,
    RunStatus, SessionId, SessionMetrics, SessionReport, RUN_REPORT_VERSION,
};
use crate::session::{DeviceSession, SessionOutcome, SessionSettings};
use crate::transport::Transport;
use miette::Diagnostic;
use progress::{ProgressCallback, ProgressEvent};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tokio::task::{Id as TaskId, JoinSet};
use tokio::time::Instant;

pub type RunnerResult<T> = Result<T, RunnerError>;

// =============================================================================
// Error codes
// =============================================================================

/// Stable error codes surfaced in JSON output and mapped to exit codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Config,
    Io,
    Protocol,
    Transport,
    Internal,
    CliInvalidArg,
}

impl ErrorCode {
    pub const ALL: [Self; 6] = [
        Self::Config,
        Self::Io,
        Self::Protocol,
        Self::Transport,
        Self::Internal,
        Self::CliInvalidArg,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Config => "E_CONFIG",
            Self::Io => "E_IO",
            Self::Protocol => "E_PROTOCOL",
            Self::Transport => "E_TRANSPORT",
            Self::Internal => "E_INTERNAL",
            Self::CliInvalidArg => "E_CLI_INVALID_ARG",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == code)
    }

    /// Process exit code for this error.
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Internal => 1,
            Self::Config => 2,
            Self::Transport => 3,
            Self::Protocol => 9,
            Self::Io => 10,
            Self::CliInvalidArg => 12,
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::Config => "Run configuration is invalid or inconsistent",
            Self::Io => "A file or stream could not be read or written",
            Self::Protocol => "Input could not be parsed as the expected format",
            Self::Transport => "No session managed to reach the central system",
            Self::Internal => "A session task failed unexpectedly",
            Self::CliInvalidArg => "Command-line arguments are invalid",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// RunnerError
// =============================================================================

#[derive(Debug)]
pub struct RunnerError {
    pub code: String,
    pub message: String,
    pub context: Option<Value>,
}

impl RunnerError {
    pub fn config(message: impl Into<String>, context: impl Into<Option<Value>>) -> Self {
        Self {
            code: ErrorCode::Config.as_str().to_string(),
            message: message.into(),
            context: context.into(),
        }
    }

    pub fn io(
        code: impl Into<String>,
        message: impl Into<String>,
        err: impl std::fmt::Display,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: Some(serde_json::json!({ "source": err.to_string() })),
        }
    }

    pub fn protocol(message: impl Into<String>, context: impl Into<Option<Value>>) -> Self {
        Self {
            code: ErrorCode::Protocol.as_str().to_string(),
            message: message.into(),
            context: context.into(),
        }
    }

    pub fn transport(message: impl Into<String>, context: impl Into<Option<Value>>) -> Self {
        Self {
            code: ErrorCode::Transport.as_str().to_string(),
            message: message.into(),
            context: context.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Internal.as_str().to_string(),
            message: message.into(),
            context: None,
        }
    }

    pub fn cli_invalid_arg(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::CliInvalidArg.as_str().to_string(),
            message: message.into(),
            context: None,
        }
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        ErrorCode::parse(&self.code)
    }

    pub fn exit_code(&self) -> i32 {
        self.error_code().map_or(1, ErrorCode::exit_code)
    }

    pub fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo {
            code: self.code.clone(),
            message: self.message.clone(),
            context: self.context.clone(),
        }
    }
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for RunnerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

impl Diagnostic for RunnerError {}

// =============================================================================
// Run coordinator
// =============================================================================

#[derive(Clone, Default)]
pub struct RunnerOptions {
    pub progress: Option<Arc<dyn ProgressCallback>>,
    /// Flip to `true` to stop every session after its current cycle.
    pub shutdown: Option<watch::Receiver<bool>>,
}

impl fmt::Debug for RunnerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunnerOptions")
            .field("progress", &self.progress.is_some())
            .field("shutdown", &self.shutdown.is_some())
            .finish()
    }
}

struct PlannedSession {
    session_id: SessionId,
    index: u32,
    device_id: String,
    reconnect_budget: u32,
}

#[derive(Clone, Default)]
struct Emitter(Option<Arc<dyn ProgressCallback>>);

impl Emitter {
    fn emit(&self, event: ProgressEvent) {
        if let Some(progress) = &self.0 {
            progress.on_progress(&event);
        }
    }
}

/// Run `config.sessions` devices concurrently over `transport` and merge
/// their metrics once all of them have finished.
pub async fn run_sessions<T: Transport>(
    transport: Arc<T>,
    config: RunConfig,
    options: RunnerOptions,
) -> RunnerResult<RunReport> {
    validate_config(&config)?;

    let run_id = RunId::new();
    let started_at_ms = unix_ms();
    let run_started = Instant::now();
    let emitter = Emitter(options.progress.clone());
    emitter.emit(ProgressEvent::RunStarted {
        run_id,
        sessions: config.sessions,
    });
    tracing::info!(
        %run_id,
        sessions = config.sessions,
        subtype = %config.protocol_subtype,
        target = %config.base_url(),
        "run starting"
    );

    let (tasks, planned) = spawn_sessions(&transport, &config, &options, &emitter);
    let (mut metrics, sessions, canceled) = collect_sessions(tasks, planned, &emitter).await;

    let shutdown_seen = options.shutdown.as_ref().is_some_and(|rx| *rx.borrow());
    let status = if canceled || shutdown_seen {
        RunStatus::Canceled
    } else {
        RunStatus::Completed
    };
    metrics.elapsed_time_ms = duration_ms(run_started.elapsed());
    emitter.emit(ProgressEvent::RunCompleted {
        run_id,
        status: status.clone(),
        duration_ms: metrics.elapsed_time_ms,
    });
    tracing::info!(
        %run_id,
        ?status,
        connects = metrics.connect_count,
        reconnects = metrics.reconnect_count,
        messages = metrics.message_count,
        elapsed_ms = metrics.elapsed_time_ms,
        "run finished"
    );

    Ok(RunReport {
        run_report_version: RUN_REPORT_VERSION,
        run_id,
        status,
        started_at_ms,
        ended_at_ms: unix_ms(),
        config,
        metrics,
        sessions,
    })
}

fn spawn_sessions<T: Transport>(
    transport: &Arc<T>,
    config: &RunConfig,
    options: &RunnerOptions,
    emitter: &Emitter,
) -> (JoinSet<SessionOutcome>, HashMap<TaskId, PlannedSession>) {
    let mut planned = HashMap::new();
    let mut tasks = JoinSet::new();
    for index in 0..config.sessions {
        let mut rng = session_rng(config.seed, index);
        let device_id = device_id(config, index, &mut rng);
        let reconnect_budget = u32::try_from(config.reconnect_budget().sample(&mut rng))
            .unwrap_or(config.reconnect_count_max);
        let session_id = SessionId::new();

        emitter.emit(ProgressEvent::SessionStarted {
            session_id,
            index,
            device_id: device_id.clone(),
            reconnect_budget,
        });

        let settings = SessionSettings::from_config(config, device_id.clone(), reconnect_budget);
        let mut session = DeviceSession::new(Arc::clone(transport), settings, rng)
            .with_identity(session_id, index);
        if let Some(progress) = &options.progress {
            session = session.with_progress(Arc::clone(progress));
        }
        if let Some(shutdown) = &options.shutdown {
            session = session.with_shutdown(shutdown.clone());
        }
        let handle = tasks.spawn(session.run());
        planned.insert(
            handle.id(),
            PlannedSession {
                session_id,
                index,
                device_id,
                reconnect_budget,
            },
        );
    }
    (tasks, planned)
}

/// Join every session task, folding each into the aggregate as it finishes.
/// A panicked task is reported against its session without touching the
/// others.
async fn collect_sessions(
    mut tasks: JoinSet<SessionOutcome>,
    mut planned: HashMap<TaskId, PlannedSession>,
    emitter: &Emitter,
) -> (AggregateMetrics, Vec<SessionReport>, bool) {
    let mut metrics = AggregateMetrics::default();
    let mut reports: Vec<SessionReport> = Vec::with_capacity(planned.len());
    let mut canceled = false;
    while let Some(joined) = tasks.join_next_with_id().await {
        let (id, outcome) = match joined {
            Ok((id, outcome)) => (id, Ok(outcome)),
            Err(err) => (err.id(), Err(err)),
        };
        let Some(plan) = planned.remove(&id) else {
            tracing::error!("finished task does not belong to this run");
            continue;
        };
        let report = match outcome {
            Ok(outcome) => {
                canceled |= outcome.canceled;
                session_report(plan, outcome)
            }
            Err(err) => {
                tracing::error!(
                    index = plan.index,
                    device_id = %plan.device_id,
                    %err,
                    "session task failed"
                );
                let error = RunnerError::internal(format!("session task failed: {err}"));
                SessionReport {
                    session_id: plan.session_id,
                    index: plan.index,
                    device_id: plan.device_id,
                    reconnect_budget: plan.reconnect_budget,
                    metrics: SessionMetrics::default(),
                    error: Some(error.to_error_info()),
                }
            }
        };
        metrics.absorb(&report.metrics);
        if report.error.is_some() {
            metrics.failed_sessions += 1;
        }
        emitter.emit(ProgressEvent::SessionCompleted {
            session_id: report.session_id,
            index: report.index,
            device_id: report.device_id.clone(),
            reconnect_count: report.metrics.reconnect_count,
            message_count: report.metrics.message_count,
            failed: report.error.is_some(),
        });
        reports.push(report);
    }
    reports.sort_by_key(|report| report.index);
    (metrics, reports, canceled)
}

fn session_report(plan: PlannedSession, outcome: SessionOutcome) -> SessionReport {
    let error = outcome.error.map(|err| {
        RunnerError {
            code: ErrorCode::Internal.as_str().to_string(),
            message: err.to_string(),
            context: Some(serde_json::json!({ "cycle": outcome.cycles })),
        }
        .to_error_info()
    });
    SessionReport {
        session_id: plan.session_id,
        index: plan.index,
        device_id: plan.device_id,
        reconnect_budget: plan.reconnect_budget,
        metrics: outcome.metrics,
        error,
    }
}

/// Per-session generator: `seed + index` when seeded, entropy otherwise.
pub fn session_rng(seed: Option<u64>, index: u32) -> StdRng {
    seed.map_or_else(StdRng::from_entropy, |seed| {
        StdRng::seed_from_u64(seed.wrapping_add(u64::from(index)))
    })
}

/// `CP_<n>_<rand8>` on 1.6, `CS_<n>_<rand8>` on 2.x.
pub fn device_id(config: &RunConfig, index: u32, rng: &mut StdRng) -> String {
    format!(
        "{}_{}_{}",
        config.protocol_subtype.device_prefix(),
        index,
        random_token(rng, 8)
    )
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(duration_ms)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_roundtrip_and_map_to_exit_codes() {
        for code in ErrorCode::ALL {
            assert_eq!(ErrorCode::parse(code.as_str()), Some(code));
        }
        assert_eq!(ErrorCode::parse("E_NOPE"), None);
        assert_eq!(RunnerError::config("bad", None).exit_code(), 2);
        assert_eq!(RunnerError::cli_invalid_arg("bad").exit_code(), 12);
        assert_eq!(
            RunnerError {
                code: "E_UNKNOWN".to_string(),
                message: String::new(),
                context: None,
            }
            .exit_code(),
            1
        );
    }

    #[test]
    fn error_info_carries_code_and_context() {
        let err = RunnerError::io("E_IO", "failed to read config file", "missing");
        let info = err.to_error_info();
        assert_eq!(info.code, "E_IO");
        assert_eq!(info.context, Some(serde_json::json!({"source": "missing"})));
        assert_eq!(err.to_string(), "E_IO: failed to read config file");
    }

    #[test]
    fn device_ids_follow_subtype_prefix() {
        let mut rng = session_rng(Some(1), 0);
        let id = device_id(&RunConfig::default(), 4, &mut rng);
        assert!(id.starts_with("CP_4_"));
        assert_eq!(id.len(), "CP_4_".len() + 8);

        let config = RunConfig {
            protocol_subtype: crate::model::ProtocolSubtype::Ocpp201,
            ..RunConfig::default()
        };
        assert!(device_id(&config, 0, &mut rng).starts_with("CS_0_"));
    }

    #[test]
    fn seeded_session_rngs_are_reproducible_and_distinct() {
        use rand::Rng;
        let a: u64 = session_rng(Some(9), 1).gen();
        let b: u64 = session_rng(Some(9), 1).gen();
        let c: u64 = session_rng(Some(9), 2).gen();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
