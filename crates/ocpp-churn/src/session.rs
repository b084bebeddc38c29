//! One simulated device.
//!
//! A session repeatedly walks the lifecycle
//! `Disconnected -> Connecting -> Active -> Closing -> Disconnected` until its
//! reconnect budget is spent. While active it announces itself, answers
//! inbound calls, optionally sends heartbeats, and drops the connection when
//! a randomized disconnect timer fires.
//!
//! Every cycle owns its connection, correlation tracker and keepalive timer.
//! All three are dropped before the next cycle starts.

use crate::actions::{respond_to_call, ActionRegistry, ReplyOutcome};
use crate::codec;
use crate::correlation::{CorrelationTracker, Resolution};
use crate::messages::{self, OutboundCall};
use crate::model::{
    duration_ms, Envelope, ProtocolSubtype, RequestId, RunConfig, SessionId, SessionMetrics, Span,
};
use crate::runner::progress::{ProgressCallback, ProgressEvent};
use crate::transport::{Connection, ConnectionEvent, Transport};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{
    interval_at, sleep, sleep_until, timeout, timeout_at, Instant, Interval, MissedTickBehavior,
};
use tracing::Instrument;

// =============================================================================
// State machine
// =============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Active,
    Closing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionEvent {
    OpenRequested,
    OpenSucceeded,
    OpenFailed,
    CloseRequested,
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("event {event:?} is not valid in state {state:?}")]
pub struct TransitionError {
    pub state: SessionState,
    pub event: SessionEvent,
}

impl SessionState {
    /// Apply `event`, returning the next state or rejecting the event.
    pub fn on(self, event: SessionEvent) -> Result<Self, TransitionError> {
        use SessionEvent as E;
        match (self, event) {
            (Self::Disconnected, E::OpenRequested) => Ok(Self::Connecting),
            (Self::Connecting, E::OpenSucceeded) => Ok(Self::Active),
            (Self::Connecting, E::OpenFailed) | (Self::Closing, E::Closed) => {
                Ok(Self::Disconnected)
            }
            (Self::Active, E::CloseRequested) => Ok(Self::Closing),
            (state, event) => Err(TransitionError { state, event }),
        }
    }
}

// =============================================================================
// Settings
// =============================================================================

/// Per-session parameters resolved from the run configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSettings {
    pub device_id: String,
    pub subtype: ProtocolSubtype,
    pub url: String,
    /// Number of connect/disconnect cycles to attempt.
    pub reconnect_budget: u32,
    pub disconnect_delay: Span,
    pub inter_cycle_sleep: Span,
    pub keepalive_interval: Option<Duration>,
    pub status_notification_on_boot: bool,
    pub open_timeout: Duration,
    pub close_timeout: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &RunConfig, device_id: String, reconnect_budget: u32) -> Self {
        Self {
            url: config.url_for(&device_id),
            device_id,
            subtype: config.protocol_subtype,
            reconnect_budget,
            disconnect_delay: config.disconnect_delay(),
            inter_cycle_sleep: config.inter_cycle_sleep(),
            keepalive_interval: config.keepalive_interval(),
            status_notification_on_boot: config.status_notification_on_boot,
            open_timeout: config.open_timeout(),
            close_timeout: config.close_timeout(),
        }
    }
}

/// Final state of a session once its run loop returns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionOutcome {
    pub metrics: SessionMetrics,
    /// Cycles that were started, including failed connection attempts.
    pub cycles: u32,
    /// Shutdown was requested before the budget was spent.
    pub canceled: bool,
    pub error: Option<TransitionError>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CloseReason {
    Timer,
    PeerClosed,
    Fault,
    Shutdown,
}

// =============================================================================
// Engine
// =============================================================================

pub struct DeviceSession<T: Transport> {
    transport: Arc<T>,
    settings: SessionSettings,
    registry: ActionRegistry,
    rng: StdRng,
    session_id: SessionId,
    index: u32,
    progress: Option<Arc<dyn ProgressCallback>>,
    shutdown: Option<watch::Receiver<bool>>,
    state: SessionState,
    cycle: u32,
    canceled: bool,
    metrics: SessionMetrics,
}

impl<T: Transport> DeviceSession<T> {
    /// A session answering inbound calls with the built-in table for its
    /// subtype.
    pub fn new(transport: Arc<T>, settings: SessionSettings, rng: StdRng) -> Self {
        let registry = ActionRegistry::for_subtype(settings.subtype);
        Self {
            transport,
            settings,
            registry,
            rng,
            session_id: SessionId::new(),
            index: 0,
            progress: None,
            shutdown: None,
            state: SessionState::Disconnected,
            cycle: 0,
            canceled: false,
            metrics: SessionMetrics::default(),
        }
    }

    #[must_use]
    pub fn with_identity(mut self, session_id: SessionId, index: u32) -> Self {
        self.session_id = session_id;
        self.index = index;
        self
    }

    #[must_use]
    pub fn with_registry(mut self, registry: ActionRegistry) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Stop after the current cycle once `shutdown` turns `true`.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Drive the session until its budget is spent or shutdown is requested.
    pub async fn run(mut self) -> SessionOutcome {
        let span = tracing::info_span!(
            "session",
            device_id = %self.settings.device_id,
            subtype = %self.settings.subtype,
        );
        let started = Instant::now();
        let result = self.run_cycles().instrument(span).await;
        self.metrics.elapsed_time_ms = duration_ms(started.elapsed());
        SessionOutcome {
            metrics: self.metrics,
            cycles: self.cycle,
            canceled: self.canceled,
            error: result.err(),
        }
    }

    async fn run_cycles(&mut self) -> Result<(), TransitionError> {
        let budget = self.settings.reconnect_budget;
        tracing::debug!(budget, url = %self.settings.url, "session starting");
        while self.cycle < budget {
            if self.shutdown_requested() {
                self.canceled = true;
                break;
            }
            self.cycle += 1;
            self.run_cycle().await?;

            if self.cycle < budget && !self.shutdown_requested() {
                let pause = self.settings.inter_cycle_sleep.sample_duration(&mut self.rng);
                tracing::trace!(cycle = self.cycle, pause_ms = duration_ms(pause), "pacing");
                tokio::select! {
                    () = sleep(pause) => {}
                    () = wait_for_shutdown(&mut self.shutdown) => {}
                }
            }
        }
        if self.cycle < budget {
            self.canceled = true;
        }
        tracing::debug!(
            cycles = self.cycle,
            reconnects = self.metrics.reconnect_count,
            messages = self.metrics.message_count,
            "session finished"
        );
        Ok(())
    }

    async fn run_cycle(&mut self) -> Result<(), TransitionError> {
        let cycle_started = Instant::now();
        self.transition(SessionEvent::OpenRequested)?;

        let subprotocol = self.settings.subtype.subprotocol();
        let attempt = timeout(
            self.settings.open_timeout,
            self.transport.open(&self.settings.url, subprotocol),
        )
        .await;
        let mut conn = match attempt {
            Ok(Ok(conn)) => conn,
            Ok(Err(failure)) => {
                tracing::warn!(cycle = self.cycle, %failure, "connection attempt failed");
                return self.fail_open(cycle_started);
            }
            Err(_) => {
                tracing::warn!(
                    cycle = self.cycle,
                    timeout_ms = duration_ms(self.settings.open_timeout),
                    "connection attempt timed out"
                );
                return self.fail_open(cycle_started);
            }
        };
        self.metrics.connect_count += 1;
        self.metrics.connect_latency.record(cycle_started.elapsed());
        self.transition(SessionEvent::OpenSucceeded)?;
        tracing::info!(
            cycle = self.cycle,
            budget = self.settings.reconnect_budget,
            connect_ms = duration_ms(cycle_started.elapsed()),
            "connected"
        );

        let mut tracker = CorrelationTracker::new();
        let reason = self.operate(&mut conn, &mut tracker).await;

        self.transition(SessionEvent::CloseRequested)?;
        let abandoned = tracker.clear();
        self.metrics.abandoned_requests += u64::try_from(abandoned).unwrap_or(u64::MAX);
        match timeout(self.settings.close_timeout, conn.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(fault)) => tracing::debug!(%fault, "close did not complete cleanly"),
            Err(_) => tracing::debug!(
                timeout_ms = duration_ms(self.settings.close_timeout),
                "close confirmation timed out"
            ),
        }
        drop(conn);
        self.transition(SessionEvent::Closed)?;
        self.metrics.reconnect_count += 1;
        tracing::info!(
            cycle = self.cycle,
            ?reason,
            abandoned,
            active_ms = duration_ms(cycle_started.elapsed()),
            "disconnected"
        );
        self.cycle_completed(cycle_started, true);
        Ok(())
    }

    fn fail_open(&mut self, cycle_started: Instant) -> Result<(), TransitionError> {
        self.metrics.failed_connect_count += 1;
        self.transition(SessionEvent::OpenFailed)?;
        self.cycle_completed(cycle_started, false);
        Ok(())
    }

    /// The active period of one cycle. Returns why it ended.
    ///
    /// The disconnect deadline is fixed before the announce, so it also
    /// bounds every send made during the cycle.
    async fn operate(
        &mut self,
        conn: &mut T::Connection,
        tracker: &mut CorrelationTracker,
    ) -> CloseReason {
        let delay = self.settings.disconnect_delay.sample_duration(&mut self.rng);
        let deadline = Instant::now() + delay;
        let mut keepalive = self
            .settings
            .keepalive_interval
            .filter(|period| !period.is_zero() && *period < delay)
            .map(|period| {
                let mut timer = interval_at(Instant::now() + period, period);
                timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                timer
            });
        tracing::debug!(
            cycle = self.cycle,
            disconnect_ms = duration_ms(delay),
            keepalive = keepalive.is_some(),
            "active"
        );

        let boot = messages::boot_notification(
            self.settings.subtype,
            &self.settings.device_id,
            &mut self.rng,
        );
        if let Err(reason) = self.send_call(conn, tracker, boot, deadline).await {
            return reason;
        }
        if self.settings.status_notification_on_boot {
            let status = messages::status_notification(self.settings.subtype, 1, "Available");
            if let Err(reason) = self.send_call(conn, tracker, status, deadline).await {
                return reason;
            }
        }

        let disconnect = sleep_until(deadline);
        tokio::pin!(disconnect);
        loop {
            tokio::select! {
                biased;
                () = &mut disconnect => break CloseReason::Timer,
                () = wait_for_shutdown(&mut self.shutdown) => break CloseReason::Shutdown,
                () = next_tick(&mut keepalive) => {
                    let heartbeat = messages::heartbeat();
                    let sent = self.send_call(conn, tracker, heartbeat, deadline).await;
                    if let Err(reason) = sent {
                        break reason;
                    }
                }
                event = conn.next_event() => match event {
                    ConnectionEvent::Message(text) => {
                        let handled = self.handle_frame(conn, tracker, &text, deadline).await;
                        if let Err(reason) = handled {
                            break reason;
                        }
                    }
                    ConnectionEvent::Closed => break CloseReason::PeerClosed,
                    ConnectionEvent::Fault(fault) => {
                        tracing::warn!(cycle = self.cycle, %fault, "transport fault");
                        break CloseReason::Fault;
                    }
                },
            }
        }
    }

    /// Handle one inbound frame. Fails only when replying did not complete.
    async fn handle_frame(
        &mut self,
        conn: &mut T::Connection,
        tracker: &mut CorrelationTracker,
        text: &str,
        deadline: Instant,
    ) -> Result<(), CloseReason> {
        self.metrics.messages_received += 1;
        match codec::decode(text) {
            Err(failure) => {
                self.metrics.decode_failures += 1;
                tracing::warn!(%failure, frame = text, "dropping undecodable frame");
            }
            Ok(Envelope::Call {
                request_id,
                action,
                payload,
            }) => {
                tracing::debug!(request_id = %request_id, action = %action, "inbound call");
                let reply = respond_to_call(&self.registry, &request_id, &action, &payload);
                match reply.outcome {
                    ReplyOutcome::Handled => {}
                    ReplyOutcome::Unimplemented => {
                        self.metrics.unimplemented_count += 1;
                        tracing::info!(action = %action, "unknown inbound action");
                    }
                    ReplyOutcome::Faulted => self.metrics.handler_faults += 1,
                }
                self.send_frame(conn, reply.frame, deadline).await?;
                self.metrics.replies_sent += 1;
            }
            Ok(Envelope::CallResult { request_id, .. }) => {
                self.metrics.results_received += 1;
                self.resolve(tracker, &request_id);
            }
            Ok(Envelope::CallError {
                request_id,
                error_code,
                error_description,
                ..
            }) => {
                self.metrics.errors_received += 1;
                tracing::info!(
                    request_id = %request_id,
                    error_code = %error_code,
                    error_description = %error_description,
                    "call rejected by central system"
                );
                self.resolve(tracker, &request_id);
            }
        }
        Ok(())
    }

    fn resolve(&mut self, tracker: &mut CorrelationTracker, request_id: &RequestId) {
        match tracker.resolve(request_id) {
            Resolution::Matched {
                request,
                round_trip,
            } => {
                self.metrics.round_trip.record(round_trip);
                tracing::debug!(
                    request_id = %request_id,
                    action = %request.action,
                    rtt_ms = duration_ms(round_trip),
                    "reply matched"
                );
            }
            Resolution::Orphan => {
                self.metrics.orphan_count += 1;
                tracing::warn!(request_id = %request_id, "reply matches no pending request");
            }
        }
    }

    async fn send_call(
        &mut self,
        conn: &mut T::Connection,
        tracker: &mut CorrelationTracker,
        call: OutboundCall,
        deadline: Instant,
    ) -> Result<(), CloseReason> {
        let (request_id, frame) = codec::encode_call(&mut self.rng, call.action, call.payload);
        tracing::debug!(request_id = %request_id, action = call.action, "sending call");
        tracker.track(request_id, call.action);
        self.send_frame(conn, frame, deadline).await?;
        self.metrics.calls_sent += 1;
        Ok(())
    }

    /// Send one frame. A send still pending at `deadline` ends the cycle as
    /// if the disconnect timer had fired.
    async fn send_frame(
        &mut self,
        conn: &mut T::Connection,
        frame: String,
        deadline: Instant,
    ) -> Result<(), CloseReason> {
        match timeout_at(deadline, conn.send(frame)).await {
            Ok(Ok(())) => {
                self.metrics.message_count += 1;
                Ok(())
            }
            Ok(Err(fault)) => {
                tracing::warn!(cycle = self.cycle, %fault, "send failed");
                Err(CloseReason::Fault)
            }
            Err(_) => {
                tracing::warn!(cycle = self.cycle, "send still pending at disconnect deadline");
                Err(CloseReason::Timer)
            }
        }
    }

    fn transition(&mut self, event: SessionEvent) -> Result<(), TransitionError> {
        let next = self.state.on(event)?;
        tracing::trace!(cycle = self.cycle, from = ?self.state, to = ?next, ?event, "transition");
        self.emit(ProgressEvent::StateChanged {
            session_id: self.session_id,
            index: self.index,
            cycle: self.cycle,
            from: self.state,
            to: next,
        });
        self.state = next;
        Ok(())
    }

    fn cycle_completed(&self, cycle_started: Instant, connected: bool) {
        self.emit(ProgressEvent::CycleCompleted {
            session_id: self.session_id,
            index: self.index,
            cycle: self.cycle,
            connected,
            duration_ms: duration_ms(cycle_started.elapsed()),
        });
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(progress) = &self.progress {
            progress.on_progress(&event);
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }
}

/// Resolves once shutdown is signalled; pending forever without a signal.
async fn wait_for_shutdown(shutdown: &mut Option<watch::Receiver<bool>>) {
    if let Some(rx) = shutdown {
        if rx.wait_for(|stop| *stop).await.is_ok() {
            return;
        }
    }
    std::future::pending::<()>().await;
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_cycle_is_accepted() {
        let mut state = SessionState::Disconnected;
        for (event, expected) in [
            (SessionEvent::OpenRequested, SessionState::Connecting),
            (SessionEvent::OpenSucceeded, SessionState::Active),
            (SessionEvent::CloseRequested, SessionState::Closing),
            (SessionEvent::Closed, SessionState::Disconnected),
        ] {
            assert_eq!(state.on(event), Ok(expected), "{event:?} from {state:?}");
            state = expected;
        }
    }

    #[test]
    fn failed_open_returns_to_disconnected() {
        let state = SessionState::Disconnected.on(SessionEvent::OpenRequested);
        assert_eq!(state, Ok(SessionState::Connecting));
        assert_eq!(
            SessionState::Connecting.on(SessionEvent::OpenFailed),
            Ok(SessionState::Disconnected)
        );
    }

    #[test]
    fn invalid_events_are_rejected() {
        assert_eq!(
            SessionState::Disconnected.on(SessionEvent::CloseRequested),
            Err(TransitionError {
                state: SessionState::Disconnected,
                event: SessionEvent::CloseRequested,
            })
        );
        assert!(SessionState::Active.on(SessionEvent::OpenRequested).is_err());
        assert!(SessionState::Active.on(SessionEvent::Closed).is_err());
        assert!(SessionState::Closing.on(SessionEvent::OpenSucceeded).is_err());
        assert!(SessionState::Connecting.on(SessionEvent::CloseRequested).is_err());
    }

    #[test]
    fn settings_follow_config() {
        let config = RunConfig {
            url_path_prefix: "/ocpp/".to_string(),
            keepalive_interval_ms: Some(30),
            ..RunConfig::default()
        };
        let settings = SessionSettings::from_config(&config, "CP_0_abcdefgh".to_string(), 4);
        assert_eq!(settings.url, "ws://central-system:8887/ocpp/CP_0_abcdefgh");
        assert_eq!(settings.reconnect_budget, 4);
        assert_eq!(settings.keepalive_interval, Some(Duration::from_millis(30)));
    }
}
