use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Running min/max/total summary of observed durations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub count: u64,
    pub min_ms: Option<u64>,
    pub max_ms: Option<u64>,
    pub total_ms: u64,
}

impl LatencyStats {
    pub fn record(&mut self, elapsed: Duration) {
        let ms = duration_ms(elapsed);
        self.count += 1;
        self.total_ms = self.total_ms.saturating_add(ms);
        self.min_ms = Some(self.min_ms.map_or(ms, |min| min.min(ms)));
        self.max_ms = Some(self.max_ms.map_or(ms, |max| max.max(ms)));
    }

    pub fn merge(&mut self, other: &Self) {
        self.count += other.count;
        self.total_ms = self.total_ms.saturating_add(other.total_ms);
        self.min_ms = match (self.min_ms, other.min_ms) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max_ms = match (self.max_ms, other.max_ms) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    /// Integer mean in milliseconds, `None` when nothing was recorded.
    pub fn mean_ms(&self) -> Option<u64> {
        self.total_ms.checked_div(self.count)
    }
}

/// Counters owned by one device session.
///
/// Only the session's own event handling writes these; the run coordinator
/// reads them once the session has finished.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetrics {
    /// Connections that reached the active state.
    pub connect_count: u64,
    /// Connection attempts that failed or timed out.
    pub failed_connect_count: u64,
    /// Envelopes sent by the device (calls plus replies).
    pub message_count: u64,
    /// Active periods that ran through closing back to disconnected.
    pub reconnect_count: u64,
    pub calls_sent: u64,
    pub replies_sent: u64,
    pub messages_received: u64,
    pub results_received: u64,
    pub errors_received: u64,
    pub orphan_count: u64,
    pub decode_failures: u64,
    pub unimplemented_count: u64,
    pub handler_faults: u64,
    /// Pending requests discarded when their connection closed.
    pub abandoned_requests: u64,
    /// Time from `open` to upgrade confirmation.
    pub connect_latency: LatencyStats,
    /// Time from sending a call to receiving its result or error.
    pub round_trip: LatencyStats,
    /// Session wall-clock time.
    pub elapsed_time_ms: u64,
}

/// Metrics merged across all sessions of a run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub sessions: u64,
    /// Sessions whose task ended abnormally.
    pub failed_sessions: u64,
    pub connect_count: u64,
    pub failed_connect_count: u64,
    pub message_count: u64,
    pub reconnect_count: u64,
    pub calls_sent: u64,
    pub replies_sent: u64,
    pub messages_received: u64,
    pub results_received: u64,
    pub errors_received: u64,
    pub orphan_count: u64,
    pub decode_failures: u64,
    pub unimplemented_count: u64,
    pub handler_faults: u64,
    pub abandoned_requests: u64,
    pub connect_latency: LatencyStats,
    pub round_trip: LatencyStats,
    /// Run wall-clock time.
    pub elapsed_time_ms: u64,
}

impl AggregateMetrics {
    /// Fold one finished session into the aggregate.
    pub fn absorb(&mut self, session: &SessionMetrics) {
        self.sessions += 1;
        self.connect_count += session.connect_count;
        self.failed_connect_count += session.failed_connect_count;
        self.message_count += session.message_count;
        self.reconnect_count += session.reconnect_count;
        self.calls_sent += session.calls_sent;
        self.replies_sent += session.replies_sent;
        self.messages_received += session.messages_received;
        self.results_received += session.results_received;
        self.errors_received += session.errors_received;
        self.orphan_count += session.orphan_count;
        self.decode_failures += session.decode_failures;
        self.unimplemented_count += session.unimplemented_count;
        self.handler_faults += session.handler_faults;
        self.abandoned_requests += session.abandoned_requests;
        self.connect_latency.merge(&session.connect_latency);
        self.round_trip.merge(&session.round_trip);
    }
}

/// Milliseconds in `elapsed`, saturating at `u64::MAX`.
pub fn duration_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_stats_track_extremes_and_mean() {
        let mut stats = LatencyStats::default();
        assert_eq!(stats.mean_ms(), None);
        stats.record(Duration::from_millis(30));
        stats.record(Duration::from_millis(10));
        stats.record(Duration::from_millis(20));
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min_ms, Some(10));
        assert_eq!(stats.max_ms, Some(30));
        assert_eq!(stats.mean_ms(), Some(20));
    }

    #[test]
    fn merging_empty_stats_keeps_existing_extremes() {
        let mut stats = LatencyStats::default();
        stats.record(Duration::from_millis(5));
        stats.merge(&LatencyStats::default());
        assert_eq!(stats.min_ms, Some(5));
        assert_eq!(stats.max_ms, Some(5));
        assert_eq!(stats.count, 1);
    }

    #[test]
    fn absorb_sums_counters_across_sessions() {
        let first = SessionMetrics {
            connect_count: 3,
            message_count: 4,
            reconnect_count: 3,
            ..SessionMetrics::default()
        };
        let second = SessionMetrics {
            connect_count: 2,
            failed_connect_count: 1,
            message_count: 2,
            reconnect_count: 2,
            ..SessionMetrics::default()
        };
        let mut aggregate = AggregateMetrics::default();
        aggregate.absorb(&first);
        aggregate.absorb(&second);
        assert_eq!(aggregate.sessions, 2);
        assert_eq!(aggregate.connect_count, 5);
        assert_eq!(aggregate.failed_connect_count, 1);
        assert_eq!(aggregate.message_count, 6);
        assert_eq!(aggregate.reconnect_count, 5);
    }
}
