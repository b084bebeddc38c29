//! Matching of inbound results and errors to the calls that caused them.
//!
//! A tracker belongs to exactly one connection. When the connection closes
//! its pending requests are discarded, so a late reply that arrives on a
//! later connection never matches.

use crate::model::RequestId;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingRequest {
    pub request_id: RequestId,
    pub action: String,
    pub sent_at: Instant,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Matched {
        request: PendingRequest,
        round_trip: Duration,
    },
    Orphan,
}

#[derive(Debug, Default)]
pub struct CorrelationTracker {
    pending: HashMap<RequestId, PendingRequest>,
}

impl CorrelationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember an outbound call. A colliding id silently replaces the older
    /// entry.
    pub fn track(&mut self, request_id: RequestId, action: impl Into<String>) {
        let request = PendingRequest {
            request_id: request_id.clone(),
            action: action.into(),
            sent_at: Instant::now(),
        };
        self.pending.insert(request_id, request);
    }

    /// Remove and return the pending request for `request_id`.
    pub fn resolve(&mut self, request_id: &RequestId) -> Resolution {
        match self.pending.remove(request_id) {
            Some(request) => Resolution::Matched {
                round_trip: request.sent_at.elapsed(),
                request,
            },
            None => Resolution::Orphan,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drop every pending request, returning how many were abandoned.
    pub fn clear(&mut self) -> usize {
        let abandoned = self.pending.len();
        self.pending.clear();
        abandoned
    }
}
