use crate::model::RequestId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Numeric message type that leads every wire envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Call,
    CallResult,
    CallError,
}

impl MessageKind {
    pub const fn code(self) -> u64 {
        match self {
            Self::Call => 2,
            Self::CallResult => 3,
            Self::CallError => 4,
        }
    }

    pub const fn from_code(code: u64) -> Option<Self> {
        match code {
            2 => Some(Self::Call),
            3 => Some(Self::CallResult),
            4 => Some(Self::CallError),
            _ => None,
        }
    }
}

/// One wire-level message.
#[derive(Clone, Debug, PartialEq)]
pub enum Envelope {
    /// `[2, requestId, action, payload]`
    Call {
        request_id: RequestId,
        action: String,
        payload: Value,
    },
    /// `[3, requestId, payload]`
    CallResult { request_id: RequestId, payload: Value },
    /// `[4, requestId, errorCode, errorDescription, details]`
    CallError {
        request_id: RequestId,
        error_code: String,
        error_description: String,
        details: Value,
    },
}

impl Envelope {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Call { .. } => MessageKind::Call,
            Self::CallResult { .. } => MessageKind::CallResult,
            Self::CallError { .. } => MessageKind::CallError,
        }
    }

    pub fn request_id(&self) -> &RequestId {
        match self {
            Self::Call { request_id, .. }
            | Self::CallResult { request_id, .. }
            | Self::CallError { request_id, .. } => request_id,
        }
    }
}

/// Standard error codes carried in `CallError` envelopes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallErrorCode {
    NotImplemented,
    NotSupported,
    InternalError,
    ProtocolError,
    FormationViolation,
    GenericError,
}

impl CallErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotImplemented => "NotImplemented",
            Self::NotSupported => "NotSupported",
            Self::InternalError => "InternalError",
            Self::ProtocolError => "ProtocolError",
            Self::FormationViolation => "FormationViolation",
            Self::GenericError => "GenericError",
        }
    }
}

impl fmt::Display for CallErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
