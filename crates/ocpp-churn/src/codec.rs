//! Positional JSON envelope encoding.
//!
//! Every frame is a JSON array whose first element is the numeric message
//! kind and whose second is the request id:
//!
//! ```text
//! [2, "<id>", "<action>", {payload}]
//! [3, "<id>", {payload}]
//! [4, "<id>", "<errorCode>", "<errorDescription>", {details}]
//! ```
//!
//! Decoding never panics. Malformed input yields a [`DecodeFailure`] that the
//! caller logs and drops.

use crate::model::{CallErrorCode, Envelope, MessageKind, RequestId};
use rand::Rng;
use serde_json::{json, Map, Value};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeFailure {
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("frame is not a JSON array")]
    NotAnArray,
    #[error("unknown message kind {0}")]
    UnknownKind(String),
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("field `{0}` has the wrong type")]
    InvalidField(&'static str),
    #[error("request id is empty")]
    EmptyRequestId,
}

/// Encode a new call with a freshly generated request id.
pub fn encode_call<R: Rng + ?Sized>(
    rng: &mut R,
    action: &str,
    payload: Value,
) -> (RequestId, String) {
    let request_id = RequestId::generate(rng);
    let frame = encode(&Envelope::Call {
        request_id: request_id.clone(),
        action: action.to_string(),
        payload,
    });
    (request_id, frame)
}

pub fn encode_result(request_id: &RequestId, payload: Value) -> String {
    encode(&Envelope::CallResult {
        request_id: request_id.clone(),
        payload,
    })
}

/// Encode a call error with empty details.
pub fn encode_error(request_id: &RequestId, code: CallErrorCode, description: &str) -> String {
    encode(&Envelope::CallError {
        request_id: request_id.clone(),
        error_code: code.as_str().to_string(),
        error_description: description.to_string(),
        details: empty_object(),
    })
}

pub fn encode(envelope: &Envelope) -> String {
    let kind = envelope.kind().code();
    let frame = match envelope {
        Envelope::Call {
            request_id,
            action,
            payload,
        } => json!([kind, request_id.as_str(), action, payload]),
        Envelope::CallResult {
            request_id,
            payload,
        } => json!([kind, request_id.as_str(), payload]),
        Envelope::CallError {
            request_id,
            error_code,
            error_description,
            details,
        } => json!([
            kind,
            request_id.as_str(),
            error_code,
            error_description,
            details
        ]),
    };
    frame.to_string()
}

pub fn decode(text: &str) -> Result<Envelope, DecodeFailure> {
    let value: Value =
        serde_json::from_str(text).map_err(|err| DecodeFailure::InvalidJson(err.to_string()))?;
    let Value::Array(items) = value else {
        return Err(DecodeFailure::NotAnArray);
    };
    let mut items = items.into_iter();

    let kind = match items.next() {
        None => return Err(DecodeFailure::MissingField("messageTypeId")),
        Some(raw) => raw
            .as_u64()
            .and_then(MessageKind::from_code)
            .ok_or_else(|| DecodeFailure::UnknownKind(raw.to_string()))?,
    };

    let request_id = match items.next() {
        None => return Err(DecodeFailure::MissingField("requestId")),
        Some(Value::String(id)) if id.is_empty() => return Err(DecodeFailure::EmptyRequestId),
        Some(Value::String(id)) => RequestId::from(id),
        Some(_) => return Err(DecodeFailure::InvalidField("requestId")),
    };

    match kind {
        MessageKind::Call => {
            let action = required_string(items.next(), "action")?;
            let payload = items.next().unwrap_or_else(empty_object);
            Ok(Envelope::Call {
                request_id,
                action,
                payload,
            })
        }
        MessageKind::CallResult => Ok(Envelope::CallResult {
            request_id,
            payload: items.next().unwrap_or_else(empty_object),
        }),
        MessageKind::CallError => {
            let error_code = required_string(items.next(), "errorCode")?;
            let error_description = match items.next() {
                None => String::new(),
                Some(Value::String(text)) => text,
                Some(_) => return Err(DecodeFailure::InvalidField("errorDescription")),
            };
            let details = items.next().unwrap_or_else(empty_object);
            Ok(Envelope::CallError {
                request_id,
                error_code,
                error_description,
                details,
            })
        }
    }
}

fn required_string(value: Option<Value>, field: &'static str) -> Result<String, DecodeFailure> {
    match value {
        None => Err(DecodeFailure::MissingField(field)),
        Some(Value::String(text)) => Ok(text),
        Some(_) => Err(DecodeFailure::InvalidField(field)),
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}
