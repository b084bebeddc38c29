//! Inbound action dispatch.
//!
//! The central system may call into the device at any time while a
//! connection is active. Each protocol subtype has a fixed table of actions
//! the device answers with synthetic payloads; anything else is answered with
//! a `NotImplemented` call error.

use crate::codec::{encode_error, encode_result};
use crate::model::{CallErrorCode, ProtocolSubtype, RequestId};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Error returned by an action handler.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct HandlerFault(pub String);

impl HandlerFault {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("action {action} is not implemented")]
    Unimplemented { action: String },
    #[error("handler for {action} failed: {fault}")]
    HandlerFault { action: String, fault: HandlerFault },
}

/// Pure function from a request payload to a response payload.
pub type Handler = Arc<dyn Fn(&Value) -> Result<Value, HandlerFault> + Send + Sync>;

/// Case-sensitive table of inbound action handlers.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    handlers: HashMap<String, Handler>,
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.actions())
            .finish()
    }
}

impl ActionRegistry {
    /// Empty registry; every dispatch reports `Unimplemented`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in table for `subtype`.
    pub fn for_subtype(subtype: ProtocolSubtype) -> Self {
        let mut registry = Self::new();
        registry.register("ChangeAvailability", accepted);
        registry.register("ChangeConfiguration", accepted);
        registry.register("ClearCache", accepted);
        registry.register("DataTransfer", data_transfer);
        registry.register("GetConfiguration", get_configuration);
        registry.register("RemoteStartTransaction", accepted);
        registry.register("RemoteStopTransaction", accepted);
        registry.register("Reset", accepted);
        registry.register("TriggerMessage", accepted);
        registry.register("UnlockConnector", accepted);
        if subtype.is_v2() {
            registry.register("GetVariables", get_variables);
            registry.register("SetVariables", set_variables);
            registry.register("RequestStartTransaction", accepted);
            registry.register("RequestStopTransaction", accepted);
        }
        registry
    }

    /// Add or replace the handler for `action`.
    pub fn register<F>(&mut self, action: impl Into<String>, handler: F)
    where
        F: Fn(&Value) -> Result<Value, HandlerFault> + Send + Sync + 'static,
    {
        self.handlers.insert(action.into(), Arc::new(handler));
    }

    pub fn contains(&self, action: &str) -> bool {
        self.handlers.contains_key(action)
    }

    /// Registered action names in sorted order.
    pub fn actions(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Run the handler for `action`. A handler that panics is reported as a
    /// fault rather than unwinding into the caller.
    pub fn dispatch(&self, action: &str, payload: &Value) -> Result<Value, DispatchError> {
        let handler = self
            .handlers
            .get(action)
            .ok_or_else(|| DispatchError::Unimplemented {
                action: action.to_string(),
            })?;
        let outcome = catch_unwind(AssertUnwindSafe(|| handler(payload)))
            .unwrap_or_else(|panic| Err(HandlerFault::new(panic_message(panic.as_ref()))));
        outcome.map_err(|fault| DispatchError::HandlerFault {
            action: action.to_string(),
            fault,
        })
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

// =============================================================================
// Replies
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyOutcome {
    Handled,
    Unimplemented,
    Faulted,
}

/// The single reply frame owed to an inbound call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub frame: String,
    pub outcome: ReplyOutcome,
}

/// Dispatch an inbound call and encode the correlated result or error.
pub fn respond_to_call(
    registry: &ActionRegistry,
    request_id: &RequestId,
    action: &str,
    payload: &Value,
) -> Reply {
    match registry.dispatch(action, payload) {
        Ok(result) => Reply {
            frame: encode_result(request_id, result),
            outcome: ReplyOutcome::Handled,
        },
        Err(DispatchError::Unimplemented { .. }) => Reply {
            frame: encode_error(
                request_id,
                CallErrorCode::NotImplemented,
                &format!("Action {action} not implemented"),
            ),
            outcome: ReplyOutcome::Unimplemented,
        },
        Err(DispatchError::HandlerFault { fault, .. }) => {
            tracing::warn!(action, request_id = %request_id, %fault, "inbound handler failed");
            Reply {
                frame: encode_error(
                    request_id,
                    CallErrorCode::InternalError,
                    &format!("Failed to process {action}"),
                ),
                outcome: ReplyOutcome::Faulted,
            }
        }
    }
}

// =============================================================================
// Built-in handlers
// =============================================================================

#[allow(clippy::unnecessary_wraps)]
fn accepted(_payload: &Value) -> Result<Value, HandlerFault> {
    Ok(json!({ "status": "Accepted" }))
}

fn data_transfer(payload: &Value) -> Result<Value, HandlerFault> {
    let vendor_id = payload
        .get("vendorId")
        .and_then(Value::as_str)
        .ok_or_else(|| HandlerFault::new("DataTransfer request has no vendorId"))?;
    let message_id = payload
        .get("messageId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .unwrap_or("default");
    Ok(json!({
        "status": "Accepted",
        "data": format!("Response to {vendor_id}:{message_id}"),
    }))
}

#[allow(clippy::unnecessary_wraps)]
fn get_configuration(_payload: &Value) -> Result<Value, HandlerFault> {
    Ok(json!({
        "configurationKey": [
            { "key": "HeartbeatInterval", "readonly": false, "value": "60" },
            { "key": "ConnectionTimeOut", "readonly": false, "value": "60" },
        ],
        "unknownKey": [],
    }))
}

fn requested_variables(payload: &Value, field: &str) -> Vec<Value> {
    payload
        .get(field)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

#[allow(clippy::unnecessary_wraps)]
fn get_variables(payload: &Value) -> Result<Value, HandlerFault> {
    let results: Vec<Value> = requested_variables(payload, "getVariableData")
        .into_iter()
        .map(|request| {
            json!({
                "attributeStatus": "Accepted",
                "component": request.get("component").cloned().unwrap_or_else(|| json!({})),
                "variable": request.get("variable").cloned().unwrap_or_else(|| json!({})),
                "attributeValue": "60",
            })
        })
        .collect();
    Ok(json!({ "getVariableResult": results }))
}

#[allow(clippy::unnecessary_wraps)]
fn set_variables(payload: &Value) -> Result<Value, HandlerFault> {
    let results: Vec<Value> = requested_variables(payload, "setVariableData")
        .into_iter()
        .map(|request| {
            json!({
                "attributeStatus": "Accepted",
                "component": request.get("component").cloned().unwrap_or_else(|| json!({})),
                "variable": request.get("variable").cloned().unwrap_or_else(|| json!({})),
            })
        })
        .collect();
    Ok(json!({ "setVariableResult": results }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::codec::decode;
    use crate::model::Envelope;

    #[test]
    fn v16_table_matches_core_profile() {
        let registry = ActionRegistry::for_subtype(ProtocolSubtype::Ocpp16);
        assert_eq!(
            registry.actions(),
            vec![
                "ChangeAvailability",
                "ChangeConfiguration",
                "ClearCache",
                "DataTransfer",
                "GetConfiguration",
                "RemoteStartTransaction",
                "RemoteStopTransaction",
                "Reset",
                "TriggerMessage",
                "UnlockConnector",
            ]
        );
    }

    #[test]
    fn v2_tables_extend_the_core_profile() {
        let core = ActionRegistry::for_subtype(ProtocolSubtype::Ocpp16);
        for subtype in [ProtocolSubtype::Ocpp201, ProtocolSubtype::Ocpp21] {
            let registry = ActionRegistry::for_subtype(subtype);
            for action in core.actions() {
                assert!(registry.contains(action), "{subtype} lacks {action}");
            }
            for action in [
                "GetVariables",
                "SetVariables",
                "RequestStartTransaction",
                "RequestStopTransaction",
            ] {
                assert!(registry.contains(action), "{subtype} lacks {action}");
            }
            assert_eq!(
                registry.dispatch("UnlockConnector", &json!({})).unwrap(),
                json!({"status": "Accepted"})
            );
            assert_eq!(
                registry.dispatch("GetConfiguration", &json!({})).unwrap()["configurationKey"][0]
                    ["key"],
                "HeartbeatInterval"
            );
        }
    }

    #[test]
    fn action_names_are_case_sensitive() {
        let registry = ActionRegistry::for_subtype(ProtocolSubtype::Ocpp16);
        assert!(matches!(
            registry.dispatch("reset", &json!({})),
            Err(DispatchError::Unimplemented { .. })
        ));
    }

    #[test]
    fn data_transfer_echoes_vendor_and_message() {
        let registry = ActionRegistry::for_subtype(ProtocolSubtype::Ocpp16);
        let reply = registry
            .dispatch("DataTransfer", &json!({"vendorId": "acme", "messageId": "ping"}))
            .unwrap();
        assert_eq!(reply["data"], "Response to acme:ping");
        let reply = registry
            .dispatch("DataTransfer", &json!({"vendorId": "acme"}))
            .unwrap();
        assert_eq!(reply["data"], "Response to acme:default");
    }

    #[test]
    fn get_variables_echoes_each_request() {
        let registry = ActionRegistry::for_subtype(ProtocolSubtype::Ocpp201);
        let reply = registry
            .dispatch(
                "GetVariables",
                &json!({"getVariableData": [
                    {"component": {"name": "OCPPCommCtrlr"}, "variable": {"name": "HeartbeatInterval"}},
                    {"component": {"name": "SecurityCtrlr"}, "variable": {"name": "Identity"}},
                ]}),
            )
            .unwrap();
        let results = reply["getVariableResult"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1]["variable"]["name"], "Identity");
        assert!(results.iter().all(|r| r["attributeStatus"] == "Accepted"));
    }

    #[test]
    fn unknown_action_replies_not_implemented_with_same_id() {
        let registry = ActionRegistry::for_subtype(ProtocolSubtype::Ocpp16);
        let Envelope::Call {
            request_id,
            action,
            payload,
        } = decode(r#"[2,"abc","Foo",{}]"#).unwrap()
        else {
            panic!("expected a call");
        };
        let reply = respond_to_call(&registry, &request_id, &action, &payload);
        assert_eq!(reply.outcome, ReplyOutcome::Unimplemented);
        assert_eq!(
            reply.frame,
            r#"[4,"abc","NotImplemented","Action Foo not implemented",{}]"#
        );
    }

    #[test]
    fn handler_errors_and_panics_become_internal_errors() {
        let mut registry = ActionRegistry::for_subtype(ProtocolSubtype::Ocpp16);
        registry.register("Explode", |_: &Value| -> Result<Value, HandlerFault> {
            panic!("boom")
        });
        let id = RequestId::from("r1");

        let reply = respond_to_call(&registry, &id, "Explode", &json!({}));
        assert_eq!(reply.outcome, ReplyOutcome::Faulted);
        assert_eq!(
            reply.frame,
            r#"[4,"r1","InternalError","Failed to process Explode",{}]"#
        );

        let reply = respond_to_call(&registry, &id, "DataTransfer", &json!({}));
        assert_eq!(reply.outcome, ReplyOutcome::Faulted);
        assert_eq!(
            reply.frame,
            r#"[4,"r1","InternalError","Failed to process DataTransfer",{}]"#
        );
    }

    #[test]
    fn registered_call_gets_one_correlated_result() {
        let registry = ActionRegistry::for_subtype(ProtocolSubtype::Ocpp16);
        let id = RequestId::from("q9");
        let reply = respond_to_call(&registry, &id, "Reset", &json!({"type": "Soft"}));
        assert_eq!(reply.outcome, ReplyOutcome::Handled);
        assert_eq!(
            decode(&reply.frame).unwrap(),
            Envelope::CallResult {
                request_id: id,
                payload: json!({"status": "Accepted"}),
            }
        );
    }
}
