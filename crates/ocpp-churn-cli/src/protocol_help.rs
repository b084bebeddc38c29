//! Protocol help generation.
//!
//! Generates structured documentation of the wire envelopes, protocol
//! subtypes, configuration keys and error codes understood by ocpp-churn.

use ocpp_churn::actions::ActionRegistry;
use ocpp_churn::messages;
use ocpp_churn::model::{
    CallErrorCode, ProtocolSubtype, RunConfig, CONFIG_VERSION, RUN_REPORT_VERSION,
};
use ocpp_churn::runner::ErrorCode;
use serde::Serialize;
use std::collections::BTreeMap;

/// Complete protocol documentation.
#[derive(Debug, Serialize)]
pub struct ProtocolHelp {
    /// Version numbers for the config file and run report formats
    pub versions: Versions,
    /// Available CLI commands
    pub commands: BTreeMap<String, CommandHelp>,
    /// Wire envelope layouts keyed by envelope name
    pub envelopes: BTreeMap<String, EnvelopeHelp>,
    /// Supported protocol subtypes keyed by subprotocol name
    pub subtypes: BTreeMap<String, SubtypeHelp>,
    /// Config keys with their defaults
    pub config: BTreeMap<String, ConfigKeyHelp>,
    /// Error codes and their meanings
    pub error_codes: BTreeMap<String, ErrorCodeHelp>,
    /// Working examples
    pub examples: BTreeMap<String, Example>,
}

#[derive(Debug, Serialize)]
pub struct Versions {
    pub config: u32,
    pub run_report: u32,
}

/// Documentation for a CLI command.
#[derive(Debug, Serialize)]
pub struct CommandHelp {
    pub description: String,
    pub usage: String,
    pub output: String,
}

/// Layout of one envelope kind.
#[derive(Debug, Serialize)]
pub struct EnvelopeHelp {
    pub message_type_id: u64,
    pub layout: String,
    pub example: String,
}

/// What a device of one subtype sends and answers.
#[derive(Debug, Serialize)]
pub struct SubtypeHelp {
    pub device_id_prefix: String,
    /// Calls the device initiates.
    pub outbound_actions: Vec<String>,
    /// Calls the device answers with a result; anything else is
    /// answered with `NotImplemented`.
    pub inbound_actions: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ConfigKeyHelp {
    pub default: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
}

/// Documentation for an error code.
#[derive(Debug, Serialize)]
pub struct ErrorCodeHelp {
    pub exit_code: i32,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub common_causes: Option<Vec<String>>,
}

/// A working example.
#[derive(Debug, Serialize)]
pub struct Example {
    pub description: String,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    pub expected: String,
}

/// Generate complete protocol documentation.
#[must_use]
pub fn generate_protocol_help() -> ProtocolHelp {
    ProtocolHelp {
        versions: Versions {
            config: CONFIG_VERSION,
            run_report: RUN_REPORT_VERSION,
        },
        commands: generate_commands(),
        envelopes: generate_envelopes(),
        subtypes: generate_subtypes(),
        config: generate_config_keys(),
        error_codes: generate_error_codes(),
        examples: generate_examples(),
    }
}

fn generate_commands() -> BTreeMap<String, CommandHelp> {
    let mut commands = BTreeMap::new();

    commands.insert(
        "run".to_string(),
        CommandHelp {
            description: "Churn simulated devices against a central system until every reconnect budget is spent.".to_string(),
            usage: "ocpp-churn run [--config <path>] [--host <host>] [--sessions <n>] [--json] [-v]".to_string(),
            output: "Single RunReport JSON object with --json, a summary on stderr otherwise".to_string(),
        },
    );

    commands.insert(
        "respond".to_string(),
        CommandHelp {
            description: "Answer wire frames read from stdin the way a simulated device would."
                .to_string(),
            usage: "ocpp-churn respond [--subtype <subtype>]".to_string(),
            output: "One reply frame per inbound call on stdout".to_string(),
        },
    );

    commands.insert(
        "protocol-help".to_string(),
        CommandHelp {
            description: "Print this documentation.".to_string(),
            usage: "ocpp-churn protocol-help [--json]".to_string(),
            output: "Human-readable text, or one JSON object with --json".to_string(),
        },
    );

    commands
}

fn generate_envelopes() -> BTreeMap<String, EnvelopeHelp> {
    let mut envelopes = BTreeMap::new();
    envelopes.insert(
        "Call".to_string(),
        EnvelopeHelp {
            message_type_id: 2,
            layout: "[2, requestId, action, payload]".to_string(),
            example: r#"[2,"a1b2c3d4","Heartbeat",{}]"#.to_string(),
        },
    );
    envelopes.insert(
        "CallResult".to_string(),
        EnvelopeHelp {
            message_type_id: 3,
            layout: "[3, requestId, payload]".to_string(),
            example: r#"[3,"a1b2c3d4",{"currentTime":"2024-01-01T00:00:00.000Z"}]"#.to_string(),
        },
    );
    envelopes.insert(
        "CallError".to_string(),
        EnvelopeHelp {
            message_type_id: 4,
            layout: "[4, requestId, errorCode, errorDescription, details]".to_string(),
            example: format!(
                r#"[4,"a1b2c3d4","{}","Action Foo not implemented",{{}}]"#,
                CallErrorCode::NotImplemented
            ),
        },
    );
    envelopes
}

fn generate_subtypes() -> BTreeMap<String, SubtypeHelp> {
    ProtocolSubtype::ALL
        .into_iter()
        .map(|subtype| {
            let outbound = [
                messages::BOOT_NOTIFICATION,
                messages::HEARTBEAT,
                messages::STATUS_NOTIFICATION,
            ]
            .into_iter()
            .map(str::to_string)
            .collect();
            let registry = ActionRegistry::for_subtype(subtype);
            (
                subtype.subprotocol().to_string(),
                SubtypeHelp {
                    device_id_prefix: format!("{}_<index>_<token>", subtype.device_prefix()),
                    outbound_actions: outbound,
                    inbound_actions: registry.actions().into_iter().map(str::to_string).collect(),
                },
            )
        })
        .collect()
}

fn generate_config_keys() -> BTreeMap<String, ConfigKeyHelp> {
    let env_for = |key: &str| match key {
        "transport_host" => Some(ocpp_churn::config::ENV_HOST),
        "transport_port" => Some(ocpp_churn::config::ENV_PORT),
        "url_scheme" => Some(ocpp_churn::config::ENV_SCHEME),
        "url_path_prefix" => Some(ocpp_churn::config::ENV_PATH),
        _ => None,
    };
    let defaults = serde_json::to_value(RunConfig::default()).unwrap_or_default();
    defaults
        .as_object()
        .map(|fields| {
            fields
                .iter()
                .map(|(key, value)| {
                    (
                        key.clone(),
                        ConfigKeyHelp {
                            default: value.clone(),
                            env: env_for(key).map(str::to_string),
                        },
                    )
                })
                .collect()
        })
        .unwrap_or_default()
}

fn common_causes(code: ErrorCode) -> Option<Vec<String>> {
    let causes: &[&str] = match code {
        ErrorCode::Config => &[
            "reconnect_count_min greater than reconnect_count_max",
            "WS_PORT is not a number",
            "url_scheme other than ws or wss",
        ],
        ErrorCode::Io => &["Config file does not exist or is unreadable"],
        ErrorCode::Protocol => &["Config file is not valid JSON or YAML for its extension"],
        ErrorCode::Transport => &[
            "Central system is not listening on the configured host and port",
            "Central system rejected the subprotocol",
        ],
        ErrorCode::Internal | ErrorCode::CliInvalidArg => &[],
    };
    if causes.is_empty() {
        None
    } else {
        Some(causes.iter().map(|c| (*c).to_string()).collect())
    }
}

fn generate_error_codes() -> BTreeMap<String, ErrorCodeHelp> {
    ErrorCode::ALL
        .into_iter()
        .map(|code| {
            (
                code.as_str().to_string(),
                ErrorCodeHelp {
                    exit_code: code.exit_code(),
                    description: code.description().to_string(),
                    common_causes: common_causes(code),
                },
            )
        })
        .collect()
}

fn generate_examples() -> BTreeMap<String, Example> {
    let mut examples = BTreeMap::new();

    examples.insert(
        "fixed_budget".to_string(),
        Example {
            description: "Ten devices, three cycles each, 100 ms connections.".to_string(),
            command: "ocpp-churn run --host localhost --sessions 10 --reconnects-min 3 --reconnects-max 3 --disconnect-delay-min-ms 100 --disconnect-delay-max-ms 100 --json".to_string(),
            input: None,
            expected: "RunReport with metrics.reconnect_count == 30".to_string(),
        },
    );

    examples.insert(
        "unknown_action".to_string(),
        Example {
            description: "A call without a handler is answered with NotImplemented.".to_string(),
            command: "ocpp-churn respond --subtype ocpp1.6".to_string(),
            input: Some(r#"[2,"abc","Foo",{}]"#.to_string()),
            expected: r#"[4,"abc","NotImplemented","Action Foo not implemented",{}]"#.to_string(),
        },
    );

    examples.insert(
        "handled_action".to_string(),
        Example {
            description: "A registered call is answered with a synthetic result.".to_string(),
            command: "ocpp-churn respond --subtype ocpp2.0.1".to_string(),
            input: Some(r#"[2,"r1","Reset",{"type":"Immediate"}]"#.to_string()),
            expected: r#"[3,"r1",{"status":"Accepted"}]"#.to_string(),
        },
    );

    examples
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_error_code_is_documented() {
        let help = generate_protocol_help();
        for code in ErrorCode::ALL {
            let entry = help.error_codes.get(code.as_str());
            assert!(entry.is_some_and(|e| e.exit_code == code.exit_code()));
        }
    }

    #[test]
    fn subtypes_list_their_inbound_tables() {
        let help = generate_protocol_help();
        let v16 = help.subtypes.get("ocpp1.6").map(|s| &s.inbound_actions);
        assert!(v16.is_some_and(|a| a.iter().any(|name| name == "GetConfiguration")));
        let v21 = help.subtypes.get("ocpp2.1").map(|s| &s.inbound_actions);
        assert!(v21.is_some_and(|a| a.iter().any(|name| name == "GetVariables")));
    }

    #[test]
    fn config_keys_carry_defaults_and_env_names() {
        let help = generate_protocol_help();
        let port = help.config.get("transport_port");
        assert!(port.is_some_and(|p| p.default == serde_json::json!(8887)
            && p.env.as_deref() == Some("WS_PORT")));
        assert!(help.config.contains_key("reconnect_count_max"));
    }
}
