//! Loading, overriding and validating run configuration.
//!
//! Precedence, lowest first: built-in defaults, config file, `WS_*`
//! environment variables, command-line flags (applied by the CLI).

use crate::model::{RunConfig, Span, CONFIG_VERSION};
use crate::runner::{RunnerError, RunnerResult};
use serde_json::json;
use std::fs;
use std::path::Path;

pub const ENV_HOST: &str = "WS_HOST";
pub const ENV_PORT: &str = "WS_PORT";
pub const ENV_SCHEME: &str = "WS_PROTOCOL";
pub const ENV_PATH: &str = "WS_PATH";

/// Read a JSON or YAML config file, chosen by extension.
pub fn load_config_file(path: &Path) -> RunnerResult<RunConfig> {
    let data = fs::read_to_string(path)
        .map_err(|err| RunnerError::io("E_IO", "failed to read config file", err))?;
    let name = path.to_string_lossy();
    if name.ends_with(".yaml") || name.ends_with(".yml") {
        serde_yml::from_str(&data)
            .map_err(|err| RunnerError::io("E_PROTOCOL", "failed to parse yaml config", err))
    } else {
        serde_json::from_str(&data)
            .map_err(|err| RunnerError::io("E_PROTOCOL", "failed to parse json config", err))
    }
}

/// Apply `WS_HOST`, `WS_PORT`, `WS_PROTOCOL` and `WS_PATH` from the process
/// environment.
pub fn apply_env_overrides(config: &mut RunConfig) -> RunnerResult<()> {
    apply_overrides_from(config, |key| std::env::var(key).ok())
}

/// Apply the `WS_*` overrides using `lookup` in place of the environment.
pub fn apply_overrides_from<F>(config: &mut RunConfig, lookup: F) -> RunnerResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup(ENV_HOST).filter(|v| !v.is_empty()) {
        config.transport_host = host;
    }
    if let Some(port) = lookup(ENV_PORT).filter(|v| !v.is_empty()) {
        config.transport_port = port.trim().parse().map_err(|_| {
            RunnerError::config(
                format!("{ENV_PORT} is not a valid port"),
                json!({ "value": port }),
            )
        })?;
    }
    if let Some(scheme) = lookup(ENV_SCHEME).filter(|v| !v.is_empty()) {
        config.url_scheme = scheme;
    }
    if let Some(path) = lookup(ENV_PATH) {
        config.url_path_prefix = path;
    }
    Ok(())
}

pub fn validate_config(config: &RunConfig) -> RunnerResult<()> {
    config.validate()
}

fn check_span(name: &str, span: Span) -> RunnerResult<()> {
    if span.is_valid() {
        Ok(())
    } else {
        Err(RunnerError::config(
            format!("{name} minimum exceeds maximum"),
            json!({ "min": span.min, "max": span.max }),
        ))
    }
}

impl RunConfig {
    /// Reject configurations a run cannot honour.
    pub fn validate(&self) -> RunnerResult<()> {
        if self.config_version != CONFIG_VERSION {
            return Err(RunnerError::config(
                "unsupported config_version",
                json!({ "expected": CONFIG_VERSION, "actual": self.config_version }),
            ));
        }
        if self.sessions == 0 {
            return Err(RunnerError::config("sessions must be at least 1", None));
        }
        if self.transport_host.trim().is_empty() {
            return Err(RunnerError::config("transport_host must not be empty", None));
        }
        if self.transport_port == 0 {
            return Err(RunnerError::config("transport_port must not be 0", None));
        }
        if !matches!(self.url_scheme.as_str(), "ws" | "wss") {
            return Err(RunnerError::config(
                "url_scheme must be ws or wss",
                json!({ "value": self.url_scheme }),
            ));
        }
        if !self.url_path_prefix.is_empty() && !self.url_path_prefix.starts_with('/') {
            return Err(RunnerError::config(
                "url_path_prefix must start with '/'",
                json!({ "value": self.url_path_prefix }),
            ));
        }
        check_span("reconnect_count", self.reconnect_budget())?;
        check_span("disconnect_delay_ms", self.disconnect_delay())?;
        check_span("inter_cycle_sleep_ms", self.inter_cycle_sleep())?;
        if self.keepalive_interval_ms == Some(0) {
            return Err(RunnerError::config("keepalive_interval_ms must not be 0", None));
        }
        if self.open_timeout_ms == 0 || self.close_timeout_ms == 0 {
            return Err(RunnerError::config(
                "open_timeout_ms and close_timeout_ms must be positive",
                json!({
                    "open_timeout_ms": self.open_timeout_ms,
                    "close_timeout_ms": self.close_timeout_ms,
                }),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::ProtocolSubtype;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        assert!(RunConfig::default().validate().is_ok());
    }

    #[test]
    fn env_overrides_replace_transport_fields() {
        let mut config = RunConfig::default();
        apply_overrides_from(
            &mut config,
            lookup(&[
                ("WS_HOST", "csms.local"),
                ("WS_PORT", "9000"),
                ("WS_PROTOCOL", "wss"),
                ("WS_PATH", "/ocpp"),
            ]),
        )
        .unwrap();
        assert_eq!(config.url_for("CP_0_x"), "wss://csms.local:9000/ocpp/CP_0_x");
    }

    #[test]
    fn invalid_env_port_is_a_config_error() {
        let mut config = RunConfig::default();
        let err = apply_overrides_from(&mut config, lookup(&[("WS_PORT", "eighty")])).unwrap_err();
        assert_eq!(err.code, "E_CONFIG");
    }

    #[test]
    fn missing_env_leaves_config_untouched() {
        let mut config = RunConfig::default();
        apply_overrides_from(&mut config, lookup(&[])).unwrap();
        assert_eq!(config, RunConfig::default());
    }

    #[test]
    fn validation_rejects_bad_fields() {
        let cases = [
            RunConfig {
                sessions: 0,
                ..RunConfig::default()
            },
            RunConfig {
                transport_host: " ".to_string(),
                ..RunConfig::default()
            },
            RunConfig {
                transport_port: 0,
                ..RunConfig::default()
            },
            RunConfig {
                url_scheme: "http".to_string(),
                ..RunConfig::default()
            },
            RunConfig {
                url_path_prefix: "ocpp".to_string(),
                ..RunConfig::default()
            },
            RunConfig {
                reconnect_count_min: 9,
                reconnect_count_max: 2,
                ..RunConfig::default()
            },
            RunConfig {
                disconnect_delay_min_ms: 300,
                ..RunConfig::default()
            },
            RunConfig {
                inter_cycle_sleep_min_ms: 500,
                ..RunConfig::default()
            },
            RunConfig {
                keepalive_interval_ms: Some(0),
                ..RunConfig::default()
            },
            RunConfig {
                open_timeout_ms: 0,
                ..RunConfig::default()
            },
            RunConfig {
                config_version: 99,
                ..RunConfig::default()
            },
        ];
        for config in cases {
            let err = config.validate().unwrap_err();
            assert_eq!(err.code, "E_CONFIG", "{config:?}");
        }
    }

    #[test]
    fn loads_yaml_and_json_files() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("run.yaml");
        fs::write(
            &yaml,
            "sessions: 4\nprotocol_subtype: ocpp2.0.1\nreconnect_count_min: 2\nreconnect_count_max: 2\n",
        )
        .unwrap();
        let config = load_config_file(&yaml).unwrap();
        assert_eq!(config.sessions, 4);
        assert_eq!(config.protocol_subtype, ProtocolSubtype::Ocpp201);
        assert_eq!(config.transport_port, 8887);

        let json_path = dir.path().join("run.json");
        fs::write(&json_path, r#"{"transport_host": "localhost", "seed": 7}"#).unwrap();
        let config = load_config_file(&json_path).unwrap();
        assert_eq!(config.transport_host, "localhost");
        assert_eq!(config.seed, Some(7));
    }

    #[test]
    fn load_errors_carry_codes() {
        let dir = tempfile::tempdir().unwrap();
        let missing = load_config_file(&dir.path().join("nope.json")).unwrap_err();
        assert_eq!(missing.code, "E_IO");

        let broken = dir.path().join("broken.json");
        fs::write(&broken, "{").unwrap();
        assert_eq!(load_config_file(&broken).unwrap_err().code, "E_PROTOCOL");
    }
}
