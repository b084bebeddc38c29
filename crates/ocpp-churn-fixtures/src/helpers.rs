//! Common test helper functions.

use std::fs;
use std::path::Path;

use ocpp_churn::model::RunConfig;

/// Write a run configuration to a JSON file.
///
/// # Panics
///
/// Panics if serialization or file writing fails.
pub fn write_config(path: &Path, config: &RunConfig) {
    let data = serde_json::to_vec_pretty(config).expect("failed to serialize config");
    fs::write(path, data).expect("failed to write config");
}
