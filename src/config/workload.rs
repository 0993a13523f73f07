//! Workload configuration plumbing
//!
//! Workload configuration is JSON end to end. Up to three sources merge,
//! later ones winning key-by-key: the base `config_file`, then
//! `config_in_file`, then the inline `config_in_json` string. The merged
//! object travels to every workload; whatever the workloads produce as
//! config output is written back out to `config_out_file` at shutdown.

use crate::Result;
use anyhow::Context;
use serde_json::Value;
use std::path::Path;

/// Read a JSON object from a file.
pub fn read_json_file(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {:?}", path))
}

/// Write a JSON value to a file, pretty-printed.
pub fn write_json_file(path: &Path, value: &Value) -> Result<()> {
    let content = serde_json::to_string_pretty(value).context("Failed to serialize config")?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))
}

/// Merge `overlay` onto `base` key-by-key (top level only; the original
/// merges dynamics the same way). Non-object overlays replace the base.
pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                base_map.insert(key, value);
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Assemble the workload configuration from its up-to-three sources.
pub fn load_workload_config(
    config_file: Option<&Path>,
    config_in_file: Option<&Path>,
    config_in_json: Option<&str>,
) -> Result<Value> {
    let mut config = Value::Object(Default::default());
    if let Some(path) = config_file {
        merge(&mut config, read_json_file(path)?);
    }
    if let Some(path) = config_in_file {
        merge(&mut config, read_json_file(path)?);
    }
    if let Some(json) = config_in_json {
        let overlay: Value =
            serde_json::from_str(json).context("Invalid JSON in --config_in_json")?;
        merge(&mut config, overlay);
    }
    Ok(config)
}
