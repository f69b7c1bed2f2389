//! Schema validation for Pandu JSON5 layers.
//!
//! Serde fills in defaults and would silently ignore misspelled keys, so each
//! layer is checked against the known key set before it is merged.

use crate::ConfigError;
use serde_json::{Map, Value};

/// Validate a single config layer against the schema.
pub(super) fn validate_layer_schema(value: &Value, layer: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, "")?;
    ensure_allowed_keys(
        map,
        &["$schema", "memory", "rate_limit", "maintenance"],
        layer,
        "",
    )?;

    if let Some(value) = map.get("$schema") {
        expect_string(value, layer, "$schema")?;
    }
    if let Some(value) = map.get("memory") {
        validate_memory(value, layer, "memory")?;
    }
    if let Some(value) = map.get("rate_limit") {
        validate_rate_limit(value, layer, "rate_limit")?;
    }
    if let Some(value) = map.get("maintenance") {
        let map = expect_object(value, layer, "maintenance")?;
        ensure_allowed_keys(map, &["sweep_interval_secs"], layer, "maintenance")?;
        if let Some(value) = map.get("sweep_interval_secs") {
            expect_u64(value, layer, "maintenance.sweep_interval_secs")?;
        }
    }
    Ok(())
}

/// Validate the "memory" block.
fn validate_memory(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    ensure_allowed_keys(
        map,
        &[
            "max_exchanges",
            "idle_ttl_secs",
            "context_window",
            "max_turn_chars",
            "purge_probability",
            "user_label",
            "assistant_label",
            "question_marker",
        ],
        layer,
        path,
    )?;

    for key in ["max_exchanges", "idle_ttl_secs", "context_window"] {
        if let Some(value) = map.get(key) {
            expect_u64(value, layer, &join_path(path, key))?;
        }
    }
    if let Some(value) = map.get("max_turn_chars")
        && !value.is_null()
    {
        expect_u64(value, layer, &join_path(path, "max_turn_chars"))?;
    }
    if let Some(value) = map.get("purge_probability") {
        expect_f64(value, layer, &join_path(path, "purge_probability"))?;
    }
    for key in ["user_label", "assistant_label", "question_marker"] {
        if let Some(value) = map.get(key) {
            expect_string(value, layer, &join_path(path, key))?;
        }
    }
    Ok(())
}

/// Validate the "rate_limit" block.
fn validate_rate_limit(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    ensure_allowed_keys(
        map,
        &[
            "enabled",
            "algorithm",
            "window_secs",
            "max_requests",
            "block_secs",
            "purge_probability",
        ],
        layer,
        path,
    )?;

    if let Some(value) = map.get("enabled")
        && !value.is_boolean()
    {
        return Err(invalid_field(
            layer,
            &join_path(path, "enabled"),
            "expected bool",
        ));
    }
    if let Some(value) = map.get("algorithm") {
        let algorithm_path = join_path(path, "algorithm");
        match value.as_str() {
            Some("fixed_window" | "sliding_log") => {}
            Some(_) => {
                return Err(invalid_field(
                    layer,
                    &algorithm_path,
                    "expected one of: fixed_window, sliding_log",
                ));
            }
            None => return Err(invalid_field(layer, &algorithm_path, "expected string")),
        }
    }
    for key in ["window_secs", "max_requests", "block_secs"] {
        if let Some(value) = map.get(key) {
            expect_u64(value, layer, &join_path(path, key))?;
        }
    }
    if let Some(value) = map.get("purge_probability") {
        expect_f64(value, layer, &join_path(path, "purge_probability"))?;
    }
    Ok(())
}

fn expect_object<'a>(
    value: &'a Value,
    layer: &str,
    path: &str,
) -> Result<&'a Map<String, Value>, ConfigError> {
    value
        .as_object()
        .ok_or_else(|| invalid_field(layer, path, "expected object"))
}

fn expect_string(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    if value.is_string() {
        Ok(())
    } else {
        Err(invalid_field(layer, path, "expected string"))
    }
}

/// Non-negative integers only; JSON5 parses `-1` as i64.
fn expect_u64(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    if value.is_u64() {
        Ok(())
    } else {
        Err(invalid_field(layer, path, "expected non-negative integer"))
    }
}

fn expect_f64(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    if value.is_number() {
        Ok(())
    } else {
        Err(invalid_field(layer, path, "expected number"))
    }
}

fn ensure_allowed_keys(
    map: &Map<String, Value>,
    allowed: &[&str],
    layer: &str,
    path: &str,
) -> Result<(), ConfigError> {
    match map.keys().find(|key| !allowed.contains(&key.as_str())) {
        Some(key) => Err(invalid_field(layer, &join_path(path, key), "unknown key")),
        None => Ok(()),
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn invalid_field(layer: &str, path: &str, message: &str) -> ConfigError {
    let path = if path.is_empty() { "root" } else { path };
    ConfigError::InvalidField {
        path: format!("{layer}:{path}"),
        message: message.to_string(),
    }
}
