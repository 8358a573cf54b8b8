//! Configuration loading.
//!
//! Reads the JSON configuration object, normalizes the text-only values sent
//! by hosted runs, and fills every omitted parameter from the default table.
//! The result is still loosely typed; [`crate::validate`] turns it into a
//! [`crate::FilterConfig`].

use crate::error::{MaxfilterError, Result};
use crate::inputs;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Well-known configuration file, relative to the working directory.
pub const CONFIG_FILE: &str = "config.json";

/// Bookkeeping keys injected by the hosting platform.
const PLATFORM_KEYS: &[&str] = &["_app", "_tid", "_inputs", "_outputs"];

/// Parameters whose `null` is a meaningful value rather than "use default".
const NULLABLE_PARAMS: &[&str] = &["param_destination", "param_st_duration", "param_regularize"];

/// Default value for every recognized parameter.
pub fn default_params() -> Vec<(&'static str, Value)> {
    vec![
        ("param_destination", Value::Null),
        ("param_st_duration", Value::Null),
        ("param_st_correlation", json!(0.98)),
        ("param_origin", json!("auto")),
        ("param_int_order", json!(8)),
        ("param_ext_order", json!(3)),
        ("param_coord_frame", json!("head")),
        ("param_regularize", json!("in")),
        ("param_ignore_ref", json!(false)),
        ("param_bad_condition", json!("error")),
        ("param_st_fixed", json!(true)),
        ("param_st_only", json!(false)),
        ("param_mag_scale", json!(100.0)),
        ("param_skip_by_annotation", json!(["edge", "bad_acq_skip"])),
        ("param_extended_proj", json!([])),
    ]
}

fn is_known_param(key: &str) -> bool {
    default_params().iter().any(|(k, _)| *k == key)
}

/// Configuration after normalization and default filling.
#[derive(Debug, Clone, PartialEq)]
pub struct RawConfig {
    /// Primary recording, verified readable.
    pub fif: PathBuf,
    /// Declared auxiliary file keys and their paths (null keys omitted).
    pub files: BTreeMap<String, String>,
    /// Every recognized `param_*` key.
    pub params: BTreeMap<String, Value>,
}

impl RawConfig {
    /// Parameter value, `Null` for unknown keys.
    pub fn param(&self, key: &str) -> &Value {
        self.params.get(key).unwrap_or(&Value::Null)
    }

    pub fn file(&self, key: &str) -> Option<&str> {
        self.files.get(key).map(|s| s.as_str())
    }
}

/// Load the configuration file at `path`.
pub fn load_config(path: &Path) -> Result<RawConfig> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        MaxfilterError::Config(format!(
            "Cannot read configuration file {}: {}",
            path.display(),
            e
        ))
    })?;
    parse_config(&text)
}

pub fn parse_config(text: &str) -> Result<RawConfig> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| MaxfilterError::Config(format!("Malformed configuration JSON: {}", e)))?;
    from_value(value)
}

pub fn from_value(value: Value) -> Result<RawConfig> {
    let Value::Object(mut map) = value else {
        return Err(MaxfilterError::Config(
            "Configuration must be a JSON object".to_string(),
        ));
    };

    for key in PLATFORM_KEYS {
        map.remove(*key);
    }

    // Hosted runs send unset fields as empty strings
    for value in map.values_mut() {
        if value.as_str() == Some("") {
            *value = Value::Null;
        }
    }

    let fif = match map.remove("fif") {
        Some(Value::String(path)) => PathBuf::from(path),
        Some(Value::Null) | None => {
            return Err(MaxfilterError::Config(
                "Missing required key 'fif' (primary MEG recording)".to_string(),
            ))
        }
        Some(other) => {
            return Err(MaxfilterError::Config(format!(
                "'fif' must be a file path string, got {}",
                other
            )))
        }
    };
    check_primary_readable(&fif)?;

    let mut files = BTreeMap::new();
    let mut params = BTreeMap::new();

    for (key, value) in map {
        if is_known_param(&key) {
            let normalized = normalize_param(&key, value);
            params.insert(key, normalized);
        } else if inputs::is_file_key(&key) {
            match value {
                Value::Null => {}
                Value::String(path) => {
                    files.insert(key, path);
                }
                other => {
                    return Err(MaxfilterError::Config(format!(
                        "'{}' must be a file path string, got {}",
                        key, other
                    )))
                }
            }
        } else {
            log::warn!("Ignoring unknown configuration key '{}'", key);
        }
    }

    for (key, default) in default_params() {
        let missing = match params.get(key) {
            None => true,
            Some(Value::Null) => !NULLABLE_PARAMS.contains(&key),
            Some(_) => false,
        };
        if missing {
            params.insert(key.to_string(), default);
        }
    }

    log::debug!("Effective raw parameters: {:?}", params);

    Ok(RawConfig { fif, files, params })
}

fn check_primary_readable(path: &Path) -> Result<()> {
    let readable = path.is_file() && std::fs::File::open(path).is_ok();
    if !readable {
        return Err(MaxfilterError::Config(format!(
            "Primary recording '{}' is missing or unreadable",
            path.display()
        )));
    }
    Ok(())
}

/// Convert the text forms used by hosted runs into their JSON equivalents.
/// Values that cannot be converted are left untouched for the validator to
/// report.
fn normalize_param(key: &str, value: Value) -> Value {
    let Value::String(text) = value else {
        return value;
    };
    let trimmed = text.trim();

    match key {
        "param_extended_proj" if trimmed == "[]" => json!([]),
        "param_origin" | "param_destination" if trimmed != "auto" => {
            parse_triplet(trimmed).map(|t| json!(t)).unwrap_or(Value::String(text))
        }
        "param_mag_scale" | "param_st_duration" | "param_st_correlation" if trimmed != "auto" => {
            parse_number(trimmed).unwrap_or(Value::String(text))
        }
        "param_int_order" | "param_ext_order" => trimmed
            .parse::<i64>()
            .map(|n| json!(n))
            .unwrap_or(Value::String(text)),
        "param_ignore_ref" | "param_st_fixed" | "param_st_only" => match trimmed {
            "true" | "True" => Value::Bool(true),
            "false" | "False" => Value::Bool(false),
            _ => Value::String(text),
        },
        "param_skip_by_annotation" => json!(parse_label_list(trimmed)),
        _ => Value::String(text),
    }
}

/// Parse "x, y, z" (optionally bracketed) into three floats.
pub(crate) fn parse_triplet(s: &str) -> Option<[f64; 3]> {
    let inner = s.trim_start_matches('[').trim_end_matches(']');
    let values: Vec<f64> = inner
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    match values.as_slice() {
        [x, y, z] => Some([*x, *y, *z]),
        _ => None,
    }
}

fn parse_number(s: &str) -> Option<Value> {
    let n = s.parse::<f64>().ok()?;
    serde_json::Number::from_f64(n).map(Value::Number)
}

/// "[edge, bad_acq_skip]" → ["edge", "bad_acq_skip"]; "edge" → ["edge"].
fn parse_label_list(s: &str) -> Vec<String> {
    if let Some(inner) = s.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
        inner
            .split(',')
            .map(|label| label.trim().trim_matches(|c| c == '\'' || c == '"').to_string())
            .filter(|label| !label.is_empty())
            .collect()
    } else {
        vec![s.to_string()]
    }
}
