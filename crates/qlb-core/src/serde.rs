//! Canonical JSON and YAML helpers.

use std::collections::BTreeMap;
use std::iter::FromIterator;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::errors::{ErrorInfo, QlbError};

fn serde_error(code: &str, err: impl ToString) -> QlbError {
    QlbError::Serde(ErrorInfo::new(code, err.to_string()))
}

/// Recursively sorts object keys so equal values render identically.
pub fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let ordered = map
                .into_iter()
                .map(|(key, value)| (key, canonicalize(value)))
                .collect::<BTreeMap<_, _>>();
            Value::Object(Map::from_iter(ordered))
        }
        Value::Array(values) => {
            let canonical_values = values.into_iter().map(canonicalize).collect();
            Value::Array(canonical_values)
        }
        other => other,
    }
}

/// Renders a JSON value as compact canonical text.
///
/// This is the string form used for parameter identity, so it must stay stable
/// across releases: strings keep their quotes and floats use the shortest
/// round-trip representation.
pub fn canonical_text(value: &Value) -> String {
    canonicalize(value.clone()).to_string()
}

/// Serializes a value into pretty printed canonical JSON bytes.
pub fn to_pretty_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, QlbError> {
    let value = serde_json::to_value(value).map_err(|err| serde_error("json_serialize", err))?;
    let canonical = canonicalize(value);
    serde_json::to_vec_pretty(&canonical).map_err(|err| serde_error("json_write", err))
}

/// Deserializes a value from JSON bytes.
pub fn from_json_slice<T: DeserializeOwned>(data: &[u8]) -> Result<T, QlbError> {
    serde_json::from_slice(data).map_err(|err| serde_error("json_deserialize", err))
}

/// Serializes a value into deterministic YAML.
pub fn to_yaml_string<T: Serialize>(value: &T) -> Result<String, QlbError> {
    serde_yaml::to_string(value).map_err(|err| serde_error("yaml_serialize", err))
}

/// Deserializes a YAML payload into the requested type.
pub fn from_yaml_slice<T: DeserializeOwned>(data: &[u8]) -> Result<T, QlbError> {
    serde_yaml::from_slice(data).map_err(|err| serde_error("yaml_deserialize", err))
}
