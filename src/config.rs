//! Stack configuration serialization for the child program.
//!
//! The engine hands the host a flat `key -> value` map plus a list of secret
//! keys. The NodeJS SDK expects both as environment variables: `PULUMI_CONFIG`
//! holding a JSON object whose keys are normalized to the
//! `<namespace>:config:<name>` form, and `PULUMI_CONFIG_SECRET_KEYS` holding a
//! JSON array of the secret key names.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::{HostError, HostResult};

/// A parsed configuration key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigKey {
    pub namespace: String,
    pub name: String,
}

/// Parses a configuration key of the form `namespace:name`. The explicit
/// `namespace:config:name` form is accepted and collapses to the same key.
pub fn parse_key(raw: &str) -> HostResult<ConfigKey> {
    let parts: Vec<&str> = raw.split(':').collect();
    match parts.as_slice() {
        [namespace, name] if !namespace.is_empty() && !name.is_empty() => Ok(ConfigKey {
            namespace: (*namespace).to_string(),
            name: (*name).to_string(),
        }),
        [namespace, "config", name] if !namespace.is_empty() && !name.is_empty() => Ok(ConfigKey {
            namespace: (*namespace).to_string(),
            name: (*name).to_string(),
        }),
        _ => Err(HostError::Config(format!(
            "invalid configuration key '{raw}': expected a key of the form 'namespace:name'"
        ))),
    }
}

/// Serializes the request config map to the `PULUMI_CONFIG` payload. An empty
/// map serializes to `"{}"`.
pub fn construct_config(config: &HashMap<String, String>) -> HostResult<String> {
    let mut out = Map::new();
    for (raw, value) in config {
        let key = parse_key(raw)?;
        out.insert(
            format!("{}:config:{}", key.namespace, key.name),
            Value::String(value.clone()),
        );
    }
    Ok(serde_json::to_string(&Value::Object(out))?)
}

/// Serializes the secret key list to the `PULUMI_CONFIG_SECRET_KEYS` payload.
/// An empty list serializes to `"[]"`.
pub fn construct_secret_keys(keys: &[String]) -> HostResult<String> {
    Ok(serde_json::to_string(keys)?)
}
