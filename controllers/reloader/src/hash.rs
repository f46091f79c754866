//! Content hashing of config resources.

use resource_client::Resource;
use serde_json::Value;
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;

/// The key/value data map of a config resource.
///
/// Missing or non-object `data` yields an empty map. Non-string values are
/// rendered as JSON.
pub fn content_data(resource: &Resource) -> BTreeMap<String, String> {
    match resource.data.get("data") {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key.clone(), value)
            })
            .collect(),
        _ => BTreeMap::new(),
    }
}

/// Hex SHA-1 over `key=value` for every entry, in ascending key order.
pub fn calculate_hash(data: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha1::new();
    for (key, value) in data {
        hasher.update(format!("{key}={value}").as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

pub fn resource_hash(resource: &Resource) -> String {
    calculate_hash(&content_data(resource))
}
