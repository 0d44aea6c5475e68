//! Content checksums of resolved configurations

use plinth_config::MaterializedField;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Value recorded in place of a materialized temp file path
const MATERIALIZED_PREFIX: &str = "materialized:sha256:";

/// SHA-256 hex digest of a canonical configuration serialization
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(String);

impl Checksum {
    /// Checksum of `config`, with every materialized field replaced by the
    /// fingerprint of its contents.
    pub fn compute<T: Serialize>(config: &T, materialized: &[MaterializedField]) -> Self {
        let mut value = serde_json::to_value(config).unwrap_or(Value::Null);
        for field in materialized {
            if let Some(slot) = lookup_mut(&mut value, &field.field_path) {
                *slot = Value::String(format!("{MATERIALIZED_PREFIX}{}", field.fingerprint));
            }
        }

        let canonical = serde_json::to_vec(&canonicalize(value)).unwrap_or_default();
        Self(hex::encode(Sha256::digest(&canonical)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Checksum {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Rebuild objects with keys in sorted order
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, child)| (key, canonicalize(child)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

fn lookup_mut<'a>(value: &'a mut Value, dotted: &str) -> Option<&'a mut Value> {
    dotted
        .split('.')
        .try_fold(value, |current, segment| current.get_mut(segment))
}
