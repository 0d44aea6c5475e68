//! Stored configuration documents
//!
//! A [`ConfigurationSpec`] is what an operator declares: a partial
//! configuration tree, the override directives that fill fields from
//! secret/config stores, and an optional re-run token.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ConfigError;
use crate::overrides::OverrideDirective;

/// Desired state as declared by its owner, before defaulting
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationSpec {
    /// Partially specified configuration document
    #[serde(default)]
    pub config: Value,
    /// Fields replaced from external stores on every pass
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<OverrideDirective>,
    /// Changing this token requests a re-apply even when nothing else changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerun: Option<String>,
}

impl ConfigurationSpec {
    /// Create a spec from a bare configuration document
    pub fn new(config: Value) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Add an override directive
    pub fn with_override(mut self, directive: OverrideDirective) -> Self {
        self.overrides.push(directive);
        self
    }

    /// Parse from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| ConfigError::parse(format!("TOML parse error: {e}")))
    }

    /// Parse from JSON string
    pub fn from_json(json_str: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json_str)
            .map_err(|e| ConfigError::parse(format!("JSON parse error: {e}")))
    }

    /// Parse from JSON value
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        serde_json::from_value(value)
            .map_err(|e| ConfigError::parse(format!("JSON parse error: {e}")))
    }

    /// Serialize to a JSON value
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
