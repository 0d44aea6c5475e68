//! Override directives
//!
//! An override replaces one field of the resolved configuration with a value
//! fetched from a secret or config store at reconciliation time. Directives
//! are applied in declaration order; the first failure aborts the pass.

mod materialize;
mod registry;

pub use materialize::{MaterializedFiles, fingerprint};
pub use registry::{FieldEntry, FieldKind, FieldRegistry};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::stores::{StoreError, StoreSet, ValueRef};

/// Where an override value comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueSource {
    SecretRef(ValueRef),
    ConfigRef(ValueRef),
}

impl ValueSource {
    pub fn reference(&self) -> &ValueRef {
        match self {
            Self::SecretRef(reference) | Self::ConfigRef(reference) => reference,
        }
    }

    pub fn reference_mut(&mut self) -> &mut ValueRef {
        match self {
            Self::SecretRef(reference) | Self::ConfigRef(reference) => reference,
        }
    }
}

/// Instruction to replace one configuration field from an external store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideDirective {
    /// Dotted path of the target field, e.g. `postgres.superuser_password`
    pub field_path: String,
    pub source: ValueSource,
    /// Write the value to a temp file and substitute the file path
    #[serde(default)]
    pub materialize_as_file: bool,
}

impl OverrideDirective {
    pub fn secret(field_path: impl Into<String>, reference: ValueRef) -> Self {
        Self {
            field_path: field_path.into(),
            source: ValueSource::SecretRef(reference),
            materialize_as_file: false,
        }
    }

    pub fn config(field_path: impl Into<String>, reference: ValueRef) -> Self {
        Self {
            field_path: field_path.into(),
            source: ValueSource::ConfigRef(reference),
            materialize_as_file: false,
        }
    }

    pub fn as_file(mut self) -> Self {
        self.materialize_as_file = true;
        self
    }
}

/// Errors raised while applying overrides
#[derive(Debug, thiserror::Error)]
pub enum OverrideError {
    #[error("override for '{field}': {source}")]
    Store {
        field: String,
        #[source]
        source: StoreError,
    },

    #[error("override field '{field}' is not a known configuration field")]
    FieldNotFound { field: String },

    #[error("override for {kind} field '{field}' has invalid value '{value}': {reason}")]
    TypeCoercion {
        field: String,
        value: String,
        kind: FieldKind,
        reason: String,
    },

    #[error("override for '{field}': failed to materialize value as file: {source}")]
    Materialize {
        field: String,
        #[source]
        source: std::io::Error,
    },
}

impl OverrideError {
    /// True for store lookups that failed because the store was unreachable
    pub fn is_lookup(&self) -> bool {
        matches!(
            self,
            Self::Store {
                source: StoreError::Lookup { .. },
                ..
            }
        )
    }

    /// True for store lookups that found no value
    pub fn is_key_not_found(&self) -> bool {
        matches!(
            self,
            Self::Store {
                source: StoreError::KeyNotFound { .. },
                ..
            }
        )
    }
}

/// A field whose effective value is a materialized file path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedField {
    pub field_path: String,
    /// SHA-256 of the materialized contents
    pub fingerprint: String,
}

/// Outcome of a successful override pass
///
/// Holds the temp files backing materialized fields; dropping it removes them.
#[derive(Debug, Default)]
pub struct AppliedOverrides {
    pub files: MaterializedFiles,
    pub materialized: Vec<MaterializedField>,
    pub applied: Vec<String>,
}

/// Apply `directives` to `cfg` in order.
///
/// On error, fields assigned by earlier directives stay assigned in `cfg`
/// (callers discard it) and every temp file created so far is removed.
pub async fn apply_overrides<T>(
    cfg: &mut T,
    directives: &[OverrideDirective],
    registry: &FieldRegistry<T>,
    stores: &StoreSet,
) -> Result<AppliedOverrides, OverrideError> {
    let mut outcome = AppliedOverrides::default();

    for directive in directives {
        let field = directive.field_path.as_str();

        let raw = stores
            .fetch(&directive.source)
            .await
            .map_err(|source| OverrideError::Store {
                field: field.to_string(),
                source,
            })?;

        let (value, fingerprint) = if directive.materialize_as_file {
            let path = outcome
                .files
                .materialize(&raw)
                .map_err(|source| OverrideError::Materialize {
                    field: field.to_string(),
                    source,
                })?;
            (path.to_string_lossy().into_owned(), Some(fingerprint(&raw)))
        } else {
            (raw, None)
        };

        let entry = registry
            .get(field)
            .ok_or_else(|| OverrideError::FieldNotFound {
                field: field.to_string(),
            })?;

        entry
            .assign(cfg, &value)
            .map_err(|reason| OverrideError::TypeCoercion {
                field: field.to_string(),
                value: value.clone(),
                kind: entry.kind(),
                reason,
            })?;

        debug!(
            field,
            source = %directive.source.reference(),
            materialized = directive.materialize_as_file,
            "Applied override"
        );

        // The last directive on a path decides whether it is materialized
        outcome.materialized.retain(|m| m.field_path != field);
        if let Some(fingerprint) = fingerprint {
            outcome.materialized.push(MaterializedField {
                field_path: field.to_string(),
                fingerprint,
            });
        }
        outcome.applied.push(field.to_string());
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::StaticStore;
    use std::sync::Arc;

    #[derive(Debug, Default, Clone)]
    struct Doc {
        password: Option<String>,
        ca_file: String,
        replicas: u32,
        tls: bool,
    }

    fn registry() -> FieldRegistry<Doc> {
        FieldRegistry::<Doc>::new()
            .optional_string("db.password", |d| &mut d.password)
            .string("db.ca_file", |d| &mut d.ca_file)
            .integer("db.replicas", |d| &mut d.replicas)
            .boolean("db.tls", |d| &mut d.tls)
    }

    fn stores() -> (Arc<StaticStore>, StoreSet) {
        let secrets = Arc::new(
            StaticStore::new("secret")
                .with_value(ValueRef::new("db", "password"), "hunter2")
                .with_value(ValueRef::new("db", "ca"), "-----BEGIN CERTIFICATE-----")
                .with_value(ValueRef::new("flags", "tls"), "true")
                .with_value(ValueRef::new("flags", "bogus"), "notabool"),
        );
        let config = Arc::new(
            StaticStore::new("config").with_value(ValueRef::new("sizing", "replicas"), "3"),
        );
        (secrets.clone(), StoreSet::new(secrets, config))
    }

    #[tokio::test]
    async fn test_applies_in_order_with_coercion() {
        let (_, stores) = stores();
        let mut doc = Doc::default();
        let directives = vec![
            OverrideDirective::secret("db.password", ValueRef::new("db", "password")),
            OverrideDirective::config("db.replicas", ValueRef::new("sizing", "replicas")),
            OverrideDirective::secret("db.tls", ValueRef::new("flags", "tls")),
        ];

        let applied = apply_overrides(&mut doc, &directives, &registry(), &stores)
            .await
            .unwrap();

        assert_eq!(doc.password.as_deref(), Some("hunter2"));
        assert_eq!(doc.replicas, 3);
        assert!(doc.tls);
        assert_eq!(applied.applied, vec!["db.password", "db.replicas", "db.tls"]);
        assert!(applied.files.is_empty());
    }

    #[tokio::test]
    async fn test_later_directive_wins() {
        let (secrets, stores) = stores();
        secrets.insert(ValueRef::new("db", "rotated"), "new-pass").await;
        let mut doc = Doc {
            password: Some("user-set".to_string()),
            ..Default::default()
        };
        let directives = vec![
            OverrideDirective::secret("db.password", ValueRef::new("db", "password")),
            OverrideDirective::secret("db.password", ValueRef::new("db", "rotated")),
        ];

        apply_overrides(&mut doc, &directives, &registry(), &stores)
            .await
            .unwrap();
        assert_eq!(doc.password.as_deref(), Some("new-pass"));
    }

    #[tokio::test]
    async fn test_boolean_coercion_failure_keeps_previous_value() {
        let (_, stores) = stores();
        let mut doc = Doc {
            tls: false,
            ..Default::default()
        };
        let directives = vec![OverrideDirective::secret(
            "db.tls",
            ValueRef::new("flags", "bogus"),
        )];

        let err = apply_overrides(&mut doc, &directives, &registry(), &stores)
            .await
            .unwrap_err();

        match &err {
            OverrideError::TypeCoercion {
                field, value, kind, ..
            } => {
                assert_eq!(field, "db.tls");
                assert_eq!(value, "notabool");
                assert_eq!(*kind, FieldKind::Boolean);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("db.tls"));
        assert!(err.to_string().contains("notabool"));
        assert!(!doc.tls);
    }

    #[tokio::test]
    async fn test_unknown_field() {
        let (_, stores) = stores();
        let mut doc = Doc::default();
        let directives = vec![OverrideDirective::secret(
            "db.nope",
            ValueRef::new("db", "password"),
        )];

        let err = apply_overrides(&mut doc, &directives, &registry(), &stores)
            .await
            .unwrap_err();
        assert!(matches!(err, OverrideError::FieldNotFound { ref field } if field == "db.nope"));
    }

    #[tokio::test]
    async fn test_missing_key_and_unreachable_store() {
        let (secrets, stores) = stores();
        let mut doc = Doc::default();

        let missing = vec![OverrideDirective::secret(
            "db.password",
            ValueRef::new("db", "absent"),
        )];
        let err = apply_overrides(&mut doc, &missing, &registry(), &stores)
            .await
            .unwrap_err();
        assert!(err.is_key_not_found());

        secrets.set_unreachable(true);
        let present = vec![OverrideDirective::secret(
            "db.password",
            ValueRef::new("db", "password"),
        )];
        let err = apply_overrides(&mut doc, &present, &registry(), &stores)
            .await
            .unwrap_err();
        assert!(err.is_lookup());
        assert!(doc.password.is_none());
    }

    #[tokio::test]
    async fn test_materialize_substitutes_path() {
        let (_, stores) = stores();
        let mut doc = Doc::default();
        let directives =
            vec![OverrideDirective::secret("db.ca_file", ValueRef::new("db", "ca")).as_file()];

        let applied = apply_overrides(&mut doc, &directives, &registry(), &stores)
            .await
            .unwrap();

        let path = std::path::PathBuf::from(&doc.ca_file);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "-----BEGIN CERTIFICATE-----"
        );
        assert_eq!(applied.materialized.len(), 1);
        assert_eq!(
            applied.materialized[0].fingerprint,
            fingerprint("-----BEGIN CERTIFICATE-----")
        );

        drop(applied);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_plain_directive_replaces_materialized_field() {
        let (secrets, stores) = stores();
        secrets.insert(ValueRef::new("db", "ca-path"), "/etc/ca.pem").await;
        let mut doc = Doc::default();
        let directives = vec![
            OverrideDirective::secret("db.ca_file", ValueRef::new("db", "ca")).as_file(),
            OverrideDirective::secret("db.ca_file", ValueRef::new("db", "ca-path")),
        ];

        let applied = apply_overrides(&mut doc, &directives, &registry(), &stores)
            .await
            .unwrap();

        assert_eq!(doc.ca_file, "/etc/ca.pem");
        assert!(applied.materialized.is_empty());
    }

    #[tokio::test]
    async fn test_materialized_files_removed_on_failure() {
        let (_, stores) = stores();
        let mut doc = Doc::default();
        let directives = vec![
            OverrideDirective::secret("db.ca_file", ValueRef::new("db", "ca")).as_file(),
            OverrideDirective::secret("db.tls", ValueRef::new("flags", "bogus")),
        ];

        let err = apply_overrides(&mut doc, &directives, &registry(), &stores)
            .await
            .unwrap_err();
        assert!(matches!(err, OverrideError::TypeCoercion { .. }));

        let leaked = std::path::PathBuf::from(&doc.ca_file);
        assert!(!leaked.exists());
    }

    #[tokio::test]
    async fn test_materialize_into_integer_field_is_coercion_error() {
        let (_, stores) = stores();
        let mut doc = Doc::default();
        let directives =
            vec![OverrideDirective::secret("db.replicas", ValueRef::new("db", "ca")).as_file()];

        let err = apply_overrides(&mut doc, &directives, &registry(), &stores)
            .await
            .unwrap_err();
        assert!(matches!(err, OverrideError::TypeCoercion { kind: FieldKind::Integer, .. }));
    }
}
