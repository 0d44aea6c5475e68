//! Platform configuration schema
//!
//! [`PlatformConfig`] is the typed shape of a configuration document. Its
//! `Default` is the built-in defaults document; every section rejects unknown
//! keys so that typos in a stored document fail resolution instead of being
//! silently ignored.

use plinth_config::FieldRegistry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

use crate::error::CoreError;

/// Fully typed platform configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlatformConfig {
    pub global: GlobalConfig,
    pub crds: CrdsConfig,
    pub base: BaseConfig,
    pub cert_manager: CertManagerConfig,
    pub ingress: IngressConfig,
    pub postgres: PostgresConfig,
    pub logging: LoggingConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GlobalConfig {
    /// Base DNS domain for platform endpoints
    pub domain: String,
    /// Namespace for cluster-wide platform objects
    pub namespace: String,
    pub image_registry: String,
    pub cluster_name: Option<String>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            domain: "platform.local".to_string(),
            namespace: "platform-system".to_string(),
            image_registry: "registry.platform.local".to_string(),
            cluster_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CrdsConfig {
    pub enabled: bool,
}

impl Default for CrdsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Base network layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BaseConfig {
    pub enabled: bool,
    pub network_provider: String,
    pub mtu: u32,
}

impl Default for BaseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            network_provider: "calico".to_string(),
            mtu: 1450,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CertManagerConfig {
    pub enabled: bool,
    pub namespace: String,
    /// `selfsigned` or `acme`
    pub issuer: String,
    /// Required when the issuer is `acme`
    pub acme_email: Option<String>,
    /// Path to a CA bundle, usually materialized from a secret
    pub ca_bundle_file: Option<String>,
}

impl Default for CertManagerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: "cert-manager".to_string(),
            issuer: "selfsigned".to_string(),
            acme_email: None,
            ca_bundle_file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngressConfig {
    pub enabled: bool,
    pub namespace: String,
    pub class_name: String,
    pub replicas: u32,
    pub tls_secret: Option<String>,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: "ingress".to_string(),
            class_name: "nginx".to_string(),
            replicas: 2,
            tls_secret: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PostgresConfig {
    pub enabled: bool,
    pub namespace: String,
    pub replicas: u32,
    pub storage_size: String,
    pub port: u16,
    /// Required when enabled
    pub superuser_password: Option<String>,
    pub tls: bool,
    pub ca_file: Option<String>,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: "postgres".to_string(),
            replicas: 1,
            storage_size: "10Gi".to_string(),
            port: 5432,
            superuser_password: None,
            tls: false,
            ca_file: None,
        }
    }
}

/// Log shipping agents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub namespace: String,
    pub retention_days: u32,
    pub endpoint: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: "logging".to_string(),
            retention_days: 7,
            endpoint: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub namespace: String,
    pub scrape_interval_secs: u64,
    pub grafana_admin_password: Option<String>,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            namespace: "monitoring".to_string(),
            scrape_interval_secs: 30,
            grafana_admin_password: None,
        }
    }
}

impl PlatformConfig {
    /// The built-in defaults document
    pub fn defaults_document() -> Value {
        serde_json::to_value(Self::default()).unwrap_or(Value::Null)
    }

    /// Load a defaults document from a TOML or JSON file.
    ///
    /// The file is checked against the schema; omitted keys keep the built-in
    /// defaults.
    pub fn load_defaults(path: &Path) -> Result<Value, CoreError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoreError::defaults(path, e.to_string()))?;

        let document: Value = match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => serde_json::from_str(&content)
                .map_err(|e| CoreError::defaults(path, e.to_string()))?,
            _ => toml::from_str(&content).map_err(|e| CoreError::defaults(path, e.to_string()))?,
        };

        let merged = plinth_config::resolve(&document, &Self::defaults_document())
            .map_err(|e| CoreError::defaults(path, e.to_string()))?;
        let typed: Self = serde_json::from_value(merged)
            .map_err(|e| CoreError::defaults(path, e.to_string()))?;

        Ok(serde_json::to_value(typed).unwrap_or(Value::Null))
    }

    /// Every field that an override directive may target
    pub fn field_registry() -> FieldRegistry<Self> {
        FieldRegistry::<Self>::new()
            .string("global.domain", |c| &mut c.global.domain)
            .string("global.namespace", |c| &mut c.global.namespace)
            .string("global.image_registry", |c| &mut c.global.image_registry)
            .optional_string("global.cluster_name", |c| &mut c.global.cluster_name)
            .boolean("crds.enabled", |c| &mut c.crds.enabled)
            .boolean("base.enabled", |c| &mut c.base.enabled)
            .string("base.network_provider", |c| &mut c.base.network_provider)
            .integer("base.mtu", |c| &mut c.base.mtu)
            .boolean("cert_manager.enabled", |c| &mut c.cert_manager.enabled)
            .string("cert_manager.namespace", |c| &mut c.cert_manager.namespace)
            .string("cert_manager.issuer", |c| &mut c.cert_manager.issuer)
            .optional_string("cert_manager.acme_email", |c| &mut c.cert_manager.acme_email)
            .optional_string("cert_manager.ca_bundle_file", |c| {
                &mut c.cert_manager.ca_bundle_file
            })
            .boolean("ingress.enabled", |c| &mut c.ingress.enabled)
            .string("ingress.namespace", |c| &mut c.ingress.namespace)
            .string("ingress.class_name", |c| &mut c.ingress.class_name)
            .integer("ingress.replicas", |c| &mut c.ingress.replicas)
            .optional_string("ingress.tls_secret", |c| &mut c.ingress.tls_secret)
            .boolean("postgres.enabled", |c| &mut c.postgres.enabled)
            .string("postgres.namespace", |c| &mut c.postgres.namespace)
            .integer("postgres.replicas", |c| &mut c.postgres.replicas)
            .string("postgres.storage_size", |c| &mut c.postgres.storage_size)
            .integer("postgres.port", |c| &mut c.postgres.port)
            .optional_string("postgres.superuser_password", |c| {
                &mut c.postgres.superuser_password
            })
            .boolean("postgres.tls", |c| &mut c.postgres.tls)
            .optional_string("postgres.ca_file", |c| &mut c.postgres.ca_file)
            .boolean("logging.enabled", |c| &mut c.logging.enabled)
            .string("logging.namespace", |c| &mut c.logging.namespace)
            .integer("logging.retention_days", |c| &mut c.logging.retention_days)
            .optional_string("logging.endpoint", |c| &mut c.logging.endpoint)
            .boolean("monitoring.enabled", |c| &mut c.monitoring.enabled)
            .string("monitoring.namespace", |c| &mut c.monitoring.namespace)
            .integer("monitoring.scrape_interval_secs", |c| {
                &mut c.monitoring.scrape_interval_secs
            })
            .optional_string("monitoring.grafana_admin_password", |c| {
                &mut c.monitoring.grafana_admin_password
            })
    }
}
