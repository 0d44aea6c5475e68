use plinth_core::{DynDeployer, PhaseOrder, PhaseRegistry, PlatformConfig, RegistryError, UnitError};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::{ComponentPlan, ComponentSpec, ComponentUnit};

/// Units that later components depend on, applied first and in this order
pub const DEFAULT_ORDER: &[&str] = &["crds", "base", "cert-manager"];

/// Every platform component, in registration order
pub const CATALOG: &[ComponentSpec] = &[
    ComponentSpec {
        name: "crds",
        manifests: &["platform-crds"],
        plan: plan_crds,
    },
    ComponentSpec {
        name: "base",
        manifests: &["network-base", "network-policies"],
        plan: plan_base,
    },
    ComponentSpec {
        name: "cert-manager",
        manifests: &["cert-manager", "cluster-issuer"],
        plan: plan_cert_manager,
    },
    ComponentSpec {
        name: "ingress",
        manifests: &["ingress-controller", "ingress-class"],
        plan: plan_ingress,
    },
    ComponentSpec {
        name: "postgres",
        manifests: &["postgres-operator", "postgres-cluster"],
        plan: plan_postgres,
    },
    ComponentSpec {
        name: "logging",
        manifests: &["log-agent"],
        plan: plan_logging,
    },
    ComponentSpec {
        name: "monitoring",
        manifests: &["prometheus", "grafana"],
        plan: plan_monitoring,
    },
];

pub fn default_order() -> PhaseOrder {
    PhaseOrder::new(DEFAULT_ORDER.iter().copied())
}

/// Registry with one unit per catalog entry
pub fn default_registry(
    deployer: DynDeployer,
    ready_timeout: Duration,
) -> Result<PhaseRegistry, RegistryError> {
    let mut registry = PhaseRegistry::new();
    for spec in CATALOG {
        registry.register(Arc::new(ComponentUnit::new(
            *spec,
            deployer.clone(),
            ready_timeout,
        )))?;
    }
    Ok(registry)
}

fn require<'a>(field: &str, value: Option<&'a str>) -> Result<&'a str, UnitError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(UnitError::missing_field(field)),
    }
}

fn plan_crds(cfg: &PlatformConfig) -> Result<ComponentPlan, UnitError> {
    let namespace = &cfg.global.namespace;
    if !cfg.crds.enabled {
        return Ok(ComponentPlan::disabled(namespace));
    }
    require("global.namespace", Some(namespace))?;
    Ok(ComponentPlan::enabled(namespace))
}

fn plan_base(cfg: &PlatformConfig) -> Result<ComponentPlan, UnitError> {
    let namespace = &cfg.global.namespace;
    if !cfg.base.enabled {
        return Ok(ComponentPlan::disabled(namespace));
    }
    require("base.network_provider", Some(&cfg.base.network_provider))?;
    if cfg.base.mtu == 0 {
        return Err(UnitError::failed("base.mtu must be greater than zero"));
    }
    Ok(ComponentPlan::enabled(namespace).wait_for("network-agent"))
}

fn plan_cert_manager(cfg: &PlatformConfig) -> Result<ComponentPlan, UnitError> {
    let section = &cfg.cert_manager;
    if !section.enabled {
        return Ok(ComponentPlan::disabled(&section.namespace));
    }
    match section.issuer.as_str() {
        "selfsigned" => {}
        "acme" => {
            require("cert_manager.acme_email", section.acme_email.as_deref())?;
        }
        other => {
            return Err(UnitError::failed(format!(
                "unsupported certificate issuer '{other}'"
            )));
        }
    }
    Ok(ComponentPlan::enabled(&section.namespace).wait_for("cert-manager-webhook"))
}

fn plan_ingress(cfg: &PlatformConfig) -> Result<ComponentPlan, UnitError> {
    let section = &cfg.ingress;
    if !section.enabled {
        return Ok(ComponentPlan::disabled(&section.namespace));
    }
    require("global.domain", Some(&cfg.global.domain))?;
    Ok(ComponentPlan::enabled(&section.namespace).wait_for("ingress-controller"))
}

fn plan_postgres(cfg: &PlatformConfig) -> Result<ComponentPlan, UnitError> {
    let section = &cfg.postgres;
    if !section.enabled {
        return Ok(ComponentPlan::disabled(&section.namespace));
    }
    let password = require(
        "postgres.superuser_password",
        section.superuser_password.as_deref(),
    )?;
    if section.tls {
        require("postgres.ca_file", section.ca_file.as_deref())?;
    }

    let data = BTreeMap::from([
        ("username".to_string(), "postgres".to_string()),
        ("password".to_string(), password.to_string()),
    ]);
    Ok(ComponentPlan::enabled(&section.namespace)
        .with_secret("postgres-superuser", data)
        .wait_for("postgres"))
}

fn plan_logging(cfg: &PlatformConfig) -> Result<ComponentPlan, UnitError> {
    let section = &cfg.logging;
    if !section.enabled {
        return Ok(ComponentPlan::disabled(&section.namespace));
    }
    Ok(ComponentPlan::enabled(&section.namespace))
}

fn plan_monitoring(cfg: &PlatformConfig) -> Result<ComponentPlan, UnitError> {
    let section = &cfg.monitoring;
    if !section.enabled {
        return Ok(ComponentPlan::disabled(&section.namespace));
    }
    let password = require(
        "monitoring.grafana_admin_password",
        section.grafana_admin_password.as_deref(),
    )?;
    let data = BTreeMap::from([("admin-password".to_string(), password.to_string())]);
    Ok(ComponentPlan::enabled(&section.namespace)
        .with_secret("grafana-admin", data)
        .wait_for("grafana"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use plinth_cluster_memory::InMemoryCluster;

    #[test]
    fn test_registry_matches_catalog() {
        let cluster = Arc::new(InMemoryCluster::new());
        let registry = default_registry(cluster, Duration::from_secs(1)).unwrap();
        let names: Vec<_> = registry.names().collect();
        assert_eq!(
            names,
            vec!["crds", "base", "cert-manager", "ingress", "postgres", "logging", "monitoring"]
        );

        let partition = registry.partition(&default_order());
        assert_eq!(partition.ordered_names(), DEFAULT_ORDER.to_vec());
    }

    #[test]
    fn test_postgres_requires_password_lazily() {
        let mut cfg = PlatformConfig::default();
        assert_eq!(
            plan_postgres(&cfg).unwrap_err(),
            UnitError::missing_field("postgres.superuser_password")
        );

        cfg.postgres.enabled = false;
        assert!(!plan_postgres(&cfg).unwrap().enabled);

        cfg.postgres.enabled = true;
        cfg.postgres.superuser_password = Some("hunter2".to_string());
        let plan = plan_postgres(&cfg).unwrap();
        assert_eq!(plan.secrets[0].data["password"], "hunter2");

        cfg.postgres.tls = true;
        assert_eq!(
            plan_postgres(&cfg).unwrap_err(),
            UnitError::missing_field("postgres.ca_file")
        );
    }

    #[test]
    fn test_cert_manager_issuers() {
        let mut cfg = PlatformConfig::default();
        assert!(plan_cert_manager(&cfg).is_ok());

        cfg.cert_manager.issuer = "acme".to_string();
        assert_eq!(
            plan_cert_manager(&cfg).unwrap_err(),
            UnitError::missing_field("cert_manager.acme_email")
        );

        cfg.cert_manager.acme_email = Some("ops@example.test".to_string());
        assert!(plan_cert_manager(&cfg).is_ok());

        cfg.cert_manager.issuer = "vault".to_string();
        assert!(plan_cert_manager(&cfg).is_err());
    }

    #[test]
    fn test_ingress_requires_domain() {
        let mut cfg = PlatformConfig::default();
        cfg.global.domain = String::new();
        assert_eq!(
            plan_ingress(&cfg).unwrap_err(),
            UnitError::missing_field("global.domain")
        );

        cfg.ingress.enabled = false;
        assert!(plan_ingress(&cfg).is_ok());
    }

    #[test]
    fn test_monitoring_disabled_by_default() {
        let plan = plan_monitoring(&PlatformConfig::default()).unwrap();
        assert!(!plan.enabled);
    }
}
