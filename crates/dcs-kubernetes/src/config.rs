//! Environment-driven configuration of the agent's coordination identity.
//!
//! Every replica runs with the same variables injected by the operator;
//! only the pod name differs, which is what makes identities unique.

use std::env;

use helmsman_dcs::{DEFAULT_TTL, DcsConfig, codec};

use crate::error::Error;

/// Namespace the cluster runs in.
pub const NAMESPACE_ENV: &str = "HELMSMAN_NAMESPACE";

/// This pod's name; doubles as the member identity.
pub const POD_NAME_ENV: &str = "HELMSMAN_POD_NAME";

/// Cluster name.
pub const CLUSTER_NAME_ENV: &str = "HELMSMAN_CLUSTER_NAME";

/// Component name within the cluster.
pub const COMPONENT_NAME_ENV: &str = "HELMSMAN_COMP_NAME";

/// Lease TTL in seconds.
pub const TTL_ENV: &str = "HELMSMAN_TTL";

/// Max replication lag tolerated on switchover.
pub const MAX_LAG_ENV: &str = "HELMSMAN_MAX_LAG";

/// Whether HA management starts enabled.
pub const ENABLE_HA_ENV: &str = "HELMSMAN_ENABLE_HA";

/// Database port to fall back to when a pod declares none.
pub const SERVICE_PORT_ENV: &str = "HELMSMAN_SERVICE_PORT";

/// DNS domain of the hosting cluster.
pub const CLUSTER_DOMAIN_ENV: &str = "KUBERNETES_CLUSTER_DOMAIN";

const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";
const DEFAULT_SERVICE_PORT: &str = "5432";

/// Agent configuration resolved from the pod environment.
#[derive(Clone, Debug)]
pub struct Config {
    /// Namespace holding the cluster and its coordination resources.
    pub namespace: String,

    /// This pod's name.
    pub pod_name: String,

    /// Cluster name.
    pub cluster_name: String,

    /// Component name within the cluster.
    pub component_name: String,

    /// Lease TTL in seconds.
    pub ttl: i64,

    /// Max replication lag tolerated on switchover.
    pub max_lag_on_switchover: i64,

    /// Whether HA management starts enabled.
    pub ha_enabled: bool,

    /// DNS domain of the hosting cluster.
    pub cluster_domain: String,

    /// Database port to fall back to when a pod declares none.
    pub service_port: String,
}

impl Config {
    /// Resolves the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a required variable is missing or a
    /// numeric/boolean one fails to parse.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            namespace: required(&lookup, NAMESPACE_ENV)?,
            pod_name: required(&lookup, POD_NAME_ENV)?,
            cluster_name: required(&lookup, CLUSTER_NAME_ENV)?,
            component_name: required(&lookup, COMPONENT_NAME_ENV)?,
            ttl: parsed_i64(&lookup, TTL_ENV, DEFAULT_TTL)?,
            max_lag_on_switchover: parsed_i64(
                &lookup,
                MAX_LAG_ENV,
                codec::DEFAULT_MAX_LAG_ON_SWITCHOVER,
            )?,
            ha_enabled: parsed_bool(&lookup, ENABLE_HA_ENV, true)?,
            cluster_domain: lookup(CLUSTER_DOMAIN_ENV)
                .unwrap_or_else(|| DEFAULT_CLUSTER_DOMAIN.to_string()),
            service_port: lookup(SERVICE_PORT_ENV)
                .unwrap_or_else(|| DEFAULT_SERVICE_PORT.to_string()),
        })
    }

    /// `<cluster>-<component>`, the name of the defining workload.
    #[must_use]
    pub fn cluster_comp_name(&self) -> String {
        format!("{}-{}", self.cluster_name, self.component_name)
    }

    /// The coordination engine configuration this environment describes.
    #[must_use]
    pub fn dcs_config(&self) -> DcsConfig {
        let mut config = DcsConfig::new(
            self.cluster_name.clone(),
            self.component_name.clone(),
            self.namespace.clone(),
            self.pod_name.clone(),
        );
        config.cluster_domain = self.cluster_domain.clone();
        config.ttl = self.ttl;
        config.max_lag_on_switchover = self.max_lag_on_switchover;
        config.ha_enabled = self.ha_enabled;
        config
    }
}

fn required<F>(lookup: &F, key: &'static str) -> Result<String, Error>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Config(format!("{key} is not set")))
}

fn parsed_i64<F>(lookup: &F, key: &'static str, default: i64) -> Result<i64, Error>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| Error::Config(format!("{key}: expected an integer, got {raw:?}"))),
    }
}

fn parsed_bool<F>(lookup: &F, key: &'static str, default: bool) -> Result<bool, Error>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| Error::Config(format!("{key}: expected true or false, got {raw:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn resolves_with_defaults() {
        let config = Config::from_lookup(env(&[
            (NAMESPACE_ENV, "prod"),
            (POD_NAME_ENV, "pg-replicaset-0"),
            (CLUSTER_NAME_ENV, "pg"),
            (COMPONENT_NAME_ENV, "replicaset"),
        ]))
        .unwrap();

        assert_eq!(config.cluster_comp_name(), "pg-replicaset");
        assert_eq!(config.ttl, DEFAULT_TTL);
        assert!(config.ha_enabled);
        assert_eq!(config.cluster_domain, "cluster.local");

        let dcs = config.dcs_config();
        assert_eq!(dcs.current_member, "pg-replicaset-0");
        assert_eq!(dcs.namespace, "prod");
    }

    #[test]
    fn overrides_apply() {
        let config = Config::from_lookup(env(&[
            (NAMESPACE_ENV, "prod"),
            (POD_NAME_ENV, "pg-replicaset-0"),
            (CLUSTER_NAME_ENV, "pg"),
            (COMPONENT_NAME_ENV, "replicaset"),
            (TTL_ENV, "15"),
            (ENABLE_HA_ENV, "false"),
            (CLUSTER_DOMAIN_ENV, "k8s.example"),
        ]))
        .unwrap();

        assert_eq!(config.ttl, 15);
        assert!(!config.ha_enabled);
        assert_eq!(config.cluster_domain, "k8s.example");
    }

    #[test]
    fn missing_identity_is_an_error() {
        let err = Config::from_lookup(env(&[(NAMESPACE_ENV, "prod")])).unwrap_err();
        assert!(err.to_string().contains(POD_NAME_ENV));
    }

    #[test]
    fn malformed_ttl_is_an_error() {
        let err = Config::from_lookup(env(&[
            (NAMESPACE_ENV, "prod"),
            (POD_NAME_ENV, "pg-replicaset-0"),
            (CLUSTER_NAME_ENV, "pg"),
            (COMPONENT_NAME_ENV, "replicaset"),
            (TTL_ENV, "soon"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains(TTL_ENV));
    }
}
