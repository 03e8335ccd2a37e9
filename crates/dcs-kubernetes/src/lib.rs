//! Kubernetes-backed implementation of the versioned resource store.
//!
//! Coordination state lives in annotated `ConfigMap`s: the object's
//! `resourceVersion` is the version token, so a conditional update is a
//! `replace` carrying the version read, rejected by the API server with a
//! 409 when a concurrent writer got there first. Cluster metadata comes
//! from the component `StatefulSet` and membership from the pod listing.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod config;
mod error;

pub use config::Config;
pub use error::Error;

use std::collections::BTreeMap;

use async_trait::async_trait;
use helmsman_dcs::{
    ClusterResource, ClusterSource, DcsStore, Member, Resource, VersionedStore,
};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, ContainerPort, Pod};
use kube::Client;
use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, PostParams};
use tracing::debug;

/// Well-known label selecting the pods of one cluster.
const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";

/// Well-known label selecting the pods of one component within a cluster.
const COMPONENT_LABEL: &str = "app.kubernetes.io/component";

/// Label carrying the platform's role probe verdict for a pod.
const ROLE_LABEL: &str = "helmsman.io/role";

/// Name of the container port carrying database traffic.
const DB_PORT_NAME: &str = "db";

/// Versioned resource store backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubernetesStore {
    config_maps: Api<ConfigMap>,
    pods: Api<Pod>,
    stateful_sets: Api<StatefulSet>,
    config: Config,
}

impl KubernetesStore {
    /// Connects using the ambient kubeconfig or in-cluster service account
    /// and the pod environment.
    ///
    /// # Errors
    ///
    /// Returns an error when the environment is incomplete or no client
    /// configuration can be inferred.
    pub async fn try_default() -> Result<Self, Error> {
        let config = Config::from_env()?;
        let client = Client::try_default().await?;
        Ok(Self::new(client, config))
    }

    /// Builds a store over an existing client.
    #[must_use]
    pub fn new(client: Client, config: Config) -> Self {
        let namespace = config.namespace.clone();
        Self {
            config_maps: Api::namespaced(client.clone(), &namespace),
            pods: Api::namespaced(client.clone(), &namespace),
            stateful_sets: Api::namespaced(client, &namespace),
            config,
        }
    }

    /// Wraps this store into a ready-to-use coordination engine.
    #[must_use]
    pub fn into_dcs(self) -> DcsStore<Self> {
        let config = self.config.dcs_config();
        DcsStore::new(self, config)
    }
}

fn resource_from_config_map(cm: &ConfigMap) -> Result<Resource, Error> {
    let meta = &cm.metadata;
    let name = meta.name.clone().unwrap_or_default();
    let version = meta
        .resource_version
        .clone()
        .ok_or_else(|| Error::MalformedObject {
            name: name.clone(),
            field: "resourceVersion",
        })?;

    Ok(Resource {
        name,
        version,
        uid: meta.uid.clone().unwrap_or_default(),
        created_at: creation_timestamp(&cm.metadata),
        annotations: meta.annotations.clone().unwrap_or_default(),
    })
}

fn creation_timestamp(meta: &ObjectMeta) -> i64 {
    meta.creation_timestamp
        .as_ref()
        .map_or(0, |t| t.0.timestamp())
}

fn config_map_for(
    namespace: &str,
    name: &str,
    annotations: BTreeMap<String, String>,
    resource_version: Option<String>,
) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            annotations: Some(annotations),
            resource_version,
            ..ObjectMeta::default()
        },
        ..ConfigMap::default()
    }
}

fn member_from_pod(pod: &Pod, fallback_port: &str) -> Member {
    let meta = &pod.metadata;
    Member {
        name: meta.name.clone().unwrap_or_default(),
        uid: meta.uid.clone().unwrap_or_default(),
        addr: pod
            .status
            .as_ref()
            .and_then(|s| s.pod_ip.clone())
            .unwrap_or_default(),
        port: db_port(pod, fallback_port),
        role: meta
            .labels
            .as_ref()
            .and_then(|labels| labels.get(ROLE_LABEL))
            .cloned()
            .unwrap_or_default(),
    }
}

/// Resolves a pod's database port: the container port named for database
/// traffic, else the first declared port, else the configured fallback.
fn db_port(pod: &Pod, fallback: &str) -> String {
    let ports: Vec<&ContainerPort> = pod.spec.as_ref().map_or_else(Vec::new, |spec| {
        spec.containers
            .iter()
            .flat_map(|c| c.ports.as_deref().unwrap_or_default())
            .collect()
    });

    ports
        .iter()
        .find(|p| p.name.as_deref() == Some(DB_PORT_NAME))
        .or_else(|| ports.first())
        .map_or_else(|| fallback.to_string(), |p| p.container_port.to_string())
}

#[async_trait]
impl VersionedStore for KubernetesStore {
    type Error = Error;

    async fn get(&self, name: &str) -> Result<Option<Resource>, Self::Error> {
        match self.config_maps.get_opt(name).await? {
            Some(cm) => Ok(Some(resource_from_config_map(&cm)?)),
            None => Ok(None),
        }
    }

    async fn create(
        &self,
        name: &str,
        annotations: BTreeMap<String, String>,
    ) -> Result<Resource, Self::Error> {
        let cm = config_map_for(&self.config.namespace, name, annotations, None);
        let created = self.config_maps.create(&PostParams::default(), &cm).await?;
        debug!(name = %name, "created config map");
        resource_from_config_map(&created)
    }

    async fn update(
        &self,
        resource: &Resource,
        annotations: BTreeMap<String, String>,
    ) -> Result<Resource, Self::Error> {
        let cm = config_map_for(
            &self.config.namespace,
            &resource.name,
            annotations,
            Some(resource.version.clone()),
        );
        let updated = self
            .config_maps
            .replace(&resource.name, &PostParams::default(), &cm)
            .await?;
        resource_from_config_map(&updated)
    }

    async fn delete(&self, name: &str) -> Result<(), Self::Error> {
        self.config_maps.delete(name, &DeleteParams::default()).await?;
        debug!(name = %name, "deleted config map");
        Ok(())
    }
}

#[async_trait]
impl ClusterSource for KubernetesStore {
    type Error = Error;

    async fn cluster(&self) -> Result<ClusterResource, Self::Error> {
        let name = self.config.cluster_comp_name();
        let sts = self.stateful_sets.get(&name).await?;
        Ok(ClusterResource {
            name,
            namespace: self.config.namespace.clone(),
            uid: sts.metadata.uid.clone().unwrap_or_default(),
            replicas: sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0),
            created_at: creation_timestamp(&sts.metadata),
        })
    }

    async fn members(&self) -> Result<Vec<Member>, Self::Error> {
        let selector = format!(
            "{INSTANCE_LABEL}={},{COMPONENT_LABEL}={}",
            self.config.cluster_name, self.config.component_name
        );
        let pods = self.pods.list(&ListParams::default().labels(&selector)).await?;
        Ok(pods
            .items
            .iter()
            .map(|pod| member_from_pod(pod, &self.config.service_port))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::{Container, PodSpec, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    use super::*;

    fn annotated_config_map(version: Option<&str>) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some("pg-replicaset-leader".to_string()),
                uid: Some("cm-uid".to_string()),
                resource_version: version.map(ToString::to_string),
                creation_timestamp: Some(Time(
                    chrono::DateTime::from_timestamp(100, 0).unwrap(),
                )),
                annotations: Some(
                    [("leader".to_string(), "pg-replicaset-0".to_string())].into(),
                ),
                ..ObjectMeta::default()
            },
            ..ConfigMap::default()
        }
    }

    #[test]
    fn config_map_maps_to_resource() {
        let resource = resource_from_config_map(&annotated_config_map(Some("42"))).unwrap();

        assert_eq!(resource.name, "pg-replicaset-leader");
        assert_eq!(resource.version, "42");
        assert_eq!(resource.uid, "cm-uid");
        assert_eq!(resource.created_at, 100);
        assert_eq!(resource.annotations["leader"], "pg-replicaset-0");
    }

    #[test]
    fn missing_resource_version_is_malformed() {
        let err = resource_from_config_map(&annotated_config_map(None)).unwrap_err();
        assert!(matches!(
            err,
            Error::MalformedObject {
                field: "resourceVersion",
                ..
            }
        ));
    }

    #[test]
    fn pod_maps_to_member() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("pg-replicaset-1".to_string()),
                uid: Some("pod-uid".to_string()),
                labels: Some([(ROLE_LABEL.to_string(), "follower".to_string())].into()),
                ..ObjectMeta::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "postgres".to_string(),
                    ports: Some(vec![
                        ContainerPort {
                            name: Some("metrics".to_string()),
                            container_port: 9187,
                            ..ContainerPort::default()
                        },
                        ContainerPort {
                            name: Some("db".to_string()),
                            container_port: 5432,
                            ..ContainerPort::default()
                        },
                    ]),
                    ..Container::default()
                }],
                ..PodSpec::default()
            }),
            status: Some(PodStatus {
                pod_ip: Some("10.0.0.7".to_string()),
                ..PodStatus::default()
            }),
        };

        let member = member_from_pod(&pod, "5432");
        assert_eq!(member.name, "pg-replicaset-1");
        assert_eq!(member.uid, "pod-uid");
        assert_eq!(member.addr, "10.0.0.7");
        assert_eq!(member.port, "5432");
        assert_eq!(member.role, "follower");
    }

    #[test]
    fn db_port_falls_back_when_undeclared() {
        let pod = Pod::default();
        assert_eq!(db_port(&pod, "6000"), "6000");
    }
}
