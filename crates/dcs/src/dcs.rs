//! The coordination engine: lease, HA-policy and switchover protocols over
//! a versioned resource store.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::codec;
use crate::error::{Error, StoreError, StoreErrorKind};
use crate::resource::Resource;
use crate::store::{ClusterSource, VersionedStore};
use crate::types::{Cluster, DBState, HaConfig, Leader, Member, Switchover};

const LEADER_SUFFIX: &str = "leader";
const HA_CONFIG_SUFFIX: &str = "haconfig";
const SWITCHOVER_SUFFIX: &str = "switchover";

/// Lease TTL applied when the configuration does not set one.
pub const DEFAULT_TTL: i64 = 30;

/// Static configuration of the coordination engine.
///
/// Construct one per process; the engine claims leadership under
/// `current_member` and addresses all coordination resources by
/// deterministic `<cluster>-<component>-<suffix>` names, so any process can
/// find them without a discovery step.
#[derive(Clone, Debug)]
pub struct DcsConfig {
    /// Cluster name.
    pub cluster_name: String,

    /// Component name within the cluster.
    pub component_name: String,

    /// Namespace holding the coordination resources.
    pub namespace: String,

    /// This process's member name.
    pub current_member: String,

    /// DNS domain of the hosting platform.
    pub cluster_domain: String,

    /// Lease TTL in seconds, used until an HA policy resource overrides it.
    pub ttl: i64,

    /// Default max replication lag tolerated on switchover.
    pub max_lag_on_switchover: i64,

    /// Whether HA management starts enabled.
    pub ha_enabled: bool,
}

impl DcsConfig {
    /// Configuration with default policy values.
    #[must_use]
    pub fn new(
        cluster_name: impl Into<String>,
        component_name: impl Into<String>,
        namespace: impl Into<String>,
        current_member: impl Into<String>,
    ) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            component_name: component_name.into(),
            namespace: namespace.into(),
            current_member: current_member.into(),
            cluster_domain: "cluster.local".to_string(),
            ttl: DEFAULT_TTL,
            max_lag_on_switchover: codec::DEFAULT_MAX_LAG_ON_SWITCHOVER,
            ha_enabled: true,
        }
    }

    /// `<cluster>-<component>`, the prefix all coordination resources share.
    #[must_use]
    pub fn cluster_comp_name(&self) -> String {
        format!("{}-{}", self.cluster_name, self.component_name)
    }
}

/// Optional overrides applied when the HA policy resource is first created.
/// Unset fields fall back to the engine configuration.
#[derive(Clone, Copy, Debug, Default)]
pub struct HaDefaults {
    /// Lease TTL in seconds.
    pub ttl: Option<i64>,

    /// Max replication lag tolerated on switchover.
    pub max_lag_on_switchover: Option<i64>,

    /// Whether HA management is enabled.
    pub enabled: Option<bool>,
}

/// Coordination engine over a versioned resource store.
///
/// Construct one per process and pass it by reference into every consumer.
/// The engine holds the last loaded cluster snapshot and nothing else: it
/// spawns no tasks, owns no timers, and performs no internal retries;
/// every failure is returned to the caller, who owns retry policy.
pub struct DcsStore<B> {
    backend: B,
    config: DcsConfig,
    cluster_comp_name: String,
    cluster: RwLock<Option<Cluster>>,
}

impl<B> DcsStore<B>
where
    B: VersionedStore + ClusterSource<Error = <B as VersionedStore>::Error>,
{
    /// Creates an engine over `backend`.
    #[must_use]
    pub fn new(backend: B, config: DcsConfig) -> Self {
        let cluster_comp_name = config.cluster_comp_name();
        Self {
            backend,
            config,
            cluster_comp_name,
            cluster: RwLock::new(None),
        }
    }

    /// This process's member identity.
    #[must_use]
    pub fn current_member(&self) -> &str {
        &self.config.current_member
    }

    /// Name of the leader lease resource.
    #[must_use]
    pub fn leader_name(&self) -> String {
        format!("{}-{LEADER_SUFFIX}", self.cluster_comp_name)
    }

    /// Name of the HA policy resource.
    #[must_use]
    pub fn ha_config_name(&self) -> String {
        format!("{}-{HA_CONFIG_SUFFIX}", self.cluster_comp_name)
    }

    /// Name of the switchover request resource.
    #[must_use]
    pub fn switchover_name(&self) -> String {
        format!("{}-{SWITCHOVER_SUFFIX}", self.cluster_comp_name)
    }

    fn now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
    }

    fn cluster_created_at(&self) -> Result<i64, Error> {
        self.cluster
            .read()
            .as_ref()
            .map(|c| c.resource.created_at)
            .ok_or(Error::NotInitialized)
    }

    /// Loads the cluster view and ensures the coordination resources exist:
    /// the HA policy resource and the leader lease resource are created if
    /// missing.
    pub async fn initialize(&self) -> Result<(), Error> {
        self.get_cluster().await?;
        match self.create_ha_config(HaDefaults::default()).await {
            Ok(()) | Err(Error::AlreadyExists { .. }) => {}
            Err(e) => return Err(e),
        }
        self.create_lease().await
    }

    /// Rebuilds the point-in-time cluster view from the store and replaces
    /// the held snapshot.
    pub async fn get_cluster(&self) -> Result<Cluster, Error> {
        let resource = self
            .backend
            .cluster()
            .await
            .map_err(|e| Error::from_store("get cluster", &self.cluster_comp_name, e))?;
        let members = self.get_members().await?;
        let leader = match self.get_leader_resource().await? {
            Some(leader_resource) => Some(codec::decode_leader(&leader_resource)?),
            None => None,
        };
        let ha_config = self.get_ha_config().await?;

        let cluster = Cluster {
            namespace: resource.namespace.clone(),
            cluster_comp_name: self.cluster_comp_name.clone(),
            replicas: resource.replicas,
            members,
            leader,
            ha_config,
            resource,
            cluster_domain: self.config.cluster_domain.clone(),
        };

        *self.cluster.write() = Some(cluster.clone());
        Ok(cluster)
    }

    /// Returns the held snapshot without touching the store.
    #[must_use]
    pub fn cluster_from_cache(&self) -> Option<Cluster> {
        self.cluster.read().clone()
    }

    /// Fetches the membership listing from the platform.
    pub async fn get_members(&self) -> Result<Vec<Member>, Error> {
        self.backend
            .members()
            .await
            .map_err(|e| Error::from_store("list members", &self.cluster_comp_name, e))
    }

    /// Raw fetch of the leader lease resource; `None` when absent.
    pub async fn get_leader_resource(&self) -> Result<Option<Resource>, Error> {
        let name = self.leader_name();
        self.backend
            .get(&name)
            .await
            .map_err(|e| Error::from_store("get", &name, e))
    }

    /// Read-only fetch of the current leader record. `None` when the lease
    /// resource is missing or records no holder; "no leader" is a valid,
    /// non-error state.
    pub async fn get_leader(&self) -> Result<Option<Leader>, Error> {
        let Some(resource) = self.get_leader_resource().await? else {
            return Ok(None);
        };
        let leader = codec::decode_leader(&resource)?;
        if leader.name.is_empty() {
            return Ok(None);
        }
        Ok(Some(leader))
    }

    /// Whether the leader lease resource belongs to the current cluster
    /// incarnation: its creation time is not earlier than the cluster
    /// resource's. A lease predating the cluster is a leftover from a
    /// previous incarnation and reports `false`. This is a generation
    /// tie-break, not a TTL check.
    pub async fn is_lease_exist(&self) -> Result<bool, Error> {
        let Some(leader_resource) = self.get_leader_resource().await? else {
            return Ok(false);
        };
        Ok(leader_resource.created_at >= self.cluster_created_at()?)
    }

    /// Creates the leader lease resource with this process as holder. A
    /// lease from the current cluster incarnation makes this a no-op, and
    /// losing the creation race to another member is also success, since
    /// exactly one creator wins.
    pub async fn create_lease(&self) -> Result<(), Error> {
        if self.is_lease_exist().await? {
            return Ok(());
        }

        let name = self.leader_name();
        let now = Self::now();
        let ttl = self.lease_ttl();
        let mut annotations = BTreeMap::new();
        codec::encode_lease(
            &mut annotations,
            &self.config.current_member,
            now,
            now,
            ttl,
            None,
        )?;

        match self.backend.create(&name, annotations).await {
            Ok(_) => {
                info!(name = %name, holder = %self.config.current_member, "created leader lease");
                Ok(())
            }
            Err(e) if e.kind() == StoreErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(Error::from_store("create", &name, e)),
        }
    }

    fn lease_ttl(&self) -> i64 {
        self.cluster
            .read()
            .as_ref()
            .map_or(self.config.ttl, |c| c.ha_config.ttl)
    }

    /// Claims the lease by conditionally rewriting the leader resource held
    /// in the loaded snapshot: holder becomes this process, with fresh
    /// acquire/renew stamps, the policy TTL and the attached replication
    /// state. Among several claimants racing from the same snapshot exactly
    /// one succeeds; the rest observe [`Error::Conflict`]. No retry happens
    /// here, retry cadence is the caller's.
    pub async fn attempt_acquire_lease(&self) -> Result<(), Error> {
        let (leader_resource, db_state, ttl) = {
            let guard = self.cluster.read();
            let cluster = guard.as_ref().ok_or(Error::NotInitialized)?;
            let leader = cluster.leader.as_ref().ok_or_else(|| Error::NotFound {
                name: self.leader_name(),
            })?;
            (
                leader.resource.clone(),
                leader.db_state.clone(),
                cluster.ha_config.ttl,
            )
        };

        let now = Self::now();
        let mut annotations = leader_resource.annotations.clone();
        codec::encode_lease(
            &mut annotations,
            &self.config.current_member,
            now,
            now,
            ttl,
            db_state.as_ref(),
        )?;

        let updated = self
            .backend
            .update(&leader_resource, annotations)
            .await
            .map_err(|e| Error::from_store("update", &leader_resource.name, e))?;
        info!(name = %updated.name, holder = %self.config.current_member, "acquired leadership lease");

        let leader = codec::decode_leader(&updated)?;
        if let Some(cluster) = self.cluster.write().as_mut() {
            cluster.leader = Some(leader);
        }
        Ok(())
    }

    /// Whether the loaded snapshot records this process as the lease
    /// holder. Pure read of the snapshot; no store access.
    #[must_use]
    pub fn has_lease(&self) -> bool {
        self.cluster
            .read()
            .as_ref()
            .and_then(|c| c.leader.as_ref())
            .is_some_and(|l| l.name == self.config.current_member)
    }

    /// Renews the lease: refreshes the renew stamp, TTL and replication
    /// state through a conditional update. Fails with [`Error::LostLease`]
    /// when the snapshot no longer records this process as holder: the
    /// cluster state has diverged from this process's belief and it must
    /// stop acting as leader.
    pub async fn update_lease(&self) -> Result<(), Error> {
        let (leader, ttl) = {
            let guard = self.cluster.read();
            let cluster = guard.as_ref().ok_or(Error::NotInitialized)?;
            let leader = cluster.leader.clone().ok_or_else(|| Error::NotFound {
                name: self.leader_name(),
            })?;
            (leader, cluster.ha_config.ttl)
        };

        if leader.name != self.config.current_member {
            return Err(Error::LostLease {
                holder: leader.name,
                identity: self.config.current_member.clone(),
            });
        }

        let mut annotations = leader.resource.annotations.clone();
        codec::encode_lease_renewal(&mut annotations, Self::now(), ttl, leader.db_state.as_ref())?;

        let updated = self
            .backend
            .update(&leader.resource, annotations)
            .await
            .map_err(|e| Error::from_store("update", &leader.resource.name, e))?;
        debug!(name = %updated.name, "renewed leadership lease");

        let decoded = codec::decode_leader(&updated)?;
        if let Some(cluster) = self.cluster.write().as_mut() {
            cluster.leader = Some(decoded);
        }
        Ok(())
    }

    /// Clears the holder and TTL state on the lease resource, leaving the
    /// resource itself in place so the lease lifecycle can continue.
    /// Releasing a lease recorded for a different holder fails with
    /// [`Error::LostLease`]; clearing an already-released lease succeeds.
    pub async fn release_lease(&self) -> Result<(), Error> {
        let leader = {
            let guard = self.cluster.read();
            let cluster = guard.as_ref().ok_or(Error::NotInitialized)?;
            cluster.leader.clone().ok_or_else(|| Error::NotFound {
                name: self.leader_name(),
            })?
        };

        if !leader.name.is_empty() && leader.name != self.config.current_member {
            return Err(Error::LostLease {
                holder: leader.name,
                identity: self.config.current_member.clone(),
            });
        }

        let mut annotations = leader.resource.annotations.clone();
        codec::encode_lease_release(&mut annotations);

        let updated = self
            .backend
            .update(&leader.resource, annotations)
            .await
            .map_err(|e| Error::from_store("update", &leader.resource.name, e))?;
        info!(name = %updated.name, "released leadership lease");

        let decoded = codec::decode_leader(&updated)?;
        if let Some(cluster) = self.cluster.write().as_mut() {
            cluster.leader = Some(decoded);
        }
        Ok(())
    }

    /// Attaches this process's latest replication snapshot to the held
    /// leader view; the next acquire or renewal persists it into the lease.
    pub fn set_db_state(&self, db_state: DBState) {
        let mut guard = self.cluster.write();
        match guard.as_mut().and_then(|c| c.leader.as_mut()) {
            Some(leader) => leader.db_state = Some(db_state),
            None => debug!("no leader record loaded, dropping db state"),
        }
    }

    /// Creates the HA policy resource. An existing resource from the
    /// current cluster incarnation yields [`Error::AlreadyExists`] and is
    /// left untouched; one left behind by a previous incarnation is deleted
    /// and recreated.
    pub async fn create_ha_config(&self, defaults: HaDefaults) -> Result<(), Error> {
        let name = self.ha_config_name();
        let cluster_created_at = self.cluster_created_at()?;

        let existing = self
            .backend
            .get(&name)
            .await
            .map_err(|e| Error::from_store("get", &name, e))?;
        if let Some(existing) = existing {
            if existing.created_at >= cluster_created_at {
                return Err(Error::AlreadyExists { name });
            }
            warn!(name = %name, "replacing HA config left by a previous cluster generation");
            self.backend
                .delete(&name)
                .await
                .map_err(|e| Error::from_store("delete", &name, e))?;
        }

        let config = HaConfig {
            ttl: defaults.ttl.unwrap_or(self.config.ttl),
            max_lag_on_switchover: defaults
                .max_lag_on_switchover
                .unwrap_or(self.config.max_lag_on_switchover),
            enabled: defaults.enabled.unwrap_or(self.config.ha_enabled),
            delete_members: BTreeMap::new(),
            resource: None,
        };
        let mut annotations = BTreeMap::new();
        codec::encode_ha_config(&mut annotations, &config)?;

        self.backend
            .create(&name, annotations)
            .await
            .map_err(|e| Error::from_store("create", &name, e))?;
        info!(name = %name, "created HA config");
        Ok(())
    }

    /// Parses the HA policy resource. Configuration defaults apply when the
    /// resource, or an individual annotation, is missing.
    pub async fn get_ha_config(&self) -> Result<HaConfig, Error> {
        let name = self.ha_config_name();
        let resource = self
            .backend
            .get(&name)
            .await
            .map_err(|e| Error::from_store("get", &name, e))?;
        match resource {
            Some(resource) => {
                codec::decode_ha_config(&resource, self.config.ttl, self.config.ha_enabled)
            }
            None => Ok(HaConfig {
                ttl: self.config.ttl,
                max_lag_on_switchover: self.config.max_lag_on_switchover,
                enabled: self.config.ha_enabled,
                delete_members: BTreeMap::new(),
                resource: None,
            }),
        }
    }

    /// Persists the HA policy held in the loaded snapshot through a
    /// conditional update. Fails with [`Error::NoHaConfig`] when the
    /// snapshot carries no backing resource handle (the policy was never
    /// loaded or created).
    pub async fn update_ha_config(&self) -> Result<(), Error> {
        let ha_config = {
            let guard = self.cluster.read();
            guard.as_ref().ok_or(Error::NotInitialized)?.ha_config.clone()
        };
        let Some(resource) = ha_config.resource.clone() else {
            return Err(Error::NoHaConfig {
                name: self.ha_config_name(),
            });
        };

        let mut annotations = resource.annotations.clone();
        codec::encode_ha_config(&mut annotations, &ha_config)?;

        let updated = self
            .backend
            .update(&resource, annotations)
            .await
            .map_err(|e| Error::from_store("update", &resource.name, e))?;
        debug!(name = %updated.name, "updated HA config");

        if let Some(cluster) = self.cluster.write().as_mut() {
            cluster.ha_config.resource = Some(updated);
        }
        Ok(())
    }

    /// Replaces the HA policy in the held snapshot, keeping the existing
    /// resource handle unless the replacement carries one. Persist with
    /// [`update_ha_config`](Self::update_ha_config).
    pub fn set_ha_config(&self, ha_config: HaConfig) -> Result<(), Error> {
        let mut guard = self.cluster.write();
        let cluster = guard.as_mut().ok_or(Error::NotInitialized)?;
        let keep = cluster.ha_config.resource.take();
        let mut next = ha_config;
        if next.resource.is_none() {
            next.resource = keep;
        }
        cluster.ha_config = next;
        Ok(())
    }

    /// Marks `member` for removal in the held snapshot. Persist with
    /// [`update_ha_config`](Self::update_ha_config).
    pub fn add_member_to_delete(&self, member: &Member) -> Result<(), Error> {
        let mut guard = self.cluster.write();
        let cluster = guard.as_mut().ok_or(Error::NotInitialized)?;
        cluster.ha_config.add_member_to_delete(member);
        Ok(())
    }

    /// Flags `member`'s pending removal as finished in the held snapshot.
    /// Persist with [`update_ha_config`](Self::update_ha_config).
    pub fn finish_deleted(&self, member: &Member) -> Result<(), Error> {
        let mut guard = self.cluster.write();
        let cluster = guard.as_mut().ok_or(Error::NotInitialized)?;
        cluster.ha_config.finish_deleted(member);
        Ok(())
    }

    /// Records a handover request. At least one of `leader` / `candidate`
    /// must be non-empty, and no unresolved switchover may exist for this
    /// cluster component; the returned error names the conflicting
    /// resource.
    pub async fn create_switchover(&self, leader: &str, candidate: &str) -> Result<(), Error> {
        if leader.is_empty() && candidate.is_empty() {
            return Err(Error::Validation {
                reason: "switchover needs a leader or a candidate".to_string(),
            });
        }

        let name = self.switchover_name();
        let existing = self
            .backend
            .get(&name)
            .await
            .map_err(|e| Error::from_store("get", &name, e))?;
        if let Some(existing) = existing {
            let pending = codec::decode_switchover(&existing)?;
            warn!(
                name = %name,
                leader = %pending.leader,
                candidate = %pending.candidate,
                "another switchover is still unresolved"
            );
            return Err(Error::AlreadyExists { name });
        }

        let mut annotations = BTreeMap::new();
        codec::encode_switchover(&mut annotations, Self::now(), leader, candidate);
        self.backend
            .create(&name, annotations)
            .await
            .map_err(|e| Error::from_store("create", &name, e))?;
        info!(name = %name, leader = %leader, candidate = %candidate, "created switchover request");
        Ok(())
    }

    /// Fetches the pending handover request; `None` when there is none.
    pub async fn get_switchover(&self) -> Result<Option<Switchover>, Error> {
        let name = self.switchover_name();
        let resource = self
            .backend
            .get(&name)
            .await
            .map_err(|e| Error::from_store("get", &name, e))?;
        match resource {
            Some(resource) => Ok(Some(codec::decode_switchover(&resource)?)),
            None => Ok(None),
        }
    }

    /// Removes the handover request. Deletion is deliberately not
    /// idempotent: [`Error::NotFound`] tells callers there was nothing to
    /// cancel.
    pub async fn delete_switchover(&self) -> Result<(), Error> {
        let name = self.switchover_name();
        self.backend
            .delete(&name)
            .await
            .map_err(|e| Error::from_store("delete", &name, e))?;
        info!(name = %name, "deleted switchover request");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_names_are_deterministic() {
        let config = DcsConfig::new("pg", "replicaset", "prod", "pg-replicaset-0");
        assert_eq!(config.cluster_comp_name(), "pg-replicaset");
    }

    #[test]
    fn config_defaults() {
        let config = DcsConfig::new("pg", "rs", "prod", "pg-rs-0");
        assert_eq!(config.ttl, DEFAULT_TTL);
        assert_eq!(
            config.max_lag_on_switchover,
            codec::DEFAULT_MAX_LAG_ON_SWITCHOVER
        );
        assert!(config.ha_enabled);
        assert_eq!(config.cluster_domain, "cluster.local");
    }
}
