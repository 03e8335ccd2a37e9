use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::resource::{ClusterResource, Resource};

/// One replica process participating in the cluster.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Member {
    /// Member name, unique within the cluster component.
    pub name: String,

    /// Stable unique id assigned by the platform. A new member reusing an
    /// old name gets a different id.
    pub uid: String,

    /// Network address of the member.
    pub addr: String,

    /// Database port the member serves on.
    pub port: String,

    /// Role hint from the platform (`leader`, `follower`, `learner`,
    /// `candidate`).
    pub role: String,
}

/// Engine-specific replication progress attached to the lease by its holder
/// on each renewal. Read-only to everyone else.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct DBState {
    /// Timestamp of the last replicated operation.
    pub op_timestamp: i64,

    /// Engine-specific fields (timeline id and the like).
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

/// The leader-holder record, renewed periodically by the current holder.
///
/// The engine stores the raw fields and performs no autonomous expiry
/// action; liveness is the control loop's call via [`is_expired`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Leader {
    /// Holder name; empty while the lease is released.
    pub name: String,

    /// When the current holder first acquired the lease, unix seconds.
    pub acquire_time: i64,

    /// When the holder last renewed, unix seconds.
    pub renew_time: i64,

    /// Lease TTL in seconds.
    pub ttl: i64,

    /// Replication progress the holder attached on its last renewal.
    pub db_state: Option<DBState>,

    /// Handle to the backing resource, used for conditional updates.
    pub resource: Resource,
}

impl Leader {
    /// Whether the lease has lapsed at `now` (unix seconds).
    #[must_use]
    pub const fn is_expired(&self, now: i64) -> bool {
        is_expired(self.renew_time, self.ttl, now)
    }
}

/// Pure lease-liveness comparison, isolated from I/O so it is independently
/// testable.
///
/// A non-positive TTL never describes a live lease. Assumes bounded clock
/// skew between the writer that stamped `renew_time` and the reader
/// supplying `now`; a skew larger than the renewal margin can flap the
/// verdict either way.
#[must_use]
pub const fn is_expired(renew_time: i64, ttl: i64, now: i64) -> bool {
    if ttl <= 0 {
        return true;
    }
    now > renew_time + ttl
}

/// A member marked for removal from HA tracking. Entries are retained, not
/// purged, after the removal finishes.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct MemberToDelete {
    /// Unique id the member had when the removal was requested.
    pub uid: String,

    /// Set once the removal completes.
    pub is_finished: bool,
}

/// Cluster-wide high-availability policy record.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HaConfig {
    /// Lease TTL in seconds.
    pub ttl: i64,

    /// Maximum replication lag tolerated when promoting a switchover
    /// candidate.
    pub max_lag_on_switchover: i64,

    /// Whether HA management is enabled.
    pub enabled: bool,

    /// Members pending removal, keyed by member name.
    pub delete_members: BTreeMap<String, MemberToDelete>,

    /// Handle to the backing resource; `None` until loaded or created.
    pub resource: Option<Resource>,
}

impl HaConfig {
    /// Whether `member` has a pending removal recorded. The stored unique id
    /// must match the member's current one; a new member reusing an old name
    /// is not the same removal target.
    #[must_use]
    pub fn is_deleting(&self, member: &Member) -> bool {
        self.delete_members
            .get(&member.name)
            .is_some_and(|d| d.uid == member.uid)
    }

    /// Whether `member`'s removal has finished. Same unique-id match rule as
    /// [`is_deleting`](Self::is_deleting).
    #[must_use]
    pub fn is_deleted(&self, member: &Member) -> bool {
        self.delete_members
            .get(&member.name)
            .is_some_and(|d| d.uid == member.uid && d.is_finished)
    }

    /// Records `member` for removal. In-memory only; persist with
    /// `DcsStore::update_ha_config`.
    pub fn add_member_to_delete(&mut self, member: &Member) {
        self.delete_members.insert(
            member.name.clone(),
            MemberToDelete {
                uid: member.uid.clone(),
                is_finished: false,
            },
        );
    }

    /// Flags `member`'s pending removal as finished. In-memory only.
    pub fn finish_deleted(&mut self, member: &Member) {
        if let Some(entry) = self.delete_members.get_mut(&member.name) {
            entry.is_finished = true;
        }
    }
}

/// An in-flight leadership handover request.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Switchover {
    /// When the handover was requested, unix seconds.
    pub scheduled_at: i64,

    /// Outgoing leader, if pinned by the requester; empty means "the
    /// current leader, whoever that is".
    pub leader: String,

    /// Target candidate, if pinned by the requester; empty means "any
    /// healthy member".
    pub candidate: String,
}

/// Point-in-time aggregate view of the cluster: topology, leader lease and
/// HA policy. Rebuilt on every `get_cluster` call, never cached across
/// calls by the engine's consumers.
#[derive(Clone, Debug, Default)]
pub struct Cluster {
    /// Namespace holding the cluster.
    pub namespace: String,

    /// `<cluster>-<component>`, the prefix all coordination resources share.
    pub cluster_comp_name: String,

    /// Desired replica count.
    pub replicas: i32,

    /// Members discovered from the platform's listing.
    pub members: Vec<Member>,

    /// The leader lease record, present whenever the lease resource exists
    /// (the holder name is empty while released).
    pub leader: Option<Leader>,

    /// The HA policy in effect.
    pub ha_config: HaConfig,

    /// Raw reference to the defining resource.
    pub resource: ClusterResource,

    /// DNS domain of the hosting platform, for member address construction.
    pub cluster_domain: String,
}

impl Cluster {
    /// Whether a member with `name` is present.
    #[must_use]
    pub fn has_member(&self, name: &str) -> bool {
        self.members.iter().any(|m| m.name == name)
    }

    /// Looks up a member by name.
    #[must_use]
    pub fn member_with_name(&self, name: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.name == name)
    }

    /// Looks up a member by its hostname (the leading DNS label of a
    /// headless-service address) or its raw network address.
    #[must_use]
    pub fn member_with_host(&self, host: &str) -> Option<&Member> {
        let leading = host.split('.').next().unwrap_or(host);
        self.members
            .iter()
            .find(|m| m.name == leading || m.addr == host)
    }

    /// The member currently holding the lease, if it is in the listing.
    #[must_use]
    pub fn leader_member(&self) -> Option<&Member> {
        let leader = self.leader.as_ref()?;
        if leader.name.is_empty() {
            return None;
        }
        self.member_with_name(&leader.name)
    }

    /// Names of all members.
    #[must_use]
    pub fn member_names(&self) -> Vec<String> {
        self.members.iter().map(|m| m.name.clone()).collect()
    }

    /// Headless-service addresses of all members, in
    /// `<member>.<workload>-headless.<namespace>.svc.<domain>:<port>` form.
    #[must_use]
    pub fn member_addrs(&self) -> Vec<String> {
        self.members
            .iter()
            .map(|m| {
                format!(
                    "{}.{}-headless.{}.svc.{}:{}",
                    m.name,
                    workload_name(&m.name),
                    self.namespace,
                    self.cluster_domain,
                    m.port
                )
            })
            .collect()
    }

    /// Whether some process currently claims the lease.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.leader.as_ref().is_some_and(|l| !l.name.is_empty())
    }
}

/// Strips the trailing ordinal from a member name to recover the owning
/// workload's name (`pg-cluster-2` → `pg-cluster`).
fn workload_name(member_name: &str) -> &str {
    member_name
        .rsplit_once('-')
        .map_or(member_name, |(base, _)| base)
}
